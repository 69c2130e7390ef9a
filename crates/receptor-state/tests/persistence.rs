//! State survives a store being dropped and reopened on the same root.

use receptor_state::{CheckStateStore, EMPTY_STATE, StateConfig};

#[test]
fn value_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = CheckStateStore::new(StateConfig::new(dir.path()));
        store.set("check-1:offset", r#"{"offset":42}"#).unwrap();
        store.set("check-1:offset", r#"{"offset":43}"#).unwrap();
    }

    let reopened = CheckStateStore::new(StateConfig::new(dir.path()));
    assert_eq!(reopened.get("check-1:offset").unwrap(), r#"{"offset":43}"#);
    assert_eq!(reopened.get("check-1:never").unwrap(), EMPTY_STATE);
}

#[test]
fn get_or_default_swallows_read_errors() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the state file should be makes the read fail.
    std::fs::create_dir_all(dir.path().join("c").join("k")).unwrap();
    let store = CheckStateStore::new(StateConfig::new(dir.path()));
    assert!(store.get("c:k").is_err());
    assert_eq!(store.get_or_default("c:k"), EMPTY_STATE);
}
