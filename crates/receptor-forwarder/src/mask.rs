//! API key masking for logged payloads.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

const API_KEY_PATTERN: &str = r#""apiKey"\s*:\s*"*\w+(\w{5})"#;
const API_KEY_REPLACEMENT: &str = r#""apiKey":"*************************$1"#;

static API_KEY: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(API_KEY_PATTERN));

/// Replace every `"apiKey":"…"` value with stars, keeping its last five
/// characters.
pub fn mask_api_key(body: &str) -> Cow<'_, str> {
    match &*API_KEY {
        Ok(re) => re.replace_all(body, API_KEY_REPLACEMENT),
        Err(_) => Cow::Borrowed("<payload redacted>"),
    }
}
