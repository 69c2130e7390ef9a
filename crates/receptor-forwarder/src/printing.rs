//! Dry-run transport: logs payloads instead of sending them.

use tracing::info;

use crate::error::TransportError;
use crate::mask::mask_api_key;
use crate::transport::Transport;

/// Pretty-prints each payload at `info` and reports success.
#[derive(Debug, Default, Clone)]
pub struct PrintingTransport;

impl PrintingTransport {
    /// Mask the body, then pretty-print it if it is JSON.
    pub fn render(body: &[u8]) -> String {
        let masked = mask_api_key(&String::from_utf8_lossy(body)).into_owned();
        serde_json::from_str::<serde_json::Value>(&masked)
            .ok()
            .and_then(|value| serde_json::to_string_pretty(&value).ok())
            .unwrap_or(masked)
    }
}

impl Transport for PrintingTransport {
    async fn post(&self, path: &str, body: Vec<u8>) -> Result<(), TransportError> {
        info!(%path, bytes = body.len(), "dry run payload:\n{}", Self::render(&body));
        Ok(())
    }
}
