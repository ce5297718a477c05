//! Connection strings and SAS tokens.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use order_queue_core::queue::QueueError;
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

/// Parsed `Endpoint=sb://…;SharedAccessKeyName=…;SharedAccessKey=…` string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// HTTPS base URL of the namespace, without trailing slash
    pub endpoint: String,
    /// Shared access policy name
    pub key_name: String,
    /// Shared access key
    pub key: String,
    /// Queue named in the string, if any
    pub entity_path: Option<String>,
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint)
            .field("key_name", &self.key_name)
            .field("key", &"<redacted>")
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

impl FromStr for ConnectionString {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                QueueError::Configuration(format!("malformed connection string segment '{part}'"))
            })?;
            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.trim().to_string()),
                "sharedaccesskeyname" => key_name = Some(value.trim().to_string()),
                "sharedaccesskey" => key = Some(value.trim().to_string()),
                "entitypath" => entity_path = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let missing = |field: &str| QueueError::Configuration(format!("connection string has no {field}"));
        let endpoint = endpoint.ok_or_else(|| missing("Endpoint"))?;
        let host = endpoint
            .strip_prefix("sb://")
            .or_else(|| endpoint.strip_prefix("https://"))
            .ok_or_else(|| {
                QueueError::Configuration(format!("unsupported endpoint scheme in '{endpoint}'"))
            })?
            .trim_end_matches('/');
        if host.is_empty() {
            return Err(missing("Endpoint host"));
        }

        Ok(Self {
            endpoint: format!("https://{host}"),
            key_name: key_name.ok_or_else(|| missing("SharedAccessKeyName"))?,
            key: key.ok_or_else(|| missing("SharedAccessKey"))?,
            entity_path: entity_path.filter(|p| !p.is_empty()),
        })
    }
}

/// Build a `SharedAccessSignature` authorization header value for `resource_uri`,
/// valid until the unix timestamp `expiry`.
///
/// # Errors
///
/// Returns [`QueueError::Configuration`] if the key cannot be used for signing.
pub fn sas_token(
    resource_uri: &str,
    key_name: &str,
    key: &str,
    expiry: i64,
) -> Result<String, QueueError> {
    let encoded_uri = urlencoding::encode(resource_uri);
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| QueueError::Configuration(format!("invalid shared access key: {e}")))?;
    mac.update(format!("{encoded_uri}\n{expiry}").as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={encoded_uri}&sig={}&se={expiry}&skn={}",
        urlencoding::encode(&signature),
        urlencoding::encode(key_name)
    ))
}
