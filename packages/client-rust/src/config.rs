//! Client-level configuration.

use serde::{Deserialize, Serialize};

/// Group queried when the caller names none and used as the fallback when
/// a preferred group has no healthy instance.
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// Timeout applied when no `X-Timeout` header overrides it, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 90;

/// Tunables for [`RpcClient`](crate::client::RpcClient).
///
/// Deserializable so services can embed it in their own config files; every
/// field has the documented default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Body encoding for outbound calls: `"x-form"`, `"x-json"`, or
    /// `"x-file"`. File uploads force multipart regardless.
    pub call_protocol: String,
    /// Per-call timeout in seconds, overridable per call via `X-Timeout`.
    pub default_timeout_secs: u64,
    /// Accept self-signed upstream certificates. Internal meshes commonly
    /// run with private CAs, so this defaults to on.
    pub accept_invalid_certs: bool,
    /// Registry group to resolve in when the caller names none.
    pub default_group: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_protocol: "x-form".to_string(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            accept_invalid_certs: true,
            default_group: DEFAULT_GROUP.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.call_protocol, "x-form");
        assert_eq!(config.default_timeout_secs, 90);
        assert!(config.accept_invalid_certs);
        assert_eq!(config.default_group, DEFAULT_GROUP);
    }

    #[test]
    fn partial_document_overrides_selectively() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"call_protocol":"x-json","default_timeout_secs":5}"#)
                .unwrap();
        assert_eq!(config.call_protocol, "x-json");
        assert_eq!(config.default_timeout_secs, 5);
        assert_eq!(config.default_group, DEFAULT_GROUP);
    }
}
