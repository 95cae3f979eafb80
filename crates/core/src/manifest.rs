use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Payload of the configuration endpoint. Only `assetId` matters here; every
/// other field the endpoint returns is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(rename = "assetId", default)]
    pub asset_id: Option<String>,
}

impl RemoteConfig {
    /// The configured id, with blank strings treated as "nothing configured".
    pub fn configured_id(&self) -> Option<&str> {
        self.asset_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// The single durable record remembered between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMetadata {
    #[serde(rename = "assetId")]
    pub asset_id: String,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "savedAt")]
    pub saved_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `GET` endpoint returning `{ "assetId": ... }`.
    pub config_url: String,
    /// Base the asset id is appended to, e.g. `https://host/api/logo`.
    pub asset_base_url: String,
    pub request_timeout_ms: u64,
    /// Upper bound for a waiter parked behind an in-flight resolution.
    pub wait_timeout_ms: u64,
    pub cache_bust_param: String,
    pub max_redirects: u8,
    pub metadata_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            config_url: "http://127.0.0.1:8080/api/config".to_string(),
            asset_base_url: "http://127.0.0.1:8080/api/logo".to_string(),
            request_timeout_ms: 5_000,
            wait_timeout_ms: 10_000,
            cache_bust_param: "t".to_string(),
            max_redirects: 5,
            metadata_path: None,
        }
    }
}

impl CacheConfig {
    pub fn new(config_url: impl Into<String>, asset_base_url: impl Into<String>) -> Self {
        Self {
            config_url: config_url.into(),
            asset_base_url: asset_base_url.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_config_ignores_unrelated_fields() {
        let parsed: RemoteConfig = serde_json::from_str(
            r#"{ "assetId": "brand.png", "companyName": "Acme", "currency": "EUR" }"#,
        )
        .unwrap();
        assert_eq!(parsed.configured_id(), Some("brand.png"));
    }

    #[test]
    fn missing_null_or_blank_id_means_nothing_configured() {
        for body in [r#"{}"#, r#"{ "assetId": null }"#, r#"{ "assetId": "  " }"#] {
            let parsed: RemoteConfig = serde_json::from_str(body).unwrap();
            assert_eq!(parsed.configured_id(), None, "body: {}", body);
        }
    }

    #[test]
    fn partial_config_file_falls_back_to_defaults() {
        let config: CacheConfig = toml::from_str(
            r#"
            config_url = "https://admin.example/api/settings"
            request_timeout_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.config_url, "https://admin.example/api/settings");
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.wait_timeout(), Duration::from_secs(10));
        assert_eq!(config.cache_bust_param, "t");
    }
}
