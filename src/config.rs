use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Deserialize, Clone)]
pub struct ClusterConfig {
    /// API server URL. When unset, the kubeconfig or in-cluster
    /// service account is used instead.
    #[serde(default)]
    pub server: Option<String>,
    /// Kubeconfig context to use when `server` is unset.
    #[serde(default)]
    pub context: Option<String>,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: Option<String>,
    /// File holding the bearer token.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// PEM bundle used to verify the API server certificate.
    #[serde(default)]
    pub certificate_authority: Option<PathBuf>,
    /// Base64-encoded PEM bundle, as found in kubeconfig files.
    #[serde(default)]
    pub certificate_authority_data: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Reject manifests whose namespace differs from `namespace`.
    #[serde(default)]
    pub enforce_namespace: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

// Manual Debug impl to avoid leaking the bearer token
impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("server", &self.server)
            .field("context", &self.context)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("token_file", &self.token_file)
            .field("certificate_authority", &self.certificate_authority)
            .field(
                "certificate_authority_data",
                &self.certificate_authority_data.as_ref().map(|_| "[REDACTED]"),
            )
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("namespace", &self.namespace)
            .field("enforce_namespace", &self.enforce_namespace)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            server: None,
            context: None,
            token: None,
            token_file: None,
            certificate_authority: None,
            certificate_authority_data: None,
            insecure_skip_tls_verify: false,
            namespace: default_namespace(),
            enforce_namespace: false,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplyConfig {
    /// Sent as `fieldManager` on every write.
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
    /// Run structural validation before touching the cluster.
    #[serde(default = "default_validate")]
    pub validate: bool,
    /// Extra kinds accepted by the decoder, as `group/version/Kind`
    /// (or `version/Kind` for the core group).
    #[serde(default)]
    pub kinds: Vec<String>,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            field_manager: default_field_manager(),
            validate: default_validate(),
            kinds: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CacheConfig {
    /// Period between full resyncs of the local mirror; 0 disables resync.
    #[serde(default)]
    pub resync_period_secs: u64,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_field_manager() -> String {
    "converge".to_string()
}

fn default_validate() -> bool {
    true
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("converge").required(false));
        }

        // Environment variable overrides with CONVERGE_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("CONVERGE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("converge.toml");
        fs::write(
            &path,
            r#"
[cluster]
server = "https://api.example.test:6443"
token = "s3cret"
namespace = "hive"
enforce_namespace = true

[apply]
validate = false
kinds = ["hive.openshift.io/v1/HiveConfig"]

[cache]
resync_period_secs = 30
"#,
        )
        .unwrap();

        let config = AppConfig::load(path.to_str()).unwrap();
        assert_eq!(
            config.cluster.server.as_deref(),
            Some("https://api.example.test:6443")
        );
        assert_eq!(config.cluster.namespace, "hive");
        assert!(config.cluster.enforce_namespace);
        assert_eq!(config.cluster.request_timeout_secs, 30);
        assert!(!config.apply.validate);
        assert_eq!(config.apply.field_manager, "converge");
        assert_eq!(config.apply.kinds, vec!["hive.openshift.io/v1/HiveConfig"]);
        assert_eq!(config.cache.resync_period_secs, 30);
    }

    #[test]
    fn test_debug_redacts_token() {
        let cluster = ClusterConfig {
            token: Some("s3cret".to_string()),
            ..ClusterConfig::default()
        };
        let rendered = format!("{cluster:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.cluster.namespace, "default");
        assert_eq!(config.cluster.server, None);
        assert!(config.apply.validate);
        assert_eq!(config.cache.resync_period_secs, 0);
    }
}
