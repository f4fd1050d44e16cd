//! CLI configuration.
//!
//! One TOML document holds the output preference, the `[settings]` table and
//! the `[[clusters]]` array:
//!
//! ```toml
//! output_format = "table"
//!
//! [settings]
//! search_timeout_secs = 5
//!
//! [[clusters]]
//! id = 1
//! name = "staging"
//! base_url = "https://sso.staging.example.com"
//! realm = "demo"
//! credentials = { username = "admin", password_env = "STAGING_ADMIN_PASSWORD" }
//! ```

use std::path::{Path, PathBuf};

use kc_directory::{ClusterRegistry, DirectorySettings, FileClusterStore};
use serde::{Deserialize, Serialize};

use crate::{CliError, CliResult};

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Output format used when `--output` is not given.
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Directory tunables.
    #[serde(default)]
    pub settings: DirectorySettings,

    /// Registered clusters.
    #[serde(skip)]
    pub clusters: FileClusterStore,
}

impl CliConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location yields an empty configuration;
    /// a missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::config_path()?, false),
        };

        if !path.exists() {
            if explicit {
                return Err(CliError::Config(format!("{} does not exist", path.display())));
            }
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parses a configuration document.
    pub fn from_toml_str(content: &str) -> CliResult<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| CliError::Config(format!("failed to parse config: {e}")))?;
        config.clusters = FileClusterStore::from_toml_str(content)
            .map_err(|e| CliError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Gets the default configuration file path.
    pub fn config_path() -> CliResult<PathBuf> {
        let home = dirs_next::home_dir()
            .ok_or_else(|| CliError::Config("could not determine home directory".to_string()))?;
        Ok(home.join(".keycloak").join("kcmm.toml"))
    }

    /// Builds the cluster registry from the configured clusters.
    pub async fn registry(&self) -> CliResult<ClusterRegistry> {
        Ok(ClusterRegistry::from_store(&self.clusters).await?)
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kc_directory::ClusterId;

    const SAMPLE: &str = r#"
output_format = "json"

[settings]
search_timeout_secs = 3
search_parallelism = 2

[[clusters]]
id = 1
name = "staging"
base_url = "https://sso.staging.example.com"
realm = "demo"
credentials = { username = "admin", password_env = "STAGING_ADMIN_PASSWORD" }

[[clusters]]
id = 2
name = "prod"
base_url = "https://sso.example.com"
realm = "demo"
credentials = { username = "admin", password = "admin" }
"#;

    #[tokio::test]
    async fn parses_settings_and_clusters() {
        let config = CliConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.settings.search_timeout_secs, 3);
        assert_eq!(config.settings.prime_parallelism, 4);

        let registry = config.registry().await.unwrap();
        assert_eq!(registry.len(), 2);
        let staging = registry.get(ClusterId(1)).unwrap();
        assert_eq!(staging.name, "staging");
        assert_eq!(
            staging.credentials.password_env.as_deref(),
            Some("STAGING_ADMIN_PASSWORD")
        );
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = CliConfig::from_toml_str("").unwrap();
        assert_eq!(config.output_format, OutputFormat::Table);
        assert_eq!(config.settings, DirectorySettings::default());
    }

    #[test]
    fn duplicate_cluster_ids_are_rejected() {
        let doubled = format!(
            "{SAMPLE}\n[[clusters]]\nid = 2\nname = \"again\"\nbase_url = \"x\"\n\
             realm = \"r\"\ncredentials = {{ username = \"a\" }}\n"
        );
        assert!(matches!(
            CliConfig::from_toml_str(&doubled),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = CliConfig::load(Some(Path::new("/nonexistent/kcmm.toml"))).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}
