//! CLI configuration file
//!
//! ```toml
//! [client]
//! base_url = "https://school.instructure.com"
//!
//! [sync]
//! reference_outcome_id = "42"
//! update_overrides = true
//! ```

use anyhow::Context;
use outcome_sync_core::SyncConfig;
use outcome_sync_http::ClientConfig;
use serde::Deserialize;
use std::path::Path;

/// Both sections of the configuration file
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Settings {
    pub(crate) client: ClientConfig,
    #[serde(default)]
    pub(crate) sync: SyncConfig,
}

impl Settings {
    pub(crate) fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(input).context("invalid configuration")?;
        settings.sync.validate()?;
        Ok(settings)
    }

    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("loading {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn loads_both_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[client]
base_url = "https://lms.test"
timeout_secs = 5

[sync]
reference_outcome_id = "42"
max_concurrent_updates = 4
"#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.client.base_url, "https://lms.test");
        assert_eq!(settings.client.timeout_secs, 5);
        assert_eq!(settings.sync.reference_outcome_id, "42");
        assert_eq!(settings.sync.max_concurrent_updates, 4);
    }

    #[test]
    fn sync_section_defaults() {
        let settings = Settings::from_toml_str("[client]\nbase_url = \"https://lms.test\"\n").unwrap();
        assert_eq!(settings.sync, SyncConfig::default());
    }

    #[test]
    fn invalid_sync_section_is_rejected() {
        let result = Settings::from_toml_str(
            "[client]\nbase_url = \"https://lms.test\"\n[sync]\ncustom_grade_status = true\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_client_section_is_rejected() {
        assert!(Settings::from_toml_str("[sync]\ntolerance = 0.5\n").is_err());
    }
}
