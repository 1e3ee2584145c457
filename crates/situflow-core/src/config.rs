//! Container configuration, loadable from RON or TOML.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```ron
//! (
//!     label: "ui",
//!     protocol: (kind: cross_fade),
//!     initial_step: setup,
//! )
//! ```

use crate::error::ConfigError;
use crate::protocol::ProtocolConfig;
use crate::transition::TransitionStep;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Supported config file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Ron,
    Toml,
}

/// Detect the format of a config file from its extension.
pub fn detect_format(path: &Path) -> Result<ConfigFormat, ConfigError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(ConfigFormat::Ron),
        Some("toml") => Ok(ConfigFormat::Toml),
        _ => Err(ConfigError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Name of the container's root service scope, also used in logs.
    pub label: String,
    /// Protocol used when a request does not bring its own.
    pub protocol: ProtocolConfig,
    /// Step ceiling for requests that do not set one.
    pub initial_step: TransitionStep,
    /// Emit a `warn!` event for every rejected request.
    pub log_rejections: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            label: "situations".to_string(),
            protocol: ProtocolConfig::default(),
            initial_step: TransitionStep::Complete,
            log_rejections: true,
        }
    }
}

impl ContainerConfig {
    pub fn from_ron_str(content: &str) -> Result<Self, ConfigError> {
        ron::from_str(content).map_err(|e| ConfigError::Parse {
            file: "<string>".into(),
            detail: e.to_string(),
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            file: "<string>".into(),
            detail: e.to_string(),
        })
    }

    /// Read a config file, choosing the parser from its extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let parsed = match format {
            ConfigFormat::Ron => ron::from_str(&content).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| e.to_string()),
        };
        let config: Self = parsed.map_err(|detail| ConfigError::Parse {
            file: path.to_path_buf(),
            detail,
        })?;
        tracing::debug!(file = %path.display(), label = %config.label, "container config loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolKind;
    use std::fs;
    use std::path::PathBuf;

    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "situflow_config_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn defaults_use_out_in_and_complete() {
        let config = ContainerConfig::default();
        assert_eq!(config.protocol.kind, ProtocolKind::OutIn);
        assert!(config.protocol.concurrent_close);
        assert_eq!(config.initial_step, TransitionStep::Complete);
        assert!(config.log_rejections);
    }

    #[test]
    fn partial_ron_fills_defaults() {
        let config = ContainerConfig::from_ron_str(
            "(label: \"ui\", protocol: (kind: cross_fade), initial_step: setup)",
        )
        .unwrap();
        assert_eq!(config.label, "ui");
        assert_eq!(config.protocol.kind, ProtocolKind::CrossFade);
        assert!(config.protocol.concurrent_open);
        assert_eq!(config.initial_step, TransitionStep::Setup);
        assert!(config.log_rejections);
    }

    #[test]
    fn toml_parses_nested_protocol() {
        let config = ContainerConfig::from_toml_str(
            r#"
            log_rejections = false

            [protocol]
            kind = "out_in"
            concurrent_close = false
            "#,
        )
        .unwrap();
        assert!(!config.log_rejections);
        assert!(!config.protocol.concurrent_close);
        assert!(config.protocol.concurrent_open);
    }

    #[test]
    fn bad_input_reports_parse_error() {
        let err = ContainerConfig::from_ron_str("(initial_step: sideways)").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_picks_parser_by_extension() {
        let dir = make_test_dir("load");
        let ron_path = dir.join("ui.ron");
        fs::write(&ron_path, "(label: \"hud\")").unwrap();
        assert_eq!(ContainerConfig::load(&ron_path).unwrap().label, "hud");

        let toml_path = dir.join("ui.toml");
        fs::write(&toml_path, "label = \"menu\"").unwrap();
        assert_eq!(ContainerConfig::load(&toml_path).unwrap().label, "menu");

        let yaml_path = dir.join("ui.yaml");
        fs::write(&yaml_path, "label: x").unwrap();
        assert!(matches!(
            ContainerConfig::load(&yaml_path),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ContainerConfig::load(Path::new("/nonexistent/situflow.ron")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
