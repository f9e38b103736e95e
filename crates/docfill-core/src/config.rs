use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable overriding the headless office binary
pub const CONVERTER_BINARY_ENV: &str = "LIBREOFFICE";
/// Environment variable overriding the script runtime of the primary merge strategy
pub const NODE_BINARY_ENV: &str = "DOCFILL_NODE_BINARY";
/// Environment variable overriding the document-processing engine
pub const GHOSTSCRIPT_BINARY_ENV: &str = "DOCFILL_GS_BINARY";
/// Environment variable overriding the PDF concatenation utility
pub const PDFUNITE_BINARY_ENV: &str = "DOCFILL_PDFUNITE_BINARY";
/// Environment variable naming the script runtime's library directory
pub const LIBRARY_DIR_ENV: &str = "NODE_PATH";

/// Headless office converter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Explicit converter binary (path or bare name). Wins over `$LIBREOFFICE`.
    #[serde(default)]
    pub binary: Option<PathBuf>,

    /// Deadline for one conversion in seconds (0 = no deadline)
    #[serde(default = "default_converter_timeout_secs")]
    pub timeout_secs: u64,

    /// Run each conversion with its own user profile inside the scratch directory
    #[serde(default = "default_true")]
    pub isolated_profile: bool,
}

const fn default_converter_timeout_secs() -> u64 {
    120
}

const fn default_true() -> bool {
    true
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            binary: None,
            timeout_secs: default_converter_timeout_secs(),
            isolated_profile: true,
        }
    }
}

/// PDF merge cascade configuration.
///
/// Binary fields win over their environment variables, which win over a
/// `PATH` lookup. All of them are consulted per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub node_binary: Option<PathBuf>,

    #[serde(default)]
    pub ghostscript_binary: Option<PathBuf>,

    #[serde(default)]
    pub pdfunite_binary: Option<PathBuf>,

    /// Merge script run by the script runtime
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,

    /// Library directory exported as `NODE_PATH` to the merge script.
    /// Defaults to `$NODE_PATH`, then `node_modules` beside the script's parent.
    #[serde(default)]
    pub library_dir: Option<PathBuf>,

    /// Deadline per strategy attempt in seconds (0 = no deadline)
    #[serde(default = "default_merge_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_script_path() -> PathBuf {
    PathBuf::from("scripts").join("merge_pdf.js")
}

const fn default_merge_timeout_secs() -> u64 {
    60
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            node_binary: None,
            ghostscript_binary: None,
            pdfunite_binary: None,
            script_path: default_script_path(),
            library_dir: None,
            timeout_secs: default_merge_timeout_secs(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Converter settings
    #[serde(default)]
    pub converter: ConverterConfig,

    /// Merge cascade settings
    #[serde(default)]
    pub merge: MergeConfig,

    /// Parent directory for per-request scratch directories (defaults to the system temp dir)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, crate::error::Error> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::error::Error::ConfigLoad(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::Error::ConfigLoad(format!("Failed to parse config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations (~/.config/docfill/config.toml, ./config.toml)
    pub fn load() -> Self {
        // Try user config
        if let Some(config_dir) = crate::util::config_dir() {
            let user_config = config_dir.join("docfill").join("config.toml");
            if user_config.exists() {
                match Self::from_file(&user_config) {
                    Ok(config) => {
                        tracing::debug!("Loaded config from {}", user_config.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // Try local config
        let local_config = std::path::PathBuf::from("config.toml");
        if local_config.exists() {
            match Self::from_file(&local_config) {
                Ok(config) => {
                    tracing::debug!("Loaded config from ./config.toml");
                    return config;
                }
                Err(e) => {
                    tracing::warn!("Failed to load ./config.toml: {}", e);
                }
            }
        }

        // Return defaults
        tracing::debug!("No config file found, using defaults");
        Self::default()
    }

    /// Check values that have no usable meaning when empty.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.merge.script_path.as_os_str().is_empty() {
            return Err(crate::error::Error::ConfigInvalid {
                field: "merge.script_path".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(dir) = &self.scratch_dir
            && dir.as_os_str().is_empty()
        {
            return Err(crate::error::Error::ConfigInvalid {
                field: "scratch_dir".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.converter.timeout_secs, 120);
        assert!(config.converter.isolated_profile);
        assert_eq!(config.merge.timeout_secs, 60);
        assert_eq!(config.merge.script_path, PathBuf::from("scripts/merge_pdf.js"));
        assert!(config.scratch_dir.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [converter]
            binary = "/opt/libreoffice/program/soffice"

            [merge]
            timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(
            config.converter.binary,
            Some(PathBuf::from("/opt/libreoffice/program/soffice"))
        );
        assert_eq!(config.converter.timeout_secs, 120);
        assert_eq!(config.merge.timeout_secs, 5);
        assert!(config.merge.node_binary.is_none());
    }

    #[test]
    fn test_from_file_rejects_empty_script_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[merge]\nscript_path = \"\"\n").unwrap();

        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, crate::error::Error::ConfigInvalid { .. }));
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[converter\n").unwrap();

        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, crate::error::Error::ConfigLoad(_)));
    }
}
