use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Application settings from `settings.yaml` (and `MLOXMAKER_*` environment overrides).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Interchange file holding the persisted rule set
    #[serde(default = "default_ruleset_file")]
    pub ruleset_file: Utf8PathBuf,

    /// Game data directory scanned for plugin files
    #[serde(default)]
    pub data_dir: Option<Utf8PathBuf>,

    /// Write mlox exports with notes and references as comments
    #[serde(default = "default_true")]
    pub export_comments: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_true")]
    pub console: bool,

    #[serde(default)]
    pub file: bool,

    #[serde(default = "default_log_dir")]
    pub dir: Utf8PathBuf,

    #[serde(default = "default_log_prefix")]
    pub prefix: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: true,
            file: false,
            dir: default_log_dir(),
            prefix: default_log_prefix(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            ruleset_file: default_ruleset_file(),
            data_dir: None,
            export_comments: true,
        }
    }
}

impl Settings {
    /// Whether debug-level output was requested.
    pub fn debug_mode(&self) -> bool {
        matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "debug" | "trace"
        )
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("logs")
}

fn default_log_prefix() -> String {
    "mloxmaker".to_string()
}

fn default_ruleset_file() -> Utf8PathBuf {
    Utf8PathBuf::from("ruleset.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.logging.level, "info");
        assert!(settings.logging.console);
        assert!(!settings.logging.file);
        assert_eq!(settings.ruleset_file, "ruleset.yaml");
        assert!(settings.data_dir.is_none());
        assert!(!settings.debug_mode());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "logging:\n  level: debug\n";
        let settings: Settings = serde_yaml_ng::from_str(yaml).unwrap();

        assert!(settings.debug_mode());
        assert!(settings.logging.console);
        assert_eq!(settings.logging.prefix, "mloxmaker");
        assert!(settings.export_comments);
    }
}
