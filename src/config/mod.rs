use crate::models::Settings;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use ::config::{Config, Environment, File};
use std::fs;

/// Prefix for environment overrides, e.g. `MLOXMAKER_LOGGING__LEVEL=debug`.
pub const ENV_PREFIX: &str = "MLOXMAKER";

/// Loads and saves `settings.yaml` in the data directory.
///
/// Settings are layered: built-in defaults, then the YAML file (if present),
/// then `MLOXMAKER_*` environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager, creating `config_dir` if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join("settings.yaml"),
            config_dir,
        })
    }

    /// Load settings from the file and the process environment.
    pub fn load_settings(&self) -> Result<Settings> {
        self.load_settings_with(Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load_settings_with(&self, environment: Environment) -> Result<Settings> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
        }

        let settings: Settings = Config::builder()
            .add_source(File::from(self.settings_path.as_std_path()).required(false))
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to read settings: {}", self.settings_path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::debug!("Loaded settings from {}", self.settings_path);
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    /// Rule set file location; relative paths resolve against the config directory.
    pub fn ruleset_path(&self, settings: &Settings) -> Utf8PathBuf {
        self.resolve(&settings.ruleset_file)
    }

    /// Log directory location; relative paths resolve against the config directory.
    pub fn log_dir(&self, settings: &Settings) -> Utf8PathBuf {
        self.resolve(&settings.logging.dir)
    }

    fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    fn env_with(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigManager::environment().source(Some(map))
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        let settings = manager.load_settings_with(env_with(&[])).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load_settings() {
        let (manager, _temp_dir) = create_test_config_manager();

        let mut settings = Settings::default();
        settings.logging.level = "debug".to_string();
        settings.data_dir = Some(Utf8PathBuf::from("/games/Morrowind/Data Files"));
        manager.save_settings(&settings).unwrap();

        let loaded = manager.load_settings_with(env_with(&[])).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_environment_overrides_file() {
        let (manager, _temp_dir) = create_test_config_manager();
        manager.save_settings(&Settings::default()).unwrap();

        let loaded = manager
            .load_settings_with(env_with(&[
                ("MLOXMAKER_LOGGING__LEVEL", "trace"),
                ("MLOXMAKER_EXPORT_COMMENTS", "false"),
            ]))
            .unwrap();

        assert_eq!(loaded.logging.level, "trace");
        assert!(!loaded.export_comments);
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let (manager, _temp_dir) = create_test_config_manager();
        let settings = Settings::default();

        assert_eq!(
            manager.ruleset_path(&settings),
            manager.config_dir().join("ruleset.yaml")
        );
        assert_eq!(manager.log_dir(&settings), manager.config_dir().join("logs"));
    }
}
