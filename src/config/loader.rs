//! Settings and test plan loader.
//!
//! This module provides functionality to load engine settings and test
//! plans from JSON files, command-line arguments, or default locations.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::settings::EngineSettings;
use crate::dns::types::TestConfig;
use crate::error::{Error, Result};

/// Settings file name inside the config directory.
const SETTINGS_FILE: &str = "settings.json";

/// Settings file looked up in the current directory.
const LOCAL_SETTINGS_FILE: &str = "dnspolicy.json";

/// A plan file holds one test or a list of tests.
#[derive(Deserialize)]
#[serde(untagged)]
enum PlanFile {
    Many(Vec<TestConfig>),
    Wrapped { tests: Vec<TestConfig> },
    One(Box<TestConfig>),
}

/// Settings and test plan loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Get the config directory path.
    #[must_use]
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dnspolicy")
    }

    /// Load settings from a JSON file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_settings_from_file<P: AsRef<Path>>(path: P) -> Result<EngineSettings> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let settings: EngineSettings = serde_json::from_str(&content)?;
        Self::check_settings(&settings)?;
        Ok(settings)
    }

    /// Load settings from the default locations.
    ///
    /// Searches in the following order:
    /// 1. `$CONFIG_DIR/dnspolicy/settings.json`
    /// 2. `dnspolicy.json` in current directory
    ///
    /// Falls back to built-in defaults when neither exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file exists but cannot be parsed.
    pub fn load_settings() -> Result<EngineSettings> {
        for path in [
            Self::config_dir().join(SETTINGS_FILE),
            PathBuf::from(LOCAL_SETTINGS_FILE),
        ] {
            if path.is_file() {
                tracing::debug!("loading settings from {}", path.display());
                return Self::load_settings_from_file(&path);
            }
        }
        tracing::debug!("no settings file found, using defaults");
        Ok(EngineSettings::default())
    }

    /// Write settings as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_settings<P: AsRef<Path>>(settings: &EngineSettings, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(settings)?)?;
        Ok(())
    }

    fn check_settings(settings: &EngineSettings) -> Result<()> {
        for (name, value) in [
            ("default_tolerance", settings.default_tolerance),
            ("high_volume_tolerance", settings.high_volume_tolerance),
            ("strict_tolerance", settings.strict_tolerance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::config(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }
        if settings.worker_pool_size == 0 || settings.max_in_flight == 0 {
            return Err(Error::config(
                "worker_pool_size and max_in_flight must be at least 1",
            ));
        }
        Ok(())
    }

    /// Load test configurations from a plan file.
    ///
    /// The file may contain a single test object, an array of tests, or an
    /// object with a `tests` array. Every test is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or a test is invalid.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let tests = ConfigLoader::load_test_plan("plan.json")?;
    /// for test in &tests {
    ///     println!("{} {}", test.policy_type, test.domain);
    /// }
    /// ```
    pub fn load_test_plan<P: AsRef<Path>>(path: P) -> Result<Vec<TestConfig>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let tests = match serde_json::from_str::<PlanFile>(&content)? {
            PlanFile::Many(tests) | PlanFile::Wrapped { tests } => tests,
            PlanFile::One(test) => vec![*test],
        };
        if tests.is_empty() {
            return Err(Error::config(format!(
                "{} contains no tests",
                path.as_ref().display()
            )));
        }
        for test in &tests {
            test.validate()?;
        }
        Ok(tests)
    }

    /// Parse expected weights from command-line arguments.
    ///
    /// # Arguments
    ///
    /// * `weights` - Strings in format "ENDPOINT=WEIGHT"
    ///
    /// # Errors
    ///
    /// Returns an error if an entry has no `=` or the weight is not an integer.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let args = vec!["10.0.0.1=70".to_string(), "10.0.1.0/24=30".to_string()];
    /// let weights = ConfigLoader::parse_weights(args)?;
    /// ```
    pub fn parse_weights(weights: Vec<String>) -> Result<BTreeMap<String, u32>> {
        let mut out = BTreeMap::new();
        for entry in weights {
            let (endpoint, weight) = entry
                .rsplit_once('=')
                .ok_or_else(|| Error::parse(format!("expected ENDPOINT=WEIGHT, got {entry}")))?;
            let endpoint = endpoint.trim();
            if endpoint.is_empty() {
                return Err(Error::parse(format!("missing endpoint in {entry}")));
            }
            let weight: u32 = weight
                .trim()
                .parse()
                .map_err(|_| Error::parse(format!("invalid weight in {entry}")))?;
            *out.entry(endpoint.to_string()).or_insert(0) += weight;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::types::PolicyType;
    use std::io::Write;

    #[test]
    fn test_parse_weights() {
        let args = vec![
            "10.0.0.1=70".to_string(),
            "10.0.1.0/24 = 30".to_string(),
        ];
        let weights = ConfigLoader::parse_weights(args).unwrap();
        assert_eq!(weights.get("10.0.0.1"), Some(&70));
        assert_eq!(weights.get("10.0.1.0/24"), Some(&30));
    }

    #[test]
    fn test_parse_weights_invalid() {
        assert!(ConfigLoader::parse_weights(vec!["10.0.0.1".into()]).is_err());
        assert!(ConfigLoader::parse_weights(vec!["10.0.0.1=heavy".into()]).is_err());
        assert!(ConfigLoader::parse_weights(vec!["=5".into()]).is_err());
    }

    #[test]
    fn test_load_plan_variants() {
        let dir = tempfile::tempdir().unwrap();

        let single = dir.path().join("single.json");
        std::fs::write(
            &single,
            r#"{"policy": "FAILOVER", "domain": "example.com", "primary_endpoint": "1.2.3.4"}"#,
        )
        .unwrap();
        let tests = ConfigLoader::load_test_plan(&single).unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].policy_type, PolicyType::Failover);

        let wrapped = dir.path().join("wrapped.json");
        let mut file = std::fs::File::create(&wrapped).unwrap();
        write!(
            file,
            r#"{{"tests": [
                {{"policy": "WEIGHTED", "domain": "a.example.com", "expected_weights": {{"A": 1}}}},
                {{"policy": "LATENCY", "domain": "b.example.com"}}
            ]}}"#
        )
        .unwrap();
        let tests = ConfigLoader::load_test_plan(&wrapped).unwrap();
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[1].policy_type, PolicyType::Latency);
    }

    #[test]
    fn test_load_plan_rejects_invalid_test() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"[{"policy": "WEIGHTED", "domain": "example.com"}]"#).unwrap();
        assert!(matches!(
            ConfigLoader::load_test_plan(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_settings_round_trip_and_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = EngineSettings::default();
        settings.max_in_flight = 4;
        ConfigLoader::save_settings(&settings, &path).unwrap();
        assert_eq!(ConfigLoader::load_settings_from_file(&path).unwrap(), settings);

        std::fs::write(&path, r#"{"default_tolerance": 1.5}"#).unwrap();
        assert!(ConfigLoader::load_settings_from_file(&path).is_err());
    }
}
