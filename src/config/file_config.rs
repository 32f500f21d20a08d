use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    // Feature configs
    pub activity: Option<ActivityConfig>,
    pub csv_import: Option<CsvImportConfig>,
    pub sync_conflicts: Option<SyncConflictsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ActivityConfig {
    pub inactivity_threshold_days: Option<u32>,
    pub sweep_interval_hours: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CsvImportConfig {
    pub matched_threshold: Option<f64>,
    pub low_confidence_threshold: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SyncConflictsConfig {
    pub simultaneous_threshold_ms: Option<i64>,
    pub enable_manual_review: Option<bool>,
    pub auto_resolve_after_days: Option<u32>,
    pub auto_resolve_interval_hours: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
db_dir = "/data"
port = 4000

[activity]
inactivity_threshold_days = 14

[csv_import]
matched_threshold = 0.9

[sync_conflicts]
enable_manual_review = false
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.db_dir.as_deref(), Some("/data"));
        assert_eq!(config.port, Some(4000));
        assert_eq!(
            config.activity.unwrap().inactivity_threshold_days,
            Some(14)
        );
        let csv = config.csv_import.unwrap();
        assert_eq!(csv.matched_threshold, Some(0.9));
        assert_eq!(csv.low_confidence_threshold, None);
        assert_eq!(
            config.sync_conflicts.unwrap().enable_manual_review,
            Some(false)
        );
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number").unwrap();

        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
