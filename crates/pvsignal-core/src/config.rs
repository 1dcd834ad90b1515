use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PvError, Result};
use crate::types::{ClusterMethod, EmbedField};

/// Top-level configuration for pvsignal.
///
/// Loaded from `~/.pvsignal/config.toml` by default. Each section corresponds
/// to one pipeline stage or the HTTP surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PvConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
}

impl PvConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value is
    /// out of range.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PvConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| PvError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject parameter combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.ingest.default_severity) {
            return Err(PvError::Config(format!(
                "ingest.default_severity must be within 1..=5, got {}",
                self.ingest.default_severity
            )));
        }
        if self.embedding.dimensions == 0 {
            return Err(PvError::Config(
                "embedding.dimensions must be positive".to_string(),
            ));
        }
        if !(self.clustering.eps > 0.0 && self.clustering.eps <= 2.0) {
            return Err(PvError::Config(format!(
                "clustering.eps must be within (0, 2], got {}",
                self.clustering.eps
            )));
        }
        if self.clustering.min_points == 0 || self.clustering.min_cluster_size == 0 {
            return Err(PvError::Config(
                "clustering.min_points and clustering.min_cluster_size must be positive"
                    .to_string(),
            ));
        }
        if self.clustering.k == 0 {
            return Err(PvError::Config("clustering.k must be positive".to_string()));
        }
        if self.scoring.growth_window_days <= 0 {
            return Err(PvError::Config(
                "scoring.growth_window_days must be positive".to_string(),
            ));
        }
        if self.summary.max_concurrency == 0 {
            return Err(PvError::Config(
                "summary.max_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP surface and logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// API server port.
    pub port: u16,
    /// Maximum accepted upload size in megabytes.
    pub max_upload_mb: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            port: 5001,
            max_upload_mb: 50,
        }
    }
}

/// Normalizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Drop exact (drug, adverse event, report date) duplicates.
    pub dedupe: bool,
    /// Severity ordinal used when a row carries no severity value.
    pub default_severity: u8,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedupe: false,
            default_severity: 1,
        }
    }
}

/// Embedder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "hashing" (deterministic, built in) or "onnx" (requires the `onnx` feature).
    pub backend: String,
    /// Directory holding `model.onnx` and `tokenizer.json` for the onnx backend.
    pub model_dir: String,
    /// Vector dimension for the hashing backend.
    pub dimensions: usize,
    /// Which record text is embedded.
    pub field: EmbedField,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "hashing".to_string(),
            model_dir: "~/.pvsignal/models/all-MiniLM-L6-v2".to_string(),
            dimensions: 256,
            field: EmbedField::Combined,
        }
    }
}

/// Clusterer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub method: ClusterMethod,
    /// DBSCAN neighbourhood radius in cosine distance.
    pub eps: f64,
    /// DBSCAN core-point threshold (the point itself included). HDBSCAN min_samples.
    pub min_points: usize,
    /// Smallest group reported as a cluster; smaller groups become noise.
    pub min_cluster_size: usize,
    /// Number of partitions for k-means.
    pub k: usize,
    /// Lloyd iteration cap for k-means.
    pub max_iterations: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            method: ClusterMethod::Dbscan,
            eps: 0.35,
            min_points: 3,
            min_cluster_size: 3,
            k: 10,
            max_iterations: 100,
        }
    }
}

/// Signal scorer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Length of the recent and baseline windows used for growth rate.
    pub growth_window_days: i64,
    /// Signal score above which a cluster counts as high priority.
    pub high_priority_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            growth_window_days: 90,
            high_priority_threshold: 50.0,
        }
    }
}

/// Summary assembler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Number of top clusters summarized when the caller does not say.
    pub default_top_n: usize,
    /// Number of most frequent adverse event terms placed in each payload.
    pub top_k_events: usize,
    /// Maximum summarizer calls in flight at once.
    pub max_concurrency: usize,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            default_top_n: 5,
            top_k_events: 5,
            max_concurrency: 4,
            timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = PvConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.port, 5001);
        assert!(!config.ingest.dedupe);
        assert_eq!(config.ingest.default_severity, 1);
        assert_eq!(config.embedding.backend, "hashing");
        assert_eq!(config.embedding.dimensions, 256);
        assert_eq!(config.embedding.field, EmbedField::Combined);
        assert_eq!(config.clustering.method, ClusterMethod::Dbscan);
        assert_eq!(config.clustering.min_cluster_size, 3);
        assert_eq!(config.scoring.growth_window_days, 90);
        assert_eq!(config.summary.default_top_n, 5);
        assert_eq!(config.summary.max_concurrency, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"
port = 8080

[ingest]
dedupe = true

[embedding]
field = "adverse_event"
dimensions = 128

[clustering]
method = "kmeans"
k = 4

[summary]
timeout_ms = 2500
"#;
        let file = create_temp_config(content);
        let config = PvConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.port, 8080);
        assert!(config.ingest.dedupe);
        assert_eq!(config.embedding.field, EmbedField::AdverseEvent);
        assert_eq!(config.embedding.dimensions, 128);
        assert_eq!(config.clustering.method, ClusterMethod::KMeans);
        assert_eq!(config.clustering.k, 4);
        assert_eq!(config.summary.timeout_ms, 2500);
        // Untouched fields keep their defaults.
        assert_eq!(config.clustering.min_points, 3);
        assert_eq!(config.scoring.growth_window_days, 90);
    }

    #[test]
    fn test_load_rejects_out_of_range_values() {
        let file = create_temp_config("[ingest]\ndefault_severity = 9\n");
        let err = PvConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, PvError::Config(_)));

        let file = create_temp_config("[clustering]\neps = 0.0\n");
        assert!(PvConfig::load(file.path()).is_err());

        let file = create_temp_config("[summary]\nmax_concurrency = 0\n");
        assert!(PvConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_unknown_method_fails() {
        let file = create_temp_config("[clustering]\nmethod = \"spectral\"\n");
        assert!(PvConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = PvConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.port, 5001);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(PvConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = PvConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.clustering.method, ClusterMethod::Dbscan);
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = PvConfig::default();
        config.clustering.method = ClusterMethod::Hdbscan;
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = PvConfig::load(&path).unwrap();
        assert_eq!(reloaded.clustering.method, ClusterMethod::Hdbscan);
        assert_eq!(reloaded.summary.top_k_events, 5);
    }
}
