mod paths;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use paths::UserConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agr::{ClusteringParams, SimilarityParams};

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Get or create a subdirectory under user config.
/// - [`subpath`]: If Some(P), a subdirectory will be created if necessary
///   and returned. If None, the root config directory will be returned.
pub fn get_or_create_user_config_path<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
    UserConfig::get_config_path(subpath)
}

/// Defaults for both analyses, as read from `config.toml`.
///
/// ```toml
/// [clustering]
/// eps_range = [0.3, 0.6]
/// min_samples_range = [4, 8]
/// noise_policy = "as_cluster"
///
/// [similarity]
/// top_k = 10
/// ```
///
/// Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub clustering: ClusteringParams,
    pub similarity: SimilarityParams,
}

impl AnalysisConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("AnalysisConfig::from_toml_str")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("AnalysisConfig::to_toml_string")
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("AnalysisConfig::load_from({})", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Read the user's config file, falling back to defaults when there is none.
    pub fn load_or_default() -> Result<Self> {
        let path = get_or_create_user_config_path::<&Path>(None)?.join(CONFIG_FILE_NAME);
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::agr::{embeddings::SentenceEmbeddingsModelType, model::NoisePolicy};

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::from_toml_str("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.clustering.eps_range, vec![0.1, 0.5, 1.0]);
        assert_eq!(config.clustering.min_samples_range, vec![5, 10, 15]);
        assert_eq!(config.clustering.max_combinations, Some(9));
        assert_eq!(config.clustering.label_column_index, Some(-1));
        assert_eq!(config.similarity.top_k, 5);
    }

    #[test]
    fn test_partial_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            "[clustering]\neps_range = [0.25]\nnoise_policy = \"as_cluster\"\nmfa_components = 2\n\n\
             [similarity]\nmodel = \"AllMiniLmL12V2\""
        )?;
        let config = AnalysisConfig::load_from(file.path())?;
        assert_eq!(config.clustering.eps_range, vec![0.25]);
        assert_eq!(config.clustering.min_samples_range, vec![5, 10, 15]);
        assert_eq!(config.clustering.noise_policy, NoisePolicy::AsCluster);
        assert_eq!(config.clustering.mfa_components, Some(2));
        assert_eq!(config.similarity.top_k, 5);
        assert_eq!(config.similarity.model, SentenceEmbeddingsModelType::AllMiniLmL12V2);
        Ok(())
    }

    #[test]
    fn test_round_trip_through_toml() -> Result<()> {
        let mut config = AnalysisConfig::default();
        config.similarity.top_k = 3;
        config.clustering.max_combinations = None;
        let text = config.to_toml_string()?;
        assert_eq!(AnalysisConfig::from_toml_str(&text)?.similarity.top_k, 3);
        Ok(())
    }

    #[test]
    fn test_bad_input() {
        assert!(AnalysisConfig::from_toml_str("[clustering]\neps_range = \"wide\"").is_err());
        assert!(AnalysisConfig::load_from("/nonexistent/agrupar/config.toml").is_err());
    }
}
