use serde::{Deserialize, Serialize};
use std::{fs::read_to_string, path::Path};

use crate::DmmlError;

/// What happens to the references pointing at a node when it leaves the scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingReferencePolicy {
    /// Keep the ID so the link is restored when a node with that ID comes back.
    #[default]
    KeepId,
    /// Clear the referencing slots.
    ClearId,
}

/// Scene behavior knobs, read from TOML:
///
/// ```toml
/// dangling_references = "keep_id"
/// prune_unimported_references = true
/// min_sorting_gap = 1e-9
/// event_log_limit = 1024
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub dangling_references: DanglingReferencePolicy,
    /// Drop references of imported nodes whose target is neither imported nor a singleton.
    pub prune_unimported_references: bool,
    /// Smallest gap kept between sibling sorting values before they are renumbered.
    pub min_sorting_gap: f64,
    /// Events retained for [crate::scene::Scene::take_events]. None keeps everything.
    pub event_log_limit: Option<usize>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        SceneConfig {
            dangling_references: DanglingReferencePolicy::KeepId,
            prune_unimported_references: true,
            min_sorting_gap: 1e-9,
            event_log_limit: Some(1024),
        }
    }
}

impl SceneConfig {
    pub fn from_toml_str(src: &str) -> Result<SceneConfig, DmmlError> {
        let config: SceneConfig = toml::from_str(src)?;
        if config.min_sorting_gap.is_nan() || config.min_sorting_gap <= 0.0 {
            return Err(DmmlError::Custom(format!(
                "min_sorting_gap must be positive, got {}",
                config.min_sorting_gap
            )));
        }
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<SceneConfig, DmmlError> {
        tracing::debug!("Reading {:?}", path.as_ref());
        let content = read_to_string(path)?;
        SceneConfig::from_toml_str(&content)
    }
}
