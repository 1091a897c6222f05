//! Generation config files
//!
//! ```json
//! {
//!   "scheduler": "euler_ancestral",
//!   "scheduler_config": { "inference_steps": 20, "seed": 7 },
//!   "latent": { "channels": 4, "frames": 24, "height": 32, "width": 32 },
//!   "sampler": { "guidance_scale": 5.0, "context": { "context_size": 16 } }
//! }
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use burn_diffusion::schedulers::{SchedulerConfig, SchedulerKind};
use burn_diffusion::SamplerOptions;
use serde::{Deserialize, Serialize};

/// Latent dimensions; more than one frame selects a video latent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatentShape {
    pub batch: usize,
    pub channels: usize,
    pub frames: usize,
    pub height: usize,
    pub width: usize,
}

impl Default for LatentShape {
    fn default() -> Self {
        Self {
            batch: 1,
            channels: 4,
            frames: 1,
            height: 64,
            width: 64,
        }
    }
}

impl LatentShape {
    pub fn is_video(&self) -> bool {
        self.frames > 1
    }

    pub fn image(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height, self.width]
    }

    pub fn video(&self) -> [usize; 5] {
        [self.batch, self.channels, self.frames, self.height, self.width]
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub scheduler: SchedulerKind,
    pub scheduler_config: SchedulerConfig,
    /// Loop options; when absent the guidance scale comes from `scheduler_config`
    pub sampler: Option<SamplerOptions>,
    pub latent: LatentShape,
    /// Start from a constant image latent with this value, denoised with
    /// `scheduler_config.strength`
    pub init_value: Option<f32>,
}

impl GenerationConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn sampler_options(&self) -> SamplerOptions {
        self.sampler
            .clone()
            .unwrap_or_else(|| SamplerOptions::from_config(&self.scheduler_config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_diffusion::ContextWindowConfig;

    #[test]
    fn test_partial_config() {
        let config: GenerationConfig = serde_json::from_str(
            r#"{
                "scheduler": "kdpm2",
                "scheduler_config": { "inference_steps": 12, "guidance_scale": 3.0 },
                "latent": { "frames": 24 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.scheduler, SchedulerKind::Kdpm2);
        assert_eq!(config.scheduler_config.inference_steps, 12);
        assert!(config.latent.is_video());
        assert_eq!(config.latent.video(), [1, 4, 24, 64, 64]);
        assert_eq!(config.sampler_options().guidance_scale, 3.0);
        assert_eq!(config.sampler_options().context, ContextWindowConfig::default());
        assert!(config.init_value.is_none());
    }

    #[test]
    fn test_explicit_sampler_options_win() {
        let config: GenerationConfig =
            serde_json::from_str(r#"{ "sampler": { "guidance_scale": 1.0 } }"#).unwrap();
        assert_eq!(config.sampler_options().guidance_scale, 1.0);
        assert!(!config.latent.is_video());
    }

    #[test]
    fn test_unknown_scheduler_is_rejected() {
        assert!(serde_json::from_str::<GenerationConfig>(r#"{ "scheduler": "dpm_solver" }"#).is_err());
    }
}
