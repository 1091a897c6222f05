//! Scheduler configuration
//!
//! [`SchedulerConfig`] is created once per generation request and never
//! mutated afterwards. Every field has a default, so JSON configs may be
//! partial:
//!
//! ```json
//! { "inference_steps": 20, "prediction_type": "v_prediction", "use_karras_sigmas": true }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Implements `name()`, `Display` and `FromStr` from one name table
macro_rules! named_enum {
    ($ty:ident, $what:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Every variant, in declaration order
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn name(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = SchedulerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
                $ty::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name() == normalized)
                    .ok_or_else(|| SchedulerError::config(format!("unknown {} '{}'", $what, s)))
            }
        }
    };
}

// ============================================================================
// Option enums
// ============================================================================

/// Scheduler algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Ddim,
    Ddpm,
    DdpmWuerstchen,
    #[default]
    Euler,
    EulerAncestral,
    FlowMatchEulerDiscrete,
    FlowMatchEulerDynamic,
    Kdpm2,
    Kdpm2Ancestral,
    Lms,
    Lcm,
    Locomotion,
}

named_enum!(SchedulerKind, "scheduler", {
    Ddim => "ddim",
    Ddpm => "ddpm",
    DdpmWuerstchen => "ddpm_wuerstchen",
    Euler => "euler",
    EulerAncestral => "euler_ancestral",
    FlowMatchEulerDiscrete => "flow_match_euler_discrete",
    FlowMatchEulerDynamic => "flow_match_euler_dynamic",
    Kdpm2 => "kdpm2",
    Kdpm2Ancestral => "kdpm2_ancestral",
    Lms => "lms",
    Lcm => "lcm",
    Locomotion => "locomotion",
});

/// How betas are spread over the training timesteps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSchedule {
    Linear,
    /// Linear in √β (Stable Diffusion)
    #[default]
    ScaledLinear,
    /// Betas derived from an ᾱ(t) curve, see [`AlphaTransform`]
    SquaredCosCapV2,
}

named_enum!(BetaSchedule, "beta schedule", {
    Linear => "linear",
    ScaledLinear => "scaled_linear",
    SquaredCosCapV2 => "squared_cos_cap_v2",
});

/// ᾱ(t) curve used by [`BetaSchedule::SquaredCosCapV2`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlphaTransform {
    /// `cos((t + 0.008) / 1.008 · π/2)²`
    #[default]
    Cosine,
    /// `exp(-12 t)`
    Exponential,
}

named_enum!(AlphaTransform, "alpha transform", {
    Cosine => "cosine",
    Exponential => "exponential",
});

/// Model prediction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    /// The model predicts the added noise ε (SD 1.x, SDXL)
    #[default]
    Epsilon,
    /// The model predicts the clean sample x₀
    Sample,
    /// The model predicts the velocity v (SD 2.x)
    #[serde(rename = "v_prediction", alias = "variable_prediction")]
    VariablePrediction,
}

named_enum!(PredictionType, "prediction type", {
    Epsilon => "epsilon",
    Sample => "sample",
    VariablePrediction => "v_prediction",
});

/// DDPM posterior variance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceType {
    #[default]
    FixedSmall,
    FixedSmallLog,
    FixedLarge,
    FixedLargeLog,
    /// Variance predicted by the model in the second half of the channel axis
    Learned,
    /// Interpolation weight between the small and large log-variances, predicted by the model
    LearnedRange,
}

named_enum!(VarianceType, "variance type", {
    FixedSmall => "fixed_small",
    FixedSmallLog => "fixed_small_log",
    FixedLarge => "fixed_large",
    FixedLargeLog => "fixed_large_log",
    Learned => "learned",
    LearnedRange => "learned_range",
});

impl VarianceType {
    /// Whether the model output carries a predicted variance channel block
    pub fn is_learned(&self) -> bool {
        matches!(self, VarianceType::Learned | VarianceType::LearnedRange)
    }
}

/// How inference timesteps are picked from the training range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestepSpacing {
    #[default]
    Linspace,
    Leading,
    Trailing,
}

named_enum!(TimestepSpacing, "timestep spacing", {
    Linspace => "linspace",
    Leading => "leading",
    Trailing => "trailing",
});

// ============================================================================
// SchedulerConfig
// ============================================================================

/// Immutable scheduler options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of denoising steps
    pub inference_steps: usize,
    /// Number of timesteps the model was trained with
    pub train_timesteps: usize,
    pub beta_schedule: BetaSchedule,
    pub beta_start: f32,
    pub beta_end: f32,
    /// Upper bound on betas for [`BetaSchedule::SquaredCosCapV2`]
    pub maximum_beta: f32,
    pub alpha_transform: AlphaTransform,
    pub prediction_type: PredictionType,
    pub variance_type: VarianceType,
    pub timestep_spacing: TimestepSpacing,
    /// Added to every timestep under [`TimestepSpacing::Leading`]
    pub steps_offset: usize,
    /// Remap sigmas onto the Karras et al. (ρ = 7) schedule
    pub use_karras_sigmas: bool,
    /// Clip predicted x₀ to `±clip_sample_range`
    pub clip_sample: bool,
    pub clip_sample_range: f32,
    /// Dynamic thresholding of predicted x₀ (Imagen)
    pub thresholding: bool,
    pub dynamic_thresholding_ratio: f32,
    pub sample_max_value: f32,
    /// DDIM stochasticity (0 = deterministic)
    pub eta: f32,
    /// Classifier-free guidance scale
    pub guidance_scale: f32,
    /// Fraction of the schedule to run for image-to-latent (1.0 = all of it)
    pub strength: f32,
    /// Flow-matching timestep shift
    pub shift: f32,
    /// LCM distillation schedule length
    pub original_inference_steps: usize,
    /// Frames per noise block for Locomotion video latents
    pub motion_noise_context: usize,
    /// Seed for the scheduler's noise generator
    pub seed: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            inference_steps: 30,
            train_timesteps: 1000,
            beta_schedule: BetaSchedule::ScaledLinear,
            beta_start: 0.00085,
            beta_end: 0.012,
            maximum_beta: 0.999,
            alpha_transform: AlphaTransform::Cosine,
            prediction_type: PredictionType::Epsilon,
            variance_type: VarianceType::FixedSmall,
            timestep_spacing: TimestepSpacing::Linspace,
            steps_offset: 0,
            use_karras_sigmas: false,
            clip_sample: false,
            clip_sample_range: 1.0,
            thresholding: false,
            dynamic_thresholding_ratio: 0.995,
            sample_max_value: 1.0,
            eta: 0.0,
            guidance_scale: 7.5,
            strength: 0.6,
            shift: 1.0,
            original_inference_steps: 50,
            motion_noise_context: 16,
            seed: 0,
        }
    }
}

impl SchedulerConfig {
    /// Config with the given step count and defaults elsewhere
    pub fn with_steps(inference_steps: usize) -> Self {
        Self {
            inference_steps,
            ..Default::default()
        }
    }

    /// Reject configurations no scheduler can run
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.inference_steps == 0 {
            return Err(SchedulerError::config("inference_steps must be at least 1"));
        }
        if self.train_timesteps == 0 {
            return Err(SchedulerError::config("train_timesteps must be at least 1"));
        }
        if self.inference_steps > self.train_timesteps {
            return Err(SchedulerError::config(format!(
                "inference_steps ({}) exceeds train_timesteps ({})",
                self.inference_steps, self.train_timesteps
            )));
        }
        if !(self.beta_start > 0.0 && self.beta_start < self.beta_end && self.beta_end < 1.0) {
            return Err(SchedulerError::config(format!(
                "beta range {}..{} must be increasing within (0, 1)",
                self.beta_start, self.beta_end
            )));
        }
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(SchedulerError::config(format!(
                "strength {} must be within [0, 1]",
                self.strength
            )));
        }
        if !(self.shift > 0.0) {
            return Err(SchedulerError::config(format!("shift {} must be positive", self.shift)));
        }
        if self.eta < 0.0 {
            return Err(SchedulerError::config(format!("eta {} must not be negative", self.eta)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in SchedulerKind::ALL {
            assert_eq!(kind.name().parse::<SchedulerKind>().unwrap(), *kind);
        }
        assert_eq!("Euler-Ancestral".parse::<SchedulerKind>().unwrap(), SchedulerKind::EulerAncestral);
    }

    #[test]
    fn test_unknown_names_are_config_errors() {
        assert!(matches!("heun".parse::<SchedulerKind>(), Err(SchedulerError::Config(_))));
        assert!(matches!("x0".parse::<PredictionType>(), Err(SchedulerError::Config(_))));
        assert!(matches!("huge".parse::<VarianceType>(), Err(SchedulerError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SchedulerConfig = serde_json::from_str(
            r#"{ "inference_steps": 20, "prediction_type": "v_prediction", "beta_schedule": "squared_cos_cap_v2" }"#,
        )
        .unwrap();
        assert_eq!(config.inference_steps, 20);
        assert_eq!(config.prediction_type, PredictionType::VariablePrediction);
        assert_eq!(config.beta_schedule, BetaSchedule::SquaredCosCapV2);
        assert_eq!(config.train_timesteps, 1000);
        assert_eq!(config.guidance_scale, 7.5);
    }

    #[test]
    fn test_unknown_json_value_is_rejected() {
        let result: Result<SchedulerConfig, _> = serde_json::from_str(r#"{ "variance_type": "huge" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        assert!(SchedulerConfig::default().validate().is_ok());
        assert!(SchedulerConfig::with_steps(0).validate().is_err());
        assert!(SchedulerConfig::with_steps(1001).validate().is_err());

        let inverted = SchedulerConfig {
            beta_start: 0.02,
            beta_end: 0.01,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let strength = SchedulerConfig {
            strength: 1.5,
            ..Default::default()
        };
        assert!(strength.validate().is_err());

        let shift = SchedulerConfig {
            shift: 0.0,
            ..Default::default()
        };
        assert!(shift.validate().is_err());
    }
}
