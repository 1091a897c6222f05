//! Noise schedule math shared by every scheduler
//!
//! All of this runs on the host in `f32`/`f64` before sampling starts; only
//! the per-step updates touch tensors.

use burn_diffusion_core::numeric::safe_div;

use crate::config::{AlphaTransform, BetaSchedule, SchedulerConfig, TimestepSpacing};

/// Karras et al. schedule exponent
pub const KARRAS_RHO: f32 = 7.0;

// ============================================================================
// NoiseSchedule
// ============================================================================

/// Training-time noise schedule, indexed by training timestep
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    pub betas: Vec<f32>,
    pub alphas: Vec<f32>,
    /// ᾱₜ = ∏ αᵢ
    pub alphas_cumprod: Vec<f32>,
    /// σₜ = sqrt((1 - ᾱₜ) / ᾱₜ), ascending in t
    pub sigmas: Vec<f32>,
}

impl NoiseSchedule {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::from_betas(beta_schedule(config))
    }

    pub fn from_betas(betas: Vec<f32>) -> Self {
        let alphas: Vec<f32> = betas.iter().map(|b| 1.0 - b).collect();

        let mut alphas_cumprod = Vec::with_capacity(alphas.len());
        let mut cumprod = 1.0f32;
        for alpha in &alphas {
            cumprod *= alpha;
            alphas_cumprod.push(cumprod);
        }

        let sigmas = alphas_cumprod
            .iter()
            .map(|&ac| safe_div(1.0 - ac, ac).sqrt())
            .collect();

        Self {
            betas,
            alphas,
            alphas_cumprod,
            sigmas,
        }
    }

    pub fn len(&self) -> usize {
        self.betas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.betas.is_empty()
    }

    pub fn log_sigmas(&self) -> Vec<f32> {
        self.sigmas.iter().map(|s| s.max(1e-10).ln()).collect()
    }

    /// ᾱ at a training timestep, if in range
    pub fn alpha_cumprod(&self, timestep: usize) -> Option<f32> {
        self.alphas_cumprod.get(timestep).copied()
    }

    /// ᾱ at `timestep`, or `final_alpha` when the timestep is before the start
    pub fn alpha_cumprod_or(&self, timestep: i64, final_alpha: f32) -> f32 {
        if timestep < 0 {
            final_alpha
        } else {
            self.alphas_cumprod
                .get(timestep as usize)
                .copied()
                .unwrap_or(final_alpha)
        }
    }

    /// Sigmas interpolated at (possibly fractional) timesteps
    pub fn sigmas_at(&self, timesteps: &[f32]) -> Vec<f32> {
        let positions: Vec<f32> = (0..self.sigmas.len()).map(|i| i as f32).collect();
        interpolate(timesteps, &positions, &self.sigmas)
    }
}

// ============================================================================
// Betas
// ============================================================================

/// Betas for the configured schedule kind and range
pub fn beta_schedule(config: &SchedulerConfig) -> Vec<f32> {
    let n = config.train_timesteps;
    match config.beta_schedule {
        BetaSchedule::Linear => linspace(config.beta_start as f64, config.beta_end as f64, n)
            .into_iter()
            .map(|b| b as f32)
            .collect(),
        BetaSchedule::ScaledLinear => linspace(
            (config.beta_start as f64).sqrt(),
            (config.beta_end as f64).sqrt(),
            n,
        )
        .into_iter()
        .map(|b| (b * b) as f32)
        .collect(),
        BetaSchedule::SquaredCosCapV2 => {
            alpha_bar_betas(n, config.maximum_beta, config.alpha_transform)
        }
    }
}

/// Betas that discretize a continuous ᾱ(t) on `[0, 1]`
pub fn alpha_bar_betas(n: usize, maximum_beta: f32, transform: AlphaTransform) -> Vec<f32> {
    let alpha_bar = |t: f64| -> f64 {
        match transform {
            AlphaTransform::Cosine => ((t + 0.008) / 1.008 * std::f64::consts::FRAC_PI_2)
                .cos()
                .powi(2),
            AlphaTransform::Exponential => (t * -12.0).exp(),
        }
    };

    (0..n)
        .map(|i| {
            let t1 = i as f64 / n as f64;
            let t2 = (i + 1) as f64 / n as f64;
            let beta = 1.0 - alpha_bar(t2) / alpha_bar(t1);
            beta.min(maximum_beta as f64).max(1e-4) as f32
        })
        .collect()
}

// ============================================================================
// Timesteps
// ============================================================================

/// `n` evenly spaced values from `start` to `end` inclusive
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Descending inference timesteps for the configured spacing
///
/// Values are whole numbers but kept as `f32` so sigma interpolation can
/// consume them directly.
pub fn spaced_timesteps(config: &SchedulerConfig) -> Vec<f32> {
    let n = config.inference_steps;
    let t = config.train_timesteps;
    let mut timesteps: Vec<f32> = match config.timestep_spacing {
        TimestepSpacing::Linspace => linspace(0.0, (t - 1) as f64, n)
            .into_iter()
            .map(|v| v.round() as f32)
            .collect(),
        TimestepSpacing::Leading => {
            let ratio = t / n;
            (0..n)
                .map(|i| (i * ratio + config.steps_offset).min(t - 1) as f32)
                .collect()
        }
        TimestepSpacing::Trailing => {
            let ratio = t as f64 / n as f64;
            (0..n)
                .map(|i| t as f64 - i as f64 * ratio)
                .take_while(|&v| v > 0.0)
                .map(|v| (v.round() - 1.0).max(0.0) as f32)
                .collect()
        }
    };
    timesteps.sort_by(|a, b| b.total_cmp(a));
    timesteps
}

/// Round fractional timesteps to training indices
pub fn round_timesteps(timesteps: &[f32]) -> Vec<usize> {
    timesteps.iter().map(|t| t.round().max(0.0) as usize).collect()
}

// ============================================================================
// Sigmas
// ============================================================================

/// Piecewise-linear interpolation of `(xp, fp)` at `x`, clamped at the ends
///
/// `xp` must be ascending.
pub fn interpolate(x: &[f32], xp: &[f32], fp: &[f32]) -> Vec<f32> {
    let (Some(&first), Some(&last)) = (xp.first(), xp.last()) else {
        return vec![0.0; x.len()];
    };

    x.iter()
        .map(|&v| {
            if v <= first {
                return fp[0];
            }
            if v >= last {
                return fp[fp.len() - 1];
            }
            let upper = xp.partition_point(|&p| p <= v);
            let lower = upper - 1;
            let w = safe_div(v - xp[lower], xp[upper] - xp[lower]);
            fp[lower] + w * (fp[upper] - fp[lower])
        })
        .collect()
}

/// Remap descending sigmas onto the Karras et al. schedule (ρ = 7)
///
/// The endpoints are kept; the interior is spread uniformly in σ^(1/ρ).
pub fn convert_to_karras(sigmas: &[f32]) -> Vec<f32> {
    let (Some(&sigma_max), Some(&sigma_min)) = (sigmas.first(), sigmas.last()) else {
        return Vec::new();
    };
    let n = sigmas.len();
    let min_inv_rho = sigma_min.powf(1.0 / KARRAS_RHO);
    let max_inv_rho = sigma_max.powf(1.0 / KARRAS_RHO);

    (0..n)
        .map(|i| {
            let ramp = i as f32 / (n - 1).max(1) as f32;
            (max_inv_rho + ramp * (min_inv_rho - max_inv_rho)).powf(KARRAS_RHO)
        })
        .collect()
}

/// Fractional training timestep for each sigma, by interpolation in log-sigma
pub fn sigma_to_timestep(sigmas: &[f32], log_sigmas: &[f32]) -> Vec<f32> {
    if log_sigmas.len() < 2 {
        return vec![0.0; sigmas.len()];
    }
    let last_low = log_sigmas.len() - 2;

    sigmas
        .iter()
        .map(|&sigma| {
            let log_sigma = sigma.max(1e-10).ln();
            let low = log_sigmas[..=last_low]
                .iter()
                .rposition(|&l| log_sigma - l >= 0.0)
                .unwrap_or(0);
            let high = low + 1;
            let (low_log, high_log) = (log_sigmas[low], log_sigmas[high]);
            let w = safe_div(low_log - log_sigma, low_log - high_log).clamp(0.0, 1.0);
            (1.0 - w) * low as f32 + w * high as f32
        })
        .collect()
}

/// Initial latent scale for sigma-parameterized schedulers
pub fn init_noise_sigma(sigmas: &[f32], spacing: TimestepSpacing) -> f32 {
    let max = sigmas.iter().copied().fold(0.0f32, f32::max);
    match spacing {
        TimestepSpacing::Linspace | TimestepSpacing::Trailing => max,
        TimestepSpacing::Leading => (max * max + 1.0).sqrt(),
    }
}

/// Sigma schedule for the sigma-parameterized schedulers
///
/// Returns the descending inference sigmas (without the trailing zero) and
/// their fractional training timesteps.
pub fn inference_sigmas(schedule: &NoiseSchedule, config: &SchedulerConfig) -> (Vec<f32>, Vec<f32>) {
    let timesteps = spaced_timesteps(config);
    let sigmas = schedule.sigmas_at(&timesteps);
    if config.use_karras_sigmas {
        let sigmas = convert_to_karras(&sigmas);
        let timesteps = sigma_to_timestep(&sigmas, &schedule.log_sigmas());
        (sigmas, timesteps)
    } else {
        (sigmas, timesteps)
    }
}

/// Inference timesteps and sigmas for the sigma-parameterized schedulers
#[derive(Debug, Clone, PartialEq)]
pub struct SigmaSchedule {
    /// Descending training timesteps, one per inference step
    pub timesteps: Vec<usize>,
    /// Descending sigmas, one per timestep plus a trailing zero
    pub sigmas: Vec<f32>,
    pub init_noise_sigma: f32,
}

impl SigmaSchedule {
    pub fn new(config: &SchedulerConfig) -> Self {
        let schedule = NoiseSchedule::from_config(config);
        let (mut sigmas, timesteps) = inference_sigmas(&schedule, config);
        let init_noise_sigma = init_noise_sigma(&sigmas, config.timestep_spacing);
        sigmas.push(0.0);

        Self {
            timesteps: round_timesteps(&timesteps),
            sigmas,
            init_noise_sigma,
        }
    }
}

/// Split a step from `sigma_from` to `sigma_to` into a deterministic part and
/// injected noise
///
/// Returns `(sigma_down, sigma_up)`:
///
/// ```text
/// σ_up   = ssqrt(σ_to² (σ_from² - σ_to²) / σ_from²)
/// σ_down = ssqrt(σ_to² - σ_up²)
/// ```
pub fn ancestral_step(sigma_from: f32, sigma_to: f32) -> (f32, f32) {
    use burn_diffusion_core::numeric::{signed_sqrt, zero_if_nan};

    let from2 = sigma_from * sigma_from;
    let to2 = sigma_to * sigma_to;
    let sigma_up = signed_sqrt(zero_if_nan(safe_div(to2 * (from2 - to2), from2)));
    let sigma_down = signed_sqrt(to2 - sigma_up * sigma_up);
    (sigma_down, sigma_up)
}

/// Geometric midpoint `exp((ln a + ln b) / 2)`, zero when either side is zero
pub fn log_midpoint(a: f32, b: f32) -> f32 {
    if a <= 0.0 || b <= 0.0 {
        0.0
    } else {
        (0.5 * (a.ln() + b.ln())).exp()
    }
}

/// `[x0, x1, x1, x2, x2, …, xn, xn]`
pub fn repeat_interleave_tail(values: &[f32]) -> Vec<f32> {
    let Some((&first, rest)) = values.split_first() else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(values.len() * 2);
    out.push(first);
    for &v in rest {
        out.push(v);
        out.push(v);
    }
    out
}
