//! Integration tests against JSON fixtures computed with the diffusers
//! schedule formulas in float64.
//!
//! To regenerate fixtures: `python scripts/gen_scheduler_fixtures.py`

use burn_diffusion_schedulers::config::{BetaSchedule, SchedulerConfig, TimestepSpacing};
use burn_diffusion_schedulers::flow_match::{FlowMatchEulerScheduler, FlowMatchMode};
use burn_diffusion_schedulers::kdpm2::Kdpm2Scheduler;
use burn_diffusion_schedulers::lms::lms_coefficient;
use burn_diffusion_schedulers::schedule::{spaced_timesteps, NoiseSchedule, SigmaSchedule};
use burn_ndarray::NdArray;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

type TestBackend = NdArray<f32>;

/// Tolerance for floating point comparisons
const EPSILON: f32 = 1e-3;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load<T: for<'de> Deserialize<'de>>(name: &str) -> T {
    let fixture_path = fixtures_dir().join(name);
    let content = fs::read_to_string(&fixture_path).expect("Failed to read fixture");
    serde_json::from_str(&content).expect("Failed to parse fixture")
}

fn assert_approx_eq(expected: f32, actual: f32, name: &str) {
    let diff = (expected - actual).abs();
    assert!(
        diff < EPSILON,
        "{}: expected {}, got {} (diff: {})",
        name,
        expected,
        actual,
        diff
    );
}

/// Relative comparison for values that span several orders of magnitude
fn assert_rel_eq(expected: f32, actual: f32, name: &str) {
    let diff = (expected - actual).abs() / expected.abs().max(1e-6);
    assert!(
        diff < EPSILON,
        "{}: expected {}, got {} (relative diff: {})",
        name,
        expected,
        actual,
        diff
    );
}

// ============================================================================
// Noise Schedule Tests
// ============================================================================

#[derive(Debug, Deserialize)]
struct NoiseScheduleFixture {
    indices: Vec<usize>,
    scaled_linear: ScaledLinearFixture,
    linear_betas: Vec<f32>,
    squared_cos_cap_v2_betas: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ScaledLinearFixture {
    betas: Vec<f32>,
    alphas_cumprod: Vec<f32>,
    sigmas: Vec<f32>,
}

#[test]
fn test_scaled_linear_schedule_matches_reference() {
    let fixture: NoiseScheduleFixture = load("noise_schedules.json");
    let schedule = NoiseSchedule::from_config(&SchedulerConfig::default());
    assert_eq!(schedule.len(), 1000);

    for (k, &t) in fixture.indices.iter().enumerate() {
        assert_rel_eq(fixture.scaled_linear.betas[k], schedule.betas[t], &format!("beta[{t}]"));
        assert_rel_eq(
            fixture.scaled_linear.alphas_cumprod[k],
            schedule.alphas_cumprod[t],
            &format!("alphas_cumprod[{t}]"),
        );
        assert_rel_eq(fixture.scaled_linear.sigmas[k], schedule.sigmas[t], &format!("sigma[{t}]"));
    }
}

#[test]
fn test_linear_and_cosine_betas_match_reference() {
    let fixture: NoiseScheduleFixture = load("noise_schedules.json");

    let linear = NoiseSchedule::from_config(&SchedulerConfig {
        beta_schedule: BetaSchedule::Linear,
        ..Default::default()
    });
    let cosine = NoiseSchedule::from_config(&SchedulerConfig {
        beta_schedule: BetaSchedule::SquaredCosCapV2,
        ..Default::default()
    });

    for (k, &t) in fixture.indices.iter().enumerate() {
        assert_rel_eq(fixture.linear_betas[k], linear.betas[t], &format!("linear beta[{t}]"));
        assert_approx_eq(
            fixture.squared_cos_cap_v2_betas[k],
            cosine.betas[t],
            &format!("cosine beta[{t}]"),
        );
    }
}

// ============================================================================
// Timestep Spacing Tests
// ============================================================================

#[derive(Debug, Deserialize)]
struct SpacingFixture {
    linspace_10: Vec<f32>,
    leading_10_offset_1: Vec<f32>,
    trailing_10: Vec<f32>,
    trailing_7: Vec<f32>,
}

fn spacing(steps: usize, timestep_spacing: TimestepSpacing, steps_offset: usize) -> Vec<f32> {
    spaced_timesteps(&SchedulerConfig {
        timestep_spacing,
        steps_offset,
        ..SchedulerConfig::with_steps(steps)
    })
}

#[test]
fn test_timestep_spacing_matches_reference() {
    let fixture: SpacingFixture = load("timestep_spacing.json");

    assert_eq!(spacing(10, TimestepSpacing::Linspace, 0), fixture.linspace_10);
    assert_eq!(spacing(10, TimestepSpacing::Leading, 1), fixture.leading_10_offset_1);
    assert_eq!(spacing(10, TimestepSpacing::Trailing, 0), fixture.trailing_10);
    assert_eq!(spacing(7, TimestepSpacing::Trailing, 0), fixture.trailing_7);
}

// ============================================================================
// Sigma Schedule Tests
// ============================================================================

#[derive(Debug, Deserialize)]
struct SigmaFixture {
    euler_10: SigmaSteps,
    karras_10: SigmaSteps,
    kdpm2_5_timesteps: Vec<usize>,
    flow_match_5_shift_3: SigmaSteps,
    lms: LmsFixture,
}

#[derive(Debug, Deserialize)]
struct SigmaSteps {
    sigmas: Vec<f32>,
    timesteps: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct LmsFixture {
    sigmas: Vec<f32>,
    index: usize,
    order: usize,
    coefficients: Vec<f32>,
}

fn assert_sigma_steps(expected: &SigmaSteps, timesteps: &[usize], sigmas: &[f32], name: &str) {
    assert_eq!(timesteps, expected.timesteps.as_slice(), "{name} timesteps");
    // Computed sigmas carry a trailing zero
    assert_eq!(sigmas.len(), expected.sigmas.len() + 1, "{name} length");
    assert_eq!(sigmas[sigmas.len() - 1], 0.0);
    for (i, (e, a)) in expected.sigmas.iter().zip(sigmas).enumerate() {
        assert_rel_eq(*e, *a, &format!("{name}[{i}]"));
    }
}

#[test]
fn test_euler_sigmas_match_reference() {
    let fixture: SigmaFixture = load("sigma_schedules.json");
    let steps = SigmaSchedule::new(&SchedulerConfig::with_steps(10));

    assert_sigma_steps(&fixture.euler_10, &steps.timesteps, &steps.sigmas, "euler_10");
    assert_rel_eq(fixture.euler_10.sigmas[0], steps.init_noise_sigma, "init_noise_sigma");
}

#[test]
fn test_karras_sigmas_match_reference() {
    let fixture: SigmaFixture = load("sigma_schedules.json");
    let steps = SigmaSchedule::new(&SchedulerConfig {
        use_karras_sigmas: true,
        ..SchedulerConfig::with_steps(10)
    });

    eprintln!("Computed 10-step Karras: {:?}", steps.sigmas);
    assert_sigma_steps(&fixture.karras_10, &steps.timesteps, &steps.sigmas, "karras_10");
}

#[test]
fn test_kdpm2_interleaved_timesteps_match_reference() {
    let fixture: SigmaFixture = load("sigma_schedules.json");
    let scheduler = Kdpm2Scheduler::<TestBackend, 4>::new(SchedulerConfig::with_steps(5)).unwrap();

    assert_eq!(scheduler.timesteps(), fixture.kdpm2_5_timesteps.as_slice());
    assert_eq!(scheduler.timesteps().len(), 2 * 5 - 1);
}

#[test]
fn test_flow_match_sigmas_match_reference() {
    let fixture: SigmaFixture = load("sigma_schedules.json");
    let config = SchedulerConfig {
        shift: 3.0,
        ..SchedulerConfig::with_steps(5)
    };
    let scheduler = FlowMatchEulerScheduler::new(config, FlowMatchMode::Discrete).unwrap();

    assert_sigma_steps(
        &fixture.flow_match_5_shift_3,
        scheduler.timesteps(),
        scheduler.sigmas(),
        "flow_match_5_shift_3",
    );
}

#[test]
fn test_lms_coefficients_match_reference() {
    let fixture: SigmaFixture = load("sigma_schedules.json");
    let lms = fixture.lms;

    for (current, expected) in lms.coefficients.iter().enumerate() {
        let actual = lms_coefficient(&lms.sigmas, lms.order, lms.index, current);
        assert_approx_eq(*expected, actual, &format!("lms_coefficient[{current}]"));
    }
    // The weights integrate a partition of unity over the step
    let total: f32 = lms.coefficients.iter().sum();
    let step = lms.sigmas[lms.index + 1] - lms.sigmas[lms.index];
    assert_approx_eq(step, total, "coefficient sum");
}
