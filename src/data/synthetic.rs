//! Synthetic PDF profiles for demos and tests.
//!
//! Profiles are computed from the bundled model at a known "true" payload and
//! perturbed with seeded Gaussian noise, so a refinement can be checked
//! against the values that generated the data.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::Payload;
use crate::error::AppError;
use crate::model::pdf::simulate;
use crate::model::{Lattice, Profile, StructureSpec};

#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub structure: StructureSpec,
    /// Parameter values used to generate the profile.
    pub truth: Payload,
    pub rmin: f64,
    pub rmax: f64,
    pub dr: f64,
    pub qmax: f64,
    /// Standard deviation of the additive noise (0 disables it).
    pub noise: f64,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            structure: StructureSpec::new(Lattice::Fcc, 3.52),
            truth: reference_payload(),
            rmin: 1.0,
            rmax: 16.0,
            dr: 0.01,
            qmax: 25.0,
            noise: 0.0,
            seed: 7,
        }
    }
}

/// Nickel-like fcc values used as ground truth by default.
pub fn reference_payload() -> Payload {
    Payload::from([
        ("scale".to_string(), 0.5),
        ("a".to_string(), 3.54),
        ("Uiso_0".to_string(), 0.006),
        ("qdamp".to_string(), 0.04),
        ("qbroad".to_string(), 0.0),
        ("delta1".to_string(), 0.0),
        ("delta2".to_string(), 2.0),
    ])
}

pub fn synthesize(spec: &SyntheticSpec) -> Result<Profile, AppError> {
    if !(spec.rmin > 0.0 && spec.rmax > spec.rmin && spec.dr > 0.0) {
        return Err(AppError::Config(format!(
            "invalid synthetic grid {}..{} step {}",
            spec.rmin, spec.rmax, spec.dr
        )));
    }
    if !(spec.noise >= 0.0) {
        return Err(AppError::Config(format!("noise must be >= 0, got {}", spec.noise)));
    }

    let steps = ((spec.rmax - spec.rmin) / spec.dr + 1e-9).floor() as usize;
    let r: Vec<f64> = (0..=steps).map(|i| spec.rmin + i as f64 * spec.dr).collect();
    let mut g = simulate(&spec.structure, &spec.truth, &r, spec.qmax)?;

    if spec.noise > 0.0 {
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let normal = Normal::new(0.0, spec.noise)
            .map_err(|e| AppError::Config(format!("noise distribution error: {e}")))?;
        for v in &mut g {
            *v += normal.sample(&mut rng);
        }
    }

    Ok(Profile { r, g })
}

/// One profile per temperature, with the lattice expanding linearly from
/// `base_temperature`. Each temperature gets its own noise stream.
pub fn temperature_series(
    spec: &SyntheticSpec,
    temperatures: &[u32],
    base_temperature: u32,
    expansion: f64,
) -> Result<Vec<(u32, Profile)>, AppError> {
    let a0 = spec.truth.get("a").copied().unwrap_or(spec.structure.a);
    temperatures
        .iter()
        .map(|&t| {
            let mut local = spec.clone();
            let dt = f64::from(t) - f64::from(base_temperature);
            local.truth.insert("a".to_string(), a0 * (1.0 + expansion * dt));
            local.seed = spec.seed.wrapping_add(u64::from(t));
            synthesize(&local).map(|profile| (t, profile))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_seeded() {
        let spec = SyntheticSpec {
            noise: 0.01,
            rmax: 5.0,
            ..SyntheticSpec::default()
        };
        let a = synthesize(&spec).unwrap();
        let b = synthesize(&spec).unwrap();
        assert_eq!(a, b);
        let other = synthesize(&SyntheticSpec { seed: 8, ..spec.clone() }).unwrap();
        assert_ne!(a.g, other.g);
    }

    #[test]
    fn grid_covers_range() {
        let spec = SyntheticSpec {
            rmin: 1.0,
            rmax: 2.0,
            dr: 0.25,
            ..SyntheticSpec::default()
        };
        let profile = synthesize(&spec).unwrap();
        assert_eq!(profile.r, vec![1.0, 1.25, 1.5, 1.75, 2.0]);
        assert!(profile.g.iter().all(|v| v.is_finite()));
        assert!(synthesize(&SyntheticSpec { dr: 0.0, ..spec }).is_err());
    }

    #[test]
    fn nearest_neighbour_peak_sits_at_a_over_sqrt2() {
        let spec = SyntheticSpec {
            rmin: 2.0,
            rmax: 3.0,
            dr: 0.001,
            ..SyntheticSpec::default()
        };
        let profile = synthesize(&spec).unwrap();
        let (i_max, _) = profile
            .g
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
        let expected = 3.54 / 2f64.sqrt();
        assert!((profile.r[i_max] - expected).abs() < 0.02, "peak at {}", profile.r[i_max]);
    }

    #[test]
    fn lattice_expands_with_temperature() {
        let spec = SyntheticSpec {
            rmin: 2.0,
            rmax: 3.0,
            dr: 0.001,
            ..SyntheticSpec::default()
        };
        let series = temperature_series(&spec, &[100, 300], 100, 1e-4).unwrap();
        let peak = |p: &Profile| {
            p.g.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        };
        let cold = &series[0].1;
        let hot = &series[1].1;
        assert!(hot.r[peak(hot)] > cold.r[peak(cold)]);
    }
}
