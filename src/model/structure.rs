//! Cubic structures and their coordination shells.
//!
//! Shells are computed once in reduced units (distances divided by the lattice
//! constant), so a change of `a` during a fit only rescales them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Lattice {
    Sc,
    Bcc,
    Fcc,
}

impl Lattice {
    /// Basis positions in units of `a / 2`.
    fn basis(self) -> &'static [[i64; 3]] {
        match self {
            Lattice::Sc => &[[0, 0, 0]],
            Lattice::Bcc => &[[0, 0, 0], [1, 1, 1]],
            Lattice::Fcc => &[[0, 0, 0], [1, 1, 0], [1, 0, 1], [0, 1, 1]],
        }
    }

    pub fn atoms_per_cell(self) -> usize {
        self.basis().len()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Lattice::Sc => "sc",
            Lattice::Bcc => "bcc",
            Lattice::Fcc => "fcc",
        }
    }
}

/// Structural model of a single-element cubic crystal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureSpec {
    pub lattice: Lattice,
    /// Starting lattice constant in Å.
    pub a: f64,
    /// Starting isotropic displacement in Å².
    #[serde(default = "default_uiso")]
    pub uiso: f64,
}

fn default_uiso() -> f64 {
    0.005
}

impl StructureSpec {
    pub fn new(lattice: Lattice, a: f64) -> Self {
        Self {
            lattice,
            a,
            uiso: default_uiso(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.a.is_finite() && self.a > 0.0) {
            return Err(AppError::Config(format!(
                "lattice constant must be positive, got {}",
                self.a
            )));
        }
        if !(self.uiso.is_finite() && self.uiso > 0.0) {
            return Err(AppError::Config(format!(
                "Uiso must be positive, got {}",
                self.uiso
            )));
        }
        Ok(())
    }
}

impl fmt::Display for StructureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.lattice.as_str(), self.a)
    }
}

/// Parses `"<lattice>:<a>"`, e.g. `fcc:3.52`.
impl FromStr for StructureSpec {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, a) = s
            .split_once(':')
            .ok_or_else(|| AppError::Config(format!("structure '{s}' is not <lattice>:<a>")))?;
        let lattice = <Lattice as ValueEnum>::from_str(kind.trim(), true)
            .map_err(|_| AppError::Config(format!("unknown lattice '{kind}' (sc, bcc, fcc)")))?;
        let a: f64 = a
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("invalid lattice constant '{a}'")))?;
        let spec = StructureSpec::new(lattice, a);
        spec.validate()?;
        Ok(spec)
    }
}

/// One coordination shell: every neighbour at the same reduced distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shell {
    /// Distance divided by the lattice constant.
    pub reduced: f64,
    /// Number of neighbours per atom in this shell.
    pub count: f64,
}

/// Shells of `lattice` with reduced distance up to `max_reduced`, nearest first.
pub fn coordination_shells(lattice: Lattice, max_reduced: f64) -> Vec<Shell> {
    if !(max_reduced > 0.0) {
        return Vec::new();
    }
    // Work in units of a/2, where every basis is integral and d^2 is an integer.
    let limit_sq = (2.0 * max_reduced).powi(2);
    let cells = (max_reduced.ceil() as i64) + 1;
    let basis = lattice.basis();

    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for i in -cells..=cells {
        for j in -cells..=cells {
            for k in -cells..=cells {
                for b in basis {
                    let p = [2 * i + b[0], 2 * j + b[1], 2 * k + b[2]];
                    let d2 = p[0] * p[0] + p[1] * p[1] + p[2] * p[2];
                    if d2 == 0 || d2 as f64 > limit_sq {
                        continue;
                    }
                    *counts.entry(d2).or_default() += 1;
                }
            }
        }
    }

    counts
        .into_iter()
        .map(|(d2, n)| Shell {
            reduced: (d2 as f64).sqrt() / 2.0,
            count: n as f64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fcc_first_shells() {
        let shells = coordination_shells(Lattice::Fcc, 1.01);
        assert_eq!(shells[0].count, 12.0);
        assert!((shells[0].reduced - 0.5f64.sqrt()).abs() < 1e-12);
        assert_eq!(shells[1].count, 6.0);
        assert!((shells[1].reduced - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bcc_and_sc_nearest_neighbours() {
        let bcc = coordination_shells(Lattice::Bcc, 1.0);
        assert_eq!(bcc[0].count, 8.0);
        assert!((bcc[0].reduced - 0.75f64.sqrt()).abs() < 1e-12);
        let sc = coordination_shells(Lattice::Sc, 1.0);
        assert_eq!(sc.len(), 1);
        assert_eq!(sc[0].count, 6.0);
    }

    #[test]
    fn parse_structure_spec() {
        let spec: StructureSpec = "fcc:3.52".parse().unwrap();
        assert_eq!(spec.lattice, Lattice::Fcc);
        assert!((spec.a - 3.52).abs() < 1e-12);
        assert!("hcp:3.0".parse::<StructureSpec>().is_err());
        assert!("fcc:-1".parse::<StructureSpec>().is_err());
        assert!("fcc".parse::<StructureSpec>().is_err());
    }
}
