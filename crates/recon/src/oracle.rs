//! Similarity oracle: decides whether two structures are the same physical
//! structure.
//!
//! The reconciler treats the oracle as an opaque yes/no capability. The
//! `LatticeOracle` here is a coarse stand-in comparing formula, cell and
//! sites; production runs plug in a real structure matcher.

use std::collections::HashMap;

use crate::config::MatcherConfig;
use crate::error::OracleError;
use crate::model::{CanonicalEntry, ExternalId, Lattice, Round, Site, SourceRecord, Structure};

pub trait SimilarityOracle {
    /// Must be a pure function of the two structures.
    fn similar(&self, a: &Structure, b: &Structure) -> Result<bool, OracleError>;
}

impl<T: SimilarityOracle + ?Sized> SimilarityOracle for &T {
    fn similar(&self, a: &Structure, b: &Structure) -> Result<bool, OracleError> {
        (**self).similar(a, b)
    }
}

// ---------------------------------------------------------------------------
// Lattice oracle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatticeOracle {
    pub ltol: f64,
    pub stol: f64,
    pub angle_tol: f64,
}

impl LatticeOracle {
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self {
            ltol: config.ltol * config.tol_factor,
            stol: config.stol * config.tol_factor,
            angle_tol: config.angle_tol * config.tol_factor,
        }
    }

    fn lattice_matches(&self, a: &Lattice, b: &Lattice) -> bool {
        let lengths = [(a.a, b.a), (a.b, b.b), (a.c, b.c)];
        let angles = [(a.alpha, b.alpha), (a.beta, b.beta), (a.gamma, b.gamma)];

        lengths
            .iter()
            .all(|(x, y)| (x - y).abs() / ((x + y) / 2.0) <= self.ltol)
            && angles.iter().all(|(x, y)| (x - y).abs() <= self.angle_tol)
    }

    /// Greedy one-to-one site assignment within `stol` (minimum image).
    fn sites_match(&self, a: &[Site], b: &[Site]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        let mut used = vec![false; b.len()];
        'outer: for site in a {
            let label = species_label(site);
            for (j, candidate) in b.iter().enumerate() {
                if used[j] || species_label(candidate) != label {
                    continue;
                }
                if frac_distance(&site.position, &candidate.position) <= self.stol {
                    used[j] = true;
                    continue 'outer;
                }
            }
            return false;
        }
        true
    }
}

impl Default for LatticeOracle {
    fn default() -> Self {
        Self::from_config(&MatcherConfig::default())
    }
}

impl SimilarityOracle for LatticeOracle {
    fn similar(&self, a: &Structure, b: &Structure) -> Result<bool, OracleError> {
        check_lattice(&a.lattice)?;
        check_lattice(&b.lattice)?;

        if a.formula != b.formula {
            return Ok(false);
        }
        Ok(self.lattice_matches(&a.lattice, &b.lattice) && self.sites_match(&a.sites, &b.sites))
    }
}

fn check_lattice(l: &Lattice) -> Result<(), OracleError> {
    for (name, len) in [("a", l.a), ("b", l.b), ("c", l.c)] {
        if !len.is_finite() || len <= 0.0 {
            return Err(OracleError::Malformed(format!("lattice length {name} = {len}")));
        }
    }
    for (name, angle) in [("alpha", l.alpha), ("beta", l.beta), ("gamma", l.gamma)] {
        if !angle.is_finite() || angle <= 0.0 || angle >= 180.0 {
            return Err(OracleError::Malformed(format!("lattice angle {name} = {angle}")));
        }
    }
    Ok(())
}

fn species_label(site: &Site) -> String {
    let mut parts: Vec<String> = site
        .species
        .iter()
        .map(|s| format!("{}:{:.3}", s.element, s.occupancy))
        .collect();
    parts.sort();
    parts.join(",")
}

fn frac_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            let d = d - d.round();
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

// ---------------------------------------------------------------------------
// Per-run cache
// ---------------------------------------------------------------------------

/// Remembers oracle answers per (ID, previous round, new round) so a retried
/// reconciliation asks each pair at most once and gets the same answer.
/// Failures are not cached; a retry asks again.
#[derive(Debug, Default)]
pub struct SimilarityCache {
    answers: HashMap<(ExternalId, Round, Round), bool>,
    calls: usize,
}

impl SimilarityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check<O: SimilarityOracle + ?Sized>(
        &mut self,
        oracle: &O,
        previous: &CanonicalEntry,
        candidate: &SourceRecord,
    ) -> Result<bool, OracleError> {
        let key = (
            candidate.external_id.clone(),
            previous.chosen_round.clone(),
            candidate.round.clone(),
        );
        if let Some(answer) = self.answers.get(&key) {
            return Ok(*answer);
        }
        self.calls += 1;
        let answer = oracle.similar(&previous.structure, &candidate.structure)?;
        self.answers.insert(key, answer);
        Ok(answer)
    }

    /// Number of times the oracle was actually invoked.
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SpeciesOccupancy;

    fn cubic(a: f64, x: f64) -> Structure {
        Structure {
            formula: "NaCl".into(),
            lattice: Lattice {
                a,
                b: a,
                c: a,
                alpha: 90.0,
                beta: 90.0,
                gamma: 90.0,
            },
            sites: vec![
                Site {
                    species: vec![SpeciesOccupancy {
                        element: "Na".into(),
                        occupancy: 1.0,
                    }],
                    position: [0.0, 0.0, 0.0],
                },
                Site {
                    species: vec![SpeciesOccupancy {
                        element: "Cl".into(),
                        occupancy: 1.0,
                    }],
                    position: [x, 0.5, 0.5],
                },
            ],
        }
    }

    #[test]
    fn identical_structures_are_similar() {
        let oracle = LatticeOracle::default();
        assert!(oracle.similar(&cubic(5.64, 0.5), &cubic(5.64, 0.5)).unwrap());
    }

    #[test]
    fn small_cell_change_within_ltol() {
        let oracle = LatticeOracle::default();
        assert!(oracle.similar(&cubic(5.64, 0.5), &cubic(5.70, 0.5)).unwrap());
    }

    #[test]
    fn large_cell_change_is_different() {
        let oracle = LatticeOracle::default();
        assert!(!oracle.similar(&cubic(5.64, 0.5), &cubic(8.0, 0.5)).unwrap());
    }

    #[test]
    fn site_shift_beyond_stol_is_different() {
        let oracle = LatticeOracle {
            ltol: 0.2,
            stol: 0.05,
            angle_tol: 5.0,
        };
        assert!(!oracle.similar(&cubic(5.64, 0.5), &cubic(5.64, 0.2)).unwrap());
    }

    #[test]
    fn periodic_image_counts_as_same_site() {
        let oracle = LatticeOracle::default();
        assert!(oracle.similar(&cubic(5.64, 0.99), &cubic(5.64, 0.01)).unwrap());
    }

    #[test]
    fn different_formula_is_different() {
        let oracle = LatticeOracle::default();
        let mut other = cubic(5.64, 0.5);
        other.formula = "KCl".into();
        assert!(!oracle.similar(&cubic(5.64, 0.5), &other).unwrap());
    }

    #[test]
    fn malformed_lattice_is_an_error() {
        let oracle = LatticeOracle::default();
        let bad = cubic(0.0, 0.5);
        assert!(matches!(
            oracle.similar(&cubic(5.64, 0.5), &bad),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn tol_factor_scales_tolerances() {
        let config = MatcherConfig {
            tol_factor: 2.0,
            ..Default::default()
        };
        let oracle = LatticeOracle::from_config(&config);
        assert_eq!(oracle.ltol, 0.4);
        assert_eq!(oracle.angle_tol, 10.0);
    }
}
