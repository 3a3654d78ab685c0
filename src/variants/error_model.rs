use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{check_ratio, ConfigError};
use crate::genomics::Nucleotide;
use crate::variants::MutationsTable;

/// Shape of the background model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorModelOrder {
    /// One rate per (true base, observed base) pair.
    #[default]
    Substitution,
    /// A single rate pooled over all substitutions.
    Uniform,
}

/// Background error model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorModelParameters {
    /// Model shape.
    pub order: ErrorModelOrder,
    /// Fraction of a position's families a base needs to count as present.
    pub major_presence_threshold: f64,
    /// Floor for substitution counts before normalizing.
    pub pseudo_count: f64,
    /// Pool each substitution with its reverse-complement counterpart.
    pub symmetric: bool,
}

impl Default for ErrorModelParameters {
    fn default() -> Self {
        Self {
            order: ErrorModelOrder::Substitution,
            major_presence_threshold: 0.05,
            pseudo_count: 1.0,
            symmetric: true,
        }
    }
}

impl ErrorModelParameters {
    /// Validate the threshold and pseudo-count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ratio("error_model.major_presence_threshold", self.major_presence_threshold)?;
        if self.pseudo_count.is_finite() && self.pseudo_count >= 0.0 {
            Ok(())
        } else {
            Err(ConfigError::OutOfRange {
                name: "error_model.pseudo_count",
                value: self.pseudo_count.to_string(),
                expected: ">= 0.0",
            })
        }
    }
}

/// Background substitution probabilities, `rates[true][observed]`.
///
/// Diagonal cells and bases never observed as present have no estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutionMatrix {
    rates: [[Option<f64>; 4]; 4],
}

impl SubstitutionMatrix {
    /// Probability that a true `from` is observed as `to`.
    pub fn get(&self, from: Nucleotide, to: Nucleotide) -> Option<f64> {
        self.rates[from.index()][to.index()]
    }

    /// Matrix with no estimates at all.
    pub fn empty() -> Self {
        Self {
            rates: [[None; 4]; 4],
        }
    }
}

/// Fits per-reference background substitution rates from major counts.
#[derive(Debug, Clone, Default)]
pub struct ErrorModel {
    params: ErrorModelParameters,
}

impl ErrorModel {
    /// Create a model.
    pub fn new(params: ErrorModelParameters) -> Self {
        Self { params }
    }

    /// Estimate substitution rates from `table`.
    ///
    /// At each position the bases above the presence threshold are taken as
    /// true; every other observed base is attributed to them in proportion to
    /// their abundance.
    pub fn fit(&self, table: &MutationsTable) -> SubstitutionMatrix {
        let mut counts = [[0.0f64; 4]; 4];
        let mut totals = [0.0f64; 4];

        for position in 0..table.len() {
            let majors = table.major_counts(position);
            let coverage: u64 = majors.iter().sum();
            if coverage == 0 {
                continue;
            }
            let present: Vec<Nucleotide> = Nucleotide::ALL
                .into_iter()
                .filter(|base| {
                    majors[base.index()] as f64 >= self.params.major_presence_threshold * coverage as f64
                })
                .collect();
            let present_total: u64 = present.iter().map(|base| majors[base.index()]).sum();
            if present_total == 0 {
                continue;
            }

            for &truth in &present {
                totals[truth.index()] += majors[truth.index()] as f64;
                let weight = majors[truth.index()] as f64 / present_total as f64;
                for observed in Nucleotide::ALL {
                    if present.contains(&observed) {
                        continue;
                    }
                    counts[truth.index()][observed.index()] += weight * majors[observed.index()] as f64;
                }
            }
        }

        if self.params.symmetric {
            let mut pooled_counts = counts;
            let mut pooled_totals = totals;
            for from in Nucleotide::ALL {
                pooled_totals[from.index()] += totals[from.complement().index()];
                for to in Nucleotide::ALL {
                    pooled_counts[from.index()][to.index()] +=
                        counts[from.complement().index()][to.complement().index()];
                }
            }
            counts = pooled_counts;
            totals = pooled_totals;
        }

        let matrix = match self.params.order {
            ErrorModelOrder::Substitution => self.normalize(&counts, &totals),
            ErrorModelOrder::Uniform => self.pool(&counts, &totals),
        };
        debug!(
            reference = table.reference(),
            observations = totals.iter().sum::<f64>(),
            "fitted background error model"
        );
        matrix
    }

    fn normalize(&self, counts: &[[f64; 4]; 4], totals: &[f64; 4]) -> SubstitutionMatrix {
        let mut matrix = SubstitutionMatrix::empty();
        for from in Nucleotide::ALL {
            let total = totals[from.index()];
            if total <= 0.0 {
                continue;
            }
            for to in Nucleotide::ALL {
                if from == to {
                    continue;
                }
                let count = counts[from.index()][to.index()].max(self.params.pseudo_count);
                matrix.rates[from.index()][to.index()] = Some((count / total).min(1.0));
            }
        }
        matrix
    }

    fn pool(&self, counts: &[[f64; 4]; 4], totals: &[f64; 4]) -> SubstitutionMatrix {
        let total: f64 = totals.iter().sum();
        let mut matrix = SubstitutionMatrix::empty();
        if total <= 0.0 {
            return matrix;
        }
        let pooled: f64 = Nucleotide::ALL
            .into_iter()
            .flat_map(|from| {
                Nucleotide::ALL
                    .into_iter()
                    .filter(move |&to| to != from)
                    .map(move |to| counts[from.index()][to.index()])
            })
            .sum();
        let rate = (pooled.max(self.params.pseudo_count) / (3.0 * total)).min(1.0);
        for from in Nucleotide::ALL {
            for to in Nucleotide::ALL {
                if from != to {
                    matrix.rates[from.index()][to.index()] = Some(rate);
                }
            }
        }
        matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 10 positions of `A` seen by 100 families; position 3 also shows 2 `G`.
    fn table() -> MutationsTable {
        let table = MutationsTable::new(0, 10);
        for position in 0..10 {
            for _ in 0..100 {
                table.record_major(position, Nucleotide::A, 1, 40);
            }
        }
        table.record_major(3, Nucleotide::G, 1, 40);
        table.record_major(3, Nucleotide::G, 1, 40);
        table
    }

    #[test]
    fn rates_follow_observed_substitutions() {
        let model = ErrorModel::new(ErrorModelParameters {
            symmetric: false,
            ..ErrorModelParameters::default()
        });
        let matrix = model.fit(&table());
        assert_eq!(matrix.get(Nucleotide::A, Nucleotide::A), None);
        assert!((matrix.get(Nucleotide::A, Nucleotide::G).unwrap() - 2.0 / 1000.0).abs() < 1e-12);
        // Unobserved substitution falls back to the pseudo-count.
        assert!((matrix.get(Nucleotide::A, Nucleotide::C).unwrap() - 1.0 / 1000.0).abs() < 1e-12);
        // No `C` was ever present: no estimate.
        assert_eq!(matrix.get(Nucleotide::C, Nucleotide::A), None);
    }

    #[test]
    fn symmetric_model_pools_complementary_pairs() {
        let matrix = ErrorModel::default().fit(&table());
        // A>G pooled with T>C; both rows see A's 1000 observations.
        assert_eq!(
            matrix.get(Nucleotide::A, Nucleotide::G),
            matrix.get(Nucleotide::T, Nucleotide::C)
        );
    }

    #[test]
    fn uniform_model_uses_one_rate() {
        let model = ErrorModel::new(ErrorModelParameters {
            order: ErrorModelOrder::Uniform,
            symmetric: false,
            ..ErrorModelParameters::default()
        });
        let matrix = model.fit(&table());
        let rate = matrix.get(Nucleotide::C, Nucleotide::T).unwrap();
        assert_eq!(matrix.get(Nucleotide::A, Nucleotide::G), Some(rate));
        assert!((rate - 2.0 / 3000.0).abs() < 1e-12);
    }

    #[test]
    fn empty_table_has_no_estimates() {
        let matrix = ErrorModel::default().fit(&MutationsTable::new(0, 5));
        assert_eq!(matrix, SubstitutionMatrix::empty());
    }
}
