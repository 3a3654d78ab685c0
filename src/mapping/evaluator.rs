use serde::{Deserialize, Serialize};

use crate::config::{check_ratio, ConfigError};
use crate::mapping::{LocalAlignment, Mutation};

/// Acceptance thresholds for local alignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorParameters {
    /// Minimum `(aligned reference length - substitutions) / aligned reference length`.
    pub min_identity_ratio: f64,
    /// Minimum relative span on the query or on the reference.
    pub min_aligned_query_relative_span: f64,
    /// Longest tolerated run of adjacent substitutions.
    pub max_consequent_mismatches: usize,
}

impl Default for EvaluatorParameters {
    fn default() -> Self {
        Self {
            min_identity_ratio: 0.9,
            min_aligned_query_relative_span: 0.7,
            max_consequent_mismatches: 2,
        }
    }
}

impl EvaluatorParameters {
    /// Validate ratios.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ratio("evaluator.min_identity_ratio", self.min_identity_ratio)?;
        check_ratio(
            "evaluator.min_aligned_query_relative_span",
            self.min_aligned_query_relative_span,
        )
    }
}

/// Accepts or rejects local alignments.
#[derive(Debug, Clone, Default)]
pub struct LocalAlignmentEvaluator {
    params: EvaluatorParameters,
}

impl LocalAlignmentEvaluator {
    /// Create an evaluator.
    pub fn new(params: EvaluatorParameters) -> Self {
        Self { params }
    }

    /// Whether `alignment` of a `query_len` query on a `ref_len` reference is good.
    pub fn is_good(&self, alignment: &LocalAlignment, query_len: usize, ref_len: usize) -> bool {
        let ref_span = alignment.ref_range.len();
        let query_span = alignment.query_range.len();
        if ref_span == 0 || query_len == 0 || ref_len == 0 {
            return false;
        }

        let identity = (ref_span - alignment.substitutions().min(ref_span)) as f64 / ref_span as f64;
        if identity < self.params.min_identity_ratio {
            return false;
        }

        let relative_span = (query_span as f64 / query_len as f64).max(ref_span as f64 / ref_len as f64);
        if relative_span < self.params.min_aligned_query_relative_span {
            return false;
        }

        longest_substitution_run(&alignment.mutations) <= self.params.max_consequent_mismatches
    }
}

/// Longest run of substitutions at adjacent reference positions; indels break runs.
fn longest_substitution_run(mutations: &[Mutation]) -> usize {
    let mut longest = 0;
    let mut run = 0;
    let mut last: Option<usize> = None;
    for mutation in mutations {
        match mutation {
            Mutation::Substitution { position, .. } => {
                run = match last {
                    Some(prev) if prev + 1 == *position => run + 1,
                    _ => 1,
                };
                last = Some(*position);
                longest = longest.max(run);
            }
            Mutation::Insertion { .. } | Mutation::Deletion { .. } => {
                run = 0;
                last = None;
            }
        }
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{Nucleotide, NucleotideSequence};
    use test_case::test_case;

    fn substitution(position: usize) -> Mutation {
        Mutation::Substitution {
            position,
            from: Nucleotide::A,
            to: Nucleotide::G,
        }
    }

    fn alignment(span: usize, mutations: Vec<Mutation>) -> LocalAlignment {
        LocalAlignment {
            ref_range: 0..span,
            query_range: 0..span,
            score: span as i32,
            mutations,
            query_to_ref: (0..span).map(Some).collect(),
        }
    }

    // 20 aligned bases: 2 substitutions sit exactly on the 0.9 identity boundary.
    #[test_case(1, true ; "one below the boundary")]
    #[test_case(2, true ; "exactly at the boundary")]
    #[test_case(3, false ; "one above the boundary")]
    fn identity_boundary(substitutions: usize, expected: bool) {
        let mutations = (0..substitutions).map(|i| substitution(i * 5)).collect();
        let evaluator = LocalAlignmentEvaluator::default();
        assert_eq!(evaluator.is_good(&alignment(20, mutations), 20, 20), expected);
    }

    #[test_case(2, true ; "run at the limit")]
    #[test_case(3, false ; "run above the limit")]
    fn consecutive_substitutions(run: usize, expected: bool) {
        let evaluator = LocalAlignmentEvaluator::new(EvaluatorParameters {
            min_identity_ratio: 0.0,
            ..EvaluatorParameters::default()
        });
        let mutations = (0..run).map(|i| substitution(10 + i)).collect();
        assert_eq!(evaluator.is_good(&alignment(100, mutations), 100, 100), expected);
    }

    #[test]
    fn indel_resets_substitution_run() {
        let mutations = vec![
            substitution(10),
            substitution(11),
            Mutation::Deletion {
                position: 12,
                bases: NucleotideSequence::from_ascii(b"A").unwrap(),
            },
            substitution(13),
            substitution(14),
        ];
        assert_eq!(longest_substitution_run(&mutations), 2);
    }

    #[test]
    fn short_span_on_both_sides_is_rejected() {
        let evaluator = LocalAlignmentEvaluator::default();
        // Covers half of a 40-base query and a quarter of an 80-base reference.
        assert!(!evaluator.is_good(&alignment(20, vec![]), 40, 80));
        // Covering most of the reference is enough.
        assert!(evaluator.is_good(&alignment(20, vec![]), 40, 25));
    }
}
