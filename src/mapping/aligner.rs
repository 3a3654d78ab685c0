use std::fmt;
use std::ops::Range;

use bio::alignment::pairwise::{Aligner, MatchParams};
use bio::alignment::AlignmentOperation;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::genomics::{Nucleotide, NucleotideSequence};

/// Local alignment scores. A gap of length `n` scores `gap_open + n * gap_extend`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParameters {
    /// Reward for a matching base.
    pub match_score: i32,
    /// Penalty for a substitution.
    pub mismatch_score: i32,
    /// Penalty for opening a gap.
    pub gap_open: i32,
    /// Penalty for each gap base.
    pub gap_extend: i32,
}

impl Default for ScoringParameters {
    fn default() -> Self {
        Self {
            match_score: 1,
            mismatch_score: -3,
            gap_open: -5,
            gap_extend: -2,
        }
    }
}

impl ScoringParameters {
    /// Match must reward, everything else must penalize.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("scoring.match_score", self.match_score, self.match_score > 0, "> 0"),
            ("scoring.mismatch_score", self.mismatch_score, self.mismatch_score < 0, "< 0"),
            ("scoring.gap_open", self.gap_open, self.gap_open <= 0, "<= 0"),
            ("scoring.gap_extend", self.gap_extend, self.gap_extend < 0, "< 0"),
        ];
        for (name, value, ok, expected) in checks {
            if !ok {
                return Err(ConfigError::OutOfRange {
                    name,
                    value: value.to_string(),
                    expected,
                });
            }
        }
        Ok(())
    }
}

/// Affine-gap scoring scheme used by [`LocalAligner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffineGapScoring {
    match_score: i32,
    mismatch_score: i32,
    gap_open: i32,
    gap_extend: i32,
}

impl AffineGapScoring {
    /// Score of a single base pair.
    pub fn pair(&self, a: Nucleotide, b: Nucleotide) -> i32 {
        if a == b {
            self.match_score
        } else {
            self.mismatch_score
        }
    }

    /// Score of a gap of `len` bases.
    pub fn gap(&self, len: usize) -> i32 {
        if len == 0 {
            0
        } else {
            self.gap_open + self.gap_extend * len as i32
        }
    }
}

impl From<&ScoringParameters> for AffineGapScoring {
    fn from(params: &ScoringParameters) -> Self {
        Self {
            match_score: params.match_score,
            mismatch_score: params.mismatch_score,
            gap_open: params.gap_open,
            gap_extend: params.gap_extend,
        }
    }
}

impl Default for AffineGapScoring {
    fn default() -> Self {
        Self::from(&ScoringParameters::default())
    }
}

/// Difference between query and reference, in reference coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mutation {
    /// Single-base change.
    Substitution {
        /// Reference position.
        position: usize,
        /// Reference base.
        from: Nucleotide,
        /// Query base.
        to: Nucleotide,
    },
    /// Query bases absent from the reference, inserted before `position`.
    Insertion {
        /// Reference position following the insertion.
        position: usize,
        /// Inserted bases.
        bases: NucleotideSequence,
    },
    /// Reference bases absent from the query, starting at `position`.
    Deletion {
        /// First deleted reference position.
        position: usize,
        /// Deleted reference bases.
        bases: NucleotideSequence,
    },
}

impl Mutation {
    /// Reference position of the event.
    pub fn position(&self) -> usize {
        match self {
            Mutation::Substitution { position, .. }
            | Mutation::Insertion { position, .. }
            | Mutation::Deletion { position, .. } => *position,
        }
    }

    /// Whether this is an insertion or a deletion.
    pub fn is_indel(&self) -> bool {
        !matches!(self, Mutation::Substitution { .. })
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Substitution { position, from, to } => write!(f, "S{position}:{from}>{to}"),
            Mutation::Insertion { position, bases } => write!(f, "I{position}:{bases}"),
            Mutation::Deletion { position, bases } => write!(f, "D{position}:{bases}"),
        }
    }
}

/// Local alignment of a query against a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAlignment {
    /// Aligned reference span.
    pub ref_range: Range<usize>,
    /// Aligned query span.
    pub query_range: Range<usize>,
    /// Alignment score.
    pub score: i32,
    /// Mutations in reference order; adjacent indels of one kind are merged.
    pub mutations: Vec<Mutation>,
    /// Reference position of each query base (`None` outside the alignment or inside insertions).
    pub query_to_ref: Vec<Option<usize>>,
}

impl LocalAlignment {
    /// Number of substitutions.
    pub fn substitutions(&self) -> usize {
        self.mutations.iter().filter(|m| !m.is_indel()).count()
    }

    /// Reference position of query base `query_pos`.
    pub fn map_query(&self, query_pos: usize) -> Option<usize> {
        self.query_to_ref.get(query_pos).copied().flatten()
    }
}

/// Affine-gap local (Smith-Waterman/Gotoh) aligner.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalAligner {
    scoring: AffineGapScoring,
}

impl LocalAligner {
    /// Create an aligner with the given scoring.
    pub fn new(scoring: AffineGapScoring) -> Self {
        Self { scoring }
    }

    /// Scoring in use.
    pub fn scoring(&self) -> &AffineGapScoring {
        &self.scoring
    }

    /// Best local alignment of `query` on `reference`; `None` if no positive score exists.
    pub fn align(&self, reference: &NucleotideSequence, query: &NucleotideSequence) -> Option<LocalAlignment> {
        if reference.is_empty() || query.is_empty() {
            return None;
        }
        let x = query.to_ascii();
        let y = reference.to_ascii();
        let mut aligner = Aligner::with_capacity(
            x.len(),
            y.len(),
            self.scoring.gap_open,
            self.scoring.gap_extend,
            MatchParams::new(self.scoring.match_score, self.scoring.mismatch_score),
        );
        let alignment = aligner.local(&x, &y);
        if alignment.score <= 0 {
            return None;
        }

        let mut builder = MutationBuilder::new(reference, query, alignment.xstart, alignment.ystart);
        for op in &alignment.operations {
            builder.step(*op);
        }
        Some(LocalAlignment {
            ref_range: alignment.ystart..alignment.yend,
            query_range: alignment.xstart..alignment.xend,
            score: alignment.score,
            mutations: builder.mutations,
            query_to_ref: builder.query_to_ref,
        })
    }
}

/// Walks an operation trace, run-length merging indels.
struct MutationBuilder<'a> {
    reference: &'a NucleotideSequence,
    query: &'a NucleotideSequence,
    ref_pos: usize,
    query_pos: usize,
    mutations: Vec<Mutation>,
    query_to_ref: Vec<Option<usize>>,
}

impl<'a> MutationBuilder<'a> {
    fn new(reference: &'a NucleotideSequence, query: &'a NucleotideSequence, query_start: usize, ref_start: usize) -> Self {
        Self {
            reference,
            query,
            ref_pos: ref_start,
            query_pos: query_start,
            mutations: Vec::new(),
            query_to_ref: vec![None; query.len()],
        }
    }

    fn step(&mut self, op: AlignmentOperation) {
        match op {
            AlignmentOperation::Match | AlignmentOperation::Subst => {
                if let (Some(from), Some(to)) = (self.reference.get(self.ref_pos), self.query.get(self.query_pos)) {
                    if from != to {
                        self.mutations.push(Mutation::Substitution {
                            position: self.ref_pos,
                            from,
                            to,
                        });
                    }
                }
                if let Some(slot) = self.query_to_ref.get_mut(self.query_pos) {
                    *slot = Some(self.ref_pos);
                }
                self.ref_pos += 1;
                self.query_pos += 1;
            }
            AlignmentOperation::Ins => {
                if let Some(base) = self.query.get(self.query_pos) {
                    match self.mutations.last_mut() {
                        Some(Mutation::Insertion { position, bases }) if *position == self.ref_pos => {
                            bases.push(base)
                        }
                        _ => self.mutations.push(Mutation::Insertion {
                            position: self.ref_pos,
                            bases: NucleotideSequence::from_nucleotides([base]),
                        }),
                    }
                }
                self.query_pos += 1;
            }
            AlignmentOperation::Del => {
                if let Some(base) = self.reference.get(self.ref_pos) {
                    match self.mutations.last_mut() {
                        Some(Mutation::Deletion { position, bases })
                            if *position + bases.len() == self.ref_pos =>
                        {
                            bases.push(base)
                        }
                        _ => self.mutations.push(Mutation::Deletion {
                            position: self.ref_pos,
                            bases: NucleotideSequence::from_nucleotides([base]),
                        }),
                    }
                }
                self.ref_pos += 1;
            }
            // Clipped flanks lie outside the local alignment.
            AlignmentOperation::Xclip(_) | AlignmentOperation::Yclip(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = "ACGTTGCAAGCTTAGCCGATCGGATACCTGAAGTCCATGGTACGCTAGCAATTCGG";

    fn seq(s: &str) -> NucleotideSequence {
        NucleotideSequence::from_ascii(s.as_bytes()).unwrap()
    }

    #[test]
    fn exact_substring_aligns_without_mutations() {
        let aligner = LocalAligner::default();
        let alignment = aligner.align(&seq(REFERENCE), &seq(&REFERENCE[10..40])).unwrap();
        assert_eq!(alignment.ref_range, 10..40);
        assert_eq!(alignment.query_range, 0..30);
        assert_eq!(alignment.score, 30);
        assert!(alignment.mutations.is_empty());
        assert_eq!(alignment.map_query(0), Some(10));
    }

    #[test]
    fn substitution_is_reported_in_reference_coordinates() {
        let mut query = REFERENCE[..40].as_bytes().to_vec();
        query[20] = b'A'; // reference has C
        let alignment = LocalAligner::default().align(&seq(REFERENCE), &seq(std::str::from_utf8(&query).unwrap())).unwrap();
        assert_eq!(
            alignment.mutations,
            vec![Mutation::Substitution {
                position: 20,
                from: Nucleotide::C,
                to: Nucleotide::A
            }]
        );
        assert_eq!(alignment.mutations[0].to_string(), "S20:C>A");
    }

    #[test]
    fn deletion_is_merged_into_one_event() {
        let query = format!("{}{}", &REFERENCE[..25], &REFERENCE[28..55]);
        let alignment = LocalAligner::default().align(&seq(REFERENCE), &seq(&query)).unwrap();
        let deletions: Vec<&Mutation> = alignment.mutations.iter().filter(|m| m.is_indel()).collect();
        assert_eq!(deletions.len(), 1);
        match deletions[0] {
            Mutation::Deletion { bases, .. } => assert_eq!(bases.len(), 3),
            other => panic!("unexpected mutation {other}"),
        }
        assert_eq!(alignment.substitutions(), 0);
    }

    #[test]
    fn insertion_leaves_query_bases_unmapped() {
        let query = format!("{}GGG{}", &REFERENCE[..25], &REFERENCE[25..50]);
        let alignment = LocalAligner::default().align(&seq(REFERENCE), &seq(&query)).unwrap();
        let insertion = alignment
            .mutations
            .iter()
            .find(|m| matches!(m, Mutation::Insertion { .. }))
            .expect("insertion expected");
        if let Mutation::Insertion { bases, .. } = insertion {
            assert_eq!(bases.to_string(), "GGG");
        }
        assert_eq!(alignment.query_to_ref.iter().filter(|p| p.is_none()).count(), 3);
    }

    #[test]
    fn unrelated_sequences_do_not_align() {
        assert!(LocalAligner::default().align(&seq("AAAAAAAA"), &seq("CCCCCCCC")).is_none());
    }

    #[test]
    fn scoring_validation() {
        assert!(ScoringParameters::default().validate().is_ok());
        let bad = ScoringParameters {
            mismatch_score: 1,
            ..ScoringParameters::default()
        };
        assert!(bad.validate().is_err());
        assert_eq!(AffineGapScoring::default().gap(3), -11);
    }
}
