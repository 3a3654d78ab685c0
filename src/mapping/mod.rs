//! Reference lookup: k-mer voting, affine-gap local alignment and its
//! acceptance rules, and the per-consensus mapping driver.

mod aligner;
mod consensus_aligner;
mod evaluator;
mod kmer;

pub use aligner::{AffineGapScoring, LocalAligner, LocalAlignment, Mutation, ScoringParameters};
pub use consensus_aligner::{
    is_chimeric, update, AlignOutcome, AlignerParameters, AlignerStrategy, AlignmentResult,
    AlignmentStatistics, BruteForceAligner, ConsensusAligner, ConsensusAlignment,
    KmerSeededAligner, ReferenceAligner, UnmappedReason,
};
pub use evaluator::{EvaluatorParameters, LocalAlignmentEvaluator};
pub use kmer::{KmerEntry, KmerError, KmerFinder, KmerFinderResult, KmerMap, KmerParameters, MAX_K};
