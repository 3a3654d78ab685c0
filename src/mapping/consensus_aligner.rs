use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::assembly::{Consensus, SingleConsensus};
use crate::genomics::{NucleotideSequence, ReferenceLibrary, SequenceWithQuality};
use crate::mapping::{
    AffineGapScoring, EvaluatorParameters, KmerFinder, KmerMap, LocalAligner, LocalAlignment,
    LocalAlignmentEvaluator, ScoringParameters,
};
use crate::variants::MutationsTables;

/// How a consensus is matched to its reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignerStrategy {
    /// K-mer vote picks the reference, then one local alignment.
    #[default]
    KmerSeeded,
    /// Local alignment against every reference on both strands.
    BruteForce,
}

/// Reference lookup settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerParameters {
    /// Lookup strategy.
    pub strategy: AlignerStrategy,
}

/// A consensus placed on a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentResult {
    /// 0-based reference index.
    pub reference: usize,
    /// Query was reverse-complemented to match the reference strand.
    pub reverse: bool,
    /// Query as aligned (reverse-complemented when `reverse`).
    pub query: SequenceWithQuality,
    /// Local alignment of `query` on the reference.
    pub alignment: LocalAlignment,
    /// Evaluator verdict.
    pub good: bool,
    /// MAPQ-like confidence.
    pub confidence: u8,
}

/// Outcome of one reference lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignOutcome {
    /// Aligned and accepted.
    Aligned(AlignmentResult),
    /// No query k-mer is indexed.
    NoKmerHit,
    /// No positive-scoring local alignment.
    NoAlignment,
    /// Aligned but rejected by the evaluator.
    Rejected(AlignmentResult),
}

/// Finds the reference of a query sequence.
pub trait ReferenceAligner: Send + Sync + fmt::Debug {
    /// Align `query` (with its qualities) to the best reference.
    fn align(&self, query: &SequenceWithQuality) -> AlignOutcome;
}

fn evaluate(
    evaluator: &LocalAlignmentEvaluator,
    reference: &NucleotideSequence,
    query: SequenceWithQuality,
    placement: (usize, bool),
    alignment: LocalAlignment,
    confidence: u8,
) -> AlignOutcome {
    let good = evaluator.is_good(&alignment, query.len(), reference.len());
    let result = AlignmentResult {
        reference: placement.0,
        reverse: placement.1,
        query,
        alignment,
        good,
        confidence,
    };
    if good {
        AlignOutcome::Aligned(result)
    } else {
        AlignOutcome::Rejected(result)
    }
}

/// K-mer vote followed by a single local alignment.
#[derive(Debug, Clone)]
pub struct KmerSeededAligner {
    finder: KmerFinder,
    aligner: LocalAligner,
    evaluator: LocalAlignmentEvaluator,
}

impl KmerSeededAligner {
    /// Create from a shared index.
    pub fn new(finder: KmerFinder, aligner: LocalAligner, evaluator: LocalAlignmentEvaluator) -> Self {
        Self {
            finder,
            aligner,
            evaluator,
        }
    }
}

impl ReferenceAligner for KmerSeededAligner {
    fn align(&self, query: &SequenceWithQuality) -> AlignOutcome {
        let Some(hit) = self.finder.find(query.sequence()) else {
            return AlignOutcome::NoKmerHit;
        };
        let Some(reference) = self.finder.library().get(hit.reference) else {
            return AlignOutcome::NoKmerHit;
        };
        let oriented = if hit.reverse {
            query.reverse_complement()
        } else {
            query.clone()
        };
        match self.aligner.align(&reference.sequence, oriented.sequence()) {
            Some(alignment) => evaluate(
                &self.evaluator,
                &reference.sequence,
                oriented,
                (hit.reference, hit.reverse),
                alignment,
                hit.score,
            ),
            None => AlignOutcome::NoAlignment,
        }
    }
}

/// Exhaustive local alignment against every reference and strand.
#[derive(Debug, Clone)]
pub struct BruteForceAligner {
    library: Arc<ReferenceLibrary>,
    aligner: LocalAligner,
    evaluator: LocalAlignmentEvaluator,
}

impl BruteForceAligner {
    /// Create over a shared library.
    pub fn new(library: Arc<ReferenceLibrary>, aligner: LocalAligner, evaluator: LocalAlignmentEvaluator) -> Self {
        Self {
            library,
            aligner,
            evaluator,
        }
    }
}

impl ReferenceAligner for BruteForceAligner {
    fn align(&self, query: &SequenceWithQuality) -> AlignOutcome {
        let reversed = query.reverse_complement();
        let mut best: Option<(usize, bool, LocalAlignment)> = None;
        let mut second_score = 0;

        // References in order, forward first: strict improvement keeps the earlier candidate on ties.
        for reference in self.library.iter() {
            for (reverse, oriented) in [(false, query), (true, &reversed)] {
                let Some(alignment) = self.aligner.align(&reference.sequence, oriented.sequence()) else {
                    continue;
                };
                match &best {
                    Some((_, _, current)) if alignment.score <= current.score => {
                        second_score = second_score.max(alignment.score);
                    }
                    _ => {
                        if let Some((_, _, previous)) = &best {
                            second_score = second_score.max(previous.score);
                        }
                        best = Some((reference.index, reverse, alignment));
                    }
                }
            }
        }

        let Some((index, reverse, alignment)) = best else {
            return AlignOutcome::NoAlignment;
        };
        let Some(reference) = self.library.get(index) else {
            return AlignOutcome::NoAlignment;
        };
        let confidence = (alignment.score - second_score).clamp(0, 255) as u8;
        let oriented = if reverse { reversed } else { query.clone() };
        evaluate(
            &self.evaluator,
            &reference.sequence,
            oriented,
            (index, reverse),
            alignment,
            confidence,
        )
    }
}

/// Why a consensus contributed nothing to the tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmappedReason {
    /// No k-mer hit.
    NoKmerHit,
    /// No local alignment.
    NoAlignment,
    /// Evaluator rejected the alignment.
    Rejected,
}

/// Mapping of one consensus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusAlignment {
    /// Single consensus aligned.
    Single(AlignmentResult),
    /// Both mates aligned consistently.
    Paired(AlignmentResult, AlignmentResult),
    /// Mates aligned to different references or strands, or their spans overlap.
    Chimeric(AlignmentResult, AlignmentResult),
    /// Not aligned.
    Unmapped(UnmappedReason),
}

impl ConsensusAlignment {
    /// Whether the alignment may update mutation tables.
    pub fn is_usable(&self) -> bool {
        matches!(self, ConsensusAlignment::Single(_) | ConsensusAlignment::Paired(..))
    }
}

/// Mapping counters.
#[derive(Debug, Default)]
pub struct AlignmentStatistics {
    total: AtomicU64,
    aligned: AtomicU64,
    no_kmer_hit: AtomicU64,
    no_alignment: AtomicU64,
    rejected: AtomicU64,
    chimeric: AtomicU64,
}

impl AlignmentStatistics {
    /// Consensuses seen.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Consensuses aligned and accepted.
    pub fn aligned(&self) -> u64 {
        self.aligned.load(Ordering::Relaxed)
    }

    /// Consensuses without a k-mer hit.
    pub fn no_kmer_hit(&self) -> u64 {
        self.no_kmer_hit.load(Ordering::Relaxed)
    }

    /// Consensuses without a local alignment.
    pub fn no_alignment(&self) -> u64 {
        self.no_alignment.load(Ordering::Relaxed)
    }

    /// Consensuses rejected by the evaluator.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Paired consensuses flagged chimeric.
    pub fn chimeric(&self) -> u64 {
        self.chimeric.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: &ConsensusAlignment) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ConsensusAlignment::Single(_) | ConsensusAlignment::Paired(..) => &self.aligned,
            ConsensusAlignment::Chimeric(..) => &self.chimeric,
            ConsensusAlignment::Unmapped(UnmappedReason::NoKmerHit) => &self.no_kmer_hit,
            ConsensusAlignment::Unmapped(UnmappedReason::NoAlignment) => &self.no_alignment,
            ConsensusAlignment::Unmapped(UnmappedReason::Rejected) => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Maps consensuses to references and feeds the mutation tables.
#[derive(Debug)]
pub struct ConsensusAligner {
    aligner: Box<dyn ReferenceAligner>,
    stats: AlignmentStatistics,
}

impl ConsensusAligner {
    /// Wrap a reference aligner.
    pub fn new(aligner: Box<dyn ReferenceAligner>) -> Self {
        Self {
            aligner,
            stats: AlignmentStatistics::default(),
        }
    }

    /// Build the aligner selected by `params.strategy`.
    pub fn from_parameters(
        library: Arc<ReferenceLibrary>,
        map: Arc<KmerMap>,
        params: &AlignerParameters,
        scoring: &ScoringParameters,
        evaluator: &EvaluatorParameters,
    ) -> Self {
        let local = LocalAligner::new(AffineGapScoring::from(scoring));
        let evaluator = LocalAlignmentEvaluator::new(evaluator.clone());
        let aligner: Box<dyn ReferenceAligner> = match params.strategy {
            AlignerStrategy::KmerSeeded => Box::new(KmerSeededAligner::new(
                KmerFinder::new(map, library),
                local,
                evaluator,
            )),
            AlignerStrategy::BruteForce => Box::new(BruteForceAligner::new(library, local, evaluator)),
        };
        Self::new(aligner)
    }

    /// Mapping counters.
    pub fn statistics(&self) -> &AlignmentStatistics {
        &self.stats
    }

    /// Map a consensus without touching any table.
    pub fn align(&self, consensus: &Consensus) -> ConsensusAlignment {
        let outcome = match consensus {
            Consensus::Single(single) => match self.aligner.align(&single.sequence) {
                AlignOutcome::Aligned(result) => ConsensusAlignment::Single(result),
                other => ConsensusAlignment::Unmapped(unmapped_reason(&other)),
            },
            Consensus::Paired(paired) => {
                let first = self.aligner.align(&paired.first.sequence);
                let second = self.aligner.align(&paired.second.sequence);
                match (first, second) {
                    (AlignOutcome::Aligned(first), AlignOutcome::Aligned(second)) => {
                        if is_chimeric(&first, &second) {
                            ConsensusAlignment::Chimeric(first, second)
                        } else {
                            ConsensusAlignment::Paired(first, second)
                        }
                    }
                    (AlignOutcome::Aligned(_), other) | (other, _) => {
                        ConsensusAlignment::Unmapped(unmapped_reason(&other))
                    }
                }
            }
        };
        self.stats.record(&outcome);
        trace!(umi = %consensus.umi(), usable = outcome.is_usable(), "consensus mapped");
        outcome
    }

    /// Map a consensus and, when usable, record it in `tables`.
    pub fn process(&self, consensus: &Consensus, tables: &MutationsTables) -> ConsensusAlignment {
        let outcome = self.align(consensus);
        match (&outcome, consensus) {
            (ConsensusAlignment::Single(result), Consensus::Single(single)) => {
                update(tables, single, result);
            }
            (ConsensusAlignment::Paired(first, second), Consensus::Paired(paired)) => {
                update(tables, &paired.first, first);
                update(tables, &paired.second, second);
            }
            _ => {}
        }
        outcome
    }
}

fn unmapped_reason(outcome: &AlignOutcome) -> UnmappedReason {
    match outcome {
        AlignOutcome::NoKmerHit => UnmappedReason::NoKmerHit,
        AlignOutcome::NoAlignment => UnmappedReason::NoAlignment,
        AlignOutcome::Rejected(_) | AlignOutcome::Aligned(_) => UnmappedReason::Rejected,
    }
}

/// Mates are chimeric when their references or strands differ or their spans overlap.
pub fn is_chimeric(first: &AlignmentResult, second: &AlignmentResult) -> bool {
    if first.reference != second.reference || first.reverse != second.reverse {
        return true;
    }
    let (a, b) = (&first.alignment.ref_range, &second.alignment.ref_range);
    a.start < b.end && b.start < a.end
}

/// Record an accepted alignment of `consensus` in `tables`.
///
/// Every aligned query base adds one major molecule; family minors add one
/// minor molecule at their mapped position; indels go to the indel counters.
pub fn update(tables: &MutationsTables, consensus: &SingleConsensus, result: &AlignmentResult) {
    let Some(table) = tables.get(result.reference) else {
        return;
    };
    let reads = consensus.assembled as u64;
    let query = &result.query;

    for query_pos in result.alignment.query_range.clone() {
        let Some(ref_pos) = result.alignment.map_query(query_pos) else {
            continue;
        };
        if let (Some(base), Some(quality)) = (query.sequence().get(query_pos), query.quality().get(query_pos)) {
            table.record_major(ref_pos, base, reads, quality);
        }
    }

    let len = consensus.sequence.len();
    for minor in &consensus.minors {
        let (query_pos, base) = if result.reverse {
            (len - 1 - minor.position, minor.base.complement())
        } else {
            (minor.position, minor.base)
        };
        if let Some(ref_pos) = result.alignment.map_query(query_pos) {
            table.record_minor(ref_pos, base, minor.read_count as u64);
        }
    }

    for mutation in result.alignment.mutations.iter().filter(|m| m.is_indel()) {
        table.record_indel(mutation, reads);
    }
}
