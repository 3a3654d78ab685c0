use std::sync::atomic::{AtomicU64, Ordering};

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::assembly::{OverlapParameters, Overlapper};
use crate::config::{check_range, check_ratio, ConfigError};
use crate::genomics::{
    Mig, Nucleotide, NucleotideSequence, QualityProfile, ReadPayload, SequenceWithQuality,
};

/// Highest consensus quality score.
pub const MAX_CQS: u8 = 40;
/// Lowest consensus quality score.
pub const MIN_CQS: u8 = 2;

/// Map the majority fraction at a position to a consensus quality score.
///
/// A fraction of 0.25 (four bases equally likely) maps to [`MIN_CQS`], a
/// unanimous vote to [`MAX_CQS`].
pub fn percentage_to_cqs(fraction: f64) -> u8 {
    let raw = (f64::from(MAX_CQS) * (fraction - 0.25) / 0.75).round();
    raw.clamp(f64::from(MIN_CQS), f64::from(MAX_CQS)) as u8
}

/// Consensus assembly thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerParameters {
    /// Shifts tried when placing a read against the core read.
    pub offset_range: usize,
    /// Minimum overlap between a placed read and the core read.
    pub anchor_region: usize,
    /// Reads with more mismatches against the core are dropped.
    pub max_mismatches: usize,
    /// Reads with a longer mismatch run against the core are dropped.
    pub max_consequent_mismatches: usize,
    /// Families losing a larger fraction of reads are dropped.
    pub max_dropped_reads_ratio: f64,
    /// Minority bases at or above this fraction are flagged as minors.
    pub minor_frequency_threshold: f64,
    /// Smallest family that is assembled.
    pub min_family_size: usize,
    /// Try to merge mate pairs before voting.
    pub try_overlap: bool,
}

impl Default for AssemblerParameters {
    fn default() -> Self {
        Self {
            offset_range: 4,
            anchor_region: 8,
            max_mismatches: 4,
            max_consequent_mismatches: 3,
            max_dropped_reads_ratio: 0.3,
            minor_frequency_threshold: 0.0,
            min_family_size: 1,
            try_overlap: true,
        }
    }
}

impl AssemblerParameters {
    /// Validate ratios and sizes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("assembler.anchor_region", self.anchor_region, 1, usize::MAX, ">= 1")?;
        check_range("assembler.min_family_size", self.min_family_size, 1, usize::MAX, ">= 1")?;
        check_ratio("assembler.max_dropped_reads_ratio", self.max_dropped_reads_ratio)?;
        check_ratio("assembler.minor_frequency_threshold", self.minor_frequency_threshold)
    }
}

/// A minority base observed inside one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinorVariant {
    /// Position in the consensus.
    pub position: usize,
    /// Minority base.
    pub base: Nucleotide,
    /// Reads carrying it.
    pub read_count: usize,
}

/// Consensus of one read set (a single-end family or one mate of a pair).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleConsensus {
    /// Family UMI.
    pub umi: NucleotideSequence,
    /// Consensus bases with CQS qualities.
    pub sequence: SequenceWithQuality,
    /// Minority bases, ordered by position then base.
    pub minors: Vec<MinorVariant>,
    /// Positions carrying at least one minor.
    pub minor_positions: BitVec,
    /// Reads that voted.
    pub assembled: usize,
    /// Reads in the family, voted or dropped.
    pub full_size: usize,
}

/// Two mates assembled independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedConsensus {
    /// Consensus of mate 1.
    pub first: SingleConsensus,
    /// Consensus of mate 2, reverse-complemented onto mate 1's strand.
    pub second: SingleConsensus,
}

/// Assembled family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consensus {
    /// One consensus read (single-end or merged pairs).
    Single(SingleConsensus),
    /// Mates that did not merge.
    Paired(PairedConsensus),
}

impl Consensus {
    /// Family UMI.
    pub fn umi(&self) -> &NucleotideSequence {
        match self {
            Consensus::Single(single) => &single.umi,
            Consensus::Paired(paired) => &paired.first.umi,
        }
    }

    /// Reads that contributed to the consensus.
    pub fn assembled(&self) -> usize {
        match self {
            Consensus::Single(single) => single.assembled,
            Consensus::Paired(paired) => paired.first.assembled.min(paired.second.assembled),
        }
    }

    /// Family size including dropped reads.
    pub fn full_size(&self) -> usize {
        match self {
            Consensus::Single(single) => single.full_size,
            Consensus::Paired(paired) => paired.first.full_size,
        }
    }
}

/// Assembly counters.
#[derive(Debug, Default)]
pub struct AssemblyStatistics {
    migs_total: AtomicU64,
    migs_assembled: AtomicU64,
    migs_dropped: AtomicU64,
    reads_total: AtomicU64,
    reads_assembled: AtomicU64,
    pairs_total: AtomicU64,
    pairs_overlapped: AtomicU64,
}

impl AssemblyStatistics {
    /// Families seen.
    pub fn migs_total(&self) -> u64 {
        self.migs_total.load(Ordering::Relaxed)
    }

    /// Families that produced a consensus.
    pub fn migs_assembled(&self) -> u64 {
        self.migs_assembled.load(Ordering::Relaxed)
    }

    /// Families dropped.
    pub fn migs_dropped(&self) -> u64 {
        self.migs_dropped.load(Ordering::Relaxed)
    }

    /// Reads seen.
    pub fn reads_total(&self) -> u64 {
        self.reads_total.load(Ordering::Relaxed)
    }

    /// Reads that voted in an emitted consensus.
    pub fn reads_assembled(&self) -> u64 {
        self.reads_assembled.load(Ordering::Relaxed)
    }

    /// Mate pairs seen.
    pub fn pairs_total(&self) -> u64 {
        self.pairs_total.load(Ordering::Relaxed)
    }

    /// Mate pairs merged by the overlapper.
    pub fn pairs_overlapped(&self) -> u64 {
        self.pairs_overlapped.load(Ordering::Relaxed)
    }
}

/// Majority-vote consensus builder for molecular families.
#[derive(Debug, Default)]
pub struct Assembler {
    params: AssemblerParameters,
    overlapper: Overlapper,
    stats: AssemblyStatistics,
}

impl Assembler {
    /// Create an assembler; `overlap` configures mate merging.
    pub fn new(params: AssemblerParameters, overlap: OverlapParameters) -> Self {
        Self {
            params,
            overlapper: Overlapper::new(overlap),
            stats: AssemblyStatistics::default(),
        }
    }

    /// Assembly counters.
    pub fn statistics(&self) -> &AssemblyStatistics {
        &self.stats
    }

    /// Assemble one family; `None` when it is empty, too small or too noisy.
    pub fn assemble(&self, mig: &Mig) -> Option<Consensus> {
        self.stats.migs_total.fetch_add(1, Ordering::Relaxed);
        self.stats
            .reads_total
            .fetch_add(mig.size() as u64, Ordering::Relaxed);

        let consensus = if mig.is_paired() {
            self.assemble_paired(mig)
        } else {
            let reads: Vec<&SequenceWithQuality> = mig.reads.iter().map(ReadPayload::first).collect();
            self.assemble_reads(&mig.umi, &reads, mig.size()).map(Consensus::Single)
        };

        match &consensus {
            Some(assembled) => {
                self.stats.migs_assembled.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .reads_assembled
                    .fetch_add(assembled.assembled() as u64, Ordering::Relaxed);
            }
            None => {
                self.stats.migs_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(umi = %mig.umi, size = mig.size(), "family dropped");
            }
        }
        consensus
    }

    fn assemble_paired(&self, mig: &Mig) -> Option<Consensus> {
        let pairs: Vec<(&SequenceWithQuality, SequenceWithQuality)> = mig
            .reads
            .iter()
            .filter_map(|payload| match payload {
                ReadPayload::Paired(first, second) => Some((first, second.reverse_complement())),
                ReadPayload::Single(_) => None,
            })
            .collect();
        self.stats
            .pairs_total
            .fetch_add(pairs.len() as u64, Ordering::Relaxed);

        if self.params.try_overlap {
            let merged: Vec<SequenceWithQuality> = pairs
                .iter()
                .filter_map(|(first, second)| self.overlapper.overlap(first, second).merged)
                .collect();
            self.stats
                .pairs_overlapped
                .fetch_add(merged.len() as u64, Ordering::Relaxed);
            if !merged.is_empty() && merged.len() * 2 >= pairs.len() {
                let reads: Vec<&SequenceWithQuality> = merged.iter().collect();
                return self
                    .assemble_reads(&mig.umi, &reads, pairs.len())
                    .map(Consensus::Single);
            }
        }

        let firsts: Vec<&SequenceWithQuality> = pairs.iter().map(|(first, _)| *first).collect();
        let seconds: Vec<&SequenceWithQuality> = pairs.iter().map(|(_, second)| second).collect();
        let first = self.assemble_reads(&mig.umi, &firsts, pairs.len())?;
        let second = self.assemble_reads(&mig.umi, &seconds, pairs.len())?;
        Some(Consensus::Paired(PairedConsensus { first, second }))
    }

    /// Vote over `reads`; `full_size` counts reads lost before this point too.
    fn assemble_reads(
        &self,
        umi: &NucleotideSequence,
        reads: &[&SequenceWithQuality],
        full_size: usize,
    ) -> Option<SingleConsensus> {
        if full_size == 0 || full_size < self.params.min_family_size {
            return None;
        }
        let core = core_read(reads)?;

        let placed: Vec<(&SequenceWithQuality, isize)> = reads
            .iter()
            .filter_map(|read| self.place(core, read).map(|shift| (*read, shift)))
            .collect();
        let dropped = full_size - placed.len();
        if placed.is_empty()
            || dropped as f64 > self.params.max_dropped_reads_ratio * full_size as f64
        {
            return None;
        }

        Some(self.vote(umi, core.len(), &placed, full_size))
    }

    /// Best shift of `read` against `core`, or `None` if the read is too divergent.
    ///
    /// `core[p + shift]` is compared with `read[p]`.
    fn place(&self, core: &NucleotideSequence, read: &SequenceWithQuality) -> Option<isize> {
        let range = self.params.offset_range as isize;
        let mut shifts: Vec<isize> = (-range..=range).collect();
        shifts.sort_by_key(|shift| (shift.abs(), *shift >= 0));

        let mut best: Option<(usize, usize, isize)> = None;
        for shift in shifts {
            let Some((mismatches, longest_run)) = compare(core, read.sequence(), shift, self.params.anchor_region)
            else {
                continue;
            };
            if best.map_or(true, |(best_mms, _, _)| mismatches < best_mms) {
                best = Some((mismatches, longest_run, shift));
            }
        }

        let (mismatches, longest_run, shift) = best?;
        (mismatches <= self.params.max_mismatches
            && longest_run <= self.params.max_consequent_mismatches)
            .then_some(shift)
    }

    fn vote(
        &self,
        umi: &NucleotideSequence,
        len: usize,
        placed: &[(&SequenceWithQuality, isize)],
        full_size: usize,
    ) -> SingleConsensus {
        let mut counts = vec![[0usize; 4]; len];
        // Read index at which each base was first seen per position.
        let mut first_seen = vec![[usize::MAX; 4]; len];
        for (order, (read, shift)) in placed.iter().enumerate() {
            for (pos, base) in read.sequence().iter().enumerate() {
                let core_pos = pos as isize + shift;
                if core_pos < 0 || core_pos >= len as isize {
                    continue;
                }
                let core_pos = core_pos as usize;
                counts[core_pos][base.index()] += 1;
                let seen = &mut first_seen[core_pos][base.index()];
                *seen = (*seen).min(order);
            }
        }

        let mut bases = NucleotideSequence::empty();
        let mut quals = Vec::with_capacity(len);
        let mut minors = Vec::new();
        let mut minor_positions = bitvec![0; len];
        for pos in 0..len {
            let coverage: usize = counts[pos].iter().sum();
            let major = Nucleotide::ALL
                .into_iter()
                .max_by(|a, b| {
                    counts[pos][a.index()]
                        .cmp(&counts[pos][b.index()])
                        .then_with(|| first_seen[pos][b.index()].cmp(&first_seen[pos][a.index()]))
                })
                .unwrap_or(Nucleotide::A);
            let fraction = if coverage == 0 {
                0.0
            } else {
                counts[pos][major.index()] as f64 / coverage as f64
            };
            bases.push(major);
            quals.push(percentage_to_cqs(fraction));

            for base in Nucleotide::ALL {
                let count = counts[pos][base.index()];
                if base == major || count == 0 {
                    continue;
                }
                if count as f64 >= self.params.minor_frequency_threshold * coverage as f64 {
                    minors.push(MinorVariant {
                        position: pos,
                        base,
                        read_count: count,
                    });
                    minor_positions.set(pos, true);
                }
            }
        }

        SingleConsensus {
            umi: umi.clone(),
            sequence: SequenceWithQuality::from_parts_unchecked(bases, QualityProfile::new(quals)),
            minors,
            minor_positions,
            assembled: placed.len(),
            full_size,
        }
    }
}

/// Most frequent read sequence; ties go to the longer one, then to the first seen.
fn core_read<'a>(reads: &[&'a SequenceWithQuality]) -> Option<&'a NucleotideSequence> {
    let mut tally: Vec<(&NucleotideSequence, usize)> = Vec::new();
    for read in reads {
        match tally.iter_mut().find(|(seq, _)| *seq == read.sequence()) {
            Some((_, count)) => *count += 1,
            None => tally.push((read.sequence(), 1)),
        }
    }
    tally
        .into_iter()
        .enumerate()
        .max_by(|(ia, (sa, ca)), (ib, (sb, cb))| {
            ca.cmp(cb)
                .then_with(|| sa.len().cmp(&sb.len()))
                .then_with(|| ib.cmp(ia))
        })
        .map(|(_, (seq, _))| seq)
}

/// Mismatches and longest mismatch run of `read` placed at `shift` on `core`;
/// `None` when the overlap is shorter than `min_overlap`.
fn compare(
    core: &NucleotideSequence,
    read: &NucleotideSequence,
    shift: isize,
    min_overlap: usize,
) -> Option<(usize, usize)> {
    let start = (-shift).max(0) as usize;
    let end = (core.len() as isize - shift).min(read.len() as isize);
    if end <= start as isize || ((end as usize) - start) < min_overlap.min(core.len()).min(read.len()) {
        return None;
    }

    let mut mismatches = 0;
    let mut run = 0;
    let mut longest_run = 0;
    for pos in start..end as usize {
        if read.get(pos) == core.get((pos as isize + shift) as usize) {
            run = 0;
        } else {
            mismatches += 1;
            run += 1;
            longest_run = longest_run.max(run);
        }
    }
    Some((mismatches, longest_run))
}
