use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::{check_range, check_ratio, ConfigError};
use crate::genomics::{NucleotideSequence, QualityProfile, SequenceWithQuality};

/// Thresholds for merging mate pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlapParameters {
    /// Exact seed taken from mate 2.
    pub overlap_seed_size: usize,
    /// Bases compared to the right of the seed.
    pub overlap_fuzzy_size: usize,
    /// Longest tolerated run of mismatching bases.
    pub max_consecutive_mismatches: usize,
    /// Mismatch fraction over the compared bases.
    pub max_overlap_mismatch_ratio: f64,
    /// Largest seed offset tried in mate 2.
    pub max_overlap_offset: usize,
    /// Accept overlaps whose right extension hits the end of mate 1 early.
    pub allow_partial_overlap: bool,
}

impl Default for OverlapParameters {
    fn default() -> Self {
        Self {
            overlap_seed_size: 5,
            overlap_fuzzy_size: 5,
            max_consecutive_mismatches: 2,
            max_overlap_mismatch_ratio: 0.1,
            max_overlap_offset: 20,
            allow_partial_overlap: false,
        }
    }
}

impl OverlapParameters {
    /// Validate sizes and ratio.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("overlap.overlap_seed_size", self.overlap_seed_size, 1, 31, "1..=31")?;
        check_ratio("overlap.max_overlap_mismatch_ratio", self.max_overlap_mismatch_ratio)
    }
}

/// Outcome of [`Overlapper::overlap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapResult {
    /// Merged read, `None` when the mates do not overlap.
    pub merged: Option<SequenceWithQuality>,
    /// Insert shorter than the reads: mate 2 ends inside mate 1.
    pub read_through: bool,
    /// Seed position in mate 1.
    pub offset1: usize,
    /// Seed position in mate 2.
    pub offset2: usize,
    /// Position of mate 2's first base in mate 1 coordinates.
    pub shift: isize,
}

impl OverlapResult {
    /// Sentinel for mates that could not be merged.
    pub const NOT_OVERLAPPED: OverlapResult = OverlapResult {
        merged: None,
        read_through: false,
        offset1: 0,
        offset2: 0,
        shift: 0,
    };

    /// Whether the mates were merged.
    pub fn is_overlapped(&self) -> bool {
        self.merged.is_some()
    }
}

/// Seed-and-extend merger of mate pairs.
#[derive(Debug, Clone, Default)]
pub struct Overlapper {
    params: OverlapParameters,
}

impl Overlapper {
    /// Create an overlapper.
    pub fn new(params: OverlapParameters) -> Self {
        Self { params }
    }

    /// Merge `read2` (already on `read1`'s strand) into `read1`.
    ///
    /// Seeds are taken from `read2` at offsets `0..=max_overlap_offset`; for
    /// each, every exact occurrence in `read1` is tried leftmost first and
    /// the first passing extension wins.
    pub fn overlap(&self, read1: &SequenceWithQuality, read2: &SequenceWithQuality) -> OverlapResult {
        let seed_size = self.params.overlap_seed_size;
        if seed_size == 0 || read1.len() < seed_size || read2.len() < seed_size {
            return OverlapResult::NOT_OVERLAPPED;
        }

        let last_offset = self.params.max_overlap_offset.min(read2.len() - seed_size);
        for offset2 in 0..=last_offset {
            let seed = read2.sequence().range(offset2..offset2 + seed_size);
            for offset1 in read1.sequence().occurrences(&seed, 0) {
                let shift = offset1 as isize - offset2 as isize;
                if let Some(read_through) = self.extend(read1, read2, offset2, shift) {
                    trace!(offset1, offset2, shift, read_through, "mates overlapped");
                    return OverlapResult {
                        merged: Some(merge(read1, read2, shift, read_through)),
                        read_through,
                        offset1,
                        offset2,
                        shift,
                    };
                }
            }
        }
        OverlapResult::NOT_OVERLAPPED
    }

    /// Fuzzy check around a seed hit; returns the read-through flag on success.
    fn extend(
        &self,
        read1: &SequenceWithQuality,
        read2: &SequenceWithQuality,
        seed_start: usize,
        shift: isize,
    ) -> Option<bool> {
        let len1 = read1.len() as isize;
        let len2 = read2.len() as isize;
        let seed_end = (seed_start + self.params.overlap_seed_size) as isize;
        let read_through = shift + len2 <= len1;

        let zone_start = (-shift).max(0);
        let zone_end = len2.min(len1 - shift);
        let right_available = (zone_end - seed_end).max(0) as usize;
        if right_available < self.params.overlap_fuzzy_size
            && !read_through
            && !self.params.allow_partial_overlap
        {
            return None;
        }
        let right_end = seed_end + right_available.min(self.params.overlap_fuzzy_size) as isize;

        let seq1 = read1.sequence();
        let seq2 = read2.sequence();
        let mut compared = 0usize;
        let mut mismatches = 0usize;
        let mut run = 0usize;
        let positions = (zone_start..seed_start as isize).chain(seed_end..right_end);
        for pos2 in positions {
            compared += 1;
            if seq2.get(pos2 as usize) == seq1.get((pos2 + shift) as usize) {
                run = 0;
                continue;
            }
            mismatches += 1;
            run += 1;
            if run > self.params.max_consecutive_mismatches {
                return None;
            }
        }

        if compared > 0
            && mismatches as f64 > self.params.max_overlap_mismatch_ratio * compared as f64
        {
            return None;
        }
        Some(read_through)
    }
}

/// Build the merged read in mate 1 coordinates, keeping the better base where both mates cover.
fn merge(
    read1: &SequenceWithQuality,
    read2: &SequenceWithQuality,
    shift: isize,
    read_through: bool,
) -> SequenceWithQuality {
    let len1 = read1.len() as isize;
    let len2 = read2.len() as isize;
    let (start, end) = if read_through {
        (0, shift + len2)
    } else {
        (shift.min(0), len1.max(shift + len2))
    };

    let mut bases = NucleotideSequence::empty();
    let mut quals = Vec::with_capacity((end - start) as usize);
    for pos in start..end {
        let from1 = (0..len1).contains(&pos).then(|| pos as usize);
        let from2 = (0..len2).contains(&(pos - shift)).then(|| (pos - shift) as usize);
        let pick = match (from1, from2) {
            (Some(p1), Some(p2)) => {
                let q1 = read1.quality().get(p1).unwrap_or(0);
                let q2 = read2.quality().get(p2).unwrap_or(0);
                if q2 > q1 {
                    (read2, p2)
                } else {
                    (read1, p1)
                }
            }
            (Some(p1), None) => (read1, p1),
            (None, Some(p2)) => (read2, p2),
            (None, None) => continue,
        };
        let (read, idx) = pick;
        if let (Some(base), Some(quality)) = (read.sequence().get(idx), read.quality().get(idx)) {
            bases.push(base);
            quals.push(quality);
        }
    }

    SequenceWithQuality::from_parts_unchecked(bases, QualityProfile::new(quals))
}
