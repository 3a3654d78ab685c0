use std::sync::Arc;

use crate::genomics::{NucleotideSequence, SequenceWithQuality};

/// Raw read content: one mate or a mate pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPayload {
    /// Single-end read.
    Single(SequenceWithQuality),
    /// Paired-end read; mate 2 is kept as sequenced (not reverse-complemented).
    Paired(SequenceWithQuality, SequenceWithQuality),
}

impl ReadPayload {
    /// Whether this payload holds a mate pair.
    pub fn is_paired(&self) -> bool {
        matches!(self, ReadPayload::Paired(..))
    }

    /// First (or only) mate.
    pub fn first(&self) -> &SequenceWithQuality {
        match self {
            ReadPayload::Single(read) | ReadPayload::Paired(read, _) => read,
        }
    }

    /// Second mate, if any.
    pub fn second(&self) -> Option<&SequenceWithQuality> {
        match self {
            ReadPayload::Single(_) => None,
            ReadPayload::Paired(_, mate) => Some(mate),
        }
    }
}

/// Sample assignment and UMI resolved for one read.
///
/// Produced either by adapter search or by parsing a UMI already embedded in
/// the read header; both paths yield the same shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingInfo {
    /// Sample the read was assigned to.
    pub sample: Arc<str>,
    /// Unique molecular identifier.
    pub umi: NucleotideSequence,
    /// Worst Phred quality over the UMI bases, or
    /// [`IndexingInfo::UNKNOWN_UMI_QUALITY`] when none was recorded.
    pub umi_quality: u8,
    /// Read content (adapters possibly trimmed).
    pub payload: ReadPayload,
}

impl IndexingInfo {
    /// Quality assigned to UMIs that carry no per-base qualities; always passes
    /// the grouping threshold.
    pub const UNKNOWN_UMI_QUALITY: u8 = u8::MAX;
}

/// Molecular identifier group: all reads sharing one UMI within a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mig {
    /// Sample name.
    pub sample: Arc<str>,
    /// Shared UMI.
    pub umi: NucleotideSequence,
    /// Reads in arrival order.
    pub reads: Vec<ReadPayload>,
}

impl Mig {
    /// Create a group from its reads.
    pub fn new(sample: impl Into<Arc<str>>, umi: NucleotideSequence, reads: Vec<ReadPayload>) -> Self {
        Self {
            sample: sample.into(),
            umi,
            reads,
        }
    }

    /// Number of reads in the group.
    pub fn size(&self) -> usize {
        self.reads.len()
    }

    /// Whether the group holds paired-end reads.
    pub fn is_paired(&self) -> bool {
        self.reads.first().map(ReadPayload::is_paired).unwrap_or(false)
    }
}
