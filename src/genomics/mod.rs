//! Sequence primitives shared by every pipeline stage.
//!
//! Bases are stored 2-bit packed, qualities as Phred scores; references are
//! owned by an ordered [`ReferenceLibrary`].

mod reference;
mod sequence;
mod types;

pub use reference::{GenomicPlacement, Reference, ReferenceError, ReferenceLibrary};
pub use sequence::{
    Nucleotide, NucleotideIter, NucleotideSequence, QualityProfile, SequenceError,
    SequenceWithQuality, AMBIGUOUS_BASE_QUALITY,
};
pub use types::{IndexingInfo, Mig, ReadPayload};
