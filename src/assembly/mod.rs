//! Mate merging and per-family consensus assembly.

mod assembler;
mod overlapper;

pub use assembler::{
    percentage_to_cqs, Assembler, AssemblerParameters, AssemblyStatistics, Consensus, MinorVariant,
    PairedConsensus, SingleConsensus, MAX_CQS, MIN_CQS,
};
pub use overlapper::{OverlapParameters, OverlapResult, Overlapper};
