//! # UMI-aware error correction and minor variant calling
//!
//! Reads tagged with Unique Molecular Identifiers are grouped into molecular
//! families, collapsed into consensus sequences, mapped to a library of
//! targeted references and tallied per position. A background substitution
//! model then separates true low-frequency variants from PCR and sequencing
//! noise.
//!
//! ## Stages
//!
//! 1. **Barcode search**: fuzzy, quality-aware adapter matching extracts the
//!    sample and UMI of each read ([`barcode`]).
//! 2. **Assembly**: mate pairs are merged and every family is collapsed by
//!    majority vote ([`assembly`]).
//! 3. **Mapping**: k-mer voting picks a reference, an affine-gap local
//!    alignment places the consensus and an evaluator accepts it ([`mapping`]).
//! 4. **Calling**: mutation tables feed a binomial test against a fitted
//!    background error model ([`variants`]).
//!
//! ## Usage Example
//!
//! ```no_run
//! use umivar::{CancellationToken, Pipeline, PipelineConfig};
//! use umivar::genomics::{NucleotideSequence, ReferenceLibrary};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let amplicon = NucleotideSequence::from_ascii(b"ACGTTGCAAGCTTAGCCGATCGGATACCTG")?;
//! let library = ReferenceLibrary::from_sequences([("amp1", amplicon)])?;
//! let pipeline = Pipeline::new(library, PipelineConfig::default())?;
//! let summary = pipeline.process_migs(Vec::new(), &CancellationToken::new());
//! assert_eq!(summary.processed, 0);
//! let variants = pipeline.call_variants();
//! # let _ = variants;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod assembly; // Mate merging and consensus assembly
pub mod barcode; // Adapter search, demultiplexing and UMI grouping
pub mod config; // Parameter structs and TOML layer
pub mod genomics; // Sequence primitives and reference library
pub mod mapping; // K-mer index, local alignment and mapping driver
pub mod variants; // Mutation tables, error model and variant calling

pub use assembly::{Assembler, Consensus};
pub use barcode::{BarcodeSearcher, Demultiplexer, MigGrouper};
pub use config::{ConfigError, PipelineConfig};
pub use mapping::{ConsensusAligner, ConsensusAlignment, KmerFinder, KmerMap};
pub use variants::{MutationsTables, Variant, VariantCaller};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use assembly::AssemblyStatistics;
use barcode::BarcodeError;
use genomics::{IndexingInfo, Mig, ReferenceError, ReferenceLibrary, SequenceError};
use mapping::{AlignmentStatistics, KmerError};

/// Errors that abort a run before any family is processed.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid parameters.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// K-mer index could not be built.
    #[error("k-mer index error: {0}")]
    Kmer(#[from] KmerError),

    /// Malformed reference library.
    #[error("reference error: {0}")]
    Reference(#[from] ReferenceError),

    /// Malformed barcode sheet.
    #[error("barcode error: {0}")]
    Barcode(#[from] BarcodeError),

    /// Malformed sequence input.
    #[error("sequence error: {0}")]
    Sequence(#[from] SequenceError),
}

/// Cooperative stop flag checked between families.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; families already in flight finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Outcome counts of one [`Pipeline::process_migs`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Families taken up.
    pub processed: usize,
    /// Families that produced a consensus.
    pub assembled: usize,
    /// Consensuses that updated the mutation tables.
    pub aligned: usize,
    /// Families skipped after cancellation.
    pub skipped: usize,
    /// Whether the batch was cancelled.
    pub cancelled: bool,
}

impl BatchSummary {
    fn merge(self, other: Self) -> Self {
        Self {
            processed: self.processed + other.processed,
            assembled: self.assembled + other.assembled,
            aligned: self.aligned + other.aligned,
            skipped: self.skipped + other.skipped,
            cancelled: self.cancelled || other.cancelled,
        }
    }
}

/// Main orchestrator: families in, variants out.
///
/// Holds the read-only reference library and k-mer index, the per-stage
/// workers and the shared mutation tables. Families may be processed in
/// several batches before calling variants.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    library: Arc<ReferenceLibrary>,
    kmer_map: Arc<KmerMap>,
    assembler: Assembler,
    aligner: ConsensusAligner,
    tables: MutationsTables,
    caller: VariantCaller,
}

impl Pipeline {
    /// Validate `config` and build the shared index over `library`.
    pub fn new(library: ReferenceLibrary, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let library = Arc::new(library);
        let kmer_map = Arc::new(KmerMap::build(&library, config.kmer.k)?);
        let assembler = Assembler::new(config.assembler.clone(), config.overlap.clone());
        let aligner = ConsensusAligner::from_parameters(
            Arc::clone(&library),
            Arc::clone(&kmer_map),
            &config.aligner,
            &config.scoring,
            &config.evaluator,
        );
        let tables = MutationsTables::new(&library);
        let caller = VariantCaller::new(config.caller.clone(), config.error_model.clone());

        info!(
            references = library.len(),
            bases = library.total_bases(),
            strategy = ?config.aligner.strategy,
            "pipeline ready"
        );
        Ok(Self {
            config,
            library,
            kmer_map,
            assembler,
            aligner,
            tables,
            caller,
        })
    }

    /// Active parameters.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Reference library.
    pub fn library(&self) -> &ReferenceLibrary {
        &self.library
    }

    /// Shared k-mer index.
    pub fn kmer_map(&self) -> &KmerMap {
        &self.kmer_map
    }

    /// Accumulated mutation tables.
    pub fn tables(&self) -> &MutationsTables {
        &self.tables
    }

    /// Assembly counters.
    pub fn assembly_statistics(&self) -> &AssemblyStatistics {
        self.assembler.statistics()
    }

    /// Mapping counters.
    pub fn alignment_statistics(&self) -> &AlignmentStatistics {
        self.aligner.statistics()
    }

    /// Group indexed reads into families using the grouping parameters.
    pub fn group<I>(&self, reads: I) -> Vec<Mig>
    where
        I: IntoIterator<Item = IndexingInfo>,
    {
        let mut grouper = MigGrouper::new(self.config.grouping.clone());
        let mut accepted = 0u64;
        for info in reads {
            if grouper.push(info) {
                accepted += 1;
            }
        }
        let low_quality_umis = grouper.low_quality_umis();
        if low_quality_umis > 0 {
            warn!(
                accepted,
                low_quality_umis,
                min_umi_quality = self.config.grouping.min_umi_quality,
                "reads dropped for UMI quality"
            );
        }
        grouper.finish()
    }

    /// Assemble, map and tally one family.
    pub fn process_mig(&self, mig: &Mig) -> Option<ConsensusAlignment> {
        let consensus = self.assembler.assemble(mig)?;
        Some(self.aligner.process(&consensus, &self.tables))
    }

    /// Process families in parallel; cancellation is honoured between families.
    pub fn process_migs(&self, migs: Vec<Mig>, cancel: &CancellationToken) -> BatchSummary {
        info!(families = migs.len(), "processing batch");

        let summary = migs
            .par_iter()
            .map(|mig| {
                if cancel.is_cancelled() {
                    return BatchSummary {
                        skipped: 1,
                        cancelled: true,
                        ..BatchSummary::default()
                    };
                }
                let outcome = self.process_mig(mig);
                BatchSummary {
                    processed: 1,
                    assembled: usize::from(outcome.is_some()),
                    aligned: usize::from(outcome.as_ref().is_some_and(ConsensusAlignment::is_usable)),
                    ..BatchSummary::default()
                }
            })
            .reduce(BatchSummary::default, BatchSummary::merge);

        if summary.cancelled {
            warn!(skipped = summary.skipped, processed = summary.processed, "batch cancelled");
        }
        info!(
            processed = summary.processed,
            assembled = summary.assembled,
            aligned = summary.aligned,
            "batch finished"
        );
        summary
    }

    /// Fit the background model and call variants on everything tallied so far.
    pub fn call_variants(&self) -> Vec<Variant> {
        self.caller.call(&self.library, &self.tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genomics::{NucleotideSequence, ReadPayload, SequenceWithQuality};

    const AMPLICON: &str = "ACGTTGCAAGCTTAGCCGATCGGATACCTGAAGTCCATGGTACGCTAGCAATTCGG";

    fn pipeline() -> Pipeline {
        let library = ReferenceLibrary::from_sequences([(
            "amp1",
            NucleotideSequence::from_ascii(AMPLICON.as_bytes()).unwrap(),
        )])
        .unwrap();
        Pipeline::new(library, PipelineConfig::default()).unwrap()
    }

    fn family(umi: &str, reads: usize) -> Mig {
        let read = SequenceWithQuality::with_uniform_quality(
            NucleotideSequence::from_ascii(AMPLICON.as_bytes()).unwrap(),
            30,
        );
        Mig::new(
            "s1",
            NucleotideSequence::from_ascii(umi.as_bytes()).unwrap(),
            vec![ReadPayload::Single(read); reads],
        )
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let library = ReferenceLibrary::from_sequences([(
            "amp1",
            NucleotideSequence::from_ascii(AMPLICON.as_bytes()).unwrap(),
        )])
        .unwrap();
        let mut config = PipelineConfig::default();
        config.kmer.k = 0;
        assert!(matches!(Pipeline::new(library, config), Err(PipelineError::Config(_))));
    }

    #[test]
    fn batch_updates_tables() {
        let pipeline = pipeline();
        let summary = pipeline.process_migs(
            vec![family("AAAA", 3), family("CCCC", 2)],
            &CancellationToken::new(),
        );
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.aligned, 2);
        assert!(!summary.cancelled);
        assert_eq!(pipeline.tables().get(0).unwrap().coverage(0), 2);
        assert!(pipeline.call_variants().is_empty());
    }

    #[test]
    fn cancelled_batch_skips_everything() {
        let pipeline = pipeline();
        let token = CancellationToken::new();
        token.cancel();
        let summary = pipeline.process_migs(vec![family("AAAA", 3); 4], &token);
        assert!(summary.cancelled);
        assert_eq!(summary.skipped, 4);
        assert_eq!(summary.processed, 0);
        assert_eq!(pipeline.alignment_statistics().total(), 0);
    }
}
