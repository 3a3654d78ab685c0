use std::sync::Arc;

use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, Discrete, DiscreteCDF};
use tracing::{debug, info};

use crate::config::ConfigError;
use crate::genomics::{Nucleotide, NucleotideSequence, Reference, ReferenceLibrary};
use crate::mapping::Mutation;
use crate::variants::{ErrorModel, ErrorModelParameters, MutationsTable, MutationsTables, SubstitutionMatrix};

/// Variant calling thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantCallerParameters {
    /// Phred-scaled quality needed to pass.
    pub quality_threshold: f64,
    /// Families needed at the position to pass.
    pub min_coverage: u64,
    /// Quality ceiling.
    pub max_quality: f64,
    /// Also return variants that failed a filter.
    pub report_filtered: bool,
}

impl Default for VariantCallerParameters {
    fn default() -> Self {
        Self {
            quality_threshold: 20.0,
            min_coverage: 1,
            max_quality: 100.0,
            report_filtered: false,
        }
    }
}

impl VariantCallerParameters {
    /// Validate that thresholds are finite and ordered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_quality.is_finite() && self.max_quality > 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "caller.max_quality",
                value: self.max_quality.to_string(),
                expected: "> 0.0",
            });
        }
        if !(0.0..=self.max_quality).contains(&self.quality_threshold) {
            return Err(ConfigError::OutOfRange {
                name: "caller.quality_threshold",
                value: self.quality_threshold.to_string(),
                expected: "0.0..=max_quality",
            });
        }
        Ok(())
    }
}

/// Filter verdict of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantFilter {
    /// Passed every threshold.
    Pass,
    /// Quality below threshold.
    LowQuality,
    /// Too few families at the position.
    LowCoverage,
}

impl VariantFilter {
    /// Label used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            VariantFilter::Pass => "PASS",
            VariantFilter::LowQuality => "LowQual",
            VariantFilter::LowCoverage => "LowCov",
        }
    }
}

/// A candidate mutation with its support and test statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Reference index.
    pub reference: usize,
    /// Reference name.
    pub reference_name: Arc<str>,
    /// 0-based reference position.
    pub position: usize,
    /// The mutation.
    pub mutation: Mutation,
    /// Reference allele text (the deleted bases for deletions, empty for insertions).
    pub ref_allele: String,
    /// Alternate allele text (the inserted bases for insertions, empty for deletions).
    pub alt_allele: String,
    /// Families whose consensus carries the variant.
    pub major_molecules: u64,
    /// Families carrying it as a within-family minority.
    pub minor_molecules: u64,
    /// Reads of the supporting families.
    pub major_reads: u64,
    /// Minority reads carrying it.
    pub minor_reads: u64,
    /// Families covering the position.
    pub coverage: u64,
    /// `major_molecules / coverage`.
    pub allele_frequency: f64,
    /// Background error rate used in the test.
    pub background_frequency: f64,
    /// One-sided binomial p-value with mid-p correction.
    pub p_value: f64,
    /// Phred-scaled `p_value`, capped.
    pub quality: f64,
    /// Filter verdict.
    pub filter: VariantFilter,
}

/// `P(X > k) + 0.5 * P(X = k)` for `X ~ Binomial(n, p)`.
pub fn binomial_mid_p(k: u64, n: u64, p: f64) -> f64 {
    if n == 0 {
        return 1.0;
    }
    match Binomial::new(p.clamp(0.0, 1.0), n) {
        Ok(dist) => (dist.sf(k) + 0.5 * dist.pmf(k)).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

struct Support {
    major_molecules: u64,
    minor_molecules: u64,
    major_reads: u64,
    minor_reads: u64,
    coverage: u64,
    background: f64,
}

/// Binomial test of every candidate mutation against a fitted background.
#[derive(Debug, Clone, Default)]
pub struct VariantCaller {
    params: VariantCallerParameters,
    model: ErrorModel,
}

impl VariantCaller {
    /// Create a caller.
    pub fn new(params: VariantCallerParameters, model: ErrorModelParameters) -> Self {
        Self {
            params,
            model: ErrorModel::new(model),
        }
    }

    /// Call variants on every reference, ordered by reference, position, alternate.
    pub fn call(&self, library: &ReferenceLibrary, tables: &MutationsTables) -> Vec<Variant> {
        let mut variants = Vec::new();
        for table in tables.iter() {
            let Some(reference) = library.get(table.reference()) else {
                continue;
            };
            let matrix = self.model.fit(table);
            let before = variants.len();
            self.call_substitutions(reference, table, &matrix, &mut variants);
            self.call_indels(reference, table, &mut variants);
            debug!(reference = %reference.name, candidates = variants.len() - before, "reference called");
        }

        variants.sort_by(|a, b| {
            a.reference
                .cmp(&b.reference)
                .then_with(|| a.position.cmp(&b.position))
                .then_with(|| a.alt_allele.cmp(&b.alt_allele))
                .then_with(|| a.mutation.cmp(&b.mutation))
        });
        let passed = variants.iter().filter(|v| v.filter == VariantFilter::Pass).count();
        info!(variants = variants.len(), passed, "variant calling finished");
        variants
    }

    fn call_substitutions(
        &self,
        reference: &Reference,
        table: &MutationsTable,
        matrix: &SubstitutionMatrix,
        out: &mut Vec<Variant>,
    ) {
        for (position, ref_base) in reference.sequence.iter().enumerate() {
            let coverage = table.coverage(position);
            for alt in Nucleotide::ALL {
                if alt == ref_base {
                    continue;
                }
                let counts = table.counts(position, alt);
                if counts.major_molecules + counts.minor_molecules == 0 {
                    continue;
                }
                let background = matrix
                    .get(ref_base, alt)
                    .unwrap_or_else(|| uniform_background(coverage));
                let support = Support {
                    major_molecules: counts.major_molecules,
                    minor_molecules: counts.minor_molecules,
                    major_reads: counts.major_reads,
                    minor_reads: counts.minor_reads,
                    coverage,
                    background,
                };
                let mutation = Mutation::Substitution {
                    position,
                    from: ref_base,
                    to: alt,
                };
                self.emit(reference, mutation, support, out);
            }
        }
    }

    fn call_indels(&self, reference: &Reference, table: &MutationsTable, out: &mut Vec<Variant>) {
        for (mutation, counts) in table.indels() {
            let anchor = mutation.position().min(table.len().saturating_sub(1));
            // Families with a deletion add no major counts at the deleted bases.
            let coverage = match mutation {
                Mutation::Deletion { .. } => table.coverage(anchor) + counts.molecules,
                _ => table.coverage(anchor).max(counts.molecules),
            };
            let support = Support {
                major_molecules: counts.molecules,
                minor_molecules: 0,
                major_reads: counts.reads,
                minor_reads: 0,
                coverage,
                background: uniform_background(coverage),
            };
            self.emit(reference, mutation, support, out);
        }
    }

    fn emit(&self, reference: &Reference, mutation: Mutation, support: Support, out: &mut Vec<Variant>) {
        let p_value = binomial_mid_p(support.major_molecules, support.coverage, support.background);
        let quality = if p_value > 0.0 {
            (-10.0 * p_value.log10()).min(self.params.max_quality)
        } else {
            self.params.max_quality
        };
        let filter = if support.coverage < self.params.min_coverage {
            VariantFilter::LowCoverage
        } else if quality < self.params.quality_threshold {
            VariantFilter::LowQuality
        } else {
            VariantFilter::Pass
        };
        if filter != VariantFilter::Pass && !self.params.report_filtered {
            return;
        }

        let (ref_allele, alt_allele) = alleles(&mutation);
        let allele_frequency = if support.coverage == 0 {
            0.0
        } else {
            support.major_molecules as f64 / support.coverage as f64
        };
        out.push(Variant {
            reference: reference.index,
            reference_name: Arc::clone(&reference.name),
            position: mutation.position(),
            mutation,
            ref_allele,
            alt_allele,
            major_molecules: support.major_molecules,
            minor_molecules: support.minor_molecules,
            major_reads: support.major_reads,
            minor_reads: support.minor_reads,
            coverage: support.coverage,
            allele_frequency,
            background_frequency: support.background,
            p_value,
            quality,
            filter,
        });
    }
}

/// `1 / n` fallback for indels and substitutions without a model estimate.
fn uniform_background(coverage: u64) -> f64 {
    1.0 / coverage.max(1) as f64
}

fn alleles(mutation: &Mutation) -> (String, String) {
    let text = |bases: &NucleotideSequence| bases.to_string();
    match mutation {
        Mutation::Substitution { from, to, .. } => (from.to_string(), to.to_string()),
        Mutation::Insertion { bases, .. } => (String::new(), text(bases)),
        Mutation::Deletion { bases, .. } => (text(bases), String::new()),
    }
}
