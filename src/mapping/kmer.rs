use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{check_range, ConfigError};
use crate::genomics::{NucleotideSequence, ReferenceLibrary};

/// Largest k whose packed k-mer fits the index key.
pub const MAX_K: usize = 31;

/// Errors raised while building a k-mer index.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KmerError {
    /// k outside `1..=31`.
    #[error("k-mer size {0} is outside 1..={MAX_K}")]
    InvalidK(usize),

    /// Library without references.
    #[error("cannot index an empty reference library")]
    EmptyLibrary,
}

/// K-mer index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmerParameters {
    /// K-mer length.
    pub k: usize,
}

impl Default for KmerParameters {
    fn default() -> Self {
        Self { k: 11 }
    }
}

impl KmerParameters {
    /// Validate k.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("kmer.k", self.k, 1, MAX_K, "1..=31")
    }
}

/// Occurrence counter and parents of one k-mer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KmerEntry {
    /// Occurrences across the whole library, both strands.
    pub count: u64,
    /// Signed 1-based reference ids, sorted and deduplicated.
    pub parents: Vec<i32>,
}

/// Inverted index from packed k-mers to the references containing them.
///
/// Read-only after [`KmerMap::build`]; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct KmerMap {
    k: usize,
    entries: HashMap<u64, KmerEntry>,
    total: u64,
}

impl KmerMap {
    /// Index both strands of every reference.
    pub fn build(library: &ReferenceLibrary, k: usize) -> Result<Self, KmerError> {
        if k == 0 || k > MAX_K {
            return Err(KmerError::InvalidK(k));
        }
        if library.is_empty() {
            return Err(KmerError::EmptyLibrary);
        }

        let mut entries: HashMap<u64, KmerEntry> = HashMap::new();
        let mut total = 0u64;
        for reference in library.iter() {
            let strands = [
                (reference.sequence.clone(), false),
                (reference.sequence.reverse_complement(), true),
            ];
            for (sequence, reverse) in strands {
                let id = ReferenceLibrary::signed_id(reference.index, reverse);
                for kmer in kmers(&sequence, k) {
                    let entry = entries.entry(kmer).or_default();
                    entry.count += 1;
                    if entry.parents.last() != Some(&id) {
                        entry.parents.push(id);
                    }
                    total += 1;
                }
            }
        }
        for entry in entries.values_mut() {
            entry.parents.sort_unstable();
            entry.parents.dedup();
        }

        info!(
            references = library.len(),
            k,
            distinct = entries.len(),
            total,
            "built k-mer index"
        );
        Ok(Self { k, entries, total })
    }

    /// K-mer length.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Entry for a packed k-mer.
    pub fn get(&self, kmer: u64) -> Option<&KmerEntry> {
        self.entries.get(&kmer)
    }

    /// Number of distinct k-mers.
    pub fn distinct(&self) -> usize {
        self.entries.len()
    }

    /// Total k-mer occurrences indexed.
    pub fn total_kmers(&self) -> u64 {
        self.total
    }
}

/// Rolling iterator over the packed k-mers of `sequence`.
pub(crate) fn kmers(sequence: &NucleotideSequence, k: usize) -> impl Iterator<Item = u64> + '_ {
    let mask = (1u64 << (2 * k)) - 1;
    let mut code = 0u64;
    sequence.iter().enumerate().filter_map(move |(idx, base)| {
        code = ((code << 2) | u64::from(base.code())) & mask;
        (idx + 1 >= k).then_some(code)
    })
}

/// Best reference hit for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct KmerFinderResult {
    /// 0-based index of the winning reference.
    pub reference: usize,
    /// Query matched the reverse-complement strand.
    pub reverse: bool,
    /// Log-odds confidence in `0..=255`.
    pub score: u8,
    /// Accumulated information of the winner.
    pub information: f64,
    /// Accumulated information of the runner-up, if any.
    pub second_best: Option<f64>,
}

/// Information-weighted k-mer voting over a [`KmerMap`].
#[derive(Debug, Clone)]
pub struct KmerFinder {
    map: Arc<KmerMap>,
    library: Arc<ReferenceLibrary>,
}

impl KmerFinder {
    /// Create a finder over a shared index and its library.
    pub fn new(map: Arc<KmerMap>, library: Arc<ReferenceLibrary>) -> Self {
        Self { map, library }
    }

    /// Library the index was built from.
    pub fn library(&self) -> &ReferenceLibrary {
        &self.library
    }

    /// Vote for references with every query k-mer, weighting each by `-ln(count / N)`.
    pub fn find(&self, query: &NucleotideSequence) -> Option<KmerFinderResult> {
        let k = self.map.k();
        if query.len() < k || self.map.total_kmers() == 0 {
            return None;
        }

        let total = self.map.total_kmers() as f64;
        let mut votes: HashMap<i32, f64> = HashMap::new();
        for kmer in kmers(query, k) {
            if let Some(entry) = self.map.get(kmer) {
                let information = -(entry.count as f64 / total).ln();
                for &id in &entry.parents {
                    *votes.entry(id).or_insert(0.0) += information;
                }
            }
        }

        // Highest information wins; ties go to the smaller reference, forward strand first.
        let mut ranked: Vec<(i32, f64)> = votes.into_iter().collect();
        ranked.sort_by(|(id_a, info_a), (id_b, info_b)| {
            info_b
                .total_cmp(info_a)
                .then_with(|| id_a.unsigned_abs().cmp(&id_b.unsigned_abs()))
                .then_with(|| id_b.cmp(id_a))
        });
        let &(best_id, best) = ranked.first()?;
        let second_best = ranked.get(1).map(|&(_, info)| info);
        let (reference, reverse) = ReferenceLibrary::resolve_signed(best_id)?;

        Some(KmerFinderResult {
            reference,
            reverse,
            score: confidence(best, second_best),
            information: best,
            second_best,
        })
    }
}

/// `10 * (best - max(0, second)) / ln 10`, rounded and clamped to a byte.
fn confidence(best: f64, second_best: Option<f64>) -> u8 {
    let gap = best - second_best.unwrap_or(0.0).max(0.0);
    (10.0 * gap / std::f64::consts::LN_10).round().clamp(0.0, 255.0) as u8
}
