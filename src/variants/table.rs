use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::genomics::{Nucleotide, ReferenceLibrary};
use crate::mapping::Mutation;

#[derive(Debug, Default)]
struct Cell {
    major_molecules: AtomicU64,
    minor_molecules: AtomicU64,
    major_reads: AtomicU64,
    minor_reads: AtomicU64,
    quality_sum: AtomicU64,
}

/// Snapshot of one `[position][base]` cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellCounts {
    /// Families whose consensus carries the base.
    pub major_molecules: u64,
    /// Families where the base was a within-family minority.
    pub minor_molecules: u64,
    /// Reads of the families counted in `major_molecules`.
    pub major_reads: u64,
    /// Reads carrying the base as a minority.
    pub minor_reads: u64,
    /// Sum of consensus qualities over `major_molecules`.
    pub quality_sum: u64,
}

impl CellCounts {
    /// Mean consensus quality of the major observations.
    pub fn mean_quality(&self) -> f64 {
        if self.major_molecules == 0 {
            0.0
        } else {
            self.quality_sum as f64 / self.major_molecules as f64
        }
    }
}

/// Molecule and read support of one indel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndelCounts {
    /// Families carrying the indel.
    pub molecules: u64,
    /// Reads of those families.
    pub reads: u64,
}

/// Per-position, per-base counters of one reference.
///
/// All updates are commutative increments, so concurrent writers need no
/// ordering between them.
#[derive(Debug)]
pub struct MutationsTable {
    reference: usize,
    cells: Vec<[Cell; 4]>,
    indels: Mutex<HashMap<Mutation, IndelCounts>>,
}

impl MutationsTable {
    /// Empty table for a reference of `len` bases.
    pub fn new(reference: usize, len: usize) -> Self {
        Self {
            reference,
            cells: (0..len).map(|_| Default::default()).collect(),
            indels: Mutex::new(HashMap::new()),
        }
    }

    /// Index of the reference this table belongs to.
    pub fn reference(&self) -> usize {
        self.reference
    }

    /// Reference length.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` for a zero-length reference.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn cell(&self, position: usize, base: Nucleotide) -> Option<&Cell> {
        self.cells.get(position).map(|cells| &cells[base.index()])
    }

    /// Count one family whose consensus shows `base` at `position`.
    pub fn record_major(&self, position: usize, base: Nucleotide, reads: u64, quality: u8) {
        if let Some(cell) = self.cell(position, base) {
            cell.major_molecules.fetch_add(1, Ordering::Relaxed);
            cell.major_reads.fetch_add(reads, Ordering::Relaxed);
            cell.quality_sum.fetch_add(u64::from(quality), Ordering::Relaxed);
        }
    }

    /// Count one family carrying `base` as a minority at `position`.
    pub fn record_minor(&self, position: usize, base: Nucleotide, reads: u64) {
        if let Some(cell) = self.cell(position, base) {
            cell.minor_molecules.fetch_add(1, Ordering::Relaxed);
            cell.minor_reads.fetch_add(reads, Ordering::Relaxed);
        }
    }

    /// Count one family carrying an indel.
    pub fn record_indel(&self, mutation: &Mutation, reads: u64) {
        let mut indels = self.indels.lock().unwrap_or_else(PoisonError::into_inner);
        let counts = indels.entry(mutation.clone()).or_default();
        counts.molecules += 1;
        counts.reads += reads;
    }

    /// Snapshot of a cell; zeros past the end.
    pub fn counts(&self, position: usize, base: Nucleotide) -> CellCounts {
        self.cell(position, base)
            .map(|cell| CellCounts {
                major_molecules: cell.major_molecules.load(Ordering::Relaxed),
                minor_molecules: cell.minor_molecules.load(Ordering::Relaxed),
                major_reads: cell.major_reads.load(Ordering::Relaxed),
                minor_reads: cell.minor_reads.load(Ordering::Relaxed),
                quality_sum: cell.quality_sum.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }

    /// Major molecule count of every base at `position`.
    pub fn major_counts(&self, position: usize) -> [u64; 4] {
        Nucleotide::ALL.map(|base| self.counts(position, base).major_molecules)
    }

    /// Families covering `position`.
    pub fn coverage(&self, position: usize) -> u64 {
        self.major_counts(position).iter().sum()
    }

    /// Indels with their support, ordered by position.
    pub fn indels(&self) -> Vec<(Mutation, IndelCounts)> {
        let indels = self.indels.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<(Mutation, IndelCounts)> =
            indels.iter().map(|(mutation, counts)| (mutation.clone(), *counts)).collect();
        out.sort_by(|a, b| a.0.position().cmp(&b.0.position()).then_with(|| a.0.cmp(&b.0)));
        out
    }
}

/// One [`MutationsTable`] per reference of a library.
#[derive(Debug)]
pub struct MutationsTables {
    tables: Vec<MutationsTable>,
}

impl MutationsTables {
    /// Empty tables sized to every reference.
    pub fn new(library: &ReferenceLibrary) -> Self {
        Self {
            tables: library
                .iter()
                .map(|reference| MutationsTable::new(reference.index, reference.len()))
                .collect(),
        }
    }

    /// Table of reference `index`.
    pub fn get(&self, index: usize) -> Option<&MutationsTable> {
        self.tables.get(index)
    }

    /// Tables in reference order.
    pub fn iter(&self) -> impl Iterator<Item = &MutationsTable> {
        self.tables.iter()
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns `true` when there are no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::NucleotideSequence;
    use rayon::prelude::*;

    #[test]
    fn concurrent_updates_are_not_lost() {
        let table = MutationsTable::new(0, 10);
        (0..1000).into_par_iter().for_each(|i| {
            table.record_major(i % 10, Nucleotide::G, 3, 30);
            if i % 2 == 0 {
                table.record_minor(i % 10, Nucleotide::T, 1);
            }
        });
        let cell = table.counts(4, Nucleotide::G);
        assert_eq!(cell.major_molecules, 100);
        assert_eq!(cell.major_reads, 300);
        assert_eq!(cell.mean_quality(), 30.0);
        assert_eq!(table.counts(4, Nucleotide::T).minor_molecules, 100);
        assert_eq!(table.coverage(4), 100);
    }

    #[test]
    fn indels_accumulate_per_event() {
        let table = MutationsTable::new(0, 10);
        let deletion = Mutation::Deletion {
            position: 3,
            bases: NucleotideSequence::from_ascii(b"AC").unwrap(),
        };
        table.record_indel(&deletion, 5);
        table.record_indel(&deletion, 2);
        assert_eq!(
            table.indels(),
            vec![(deletion, IndelCounts { molecules: 2, reads: 7 })]
        );
    }

    #[test]
    fn out_of_range_updates_are_ignored() {
        let table = MutationsTable::new(0, 2);
        table.record_major(5, Nucleotide::A, 1, 10);
        assert_eq!(table.counts(5, Nucleotide::A), CellCounts::default());
    }
}
