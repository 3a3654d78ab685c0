use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::genomics::NucleotideSequence;

/// Errors raised while assembling a reference library.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    /// Library has no entries.
    #[error("reference library must be non-empty")]
    EmptyLibrary,

    /// Two references share a name.
    #[error("duplicate reference name '{0}'")]
    DuplicateName(String),

    /// A reference has no bases.
    #[error("reference '{0}' has an empty sequence")]
    EmptySequence(String),
}

/// Genomic coordinates of a reference (e.g. an amplicon) on its assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomicPlacement {
    /// Chromosome/contig name.
    pub chrom: Arc<str>,
    /// 0-based start of the reference on the chromosome.
    pub start: u64,
    /// Whether the reference is stored as the reverse strand.
    pub reverse: bool,
}

/// Named target sequence reads are mapped against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Stable 0-based index in the owning library.
    pub index: usize,
    /// Reference name.
    pub name: Arc<str>,
    /// Bases.
    pub sequence: NucleotideSequence,
    /// Optional genomic coordinates.
    pub placement: Option<GenomicPlacement>,
}

impl Reference {
    /// Reference length.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Returns `true` for an empty reference.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Ordered collection of references with stable indices.
#[derive(Debug, Clone)]
pub struct ReferenceLibrary {
    references: Vec<Reference>,
    by_name: HashMap<Arc<str>, usize>,
}

impl ReferenceLibrary {
    /// Build a library from `(name, sequence, placement)` tuples.
    pub fn new<I, S>(entries: I) -> Result<Self, ReferenceError>
    where
        I: IntoIterator<Item = (S, NucleotideSequence, Option<GenomicPlacement>)>,
        S: Into<Arc<str>>,
    {
        let mut references = Vec::new();
        let mut by_name = HashMap::new();
        for (index, (name, sequence, placement)) in entries.into_iter().enumerate() {
            let name: Arc<str> = name.into();
            if sequence.is_empty() {
                return Err(ReferenceError::EmptySequence(name.to_string()));
            }
            if by_name.insert(Arc::clone(&name), index).is_some() {
                return Err(ReferenceError::DuplicateName(name.to_string()));
            }
            references.push(Reference {
                index,
                name,
                sequence,
                placement,
            });
        }
        if references.is_empty() {
            return Err(ReferenceError::EmptyLibrary);
        }
        Ok(Self {
            references,
            by_name,
        })
    }

    /// Convenience constructor for unplaced references.
    pub fn from_sequences<I, S>(entries: I) -> Result<Self, ReferenceError>
    where
        I: IntoIterator<Item = (S, NucleotideSequence)>,
        S: Into<Arc<str>>,
    {
        Self::new(
            entries
                .into_iter()
                .map(|(name, sequence)| (name, sequence, None)),
        )
    }

    /// Number of references.
    pub fn len(&self) -> usize {
        self.references.len()
    }

    /// Returns `true` when the library is empty (never after construction).
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Reference at 0-based `index`.
    pub fn get(&self, index: usize) -> Option<&Reference> {
        self.references.get(index)
    }

    /// Reference looked up by name.
    pub fn by_name(&self, name: &str) -> Option<&Reference> {
        self.by_name.get(name).map(|&idx| &self.references[idx])
    }

    /// Iterate over references in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.references.iter()
    }

    /// Total number of bases across the library.
    pub fn total_bases(&self) -> usize {
        self.references.iter().map(Reference::len).sum()
    }

    /// Signed 1-based id; negative marks the reverse-complement strand.
    pub fn signed_id(index: usize, reverse: bool) -> i32 {
        let id = index as i32 + 1;
        if reverse {
            -id
        } else {
            id
        }
    }

    /// Decode a signed id into `(index, reverse)`.
    pub fn resolve_signed(id: i32) -> Option<(usize, bool)> {
        if id == 0 {
            return None;
        }
        Some((id.unsigned_abs() as usize - 1, id < 0))
    }
}
