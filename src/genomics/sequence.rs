use std::fmt;
use std::ops::Range;

use thiserror::Error;

/// Number of bases encoded per `u64` chunk.
const BASES_PER_WORD: usize = 32;
/// Bits used to encode a single DNA base (A/C/G/T).
const BITS_PER_BASE: usize = 2;
/// Quality assigned to bases resolved from an ambiguous input symbol.
pub const AMBIGUOUS_BASE_QUALITY: u8 = 2;
/// Offset of the Sanger/Illumina 1.8+ quality encoding.
const PHRED_OFFSET: u8 = 33;

/// Errors that can occur while building sequences.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    /// Encountered a base that cannot be represented in the 2-bit alphabet.
    #[error("unsupported nucleotide '{0}' at position {1}")]
    UnsupportedBase(char, usize),

    /// Sequence and quality arrays disagree in length.
    #[error("sequence length {sequence} does not match quality length {quality}")]
    LengthMismatch {
        /// Number of bases.
        sequence: usize,
        /// Number of quality values.
        quality: usize,
    },

    /// Quality character below the Phred+33 offset.
    #[error("invalid quality character '{0}' at position {1}")]
    InvalidQuality(char, usize),
}

/// One of the four canonical nucleotides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Nucleotide {
    /// Adenine.
    A = 0,
    /// Cytosine.
    C = 1,
    /// Guanine.
    G = 2,
    /// Thymine/Uracil.
    T = 3,
}

impl Nucleotide {
    /// All nucleotides in code order.
    pub const ALL: [Nucleotide; 4] = [Nucleotide::A, Nucleotide::C, Nucleotide::G, Nucleotide::T];

    /// Parse an ASCII base.
    pub fn from_ascii(base: u8) -> Option<Self> {
        match base {
            b'A' | b'a' => Some(Nucleotide::A),
            b'C' | b'c' => Some(Nucleotide::C),
            b'G' | b'g' => Some(Nucleotide::G),
            b'T' | b't' | b'U' | b'u' => Some(Nucleotide::T),
            _ => None,
        }
    }

    /// Build from a 2-bit code (upper bits are ignored).
    #[inline]
    pub fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0 => Nucleotide::A,
            1 => Nucleotide::C,
            2 => Nucleotide::G,
            _ => Nucleotide::T,
        }
    }

    /// Uppercase ASCII representation.
    pub fn to_ascii(self) -> u8 {
        match self {
            Nucleotide::A => b'A',
            Nucleotide::C => b'C',
            Nucleotide::G => b'G',
            Nucleotide::T => b'T',
        }
    }

    /// Watson-Crick complement.
    #[inline]
    pub fn complement(self) -> Self {
        Self::from_code(self.code() ^ 0b11)
    }

    /// 2-bit code of this base.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Index into per-base tables.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Nucleotide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ascii() as char)
    }
}

/// Immutable DNA sequence compressed using 2-bit encoding per base.
///
/// Ambiguous symbols are never stored; they must be resolved to a canonical
/// base before the sequence is built (see [`SequenceWithQuality::from_fastq`]).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NucleotideSequence {
    data: Vec<u64>,
    len: usize,
}

impl NucleotideSequence {
    /// The empty sequence.
    pub const EMPTY: NucleotideSequence = NucleotideSequence {
        data: Vec::new(),
        len: 0,
    };

    /// Create an empty sequence.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compress an ASCII string of A/C/G/T(/U) bases.
    pub fn from_ascii(sequence: &[u8]) -> Result<Self, SequenceError> {
        let mut out = Self::with_capacity(sequence.len());
        for (idx, &base) in sequence.iter().enumerate() {
            let nt = Nucleotide::from_ascii(base)
                .ok_or(SequenceError::UnsupportedBase(base as char, idx))?;
            out.push(nt);
        }
        Ok(out)
    }

    /// Build from decoded nucleotides.
    pub fn from_nucleotides<I>(bases: I) -> Self
    where
        I: IntoIterator<Item = Nucleotide>,
    {
        let iter = bases.into_iter();
        let mut out = Self::with_capacity(iter.size_hint().0);
        for base in iter {
            out.push(base);
        }
        out
    }

    fn with_capacity(len: usize) -> Self {
        Self {
            data: Vec::with_capacity(words_for_len(len)),
            len: 0,
        }
    }

    /// Number of bases in the sequence.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base at `idx`, or `None` past the end.
    pub fn get(&self, idx: usize) -> Option<Nucleotide> {
        if idx >= self.len {
            return None;
        }
        Some(self.base(idx))
    }

    #[inline]
    fn base(&self, idx: usize) -> Nucleotide {
        let (word_idx, bit_shift) = word_position(idx);
        Nucleotide::from_code(((self.data[word_idx] >> bit_shift) & 0b11) as u8)
    }

    /// Append a single base.
    pub fn push(&mut self, base: Nucleotide) {
        let (word_idx, bit_shift) = word_position(self.len);
        if word_idx >= self.data.len() {
            self.data.push(0);
        }
        self.data[word_idx] |= (base.code() as u64) << bit_shift;
        self.len += 1;
    }

    /// Copy of the bases within `range`.
    ///
    /// # Panics
    /// Panics if `range` is out of bounds.
    pub fn range(&self, range: Range<usize>) -> Self {
        assert!(
            range.start <= range.end && range.end <= self.len,
            "range {:?} out of bounds for sequence of length {}",
            range,
            self.len
        );
        Self::from_nucleotides(range.map(|idx| self.base(idx)))
    }

    /// New sequence made of `self` followed by `other`.
    pub fn concat(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for base in other.iter() {
            out.push(base);
        }
        out
    }

    /// Reverse complement; applying it twice yields the original sequence.
    pub fn reverse_complement(&self) -> Self {
        Self::from_nucleotides((0..self.len).rev().map(|idx| self.base(idx).complement()))
    }

    /// Pack `k` bases starting at `pos` into an integer, first base most
    /// significant. Returns `None` if the window runs past the end or `k > 32`.
    pub fn kmer_at(&self, pos: usize, k: usize) -> Option<u64> {
        if k == 0 || k > BASES_PER_WORD || pos + k > self.len {
            return None;
        }
        let mut code = 0u64;
        for idx in pos..pos + k {
            code = (code << BITS_PER_BASE) | self.base(idx).code() as u64;
        }
        Some(code)
    }

    /// Start positions of every exact (possibly overlapping) occurrence of
    /// `needle` at or after `from`, leftmost first.
    pub fn occurrences(&self, needle: &Self, from: usize) -> Vec<usize> {
        let k = needle.len();
        let mut hits = Vec::new();
        if k == 0 || from + k > self.len {
            return hits;
        }
        if k > BASES_PER_WORD {
            for start in from..=self.len - k {
                if (0..k).all(|offset| self.base(start + offset) == needle.base(offset)) {
                    hits.push(start);
                }
            }
            return hits;
        }

        let mask = if k == BASES_PER_WORD {
            u64::MAX
        } else {
            (1u64 << (k * BITS_PER_BASE)) - 1
        };
        let target = needle.kmer_at(0, k).unwrap_or_default();
        let mut code = 0u64;
        for idx in from..self.len {
            code = ((code << BITS_PER_BASE) | self.base(idx).code() as u64) & mask;
            if idx + 1 >= from + k && code == target {
                hits.push(idx + 1 - k);
            }
        }
        hits
    }

    /// Iterate over the bases.
    pub fn iter(&self) -> NucleotideIter<'_> {
        NucleotideIter {
            sequence: self,
            index: 0,
        }
    }

    /// Decode into uppercase ASCII.
    pub fn to_ascii(&self) -> Vec<u8> {
        self.iter().map(Nucleotide::to_ascii).collect()
    }

    /// Access the underlying packed words (little-endian base order).
    pub fn words(&self) -> &[u64] {
        &self.data
    }
}

impl fmt::Display for NucleotideSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decoded = self.to_ascii();
        write!(f, "{}", String::from_utf8_lossy(&decoded))
    }
}

impl fmt::Debug for NucleotideSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NucleotideSequence({self})")
    }
}

impl FromIterator<Nucleotide> for NucleotideSequence {
    fn from_iter<I: IntoIterator<Item = Nucleotide>>(iter: I) -> Self {
        Self::from_nucleotides(iter)
    }
}

/// Iterator over decoded bases in a [`NucleotideSequence`].
#[derive(Debug)]
pub struct NucleotideIter<'a> {
    sequence: &'a NucleotideSequence,
    index: usize,
}

impl Iterator for NucleotideIter<'_> {
    type Item = Nucleotide;

    fn next(&mut self) -> Option<Self::Item> {
        let base = self.sequence.get(self.index)?;
        self.index += 1;
        Some(base)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sequence.len.saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for NucleotideIter<'_> {}

/// Per-base Phred-scaled quality scores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QualityProfile {
    values: Vec<u8>,
}

impl QualityProfile {
    /// Wrap raw Phred scores.
    pub fn new(values: Vec<u8>) -> Self {
        Self { values }
    }

    /// Uniform profile of `len` scores equal to `quality`.
    pub fn uniform(len: usize, quality: u8) -> Self {
        Self {
            values: vec![quality; len],
        }
    }

    /// Decode a Phred+33 ASCII quality string.
    pub fn from_phred33(encoded: &[u8]) -> Result<Self, SequenceError> {
        let values = encoded
            .iter()
            .enumerate()
            .map(|(idx, &ch)| {
                ch.checked_sub(PHRED_OFFSET)
                    .ok_or(SequenceError::InvalidQuality(ch as char, idx))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { values })
    }

    /// Number of scores.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when the profile is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Score at `idx`.
    pub fn get(&self, idx: usize) -> Option<u8> {
        self.values.get(idx).copied()
    }

    /// Raw scores.
    pub fn values(&self) -> &[u8] {
        &self.values
    }

    /// Copy of the scores within `range`.
    pub fn range(&self, range: Range<usize>) -> Self {
        Self {
            values: self.values[range].to_vec(),
        }
    }

    /// Scores in reverse order.
    pub fn reversed(&self) -> Self {
        Self {
            values: self.values.iter().rev().copied().collect(),
        }
    }

    /// Lowest score within `range`, `None` for an empty range.
    pub fn min_in(&self, range: Range<usize>) -> Option<u8> {
        self.values.get(range)?.iter().copied().min()
    }

    /// Mean score, 0 for an empty profile.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().map(|&q| q as f64).sum::<f64>() / self.values.len() as f64
    }

    /// Encode as Phred+33 ASCII.
    pub fn to_phred33(&self) -> Vec<u8> {
        self.values
            .iter()
            .map(|&q| q.saturating_add(PHRED_OFFSET))
            .collect()
    }
}

/// A read: bases with a parallel quality profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceWithQuality {
    sequence: NucleotideSequence,
    quality: QualityProfile,
}

impl SequenceWithQuality {
    /// Pair a sequence with its qualities; lengths must agree.
    pub fn new(
        sequence: NucleotideSequence,
        quality: QualityProfile,
    ) -> Result<Self, SequenceError> {
        if sequence.len() != quality.len() {
            return Err(SequenceError::LengthMismatch {
                sequence: sequence.len(),
                quality: quality.len(),
            });
        }
        Ok(Self { sequence, quality })
    }

    /// Sequence with a uniform quality.
    pub fn with_uniform_quality(sequence: NucleotideSequence, quality: u8) -> Self {
        let quality = QualityProfile::uniform(sequence.len(), quality);
        Self { sequence, quality }
    }

    /// Pair parts whose lengths the caller already guarantees to agree.
    pub(crate) fn from_parts_unchecked(sequence: NucleotideSequence, quality: QualityProfile) -> Self {
        debug_assert_eq!(sequence.len(), quality.len());
        Self { sequence, quality }
    }

    /// Build from FASTQ text. Ambiguous bases (`N`, `.`) are resolved to `A`
    /// and their quality lowered to [`AMBIGUOUS_BASE_QUALITY`].
    pub fn from_fastq(sequence: &[u8], quality: &[u8]) -> Result<Self, SequenceError> {
        if sequence.len() != quality.len() {
            return Err(SequenceError::LengthMismatch {
                sequence: sequence.len(),
                quality: quality.len(),
            });
        }
        let mut quality = QualityProfile::from_phred33(quality)?;
        let mut bases = NucleotideSequence::with_capacity(sequence.len());
        for (idx, &base) in sequence.iter().enumerate() {
            match Nucleotide::from_ascii(base) {
                Some(nt) => bases.push(nt),
                None if matches!(base, b'N' | b'n' | b'.') => {
                    bases.push(Nucleotide::A);
                    quality.values[idx] = quality.values[idx].min(AMBIGUOUS_BASE_QUALITY);
                }
                None => return Err(SequenceError::UnsupportedBase(base as char, idx)),
            }
        }
        Ok(Self {
            sequence: bases,
            quality,
        })
    }

    /// The bases.
    pub fn sequence(&self) -> &NucleotideSequence {
        &self.sequence
    }

    /// The qualities.
    pub fn quality(&self) -> &QualityProfile {
        &self.quality
    }

    /// Read length.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Returns `true` for a zero-length read.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Sub-read over `range`.
    pub fn range(&self, range: Range<usize>) -> Self {
        Self {
            sequence: self.sequence.range(range.clone()),
            quality: self.quality.range(range),
        }
    }

    /// Reverse complement of the bases with reversed qualities.
    pub fn reverse_complement(&self) -> Self {
        Self {
            sequence: self.sequence.reverse_complement(),
            quality: self.quality.reversed(),
        }
    }

    /// Split into parts.
    pub fn into_parts(self) -> (NucleotideSequence, QualityProfile) {
        (self.sequence, self.quality)
    }
}

fn words_for_len(len: usize) -> usize {
    len.div_ceil(BASES_PER_WORD)
}

fn word_position(idx: usize) -> (usize, usize) {
    let word_idx = idx / BASES_PER_WORD;
    let offset = idx % BASES_PER_WORD;
    (word_idx, offset * BITS_PER_BASE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_and_decode_roundtrip() {
        let seq = b"ACGTACGTTTGACCA";
        let compressed = NucleotideSequence::from_ascii(seq).expect("compression should succeed");
        assert_eq!(compressed.len(), seq.len());
        assert_eq!(compressed.to_ascii(), seq);
    }

    #[test]
    fn spans_multiple_words() {
        let seq: Vec<u8> = b"ACGT".iter().cycle().take(70).copied().collect();
        let compressed = NucleotideSequence::from_ascii(&seq).unwrap();
        assert_eq!(compressed.words().len(), 3);
        assert_eq!(compressed.to_ascii(), seq);
    }

    #[test]
    fn reverse_complement_matches_manual() {
        let seq = NucleotideSequence::from_ascii(b"AACGTT").unwrap();
        assert_eq!(seq.reverse_complement().to_string(), "AACGTT");
        let seq = NucleotideSequence::from_ascii(b"ACCGGGT").unwrap();
        assert_eq!(seq.reverse_complement().to_string(), "ACCCGGT");
    }

    #[test]
    fn range_and_concat() {
        let seq = NucleotideSequence::from_ascii(b"ACGTTGCA").unwrap();
        let left = seq.range(0..3);
        let right = seq.range(3..8);
        assert_eq!(left.to_string(), "ACG");
        assert_eq!(left.concat(&right), seq);
    }

    #[test]
    fn kmer_packing_is_big_endian_by_base() {
        let seq = NucleotideSequence::from_ascii(b"ACGT").unwrap();
        assert_eq!(seq.kmer_at(0, 4), Some(0b00_01_10_11));
        assert_eq!(seq.kmer_at(1, 4), None);
    }

    #[test]
    fn occurrences_are_leftmost_first_and_overlapping() {
        let seq = NucleotideSequence::from_ascii(b"AAAACAAA").unwrap();
        let needle = NucleotideSequence::from_ascii(b"AA").unwrap();
        assert_eq!(seq.occurrences(&needle, 0), vec![0, 1, 2, 5, 6]);
        assert_eq!(seq.occurrences(&needle, 3), vec![5, 6]);
        let missing = NucleotideSequence::from_ascii(b"GG").unwrap();
        assert!(seq.occurrences(&missing, 0).is_empty());
    }

    #[test]
    fn unsupported_base_returns_error() {
        let result = NucleotideSequence::from_ascii(b"ACNT");
        assert_eq!(result, Err(SequenceError::UnsupportedBase('N', 2)));
    }

    #[test]
    fn fastq_resolves_ambiguous_bases() {
        let read = SequenceWithQuality::from_fastq(b"ACNT", b"IIII").unwrap();
        assert_eq!(read.sequence().to_string(), "ACAT");
        assert_eq!(read.quality().values(), &[40, 40, AMBIGUOUS_BASE_QUALITY, 40]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let seq = NucleotideSequence::from_ascii(b"ACGT").unwrap();
        let err = SequenceWithQuality::new(seq, QualityProfile::uniform(3, 30)).unwrap_err();
        assert_eq!(
            err,
            SequenceError::LengthMismatch {
                sequence: 4,
                quality: 3
            }
        );
    }
}
