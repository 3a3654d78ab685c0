use std::fmt;
use std::ops::Range;

use thiserror::Error;

use crate::genomics::{Nucleotide, NucleotideSequence};

/// Errors raised while parsing adapter signatures or barcode lists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarcodeError {
    /// Signature string is blank.
    #[error("blank barcode signature '{0}'")]
    BlankSignature(String),

    /// Signature contains a character outside the IUPAC alphabet.
    #[error("illegal character '{ch}' at position {position} in signature '{signature}'")]
    IllegalCharacter {
        /// Offending character.
        ch: char,
        /// Position within the signature.
        position: usize,
        /// Full signature text.
        signature: String,
    },

    /// Sample name is blank.
    #[error("sample name at row {0} is blank")]
    BlankSample(usize),

    /// Two rows share a sample name.
    #[error("duplicate sample name '{0}'")]
    DuplicateSample(String),

    /// Two rows share the same master/slave signature pair.
    #[error("duplicate barcode signature '{0}'")]
    DuplicateSignature(String),

    /// Column lists have different lengths.
    #[error("barcode lists differ in length: {samples} samples, {masters} masters, {slaves} slaves")]
    MismatchedLists {
        /// Number of sample names.
        samples: usize,
        /// Number of master signatures.
        masters: usize,
        /// Number of slave signatures.
        slaves: usize,
    },
}

const MASK_A: u8 = 0b0001;
const MASK_C: u8 = 0b0010;
const MASK_G: u8 = 0b0100;
const MASK_T: u8 = 0b1000;

/// Bitmask of the canonical bases an IUPAC symbol stands for.
fn iupac_mask(symbol: u8) -> Option<u8> {
    let mask = match symbol.to_ascii_uppercase() {
        b'A' => MASK_A,
        b'C' => MASK_C,
        b'G' => MASK_G,
        b'T' | b'U' => MASK_T,
        b'R' => MASK_A | MASK_G,
        b'Y' => MASK_C | MASK_T,
        b'M' => MASK_A | MASK_C,
        b'K' => MASK_G | MASK_T,
        b'S' => MASK_C | MASK_G,
        b'W' => MASK_A | MASK_T,
        b'B' => MASK_C | MASK_G | MASK_T,
        b'D' => MASK_A | MASK_G | MASK_T,
        b'H' => MASK_A | MASK_C | MASK_T,
        b'V' => MASK_A | MASK_C | MASK_G,
        b'N' => MASK_A | MASK_C | MASK_G | MASK_T,
        _ => return None,
    };
    Some(mask)
}

/// Role of one signature position during matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePosition {
    /// Part of the exact-match seed.
    Seed(Nucleotide),
    /// Compared with IUPAC compatibility; mismatches are counted.
    Fuzzy(u8),
    /// UMI base, copied verbatim.
    Umi,
    /// Ignored position.
    Wildcard,
}

impl SignaturePosition {
    /// Whether `base` is compatible with this position.
    pub fn accepts(self, base: Nucleotide) -> bool {
        match self {
            SignaturePosition::Seed(expected) => expected == base,
            SignaturePosition::Fuzzy(mask) => mask & (1 << base.index()) != 0,
            SignaturePosition::Umi | SignaturePosition::Wildcard => true,
        }
    }
}

/// Adapter signature over the IUPAC alphabet.
///
/// Case is significant: upper-case `A/C/G/T` runs are seed candidates (the
/// longest wins), upper-case `N` marks UMI bases, lower-case letters are fuzzy
/// positions and lower-case `n` is a wildcard. Without a seed the signature
/// is anchored at the read start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeSignature {
    text: String,
    positions: Vec<SignaturePosition>,
    seed: Range<usize>,
    seed_sequence: NucleotideSequence,
}

impl BarcodeSignature {
    /// Parse a signature string.
    pub fn parse(text: &str) -> Result<Self, BarcodeError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(BarcodeError::BlankSignature(text.to_string()));
        }

        let mut positions = Vec::with_capacity(trimmed.len());
        for (position, ch) in trimmed.bytes().enumerate() {
            let mask = iupac_mask(ch).ok_or_else(|| BarcodeError::IllegalCharacter {
                ch: ch as char,
                position,
                signature: trimmed.to_string(),
            })?;
            let kind = match ch {
                b'N' => SignaturePosition::Umi,
                b'n' => SignaturePosition::Wildcard,
                _ => match Nucleotide::from_ascii(ch) {
                    Some(base) if ch.is_ascii_uppercase() => SignaturePosition::Seed(base),
                    _ => SignaturePosition::Fuzzy(mask),
                },
            };
            positions.push(kind);
        }

        let seed = longest_seed_run(&positions);
        let seed_sequence = positions[seed.clone()]
            .iter()
            .filter_map(|pos| match pos {
                SignaturePosition::Seed(base) => Some(*base),
                _ => None,
            })
            .collect();

        // Upper-case bases outside the chosen seed are matched fuzzily.
        for (idx, pos) in positions.iter_mut().enumerate() {
            if let SignaturePosition::Seed(base) = *pos {
                if !seed.contains(&idx) {
                    *pos = SignaturePosition::Fuzzy(1 << base.index());
                }
            }
        }

        Ok(Self {
            text: trimmed.to_string(),
            positions,
            seed,
            seed_sequence,
        })
    }

    /// Original signature text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Signature length.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` for an empty signature (never after parsing).
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Per-position roles.
    pub fn positions(&self) -> &[SignaturePosition] {
        &self.positions
    }

    /// Exact-match seed range within the signature; empty in fixed mode.
    pub fn seed(&self) -> Range<usize> {
        self.seed.clone()
    }

    /// Seed bases.
    pub fn seed_sequence(&self) -> &NucleotideSequence {
        &self.seed_sequence
    }

    /// Whether the signature has no seed and is anchored at the read start.
    pub fn is_fixed(&self) -> bool {
        self.seed.is_empty()
    }

    /// Number of UMI positions.
    pub fn umi_len(&self) -> usize {
        self.positions
            .iter()
            .filter(|pos| matches!(pos, SignaturePosition::Umi))
            .count()
    }
}

impl fmt::Display for BarcodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn longest_seed_run(positions: &[SignaturePosition]) -> Range<usize> {
    let mut best = 0..0;
    let mut start = None;
    for idx in 0..=positions.len() {
        let is_seed = matches!(positions.get(idx), Some(SignaturePosition::Seed(_)));
        match (is_seed, start) {
            (true, None) => start = Some(idx),
            (false, Some(run_start)) => {
                if idx - run_start > best.len() {
                    best = run_start..idx;
                }
                start = None;
            }
            _ => {}
        }
    }
    best
}
