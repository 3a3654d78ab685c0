use serde::{Deserialize, Serialize};

use crate::barcode::{BarcodeSignature, SignaturePosition};
use crate::config::{check_ratio, ConfigError};
use crate::genomics::{NucleotideSequence, SequenceWithQuality};

/// Thresholds controlling fuzzy adapter matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarcodeParameters {
    /// Signature positions allowed to fall outside the read.
    pub max_truncations: usize,
    /// Absolute budget of high-quality mismatches.
    pub max_good_mms: usize,
    /// High-quality mismatch budget relative to the compared positions.
    pub max_good_mm_ratio: f64,
    /// Absolute budget of low-quality mismatches.
    pub max_low_quality_mms: usize,
    /// Low-quality mismatch budget relative to the compared positions.
    pub max_low_quality_mm_ratio: f64,
    /// Read bases below this Phred score count as low quality.
    pub low_quality_threshold: u8,
}

impl Default for BarcodeParameters {
    fn default() -> Self {
        Self {
            max_truncations: 2,
            max_good_mms: 1,
            max_good_mm_ratio: 0.05,
            max_low_quality_mms: 2,
            max_low_quality_mm_ratio: 0.1,
            low_quality_threshold: 20,
        }
    }
}

impl BarcodeParameters {
    /// Check ratios are proper fractions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ratio("barcode.max_good_mm_ratio", self.max_good_mm_ratio)?;
        check_ratio("barcode.max_low_quality_mm_ratio", self.max_low_quality_mm_ratio)
    }

    fn good_limit(&self, compared: usize) -> usize {
        self.max_good_mms
            .max((self.max_good_mm_ratio * compared as f64).floor() as usize)
    }

    fn low_quality_limit(&self, compared: usize) -> usize {
        self.max_low_quality_mms
            .max((self.max_low_quality_mm_ratio * compared as f64).floor() as usize)
    }
}

/// Outcome of a successful adapter search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeSearcherResult {
    /// Extracted UMI bases.
    pub umi: NucleotideSequence,
    /// Worst quality among the UMI bases (`u8::MAX` when there is no UMI).
    pub umi_worst_quality: u8,
    /// Mismatches at high-quality read bases.
    pub good_mms: usize,
    /// Mismatches at low-quality read bases.
    pub low_quality_mms: usize,
    /// Signature positions clipped by the read edges.
    pub truncations: usize,
    /// Matched span start in the read (inclusive).
    pub from: usize,
    /// Matched span end in the read (exclusive).
    pub to: usize,
}

impl BarcodeSearcherResult {
    /// Sentinel for reads without an adapter whose UMI is supplied externally.
    pub const BLANK: BarcodeSearcherResult = BarcodeSearcherResult {
        umi: NucleotideSequence::EMPTY,
        umi_worst_quality: u8::MAX,
        good_mms: 0,
        low_quality_mms: 0,
        truncations: 0,
        from: 0,
        to: 0,
    };

    /// Whether this is the [`Self::BLANK`] sentinel.
    pub fn is_blank(&self) -> bool {
        *self == Self::BLANK
    }

    /// Total mismatches.
    pub fn mismatches(&self) -> usize {
        self.good_mms + self.low_quality_mms
    }
}

/// Fuzzy, quality-aware matcher of one signature against reads.
#[derive(Debug, Clone)]
pub struct BarcodeSearcher {
    signature: BarcodeSignature,
    params: BarcodeParameters,
}

impl BarcodeSearcher {
    /// Create a searcher for `signature`.
    pub fn new(signature: BarcodeSignature, params: BarcodeParameters) -> Self {
        Self { signature, params }
    }

    /// The signature being searched.
    pub fn signature(&self) -> &BarcodeSignature {
        &self.signature
    }

    /// Search `read` for the signature; the first passing candidate wins.
    pub fn search(&self, read: &SequenceWithQuality) -> Option<BarcodeSearcherResult> {
        if self.signature.is_fixed() {
            return self.evaluate(read, 0);
        }

        let seed_start = self.signature.seed().start as isize;
        read.sequence()
            .occurrences(self.signature.seed_sequence(), 0)
            .into_iter()
            .find_map(|hit| self.evaluate(read, hit as isize - seed_start))
    }

    /// Score the signature placed with its first position at read offset `offset`.
    fn evaluate(&self, read: &SequenceWithQuality, offset: isize) -> Option<BarcodeSearcherResult> {
        let read_len = read.len() as isize;
        let positions = self.signature.positions();
        let seed = self.signature.seed();

        let mut truncations = 0usize;
        let mut compared = 0usize;
        for (idx, pos) in positions.iter().enumerate() {
            let read_pos = offset + idx as isize;
            if read_pos < 0 || read_pos >= read_len {
                if matches!(pos, SignaturePosition::Umi) {
                    return None;
                }
                truncations += 1;
            } else if matches!(pos, SignaturePosition::Fuzzy(_)) {
                compared += 1;
            }
        }
        if truncations > self.params.max_truncations {
            return None;
        }

        let good_limit = self.params.good_limit(compared);
        let low_limit = self.params.low_quality_limit(compared);
        let mut good_mms = 0usize;
        let mut low_quality_mms = 0usize;
        let mut umi = NucleotideSequence::empty();
        let mut umi_worst_quality = u8::MAX;

        for (idx, &pos) in positions.iter().enumerate() {
            if seed.contains(&idx) {
                continue;
            }
            let read_pos = offset + idx as isize;
            if read_pos < 0 || read_pos >= read_len {
                continue;
            }
            let read_pos = read_pos as usize;
            let base = read.sequence().get(read_pos)?;
            let quality = read.quality().get(read_pos)?;
            match pos {
                SignaturePosition::Umi => {
                    umi.push(base);
                    umi_worst_quality = umi_worst_quality.min(quality);
                }
                SignaturePosition::Wildcard | SignaturePosition::Seed(_) => {}
                SignaturePosition::Fuzzy(_) if pos.accepts(base) => {}
                SignaturePosition::Fuzzy(_) => {
                    if quality < self.params.low_quality_threshold {
                        low_quality_mms += 1;
                        if low_quality_mms > low_limit {
                            return None;
                        }
                    } else {
                        good_mms += 1;
                        if good_mms > good_limit {
                            return None;
                        }
                    }
                }
            }
        }

        let from = offset.max(0) as usize;
        let to = (offset + positions.len() as isize).min(read_len).max(0) as usize;
        Some(BarcodeSearcherResult {
            umi,
            umi_worst_quality,
            good_mms,
            low_quality_mms,
            truncations,
            from,
            to,
        })
    }
}
