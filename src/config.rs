//! Declarative parameter layer.
//!
//! Every stage owns a plain parameter struct; [`PipelineConfig`] aggregates
//! them and round-trips through TOML. Algorithms only ever see the structs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assembly::{AssemblerParameters, OverlapParameters};
use crate::barcode::{BarcodeParameters, DemultiplexParameters, GroupingParameters};
use crate::mapping::{AlignerParameters, EvaluatorParameters, KmerParameters, ScoringParameters};
use crate::variants::{ErrorModelParameters, VariantCallerParameters};

/// Errors raised while loading or validating parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Numeric parameter outside its admissible range.
    #[error("parameter '{name}' = {value} is out of range (expected {expected})")]
    OutOfRange {
        /// Dotted parameter path.
        name: &'static str,
        /// Offending value, rendered.
        value: String,
        /// Human-readable admissible range.
        expected: &'static str,
    },

    /// TOML text could not be parsed into a configuration.
    #[error("failed to parse parameters: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration could not be rendered as TOML.
    #[error("failed to render parameters: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Reject ratios outside `[0, 1]` (and NaN).
pub(crate) fn check_ratio(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value: value.to_string(),
            expected: "0.0..=1.0",
        })
    }
}

/// Reject values outside an inclusive integer range.
pub(crate) fn check_range(
    name: &'static str,
    value: usize,
    min: usize,
    max: usize,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value: value.to_string(),
            expected,
        })
    }
}

/// All stage parameters of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Adapter search thresholds.
    pub barcode: BarcodeParameters,
    /// Demultiplexing behaviour.
    pub demultiplex: DemultiplexParameters,
    /// UMI grouping thresholds.
    pub grouping: GroupingParameters,
    /// Paired-read merging.
    pub overlap: OverlapParameters,
    /// Consensus assembly.
    pub assembler: AssemblerParameters,
    /// K-mer index.
    pub kmer: KmerParameters,
    /// Local alignment scoring.
    pub scoring: ScoringParameters,
    /// Alignment acceptance thresholds.
    pub evaluator: EvaluatorParameters,
    /// Reference lookup strategy.
    pub aligner: AlignerParameters,
    /// Background error model.
    pub error_model: ErrorModelParameters,
    /// Variant calling thresholds.
    pub caller: VariantCallerParameters,
}

impl PipelineConfig {
    /// Parse and validate a TOML document; missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.barcode.validate()?;
        self.grouping.validate()?;
        self.overlap.validate()?;
        self.assembler.validate()?;
        self.kmer.validate()?;
        self.scoring.validate()?;
        self.evaluator.validate()?;
        self.error_model.validate()?;
        self.caller.validate()
    }
}
