//! Mutation accounting, background error model and variant calling.

mod caller;
mod error_model;
pub mod report;
mod table;

pub use caller::{binomial_mid_p, Variant, VariantCaller, VariantCallerParameters, VariantFilter};
pub use error_model::{ErrorModel, ErrorModelOrder, ErrorModelParameters, SubstitutionMatrix};
pub use table::{CellCounts, IndelCounts, MutationsTable, MutationsTables};
