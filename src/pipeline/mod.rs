//! Comparison pipeline and response aggregation.

mod aggregate;
mod comparison;

pub use aggregate::aggregate;
pub use comparison::{Comparison, ComparisonPipeline, ComparisonSummary};
