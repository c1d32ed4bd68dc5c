//! Guardrails wrapped around retrieval and generation.
//!
//! - [`PiiScrubber`] - redacts national IDs, tax IDs, emails and phone numbers
//! - [`GroundingChecker`] - scores how well an answer is supported by evidence
//! - [`RefusalPolicy`] - decides when to withhold an answer

pub mod grounding;
mod lexical;
pub mod pii;
pub mod refusal;

pub use grounding::{
    ClaimSupport, GroundingChecker, GroundingConfig, GroundingDetails, GroundingResult,
};
pub use pii::{PiiKind, PiiMatch, PiiScrubber};
pub use refusal::{
    RefusalConfig, RefusalPolicy, RefusalReason, RefusalResponse, RefusalResult,
    RelevanceAggregate,
};
