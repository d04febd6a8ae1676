//! Arabic/Persian text normalization, free-start alignment and excerpt
//! validation for downloaded documents.

pub mod align;
pub mod normalize;
pub mod validate;

pub use align::{Alignment, align};
pub use normalize::normalize;
pub use validate::{RejectReason, Verdict, count_words, validate};
