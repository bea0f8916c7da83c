pub mod mismatch;
pub mod pattern;

pub use mismatch::MismatchIndex;
pub use pattern::FieldRanges;
