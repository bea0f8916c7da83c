pub mod barcode;
pub mod command;
pub mod fileformat;

pub use barcode::mismatch::MismatchIndex;
pub use barcode::pattern::FieldRanges;
pub use fileformat::well_table::WellAssignment;
