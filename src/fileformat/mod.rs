pub mod fastq;
pub mod well_table;
pub mod whitelist;

pub use fastq::open_fastq;
pub use fastq::PairedFastqWriter;
pub use well_table::SubsampleWells;
pub use well_table::WellAssignment;
pub use whitelist::read_whitelist;
