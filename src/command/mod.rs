pub mod split;

pub use split::SplitCMD;
pub use split::SplitFastq;
