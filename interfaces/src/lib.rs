pub mod baseline;
pub mod defs;

pub use baseline::BaselineReportGenerator;
pub use defs::*;
