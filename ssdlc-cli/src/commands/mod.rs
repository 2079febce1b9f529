//! CLI command implementations

pub mod scan;
pub mod system;

pub use scan::scan;
pub use system::sweep;
