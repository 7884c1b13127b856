pub mod job;
pub mod registry;

pub use job::*;
pub use registry::*;
