//! Utility functions and types.

mod host;
mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use host::*;
pub use path::*;
