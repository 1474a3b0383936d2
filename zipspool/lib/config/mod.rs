//! Configuration types and defaults for the spool and the scavenger.

mod defaults;
mod zipspool;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use zipspool::*;
