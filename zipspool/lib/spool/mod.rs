//! Writer side: rotating temporary containers fed by producer scopes.
//!
//! Each producer process runs one [`Spool`]. Producer output is buffered per scope and committed
//! into the spool's current temporary container, named after the host and the UTC time it was
//! opened. The container is sealed every rotation span and on shutdown; sealed containers wait in
//! the inbox for the scavenger.

mod scoped;
mod spool;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use scoped::*;
pub use spool::*;
