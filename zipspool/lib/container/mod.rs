//! Container adapter for the zip archives exchanged between spools and the scavenger.
//!
//! A container is a random-access zip archive whose entries are addressed by name. Readers
//! enumerate and read entries, writers create or append to archives and refuse duplicate names,
//! and [`Repairer`] rewrites archives that fail to parse.
//!
//! Every operation is synchronous and owns its file handles, so independent processes can work
//! on different containers without sharing any in-process state.

mod reader;
mod repair;
mod writer;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use reader::*;
pub use repair::*;
pub use writer::*;
