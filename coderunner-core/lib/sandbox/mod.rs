//! Sandbox plumbing: the container engine driver and the stream demultiplexer.

mod demux;
mod driver;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use demux::*;
pub use driver::*;
