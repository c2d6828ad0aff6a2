//! Bytecode representation: opcode set, per-function code buffers, and the
//! disassembler.

pub use blob::Blob;
pub use op::{Opcode, TRY_NO_ADDRESS, TRY_NO_CLASS};

mod blob;
pub mod dis;
mod op;
