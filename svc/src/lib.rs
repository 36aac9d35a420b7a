//! Service interfaces between a host debugger and the symbol builder.
//!
//! The symbol builder constructs symbolic information for a module entirely at
//! runtime and hands it to a host debugger as if it were conventional debug
//! information. Everything the builder needs from the host flows through the
//! small trait surface in this crate: the module being described, the machine
//! architecture (pointer size and register catalog), a register context for
//! scope-frame resolution, a virtual-memory reader, a disassembler for
//! deriving code extents, and an event sink for cache invalidation.
//!
//! The `symbuilder` crate consumes these interfaces; hosts implement them.

#![forbid(unused_must_use)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::collapsible_if)]

mod disasm;
mod events;
mod memory;
mod module;
mod registers;

pub use disasm::{BasicBlock, Disassembler};
pub use events::{CacheInvalidation, EventSink};
pub use memory::MemoryReader;
pub use module::{Module, ModuleKey, ProcessKey};
pub use registers::{
    AbstractRegister, Architecture, ContextFlags, RegisterContext, RegisterInformation,
    RegisterSet,
};

use thiserror::Error;

/// Failures reported by host services.
///
/// These are distinct from the symbol builder's own error taxonomy; the
/// builder maps them at its public boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A virtual-memory read could not be satisfied.
    #[error("memory read failed at {address:#x}")]
    Memory {
        /// The virtual address of the failed read.
        address: u64,
    },

    /// The disassembler could not analyze code at an address.
    #[error("disassembly failed at {address:#x}: {reason}")]
    Disassembly {
        /// The virtual address where analysis failed.
        address: u64,
        /// A host-provided description of the failure.
        reason: String,
    },

    /// A register value was requested that the context does not carry.
    #[error("register context does not contain {0:?}")]
    UnavailableRegister(AbstractRegister),
}
