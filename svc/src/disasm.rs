//! The disassembler interface.
//!
//! The symbol builder only needs flow analysis: given a function entry
//! address, the host disassembler produces the basic-block graph, and the
//! builder derives the contiguous code extent from it when promoting a public
//! symbol to a function without an explicit code size.

use crate::{MemoryReader, ServiceError};

/// One basic block of a disassembled function.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    /// The virtual address of the first instruction in the block.
    pub start_address: u64,
    /// One byte past the last instruction in the block.
    pub end_address: u64,
    /// The number of instructions in the block.
    pub instructions: u64,
    /// Start addresses of the blocks this block can flow to.
    pub outbound_control_flows: Vec<u64>,
}

/// Performs control-flow analysis over target code.
pub trait Disassembler {
    /// Disassembles the function whose entry point is `entry_address`,
    /// reading code bytes through `memory`, and returns its basic blocks in
    /// any order.
    fn disassemble_function(
        &self,
        memory: &dyn MemoryReader,
        entry_address: u64,
    ) -> Result<Vec<BasicBlock>, ServiceError>;
}
