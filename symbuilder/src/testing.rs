//! Shared test doubles for the host services.

use crate::store::SymbolStore;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use symsvc::{
    AbstractRegister, Architecture, BasicBlock, CacheInvalidation, ContextFlags, Disassembler,
    EventSink, MemoryReader, Module, ModuleKey, ProcessKey, RegisterContext, RegisterInformation,
    RegisterSet, ServiceError,
};

pub const TEST_MODULE_BASE: u64 = 0x7ff6_0000_0000;

pub struct TestModule;

impl Module for TestModule {
    fn base_address(&self) -> u64 {
        TEST_MODULE_BASE
    }
    fn size(&self) -> u64 {
        0x10_0000
    }
    fn name(&self) -> &str {
        "testmod.exe"
    }
    fn path(&self) -> &str {
        "c:\\tests\\testmod.exe"
    }
    fn containing_process_key(&self) -> ProcessKey {
        ProcessKey(7)
    }
    fn key(&self) -> ModuleKey {
        ModuleKey(42)
    }
}

pub struct TestArch {
    registers: RegisterSet,
}

impl TestArch {
    pub fn new() -> Self {
        TestArch {
            registers: RegisterSet::amd64(),
        }
    }
}

impl Architecture for TestArch {
    fn pointer_size(&self) -> u64 {
        8
    }
    fn register_by_name(&self, name: &str) -> Option<RegisterInformation> {
        self.registers.by_name(name)
    }
    fn register_by_id(&self, id: u32) -> Option<RegisterInformation> {
        self.registers.by_id(id)
    }
}

/// Counts cache-invalidation events.
#[derive(Default)]
pub struct CountingSink {
    pub events: RefCell<Vec<CacheInvalidation>>,
}

impl CountingSink {
    pub fn count(&self) -> usize {
        self.events.borrow().len()
    }
}

impl EventSink for CountingSink {
    fn symbol_cache_invalidate(&self, event: &CacheInvalidation) {
        self.events.borrow_mut().push(*event);
    }
}

/// A register context with a fixed instruction pointer.
pub struct TestContext {
    pub rip: u64,
}

impl RegisterContext for TestContext {
    fn get_abstract_register_value_64(
        &self,
        register: AbstractRegister,
    ) -> Result<u64, ServiceError> {
        match register {
            AbstractRegister::InstructionPointer => Ok(self.rip),
            other => Err(ServiceError::UnavailableRegister(other)),
        }
    }

    fn duplicate(&self, _flags: ContextFlags) -> Box<dyn RegisterContext> {
        Box::new(TestContext { rip: self.rip })
    }
}

/// A memory reader over nothing; the test disassembler never reads it.
pub struct NullMemory;

impl MemoryReader for NullMemory {
    fn read_memory(&self, address: u64, _buffer: &mut [u8]) -> Result<usize, ServiceError> {
        Err(ServiceError::Memory { address })
    }
}

/// A disassembler returning a canned basic-block graph.
pub struct TestDisassembler {
    pub blocks: Vec<BasicBlock>,
    pub calls: Cell<u32>,
}

impl TestDisassembler {
    pub fn with_blocks(blocks: Vec<(u64, u64)>) -> Self {
        TestDisassembler {
            blocks: blocks
                .into_iter()
                .map(|(start, end)| BasicBlock {
                    start_address: start,
                    end_address: end,
                    instructions: (end - start) / 4,
                    outbound_control_flows: Vec::new(),
                })
                .collect(),
            calls: Cell::new(0),
        }
    }
}

impl Disassembler for TestDisassembler {
    fn disassemble_function(
        &self,
        _memory: &dyn MemoryReader,
        _entry_address: u64,
    ) -> Result<Vec<BasicBlock>, ServiceError> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.blocks.clone())
    }
}

/// A store over the test module and architecture, seeded with the basic C
/// types, plus its counting event sink.
pub fn test_store() -> (SymbolStore, Rc<CountingSink>) {
    let sink = Rc::new(CountingSink::default());
    let store = SymbolStore::new(
        Rc::new(TestModule),
        Rc::new(TestArch::new()),
        Some(Rc::clone(&sink) as Rc<dyn EventSink>),
        true,
    )
    .expect("store creation");
    (store, sink)
}

/// A store without the basic C types.
pub fn empty_store() -> (SymbolStore, Rc<CountingSink>) {
    let sink = Rc::new(CountingSink::default());
    let store = SymbolStore::new(
        Rc::new(TestModule),
        Rc::new(TestArch::new()),
        Some(Rc::clone(&sink) as Rc<dyn EventSink>),
        false,
    )
    .expect("store creation");
    (store, sink)
}
