//! The store manager: one symbol store per (process, module).


use crate::location::{self, Location};
use crate::store::SymbolStore;
use crate::{Error, Result};
use std::collections::HashMap;
use std::rc::Rc;
use symsvc::{Architecture, EventSink, Module, ModuleKey, ProcessKey};
use tracing::debug;

#[derive(Default)]
struct ProcessTracker {
    stores: HashMap<ModuleKey, SymbolStore>,
}

/// Tracks symbol stores per process and module.
///
/// The manager is injected per host service container, never ambient, and
/// owns the stores it creates. When the host reports a module gone, the
/// corresponding store is discarded with it.
pub struct StoreManager {
    arch: Rc<dyn Architecture>,
    event_sink: Option<Rc<dyn EventSink>>,
    processes: HashMap<ProcessKey, ProcessTracker>,
}

impl StoreManager {
    /// Creates a manager over the host's architecture service, publishing
    /// cache-invalidation events to `event_sink`.
    pub fn new(arch: Rc<dyn Architecture>, event_sink: Option<Rc<dyn EventSink>>) -> StoreManager {
        StoreManager {
            arch,
            event_sink,
            processes: HashMap::new(),
        }
    }

    /// Starts tracking a process. Idempotent.
    pub fn track_process(&mut self, process: ProcessKey) {
        self.processes.entry(process).or_default();
    }

    /// Whether a process is tracked.
    pub fn is_tracking(&self, process: ProcessKey) -> bool {
        self.processes.contains_key(&process)
    }

    /// Creates the symbol store for a module, optionally seeded with the
    /// basic C types. Fails if the module already has one.
    pub fn create_symbols_for_module(
        &mut self,
        module: Rc<dyn Module>,
        add_basic_c_types: bool,
    ) -> Result<&mut SymbolStore> {
        let process = module.containing_process_key();
        let module_key = module.key();
        self.track_process(process);

        let tracker = self
            .processes
            .get_mut(&process)
            .ok_or_else(|| Error::NotFound(format!("process {process:?} is not tracked")))?;
        if tracker.stores.contains_key(&module_key) {
            return Err(Error::InvalidArgument(format!(
                "module {module_key:?} already has symbol-builder symbols"
            )));
        }

        debug!("creating symbol store for {module_key:?} in {process:?}");
        let store = SymbolStore::new(
            module,
            Rc::clone(&self.arch),
            self.event_sink.clone(),
            add_basic_c_types,
        )?;
        Ok(tracker.stores.entry(module_key).or_insert(store))
    }

    /// The existing store for a module, if one was created.
    pub fn try_get_symbols_for_module(
        &mut self,
        process: ProcessKey,
        module: ModuleKey,
    ) -> Option<&mut SymbolStore> {
        self.processes.get_mut(&process)?.stores.get_mut(&module)
    }

    /// Discards the store for a module that disappeared.
    pub fn on_module_unloaded(&mut self, process: ProcessKey, module: ModuleKey) {
        if let Some(tracker) = self.processes.get_mut(&process) {
            if tracker.stores.remove(&module).is_some() {
                debug!("discarded symbol store for unloaded {module:?}");
            }
        }
    }

    /// Discards every store of a process that exited.
    pub fn on_process_exited(&mut self, process: ProcessKey) {
        if self.processes.remove(&process).is_some() {
            debug!("discarded symbol stores for exited {process:?}");
        }
    }

    /// Parses a location descriptor against the manager's architecture.
    pub fn parse_location(&self, text: &str) -> Result<Location> {
        location::parse_location(text, &*self.arch)
    }

    /// Formats a location descriptor against the manager's architecture.
    pub fn location_to_string(&self, loc: &Location) -> Result<String> {
        location::location_to_string(loc, &*self.arch)
    }
}
