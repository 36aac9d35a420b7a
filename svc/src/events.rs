//! The event channel from the symbol builder back to the host.

use crate::{ModuleKey, ProcessKey};

/// Payload of a symbol-cache-invalidation event.
///
/// Emitted synchronously after any mutation that could alter projected symbol
/// identity, layout, or address mapping. A host that caches projections of
/// the store must drop them for the named module.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CacheInvalidation {
    /// The process containing the module whose symbols changed.
    pub process: ProcessKey,
    /// The module whose symbols changed.
    pub module: ModuleKey,
}

/// Receives event notifications from a symbol store.
///
/// Sinks are shared (`Rc`) and invoked re-entrantly from mutating calls, so
/// implementations use interior mutability for any state they keep.
pub trait EventSink {
    /// Called once per outer mutation of a symbol store.
    fn symbol_cache_invalidate(&self, event: &CacheInvalidation);
}
