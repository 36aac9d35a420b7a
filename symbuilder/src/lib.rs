//! An in-memory, mutable symbol store for a native module.
//!
//! Unlike conventional debug information, which is parsed once from a file,
//! these symbols are constructed at runtime by API calls (or copied in
//! lazily by an [`import`] source) and then queried by a host debugger
//! through [`SymbolStore`]. The store keeps derived data — aggregate
//! layouts, array sizes, enumerant values, function signatures, address
//! indexes — consistent under mutation by propagating change notifications
//! along registered dependency edges, and tells the host when to drop its
//! caches through a single cache-invalidation event per mutation.
//!
//! [`StoreManager`] tracks one store per (process, module) and discards a
//! store when its module disappears. The host-side services the store
//! consumes (module, architecture, registers, memory, disassembler, event
//! sink) are the traits of the `symsvc` crate.

#![forbid(unused_must_use)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::single_match)]

pub mod data;
pub mod error;
pub mod func;
pub mod import;
pub mod location;
pub mod manager;
pub mod position;
mod ranges;
pub mod scope;
pub mod store;
mod sym;
pub mod types;
pub mod utils;
pub mod value;

pub use data::{FieldOffset, LiveRange};
pub use error::{Error, Result};
pub use location::Location;
pub use manager::StoreManager;
pub use position::Position;
pub use scope::{BoundVariable, Resolved, Scope, ScopeFrame, SearchOptions, SymbolFilter};
pub use store::SymbolStore;
pub use sym::{Symbol, SymbolId, SymbolKind};
pub use types::{IntrinsicKind, PointerKind, TypeKind};
pub use value::{Value, ValueKind};

#[cfg(test)]
#[static_init::dynamic]
static INIT_LOGGER: () = {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
};

#[cfg(test)]
pub(crate) mod testing;
