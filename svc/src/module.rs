//! The module provider interface.

use std::fmt;

/// Identifies a process tracked by the host. Keys are opaque to the symbol
/// builder; the host guarantees uniqueness for the lifetime of the process.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProcessKey(pub u64);

impl fmt::Debug for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P#{:x}", self.0)
    }
}

/// Identifies a module within a process. Keys are opaque to the symbol
/// builder; the host guarantees uniqueness for the lifetime of the module.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ModuleKey(pub u64);

impl fmt::Debug for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M#{:x}", self.0)
    }
}

/// A loaded executable image, as enumerated by the host debugger.
///
/// Offsets throughout the symbol builder are relative to `base_address`.
pub trait Module {
    /// The virtual address at which the module is loaded.
    fn base_address(&self) -> u64;

    /// The size of the loaded image in bytes.
    fn size(&self) -> u64;

    /// The short name of the module (e.g. `notepad.exe`).
    fn name(&self) -> &str;

    /// The full path of the module's image file.
    fn path(&self) -> &str;

    /// The key of the process the module is loaded into.
    fn containing_process_key(&self) -> ProcessKey;

    /// The key of the module itself.
    fn key(&self) -> ModuleKey;
}
