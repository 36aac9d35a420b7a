//! Machine architecture and register context interfaces.

use crate::ServiceError;
use bitflags::bitflags;
use std::collections::HashMap;

/// Abstract register roles that can be fetched from a context without knowing
/// the concrete architecture.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AbstractRegister {
    /// The instruction pointer (`rip`, `pc`, ...).
    InstructionPointer,
    /// The stack pointer (`rsp`, `sp`, ...).
    StackPointer,
    /// The frame pointer (`rbp`, `fp`, ...), where the ABI defines one.
    FramePointer,
    /// The return address, where the architecture carries it in a register.
    ReturnAddress,
}

bitflags! {
    /// Selects which register classes a duplicated context must carry.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct ContextFlags: u32 {
        /// Integer and general-purpose registers.
        const INTEGER = 1 << 0;
        /// Floating-point and vector registers.
        const FLOATING_POINT = 1 << 1;
        /// Control registers (instruction pointer, flags, segments).
        const CONTROL = 1 << 2;
    }
}

/// Describes one register of the target architecture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegisterInformation {
    /// The canonical lower-case name (e.g. `rcx`).
    pub name: String,
    /// The architecture-assigned register number.
    pub id: u32,
    /// The register width in bytes.
    pub size: u32,
}

/// Architecture information for the module a symbol store describes: the
/// pointer width and the register catalog used by location descriptors.
pub trait Architecture {
    /// The size in bytes of a pointer on this architecture.
    fn pointer_size(&self) -> u64;

    /// Looks up a register by its canonical name.
    fn register_by_name(&self, name: &str) -> Option<RegisterInformation>;

    /// Looks up a register by its architecture-assigned number.
    fn register_by_id(&self, id: u32) -> Option<RegisterInformation>;
}

/// A register context for one stack frame, as produced by the host's
/// unwinder.
pub trait RegisterContext {
    /// Fetches an abstract register as a 64-bit value.
    fn get_abstract_register_value_64(
        &self,
        register: AbstractRegister,
    ) -> Result<u64, ServiceError>;

    /// Duplicates the context. The duplicate must carry at least the register
    /// classes named by `flags`.
    fn duplicate(&self, flags: ContextFlags) -> Box<dyn RegisterContext>;
}

/// A name/id indexed register catalog.
///
/// Hosts can build one of these from their architecture service and delegate
/// the [`Architecture`] lookups to it.
#[derive(Default)]
pub struct RegisterSet {
    by_name: HashMap<String, u32>,
    by_id: HashMap<u32, RegisterInformation>,
}

impl RegisterSet {
    /// Creates an empty register set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a register to the set. The last registration wins for a
    /// duplicated name or id.
    pub fn add(&mut self, name: &str, id: u32, size: u32) {
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(
            id,
            RegisterInformation {
                name: name.to_string(),
                id,
                size,
            },
        );
    }

    /// Looks up a register by name.
    pub fn by_name(&self, name: &str) -> Option<RegisterInformation> {
        let id = self.by_name.get(name)?;
        self.by_id.get(id).cloned()
    }

    /// Looks up a register by id.
    pub fn by_id(&self, id: u32) -> Option<RegisterInformation> {
        self.by_id.get(&id).cloned()
    }

    /// The AMD64 general-purpose catalog: 64-bit GPRs plus `rip`.
    ///
    /// Register numbers follow the CodeView AMD64 numbering for the full
    /// 64-bit forms (`rax` = 328 .. `r15` = 343, `rip` = 344).
    pub fn amd64() -> Self {
        const GPRS: [&str; 16] = [
            "rax", "rcx", "rdx", "rbx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15",
        ];
        let mut set = Self::new();
        for (i, name) in GPRS.iter().enumerate() {
            set.add(name, 328 + i as u32, 8);
        }
        set.add("rip", 344, 8);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_set_lookup() {
        let mut set = RegisterSet::new();
        set.add("rcx", 330, 8);

        let by_name = set.by_name("rcx").unwrap();
        assert_eq!(by_name.id, 330);
        assert_eq!(by_name.size, 8);

        let by_id = set.by_id(330).unwrap();
        assert_eq!(by_id.name, "rcx");

        assert!(set.by_name("xmm0").is_none());
        assert!(set.by_id(1).is_none());
    }

    #[test]
    fn amd64_catalog() {
        let set = RegisterSet::amd64();
        assert_eq!(set.by_name("rax").unwrap().id, 328);
        assert_eq!(set.by_name("rsp").unwrap().id, 335);
        assert_eq!(set.by_name("rip").unwrap().id, 344);
        assert_eq!(set.by_id(343).unwrap().name, "r15");
    }
}
