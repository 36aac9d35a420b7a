//! Function and public symbols.
//!
//! A function owns its parameters and locals as ordered children and carries
//! a generated function-type symbol describing its signature; the type is
//! regenerated whenever the return type or the parameter list changes. A
//! public symbol is a bare name at an address; it can be promoted to a
//! function, deriving a code size from the disassembler's basic-block graph
//! when the caller does not supply one.


use crate::store::SymbolStore;
use crate::sym::{Payload, Symbol, SymbolId, SymbolKind};
use crate::{Error, Result};
use symsvc::{BasicBlock, Disassembler, MemoryReader};
use tracing::{debug, trace};

/// The payload of a function symbol.
pub struct FunctionPayload {
    /// The function's address ranges as `(module-relative offset, size)`
    /// pairs. The first is the primary range containing the entry point;
    /// optimizations may add disjoint secondary ranges.
    pub(crate) ranges: Vec<(u64, u64)>,
    pub(crate) return_type: SymbolId,
    pub(crate) function_type: SymbolId,
}

impl FunctionPayload {
    /// The function's address ranges; the first is the primary range.
    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }

    /// The module-relative offset of the function's entry point.
    pub fn offset(&self) -> u64 {
        self.ranges[0].0
    }

    /// The id of the function's return type.
    pub fn return_type(&self) -> SymbolId {
        self.return_type
    }

    /// The id of the generated function-type symbol for this function's
    /// signature.
    pub fn function_type(&self) -> SymbolId {
        self.function_type
    }
}

/// The payload of a public symbol.
pub struct PublicPayload {
    pub(crate) offset: u64,
}

impl PublicPayload {
    /// The module-relative address of the public symbol.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl SymbolStore {
    /// Creates a function at `[offset, offset + size)` with the given return
    /// type. Parameters and locals are added afterwards as children.
    pub fn create_function(
        &mut self,
        parent: SymbolId,
        name: &str,
        qualified_name: Option<&str>,
        return_type: SymbolId,
        offset: u64,
        size: u64,
    ) -> Result<SymbolId> {
        self.update(|store| {
            store.expect_type(return_type)?;

            let id = store.allocate_id();
            let symbol = Symbol::new(
                id,
                parent,
                SymbolKind::Function,
                Some(name.to_string()),
                qualified_name.map(str::to_string),
                Payload::Function(FunctionPayload {
                    ranges: vec![(offset, size)],
                    return_type,
                    function_type: SymbolId::NONE,
                }),
            );
            store.insert_symbol(symbol)?;
            store.add_dependent_edge(return_type, id)?;
            store.ranges.add(offset, offset + size, id);
            store.regenerate_function_type(id)?;
            if !parent.is_none() {
                store.attach_child(parent, id)?;
            }
            Ok(id)
        })
    }

    /// Adds a disjoint secondary address range to a function.
    pub fn add_function_range(
        &mut self,
        function: SymbolId,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        self.update(|store| {
            let payload = store.symbol(function)?.as_function()?;
            let end = offset.checked_add(size).ok_or_else(|| {
                Error::InvalidArgument("function range extent overflows".to_string())
            })?;
            if size == 0 {
                return Err(Error::InvalidArgument(
                    "a function range must not be empty".to_string(),
                ));
            }
            for &(existing_offset, existing_size) in payload.ranges() {
                if offset < existing_offset + existing_size && existing_offset < end {
                    return Err(Error::InvalidArgument(format!(
                        "range [{offset:#x}, {end:#x}) overlaps an existing function range"
                    )));
                }
            }

            store
                .symbol_mut(function)?
                .as_function_mut()?
                .ranges
                .push((offset, size));
            store.ranges.add(offset, end, function);
            store.mark_symbols_changed();
            Ok(())
        })
    }

    /// Changes a function's return type and regenerates its function type.
    pub fn set_return_type(&mut self, function: SymbolId, return_type: SymbolId) -> Result<()> {
        self.update(|store| {
            let old = store.symbol(function)?.as_function()?.return_type;
            if old == return_type {
                return Ok(());
            }
            store.expect_type(return_type)?;

            store.remove_dependent_edge(old, function);
            store.add_dependent_edge(return_type, function)?;
            store.symbol_mut(function)?.as_function_mut()?.return_type = return_type;

            store.regenerate_function_type(function)?;
            store.mark_symbols_changed();
            Ok(())
        })
    }

    /// Rebuilds the function-type symbol for a function's current signature:
    /// a fresh function type is created from the return type and the
    /// parameter children in order, and the previous one is deleted.
    pub(crate) fn regenerate_function_type(&mut self, function: SymbolId) -> Result<()> {
        let (return_type, old_type, children) = {
            let symbol = self.symbol(function)?;
            let payload = symbol.as_function()?;
            (
                payload.return_type,
                payload.function_type,
                symbol.children().to_vec(),
            )
        };

        let mut param_types = Vec::new();
        for child in children {
            let child_sym = match self.try_symbol(child) {
                Some(s) => s,
                None => continue,
            };
            if child_sym.kind() == SymbolKind::DataParameter {
                param_types.push(child_sym.as_data()?.type_id());
            }
        }

        let new_type = self.create_function_type(return_type, &param_types)?;
        self.symbol_mut(function)?.as_function_mut()?.function_type = new_type;
        trace!("regenerated function type for {function:?} as {new_type:?}");

        if !old_type.is_none() && self.try_symbol(old_type).is_some() {
            self.delete_symbol_inner(old_type)?;
        }
        Ok(())
    }

    /// Creates a public symbol: a name at a module-relative address,
    /// registered in the public-address index.
    pub fn create_public(
        &mut self,
        name: &str,
        qualified_name: Option<&str>,
        offset: u64,
    ) -> Result<SymbolId> {
        self.update(|store| {
            let id = store.allocate_id();
            let symbol = Symbol::new(
                id,
                SymbolId::NONE,
                SymbolKind::Public,
                Some(name.to_string()),
                qualified_name.map(str::to_string),
                Payload::Public(PublicPayload { offset }),
            );
            store.insert_symbol(symbol)?;
            store.publics.add(offset, id);
            Ok(id)
        })
    }

    /// Promotes a public symbol to a function at the same address. The
    /// public is deleted and a function symbol with its name is created in
    /// its place.
    ///
    /// Without an explicit `code_size`, the extent is derived from the
    /// disassembler: the basic blocks of the function are ordered by start
    /// address and the longest contiguous run through the block containing
    /// the entry point becomes the function's primary range. The return type
    /// defaults to `void` and `parameters` are attached in order.
    pub fn promote_public_to_function(
        &mut self,
        public: SymbolId,
        code_size: Option<u64>,
        return_type: Option<SymbolId>,
        parameters: &[(&str, SymbolId)],
        disassembler: &dyn Disassembler,
        memory: &dyn MemoryReader,
    ) -> Result<SymbolId> {
        self.update(|store| {
            let (name, qualified, offset) = {
                let symbol = store.symbol(public)?;
                let payload = symbol.as_public()?;
                (
                    symbol
                        .name()
                        .ok_or_else(|| {
                            Error::InvalidState("the public symbol has no name".to_string())
                        })?
                        .to_string(),
                    symbol.qualified_name.clone(),
                    payload.offset,
                )
            };

            let return_type = match return_type {
                Some(id) => {
                    store.expect_type(id)?;
                    id
                }
                None => store.find_type_by_name("void", false)?,
            };

            let size = match code_size {
                Some(size) if size != 0 => size,
                _ => {
                    let entry_va = store.module.base_address() + offset;
                    let mut blocks = disassembler
                        .disassemble_function(memory, entry_va)
                        .map_err(|e| Error::InvalidState(e.to_string()))?;
                    contiguous_code_size(entry_va, &mut blocks)?
                }
            };
            debug!("promoting public {name:?} at {offset:#x} to a function of size {size:#x}");

            store.delete_symbol_inner(public)?;

            let function = store.create_function(
                SymbolId::NONE,
                &name,
                qualified.as_deref(),
                return_type,
                offset,
                size,
            )?;
            for &(param_name, param_type) in parameters {
                store.add_parameter(function, param_name, param_type)?;
            }
            Ok(function)
        })
    }
}

/// Derives the code extent of a function from its basic-block graph: with
/// blocks ordered by start address, accumulates the contiguous run of blocks
/// forward from the one containing the entry point. Blocks placed before the
/// entry or past a gap do not contribute.
fn contiguous_code_size(entry_va: u64, blocks: &mut [BasicBlock]) -> Result<u64> {
    blocks.sort_by_key(|b| b.start_address);

    let mut contiguous_end = entry_va;
    let mut found_primary = false;
    for block in blocks.iter() {
        if !found_primary {
            if entry_va >= block.start_address && entry_va < block.end_address {
                found_primary = true;
                contiguous_end = block.end_address;
            }
        } else if block.start_address == contiguous_end {
            contiguous_end = block.end_address;
        } else {
            break;
        }
    }

    if contiguous_end == entry_va {
        return Err(Error::InvalidState(
            "the disassembler found no code extent at the function entry".to_string(),
        ));
    }
    Ok(contiguous_end - entry_va)
}
