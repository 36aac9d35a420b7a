//! Scopes, scope frames, and scope-bound variables.
//!
//! A scope is a position inside a function (the global scope is the absence
//! of one); a scope frame additionally carries the register context of an
//! unwound stack frame. Enumerating a scope yields *scope-bound handles* for
//! parameters and locals: ids with the high bit set that index the store's
//! scope-binding table, so a variable's location can be resolved at the
//! scope's program counter without mutating the underlying symbol.

use crate::location::Location;
use crate::store::SymbolStore;
use crate::sym::{Symbol, SymbolId, SymbolKind};
use crate::types::TypeKind;
use crate::{Error, Result};
use bitflags::bitflags;
use symsvc::{AbstractRegister, ContextFlags, ProcessKey, RegisterContext};

bitflags! {
    /// Options refining a symbol search.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct SearchOptions: u32 {
        /// Compare the filter name against qualified names instead of short
        /// names.
        const QUALIFIED_NAME = 1 << 0;
    }
}

/// A filter over symbols: by kind, by name, and (for types) by type kind.
#[derive(Clone, Debug, Default)]
pub struct SymbolFilter {
    kind: Option<SymbolKind>,
    name: Option<String>,
    options: SearchOptions,
    type_kind: Option<TypeKind>,
}

impl SymbolFilter {
    /// A filter matching every symbol.
    pub fn any() -> SymbolFilter {
        SymbolFilter::default()
    }

    /// Restricts the filter to one symbol kind.
    pub fn with_kind(mut self, kind: SymbolKind) -> SymbolFilter {
        self.kind = Some(kind);
        self
    }

    /// Restricts the filter to symbols with the given name.
    pub fn with_name(mut self, name: &str) -> SymbolFilter {
        self.name = Some(name.to_string());
        self
    }

    /// Sets search options.
    pub fn with_options(mut self, options: SearchOptions) -> SymbolFilter {
        self.options = options;
        self
    }

    /// Restricts the filter to types of the given type kind.
    pub fn with_type_kind(mut self, type_kind: TypeKind) -> SymbolFilter {
        self.type_kind = Some(type_kind);
        self
    }

    /// The kind restriction, if any.
    pub fn kind(&self) -> Option<SymbolKind> {
        self.kind
    }

    /// The name restriction, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether `symbol` satisfies the filter.
    pub fn matches(&self, symbol: &Symbol) -> bool {
        if let Some(kind) = self.kind {
            if symbol.kind() != kind {
                return false;
            }
        }

        if let Some(name) = &self.name {
            let candidate = if self.options.contains(SearchOptions::QUALIFIED_NAME) {
                symbol.qualified_name()
            } else {
                symbol.name()
            };
            if candidate != Some(name.as_str()) {
                return false;
            }
        }

        if let Some(type_kind) = self.type_kind {
            match symbol.as_type() {
                Ok(t) if t.type_kind() == type_kind => {}
                _ => return false,
            }
        }

        true
    }
}

/// A scope within a function, detached from any register context.
#[derive(Copy, Clone, Debug)]
pub struct Scope {
    function: SymbolId,
    srel_offset: u64,
}

impl Scope {
    /// The function this scope lies in.
    pub fn function(&self) -> SymbolId {
        self.function
    }

    /// The program counter of the scope, relative to the function's entry.
    pub fn function_offset(&self) -> u64 {
        self.srel_offset
    }

    fn module_offset(&self, store: &SymbolStore) -> Result<u64> {
        Ok(store.symbol(self.function)?.as_function()?.offset() + self.srel_offset)
    }

    /// Enumerates the function's parameters as scope-bound handles.
    pub fn arguments(&self, store: &mut SymbolStore) -> Result<Vec<SymbolId>> {
        self.children(
            store,
            &SymbolFilter::any().with_kind(SymbolKind::DataParameter),
        )
    }

    /// Enumerates the function's locals as scope-bound handles.
    pub fn locals(&self, store: &mut SymbolStore) -> Result<Vec<SymbolId>> {
        self.children(store, &SymbolFilter::any().with_kind(SymbolKind::DataLocal))
    }

    /// Enumerates the function's children matching `filter`. Parameters and
    /// locals come back as scope-bound handles resolving at this scope's
    /// program counter; other children come back as plain ids.
    pub fn children(&self, store: &mut SymbolStore, filter: &SymbolFilter) -> Result<Vec<SymbolId>> {
        let module_offset = self.module_offset(store)?;
        let children = store.symbol(self.function)?.children().to_vec();

        let mut out = Vec::new();
        for child in children {
            let symbol = match store.try_symbol(child) {
                Some(s) => s,
                None => continue,
            };
            if !filter.matches(symbol) {
                continue;
            }
            if symbol.kind().is_variable() {
                out.push(store.bind_to_scope(child, module_offset)?);
            } else {
                out.push(child);
            }
        }
        Ok(out)
    }
}

/// A scope bound to the register context of a stack frame.
pub struct ScopeFrame {
    scope: Scope,
    process: ProcessKey,
    context: Box<dyn RegisterContext>,
}

impl ScopeFrame {
    /// The underlying scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The process the frame belongs to.
    pub fn process(&self) -> ProcessKey {
        self.process
    }

    /// Duplicates the frame's register context, carrying at least the
    /// register classes in `flags`.
    pub fn context(&self, flags: ContextFlags) -> Box<dyn RegisterContext> {
        self.context.duplicate(flags)
    }
}

/// The result of resolving a symbol id: either a plain symbol, or a view of
/// a variable bound to a program counter.
pub enum Resolved<'a> {
    /// A plain symbol.
    Symbol(&'a Symbol),
    /// A scope-bound view of a parameter or local.
    Bound(BoundVariable),
}

/// A location-resolved view of a variable at a specific program counter. The
/// underlying variable symbol is untouched; the binding only affects how its
/// location reads.
#[derive(Copy, Clone, Debug)]
pub struct BoundVariable {
    /// The scope-bound handle this view resolves.
    pub handle: SymbolId,
    /// The underlying variable symbol.
    pub variable: SymbolId,
    /// The module-relative program counter the binding was made at.
    pub module_offset: u64,
}

impl BoundVariable {
    /// The variable's location at the bound program counter: the location
    /// descriptor of the live range covering it.
    pub fn location(&self, store: &SymbolStore) -> Result<Location> {
        let symbol = store.symbol(self.variable)?;
        let function = store.symbol(symbol.parent())?.as_function()?;
        let srel_offset = self.module_offset.wrapping_sub(function.offset());

        symbol
            .as_data()?
            .live
            .at_offset(srel_offset)
            .map(|range| range.location)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "the variable has no live range covering function offset {srel_offset:#x}"
                ))
            })
    }
}

impl SymbolStore {
    /// Enumerates the children of the global scope (every symbol in the
    /// store) matching `filter`, consulting the importer for the filter's
    /// name and kind first.
    pub fn global_scope_children(&mut self, filter: &SymbolFilter) -> Result<Vec<SymbolId>> {
        self.consult_importer_for_name(filter.kind(), filter.name());
        Ok(self
            .all_symbols()
            .filter(|s| filter.matches(s))
            .map(|s| s.id())
            .collect())
    }

    /// Enumerates the children of one symbol matching `filter`, as plain
    /// ids.
    pub fn enumerate_children(
        &self,
        parent: SymbolId,
        filter: &SymbolFilter,
    ) -> Result<Vec<SymbolId>> {
        let children = self.symbol(parent)?.children();
        Ok(children
            .iter()
            .copied()
            .filter(|&c| self.try_symbol(c).is_some_and(|s| filter.matches(s)))
            .collect())
    }

    /// Finds the scope enclosing a module-relative offset: the first
    /// function whose address range covers it.
    pub fn scope_for_offset(&self, module_offset: u64) -> Result<Scope> {
        let covering = self
            .ranges
            .find(module_offset)
            .ok_or_else(|| Error::NotFound(format!("no scope at offset {module_offset:#x}")))?;

        for &id in covering {
            let symbol = match self.try_symbol(id) {
                Some(s) => s,
                None => continue,
            };
            if symbol.kind() == SymbolKind::Function {
                let srel_offset = module_offset - symbol.as_function()?.offset();
                return Ok(Scope {
                    function: id,
                    srel_offset,
                });
            }
        }
        Err(Error::NotFound(format!(
            "no function encloses offset {module_offset:#x}"
        )))
    }

    /// Finds the scope frame for an unwound stack frame: extracts the
    /// program counter from the register context, converts it to a
    /// module-relative offset, and resolves the enclosing function.
    pub fn scope_frame_for(
        &self,
        process: ProcessKey,
        context: &dyn RegisterContext,
    ) -> Result<ScopeFrame> {
        let pc = context
            .get_abstract_register_value_64(AbstractRegister::InstructionPointer)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;

        let base = self.module.base_address();
        if pc < base {
            return Err(Error::NotFound(format!(
                "program counter {pc:#x} lies below the module base"
            )));
        }

        let scope = self.scope_for_offset(pc - base)?;
        Ok(ScopeFrame {
            scope,
            process,
            context: context.duplicate(ContextFlags::INTEGER | ContextFlags::CONTROL),
        })
    }

    /// Creates a scope-bound handle for `variable` at a module-relative
    /// program counter.
    pub fn bind_to_scope(&mut self, variable: SymbolId, module_offset: u64) -> Result<SymbolId> {
        let symbol = self.symbol(variable)?;
        if !symbol.kind().is_variable() {
            return Err(Error::Unsupported(format!(
                "symbol {variable:?} is not a parameter or local"
            )));
        }
        self.scope_bindings.push((variable, module_offset));
        Ok(SymbolId::for_scope_binding(self.scope_bindings.len() - 1))
    }

    /// Resolves an id: a plain id resolves to its symbol, a scope-bound
    /// handle to a [`BoundVariable`] view. Handles stay valid until the
    /// underlying variable is deleted.
    pub fn resolve_symbol(&self, id: SymbolId) -> Result<Resolved<'_>> {
        if !id.is_scope_bound() {
            return Ok(Resolved::Symbol(self.symbol(id)?));
        }

        let (variable, module_offset) = *self
            .scope_bindings
            .get(id.scope_binding_index())
            .ok_or_else(|| Error::InvalidArgument(format!("{id:?} is not a valid handle")))?;
        // The variable may have been deleted since the binding was made.
        self.symbol(variable)?;
        Ok(Resolved::Bound(BoundVariable {
            handle: id,
            variable,
            module_offset,
        }))
    }
}
