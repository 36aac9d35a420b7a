//! The symbol record: the shared header every symbol carries plus the
//! kind-specific payload, and the child/dependent bookkeeping shared by all
//! kinds.
//!
//! Symbols live in an arena owned by [`SymbolStore`](crate::SymbolStore) and
//! refer to each other exclusively by [`SymbolId`]; there is no cyclic
//! ownership. Graph-wide operations (deletion, dependency propagation,
//! reordering) are implemented on the store at the bottom of this module.

use crate::data::DataPayload;
use crate::func::{FunctionPayload, PublicPayload};
use crate::store::SymbolStore;
use crate::types::TypePayload;
use crate::{Error, Result};
use std::fmt;
use tracing::trace;

/// Identifies a symbol within one store.
///
/// Ids are dense and stable: they are assigned in creation order, deletion
/// leaves a permanent hole, and 0 is reserved to mean "no symbol". An id with
/// the high bit set is a scope-bound handle: it indexes the store's
/// scope-binding table rather than the symbol arena.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SymbolId(pub u64);

impl SymbolId {
    /// The reserved "no symbol" id.
    pub const NONE: SymbolId = SymbolId(0);

    /// Marks an id as indexing the scope-binding table.
    pub(crate) const SCOPE_BOUND_FLAG: u64 = 1 << 63;

    /// Whether this is the reserved "no symbol" id.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Whether this id is a scope-bound handle.
    pub fn is_scope_bound(self) -> bool {
        self.0 & Self::SCOPE_BOUND_FLAG != 0
    }

    pub(crate) fn scope_binding_index(self) -> usize {
        (self.0 & !Self::SCOPE_BOUND_FLAG) as usize
    }

    pub(crate) fn for_scope_binding(index: usize) -> SymbolId {
        SymbolId(Self::SCOPE_BOUND_FLAG | index as u64)
    }
}

impl fmt::Debug for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_scope_bound() {
            write!(f, "S#bound:{}", self.scope_binding_index())
        } else {
            write!(f, "S#{}", self.0)
        }
    }
}

/// The kind of a symbol.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SymbolKind {
    /// A type (any subkind).
    Type,
    /// A member of a user-defined type, or an enumerant.
    Field,
    /// A base class of a user-defined type.
    BaseClass,
    /// A function.
    Function,
    /// Global data.
    Data,
    /// A parameter of a function.
    DataParameter,
    /// A local variable of a function.
    DataLocal,
    /// A public symbol: a bare name at an address.
    Public,
}

impl SymbolKind {
    /// Whether symbols of this kind are indexed by qualified name in the
    /// store. Child symbols are not.
    pub fn is_global(self) -> bool {
        matches!(
            self,
            SymbolKind::Type | SymbolKind::Data | SymbolKind::Function | SymbolKind::Public
        )
    }

    /// Whether this is a function-scoped variable kind.
    pub fn is_variable(self) -> bool {
        matches!(self, SymbolKind::DataParameter | SymbolKind::DataLocal)
    }
}

/// The kind-specific portion of a symbol.
pub(crate) enum Payload {
    Type(TypePayload),
    Data(DataPayload),
    Function(FunctionPayload),
    Public(PublicPayload),
}

/// Symbols registered to be notified when this symbol changes, with a
/// reference count per dependent.
///
/// The count tracks multiple references from the same symbol, e.g. a UDT with
/// two fields of the same type holds two registrations that collapse into one
/// entry with count 2; removing one field removes exactly one count.
/// Iteration order is insertion order.
#[derive(Default)]
pub(crate) struct Dependents {
    entries: Vec<(SymbolId, u32)>,
}

impl Dependents {
    pub fn add(&mut self, id: SymbolId) {
        if let Some(entry) = self.entries.iter_mut().find(|(dep, _)| *dep == id) {
            entry.1 += 1;
        } else {
            self.entries.push((id, 1));
        }
    }

    /// Removes one registration of `id`. Unknown ids are ignored.
    pub fn remove(&mut self, id: SymbolId) {
        if let Some(pos) = self.entries.iter().position(|(dep, _)| *dep == id) {
            if self.entries[pos].1 == 1 {
                self.entries.remove(pos);
            } else {
                self.entries[pos].1 -= 1;
            }
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    #[cfg(test)]
    pub fn count(&self, id: SymbolId) -> u32 {
        self.entries
            .iter()
            .find(|(dep, _)| *dep == id)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// One symbol: the shared header plus the kind-specific payload.
pub struct Symbol {
    pub(crate) id: SymbolId,
    pub(crate) parent: SymbolId,
    pub(crate) kind: SymbolKind,
    pub(crate) name: Option<String>,
    pub(crate) qualified_name: Option<String>,
    pub(crate) children: Vec<SymbolId>,
    pub(crate) dependents: Dependents,
    pub(crate) payload: Payload,
}

impl Symbol {
    pub(crate) fn new(
        id: SymbolId,
        parent: SymbolId,
        kind: SymbolKind,
        name: Option<String>,
        qualified_name: Option<String>,
        payload: Payload,
    ) -> Symbol {
        Symbol {
            id,
            parent,
            kind,
            name,
            qualified_name,
            children: Vec::new(),
            dependents: Dependents::default(),
            payload,
        }
    }

    /// The symbol's id.
    pub fn id(&self) -> SymbolId {
        self.id
    }

    /// The id of the parent symbol, or [`SymbolId::NONE`] for roots.
    pub fn parent(&self) -> SymbolId {
        self.parent
    }

    /// The symbol's kind.
    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    /// The short name, if the symbol has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The qualified name, falling back to the short name.
    pub fn qualified_name(&self) -> Option<&str> {
        self.qualified_name.as_deref().or(self.name.as_deref())
    }

    /// The symbol's children, in declaration order.
    pub fn children(&self) -> &[SymbolId] {
        &self.children
    }

    /// The position of `child` within the child list.
    pub fn child_position(&self, child: SymbolId) -> Option<usize> {
        self.children.iter().position(|&c| c == child)
    }

    /// The type payload, or `Unsupported` for non-type symbols.
    pub fn as_type(&self) -> Result<&TypePayload> {
        match &self.payload {
            Payload::Type(t) => Ok(t),
            _ => Err(self.not_a("type")),
        }
    }

    pub(crate) fn as_type_mut(&mut self) -> Result<&mut TypePayload> {
        match &mut self.payload {
            Payload::Type(t) => Ok(t),
            _ => Err(Error::Unsupported("the symbol is not a type".to_string())),
        }
    }

    /// The data payload, or `Unsupported` for symbols that carry no data
    /// location (types, functions, publics).
    pub fn as_data(&self) -> Result<&DataPayload> {
        match &self.payload {
            Payload::Data(d) => Ok(d),
            _ => Err(self.not_a("data symbol")),
        }
    }

    pub(crate) fn as_data_mut(&mut self) -> Result<&mut DataPayload> {
        match &mut self.payload {
            Payload::Data(d) => Ok(d),
            _ => Err(Error::Unsupported(
                "the symbol is not a data symbol".to_string(),
            )),
        }
    }

    /// The function payload, or `Unsupported` for non-function symbols.
    pub fn as_function(&self) -> Result<&FunctionPayload> {
        match &self.payload {
            Payload::Function(f) => Ok(f),
            _ => Err(self.not_a("function")),
        }
    }

    pub(crate) fn as_function_mut(&mut self) -> Result<&mut FunctionPayload> {
        match &mut self.payload {
            Payload::Function(f) => Ok(f),
            _ => Err(Error::Unsupported(
                "the symbol is not a function".to_string(),
            )),
        }
    }

    /// The public payload, or `Unsupported` for non-public symbols.
    pub fn as_public(&self) -> Result<&PublicPayload> {
        match &self.payload {
            Payload::Public(p) => Ok(p),
            _ => Err(self.not_a("public symbol")),
        }
    }

    fn not_a(&self, what: &str) -> Error {
        Error::Unsupported(format!(
            "symbol {:?} ({:?}) is not a {what}",
            self.id, self.kind
        ))
    }
}

impl SymbolStore {
    /// Appends `child` to `parent`'s child list and reruns any layout that
    /// depends on child order.
    pub(crate) fn attach_child(&mut self, parent: SymbolId, child: SymbolId) -> Result<()> {
        self.symbol_mut(parent)?.children.push(child);
        self.notify_dependent_change(parent)
    }

    /// Removes `child` from `parent`'s child list, rerunning layout if it was
    /// present.
    pub(crate) fn detach_child(&mut self, parent: SymbolId, child: SymbolId) -> Result<()> {
        let parent_sym = self.symbol_mut(parent)?;
        if let Some(pos) = parent_sym.child_position(child) {
            parent_sym.children.remove(pos);
            self.notify_dependent_change(parent)?;
        }
        Ok(())
    }

    /// Moves `child` to before position `pos` in its parent's child list.
    ///
    /// When `relative_to` is `None` the position is absolute; otherwise it
    /// counts only children of that kind, so parameters can be reordered
    /// without counting locals. Reordering can change an aggregate's size via
    /// alignment, so dependent layouts rerun.
    pub fn move_child_before(
        &mut self,
        child: SymbolId,
        pos: u64,
        relative_to: Option<SymbolKind>,
    ) -> Result<()> {
        self.update(|store| {
            let parent = store.symbol(child)?.parent;
            let parent_sym = store.symbol(parent)?;

            let idx = parent_sym.child_position(child).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "symbol {child:?} is not a child of its recorded parent"
                ))
            })?;

            let mut new_idx = match relative_to {
                None => pos as usize,
                Some(kind) => {
                    // Find the index of the pos'th child of the given kind;
                    // landing past the end appends.
                    let mut count = 0u64;
                    let mut found = parent_sym.children.len();
                    for (i, &c) in parent_sym.children.iter().enumerate() {
                        if store.try_symbol(c).map(|s| s.kind) == Some(kind) {
                            if count == pos {
                                found = i;
                                break;
                            }
                            count += 1;
                        }
                    }
                    found
                }
            };
            new_idx = new_idx.min(parent_sym.children.len());
            if new_idx > idx {
                new_idx -= 1;
            }

            let parent_sym = store.symbol_mut(parent)?;
            parent_sym.children.remove(idx);
            parent_sym.children.insert(new_idx, child);

            store.notify_dependent_change(parent)?;
            store.mark_symbols_changed();
            Ok(())
        })
    }

    /// Deletes a symbol: children first (recursively), then the dependency
    /// registrations it holds on other symbols, then its entry in its
    /// parent's child list and in the store indexes. The id becomes a
    /// permanent hole.
    pub fn delete_symbol(&mut self, id: SymbolId) -> Result<()> {
        self.update(|store| store.delete_symbol_inner(id))
    }

    pub(crate) fn delete_symbol_inner(&mut self, id: SymbolId) -> Result<()> {
        trace!("deleting symbol {id:?}");

        let children = self.symbol(id)?.children.clone();
        for child in children {
            if self.try_symbol(child).is_some() {
                self.delete_symbol_inner(child)?;
            }
        }
        self.symbol_mut(id)?.children.clear();

        // Children go first: deleting a function's parameters regenerates its
        // signature, and unwiring here disposes of the final generation.
        self.unwire_references(id)?;

        let parent = self.symbol(id)?.parent;
        if !parent.is_none() && self.try_symbol(parent).is_some() {
            self.detach_child(parent, id)?;
        }

        self.unslot_symbol(id)
    }

    /// Runs dependency propagation from `id`: the symbol recomputes its own
    /// derived state, then each registered dependent does the same,
    /// depth-first in registration order. The visited set bounds the walk on
    /// cyclic reference graphs (a UDT containing a pointer to itself); each
    /// symbol recomputes at most once per propagation.
    pub(crate) fn notify_dependent_change(&mut self, id: SymbolId) -> Result<()> {
        let mut visited = Vec::new();
        self.notify_inner(id, &mut visited)
    }

    fn notify_inner(&mut self, id: SymbolId, visited: &mut Vec<SymbolId>) -> Result<()> {
        if visited.contains(&id) {
            return Ok(());
        }
        visited.push(id);

        self.recompute_derived_state(id)?;

        let dependents: Vec<SymbolId> = match self.try_symbol(id) {
            Some(sym) => sym.dependents.ids().collect(),
            None => return Ok(()),
        };
        for dependent in dependents {
            if self.try_symbol(dependent).is_some() {
                self.notify_inner(dependent, visited)?;
            }
        }
        Ok(())
    }
}
