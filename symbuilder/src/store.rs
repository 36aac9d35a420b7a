//! The symbol store: the in-memory symbol set for one module.
//!
//! The store owns every symbol for the module in a dense arena indexed by
//! [`SymbolId`], plus the qualified-name map for globals, the address-range
//! and public-address indexes, the scope-binding table, and the optional
//! on-demand importer. Symbols are constructed at runtime by the creation
//! APIs (or by the importer) and queried by the host as if they were
//! conventional debug information.


use crate::import::SymbolImporter;
use crate::location::{self, Location};
use crate::ranges::{PublicAddressList, SymbolRangeList};
use crate::sym::{Payload, Symbol, SymbolId, SymbolKind};
use crate::types::{IntrinsicKind, PointerKind, TypeKind};
use crate::{Error, Result};
use std::rc::Rc;
use symsvc::{Architecture, CacheInvalidation, EventSink, Module};
use tracing::{debug, warn};

/// The mutable symbol set for one module.
pub struct SymbolStore {
    pub(crate) module: Rc<dyn Module>,
    pub(crate) arch: Rc<dyn Architecture>,
    event_sink: Option<Rc<dyn EventSink>>,

    /// The last id handed out. Ids are dense, start at 1, and are never
    /// reused; deleting a symbol leaves a permanent hole in `symbols`.
    next_id: u64,

    /// The master index of all symbols by id. Slot 0 is always vacant.
    symbols: Vec<Option<Symbol>>,

    /// Ids of global symbols, in creation order.
    globals: Vec<SymbolId>,

    /// Qualified name -> id for global symbols. First registration wins; the
    /// entry is removed when that symbol is deleted.
    name_map: std::collections::HashMap<String, SymbolId>,

    /// Address ranges of functions and global data.
    pub(crate) ranges: SymbolRangeList,

    /// Exact addresses of public symbols.
    pub(crate) publics: PublicAddressList,

    /// Scope bindings: (variable id, module-relative offset) pairs indexed by
    /// scope-bound handles.
    pub(crate) scope_bindings: Vec<(SymbolId, u64)>,

    importer: Option<Box<dyn SymbolImporter>>,

    demand_create_pointer_types: bool,
    demand_create_array_types: bool,

    update_depth: u32,
    invalidation_pending: bool,
    cache_invalidation_disabled: bool,
}

impl std::fmt::Debug for SymbolStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolStore").finish_non_exhaustive()
    }
}

impl SymbolStore {
    /// Creates a symbol store for `module`, optionally seeded with the basic
    /// C types.
    pub fn new(
        module: Rc<dyn Module>,
        arch: Rc<dyn Architecture>,
        event_sink: Option<Rc<dyn EventSink>>,
        add_basic_c_types: bool,
    ) -> Result<SymbolStore> {
        let mut store = SymbolStore {
            module,
            arch,
            event_sink,
            next_id: 0,
            symbols: vec![None],
            globals: Vec::new(),
            name_map: std::collections::HashMap::new(),
            ranges: SymbolRangeList::new(),
            publics: PublicAddressList::new(),
            scope_bindings: Vec::new(),
            importer: None,
            demand_create_pointer_types: true,
            demand_create_array_types: true,
            update_depth: 0,
            invalidation_pending: false,
            cache_invalidation_disabled: false,
        };
        if add_basic_c_types {
            store.add_basic_c_types()?;
        }
        Ok(store)
    }

    /// The module this store describes.
    pub fn module(&self) -> &Rc<dyn Module> {
        &self.module
    }

    /// The size in bytes of a pointer in this module.
    pub fn pointer_size(&self) -> u64 {
        self.arch.pointer_size()
    }

    //
    // Arena management.
    //

    /// Reserves the next id without slotting a symbol. The reservation is
    /// permanent; an unused reservation becomes a hole.
    pub(crate) fn allocate_id(&mut self) -> SymbolId {
        self.next_id += 1;
        SymbolId(self.next_id)
    }

    /// Slots a freshly built symbol under its pre-allocated id and indexes it
    /// if global.
    pub(crate) fn insert_symbol(&mut self, symbol: Symbol) -> Result<SymbolId> {
        let id = symbol.id;
        if id.is_none() || id.is_scope_bound() {
            return Err(Error::InvalidArgument(format!(
                "{id:?} is not a valid symbol id"
            )));
        }

        if self.symbols.len() <= id.0 as usize {
            self.symbols.resize_with(id.0 as usize + 1, || None);
        }
        if self.symbols[id.0 as usize].is_some() {
            return Err(Error::InvalidArgument(format!("{id:?} is already in use")));
        }

        if symbol.kind.is_global() {
            self.globals.push(id);
            if let Some(qualified) = symbol.qualified_name() {
                self.name_map.entry(qualified.to_string()).or_insert(id);
            }
        }

        self.symbols[id.0 as usize] = Some(symbol);
        self.mark_symbols_changed();
        Ok(id)
    }

    /// Clears a symbol's arena slot and its global indexing. The id becomes a
    /// permanent hole.
    pub(crate) fn unslot_symbol(&mut self, id: SymbolId) -> Result<()> {
        let symbol = self
            .symbols
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or_else(|| Error::NotFound(format!("no symbol with id {id:?}")))?;

        if symbol.kind.is_global() {
            if let Some(pos) = self.globals.iter().position(|&g| g == id) {
                self.globals.remove(pos);
            }
            if let Some(qualified) = symbol.qualified_name() {
                if self.name_map.get(qualified) == Some(&id) {
                    self.name_map.remove(qualified);
                }
            }
        }

        self.mark_symbols_changed();
        Ok(())
    }

    /// Looks up a symbol by id. Scope-bound handles do not resolve here; use
    /// [`SymbolStore::resolve_symbol`].
    pub fn symbol(&self, id: SymbolId) -> Result<&Symbol> {
        self.try_symbol(id)
            .ok_or_else(|| Error::NotFound(format!("no symbol with id {id:?}")))
    }

    pub(crate) fn symbol_mut(&mut self, id: SymbolId) -> Result<&mut Symbol> {
        match self.symbols.get_mut(id.0 as usize) {
            Some(Some(sym)) if !id.is_scope_bound() => Ok(sym),
            _ => Err(Error::NotFound(format!("no symbol with id {id:?}"))),
        }
    }

    /// Looks up a symbol by id, returning `None` for holes and out-of-range
    /// ids.
    pub fn try_symbol(&self, id: SymbolId) -> Option<&Symbol> {
        if id.is_scope_bound() {
            return None;
        }
        self.symbols.get(id.0 as usize)?.as_ref()
    }

    /// Verifies `id` exists and is a type symbol.
    pub(crate) fn expect_type(&self, id: SymbolId) -> Result<&Symbol> {
        let symbol = self.symbol(id)?;
        if symbol.kind != SymbolKind::Type {
            return Err(Error::InvalidArgument(format!(
                "symbol {id:?} is not a type"
            )));
        }
        Ok(symbol)
    }

    //
    // Dependency edges.
    //

    /// Registers `dependent` for change notification from `source`, once per
    /// call.
    pub(crate) fn add_dependent_edge(
        &mut self,
        source: SymbolId,
        dependent: SymbolId,
    ) -> Result<()> {
        self.symbol_mut(source)?.dependents.add(dependent);
        Ok(())
    }

    /// Removes exactly one registration of `dependent` from `source`. A
    /// vanished source is fine; its edges died with it.
    pub(crate) fn remove_dependent_edge(&mut self, source: SymbolId, dependent: SymbolId) {
        if let Ok(sym) = self.symbol_mut(source) {
            sym.dependents.remove(dependent);
        }
    }

    /// The per-kind recomputation step run at each node during dependency
    /// propagation, before the node's own dependents are visited.
    pub(crate) fn recompute_derived_state(&mut self, id: SymbolId) -> Result<()> {
        enum Recompute {
            Nothing,
            UdtLayout,
            ArrayExtent,
            TypedefForward,
            EnumLayout,
            GlobalRange,
            FunctionSignature,
        }

        let action = match self.try_symbol(id) {
            None => return Ok(()),
            Some(symbol) => match (&symbol.payload, symbol.kind) {
                (Payload::Type(t), _) => match t.type_kind() {
                    TypeKind::Udt => Recompute::UdtLayout,
                    TypeKind::Array => Recompute::ArrayExtent,
                    TypeKind::Typedef => Recompute::TypedefForward,
                    TypeKind::Enum => Recompute::EnumLayout,
                    TypeKind::Intrinsic | TypeKind::Pointer | TypeKind::Function => {
                        Recompute::Nothing
                    }
                },
                (Payload::Data(_), SymbolKind::Data) => Recompute::GlobalRange,
                (Payload::Data(_), _) => Recompute::Nothing,
                (Payload::Function(_), _) => Recompute::FunctionSignature,
                (Payload::Public(_), _) => Recompute::Nothing,
            },
        };

        match action {
            Recompute::Nothing => Ok(()),
            Recompute::UdtLayout => self.layout_udt(id),
            Recompute::ArrayExtent => self.refresh_array(id),
            Recompute::TypedefForward => self.refresh_typedef(id),
            Recompute::EnumLayout => self.layout_enum(id),
            Recompute::GlobalRange => self.recache_global_range(id),
            Recompute::FunctionSignature => self.regenerate_function_type(id),
        }
    }

    /// Drops every registration this symbol holds on other symbols and every
    /// store-index entry derived from its payload.
    pub(crate) fn unwire_references(&mut self, id: SymbolId) -> Result<()> {
        enum Unwire {
            Edges(Vec<SymbolId>),
            Data {
                type_id: SymbolId,
                range: Option<(u64, u64)>,
            },
            Function {
                return_type: SymbolId,
                function_type: SymbolId,
                ranges: Vec<(u64, u64)>,
            },
            Public(u64),
        }

        let plan = {
            let symbol = self.symbol(id)?;
            match &symbol.payload {
                Payload::Type(t) => Unwire::Edges(t.referenced_types()),
                Payload::Data(d) => Unwire::Data {
                    type_id: d.type_id(),
                    range: if symbol.kind == SymbolKind::Data {
                        d.range_cache
                    } else {
                        None
                    },
                },
                Payload::Function(f) => Unwire::Function {
                    return_type: f.return_type(),
                    function_type: f.function_type(),
                    ranges: f.ranges().to_vec(),
                },
                Payload::Public(p) => Unwire::Public(p.offset()),
            }
        };

        match plan {
            Unwire::Edges(sources) => {
                for source in sources {
                    self.remove_dependent_edge(source, id);
                }
            }
            Unwire::Data { type_id, range } => {
                if !type_id.is_none() {
                    self.remove_dependent_edge(type_id, id);
                }
                if let Some((start, size)) = range {
                    self.ranges.remove(start, start + size, id);
                }
            }
            Unwire::Function {
                return_type,
                function_type,
                ranges,
            } => {
                self.remove_dependent_edge(return_type, id);
                for (offset, size) in ranges {
                    self.ranges.remove(offset, offset + size, id);
                }
                if self.try_symbol(function_type).is_some() {
                    self.delete_symbol_inner(function_type)?;
                }
            }
            Unwire::Public(offset) => {
                self.publics.remove(offset, id);
            }
        }
        Ok(())
    }

    //
    // Cache invalidation.
    //

    pub(crate) fn begin_update(&mut self) {
        self.update_depth += 1;
    }

    pub(crate) fn end_update(&mut self) {
        self.update_depth -= 1;
        if self.update_depth == 0 && self.invalidation_pending {
            self.invalidation_pending = false;
            self.publish_cache_invalidation();
        }
    }

    /// Runs `f` as one outer mutation: however many symbols it touches, at
    /// most one cache-invalidation event is published, after `f` and all of
    /// its dependency propagation complete.
    pub(crate) fn update<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.begin_update();
        let result = f(self);
        self.end_update();
        result
    }

    /// Records that projected symbol identity, layout, or address mapping may
    /// have changed. Publication happens when the outermost update scope
    /// closes.
    pub(crate) fn mark_symbols_changed(&mut self) {
        if self.update_depth == 0 {
            self.publish_cache_invalidation();
        } else {
            self.invalidation_pending = true;
        }
    }

    fn publish_cache_invalidation(&mut self) {
        if self.cache_invalidation_disabled {
            return;
        }
        if let Some(sink) = &self.event_sink {
            let event = CacheInvalidation {
                process: self.module.containing_process_key(),
                module: self.module.key(),
            };
            debug!("publishing symbol cache invalidation for {:?}", event.module);
            sink.symbol_cache_invalidate(&event);
        }
    }

    /// Turns publication of cache-invalidation events off or back on.
    pub fn set_cache_invalidation_disabled(&mut self, disabled: bool) {
        self.cache_invalidation_disabled = disabled;
    }

    //
    // Importer attachment.
    //

    /// Attaches an on-demand importer. Its `connect` must already have
    /// succeeded; a store never connects or discards importers itself.
    pub fn set_importer(&mut self, importer: Box<dyn SymbolImporter>) {
        self.importer = Some(importer);
    }

    /// Whether an importer is attached.
    pub fn has_importer(&self) -> bool {
        self.importer.is_some()
    }

    /// Gives the importer a chance to materialize symbols for a name query.
    /// Import failures are logged and swallowed; they must not fail the
    /// enclosing query.
    pub(crate) fn consult_importer_for_name(
        &mut self,
        kind: Option<SymbolKind>,
        name: Option<&str>,
    ) {
        if let Some(mut importer) = self.importer.take() {
            self.begin_update();
            let result = importer.import_for_name(self, kind, name);
            self.importer = Some(importer);
            self.end_update();
            if let Err(err) = result {
                warn!("on-demand import for name {name:?} failed: {err}");
            }
        }
    }

    /// Gives the importer a chance to materialize symbols for an offset
    /// query. Import failures are logged and swallowed.
    pub(crate) fn consult_importer_for_offset(&mut self, kind: Option<SymbolKind>, offset: u64) {
        if let Some(mut importer) = self.importer.take() {
            self.begin_update();
            let result = importer.import_for_offset(self, kind, offset);
            self.importer = Some(importer);
            self.end_update();
            if let Err(err) = result {
                warn!("on-demand import for offset {offset:#x} failed: {err}");
            }
        }
    }

    //
    // Demand creation configuration.
    //

    /// Allows or forbids demand creation of pointer types by
    /// [`SymbolStore::find_type_by_name`].
    pub fn set_demand_create_pointer_types(&mut self, enable: bool) {
        self.demand_create_pointer_types = enable;
    }

    /// Allows or forbids demand creation of array types by
    /// [`SymbolStore::find_type_by_name`].
    pub fn set_demand_create_array_types(&mut self, enable: bool) {
        self.demand_create_array_types = enable;
    }

    //
    // Seeding.
    //

    /// Seeds the store with the basic C type set.
    pub fn add_basic_c_types(&mut self) -> Result<()> {
        self.update(|store| {
            store.add_basic_type("void", IntrinsicKind::Void, 0)?;
            store.add_basic_type("bool", IntrinsicKind::Bool, 1)?;
            store.add_basic_type("char", IntrinsicKind::Char, 1)?;
            store.add_basic_type("unsigned char", IntrinsicKind::UInt, 1)?;
            store.add_basic_type("wchar_t", IntrinsicKind::WChar, 2)?;
            store.add_basic_type("short", IntrinsicKind::Int, 2)?;
            store.add_basic_type("unsigned short", IntrinsicKind::UInt, 2)?;
            store.add_basic_type("int", IntrinsicKind::Int, 4)?;
            store.add_basic_type("unsigned int", IntrinsicKind::UInt, 4)?;
            store.add_basic_type("__int64", IntrinsicKind::Int, 8)?;
            store.add_basic_type("unsigned __int64", IntrinsicKind::UInt, 8)?;
            store.add_basic_type("long", IntrinsicKind::Long, 4)?;
            store.add_basic_type("unsigned long", IntrinsicKind::ULong, 4)?;
            store.add_basic_type("float", IntrinsicKind::Float, 4)?;
            store.add_basic_type("double", IntrinsicKind::Float, 8)?;
            Ok(())
        })
    }

    //
    // Queries.
    //

    /// Looks up a global symbol by qualified name, consulting the importer
    /// first.
    pub fn find_symbol_by_name(&mut self, name: &str) -> Result<SymbolId> {
        self.consult_importer_for_name(None, Some(name));
        self.lookup_name(name)
    }

    /// Looks up a global symbol by qualified name without consulting the
    /// importer.
    pub(crate) fn lookup_name(&self, name: &str) -> Result<SymbolId> {
        self.name_map
            .get(name)
            .copied()
            .filter(|id| self.try_symbol(*id).is_some())
            .ok_or_else(|| Error::NotFound(format!("no symbol named {name:?}")))
    }

    /// The module-relative offset of an addressed symbol (the primary range
    /// start for functions), or `None` for symbols without one.
    pub(crate) fn addressed_symbol_offset(&self, id: SymbolId) -> Option<u64> {
        let symbol = self.try_symbol(id)?;
        match &symbol.payload {
            Payload::Function(f) => Some(f.ranges().first()?.0),
            Payload::Data(d) => d.actual_offset(),
            Payload::Public(p) => Some(p.offset()),
            Payload::Type(_) => None,
        }
    }

    /// Finds every symbol at `offset`: symbols whose address range covers the
    /// offset, plus publics (the nearest at-or-below address, or the exact
    /// address under `exact`). The importer is consulted first. With `exact`,
    /// only symbols whose own offset equals `offset` are returned.
    pub fn find_symbols_by_offset(&mut self, offset: u64, exact: bool) -> Result<Vec<SymbolId>> {
        self.consult_importer_for_offset(None, offset);

        let mut found: Vec<SymbolId> = Vec::new();
        if let Some(covering) = self.ranges.find(offset) {
            for &id in covering {
                if !exact || self.addressed_symbol_offset(id) == Some(offset) {
                    found.push(id);
                }
            }
        }
        if let Some((address, publics)) = self.publics.find_nearest(offset) {
            if !exact || address == offset {
                found.extend_from_slice(publics);
            }
        }

        if found.is_empty() {
            Err(Error::NotFound(format!("no symbol at offset {offset:#x}")))
        } else {
            Ok(found)
        }
    }

    /// Finds the nearest symbol at `offset` together with the delta from the
    /// symbol's own offset. With `exact`, only a symbol exactly at `offset`
    /// is returned.
    pub fn find_symbol_by_offset(&mut self, offset: u64, exact: bool) -> Result<(SymbolId, u64)> {
        let found = self.find_symbols_by_offset(offset, exact)?;
        let id = found[0];
        let symbol_offset = self.addressed_symbol_offset(id).ok_or_else(|| {
            Error::NotFound(format!("no addressed symbol at offset {offset:#x}"))
        })?;
        Ok((id, offset - symbol_offset))
    }

    /// Finds a type by name, demand-creating pointer and array types when
    /// `allow_auto_creations` permits: a trailing `*`, `&`, `&&`, or `^`
    /// resolves the base name and synthesizes a pointer of the matching kind;
    /// a trailing `[N]` synthesizes an array of dimension `N`.
    pub fn find_type_by_name(
        &mut self,
        type_name: &str,
        allow_auto_creations: bool,
    ) -> Result<SymbolId> {
        if let Some(&id) = self.name_map.get(type_name) {
            let symbol = self.symbol(id)?;
            if symbol.kind != SymbolKind::Type {
                return Err(Error::InvalidArgument(format!(
                    "{type_name:?} names a non-type symbol"
                )));
            }
            return Ok(id);
        }
        if !allow_auto_creations {
            return Err(Error::NotFound(format!("no type named {type_name:?}")));
        }

        let not_found = || Error::NotFound(format!("no type named {type_name:?}"));

        match type_name.chars().last() {
            Some(suffix @ ('*' | '&' | '^')) => {
                if !self.demand_create_pointer_types {
                    return Err(not_found());
                }

                let mut base = &type_name[..type_name.len() - 1];
                let pointer_kind = match suffix {
                    '&' if base.ends_with('&') => {
                        base = &base[..base.len() - 1];
                        PointerKind::RValueReference
                    }
                    '&' => PointerKind::Reference,
                    '^' => PointerKind::CXHat,
                    _ => PointerKind::Standard,
                };

                let base = base.trim_end();
                if base.is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "{type_name:?} has no base type name"
                    )));
                }

                let pointee = self.find_type_by_name(base, allow_auto_creations)?;
                self.create_pointer_type(pointee, pointer_kind)
            }

            Some(']') => {
                if !self.demand_create_array_types {
                    return Err(not_found());
                }

                let open = type_name.rfind('[').ok_or_else(|| {
                    Error::InvalidArgument(format!("{type_name:?} has an unmatched ']'"))
                })?;
                let digits = &type_name[open + 1..type_name.len() - 1];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(Error::InvalidArgument(format!(
                        "{type_name:?} has a malformed array dimension"
                    )));
                }
                let dimension: u64 = digits.parse().map_err(|_| {
                    Error::InvalidArgument(format!("array dimension in {type_name:?} is too large"))
                })?;

                let base = &type_name[..open];
                if base.is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "{type_name:?} has no base type name"
                    )));
                }

                let element = self.find_type_by_name(base, allow_auto_creations)?;
                self.create_array_type(element, dimension)
            }

            _ => Err(not_found()),
        }
    }

    /// Iterates every live symbol in the store, skipping holes.
    pub fn all_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter_map(|slot| slot.as_ref())
    }

    /// Ids of global symbols in creation order.
    pub fn global_symbols(&self) -> &[SymbolId] {
        &self.globals
    }

    /// Parses a location descriptor against this module's architecture.
    pub fn parse_location(&self, text: &str) -> Result<Location> {
        location::parse_location(text, &*self.arch)
    }

    /// Formats a location descriptor against this module's architecture.
    pub fn location_to_string(&self, loc: &Location) -> Result<String> {
        location::location_to_string(loc, &*self.arch)
    }
}
