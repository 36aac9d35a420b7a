//! Data symbols: fields and base classes of aggregates, enumerants, global
//! data, and function-scoped variables with their live ranges.

#[cfg(test)]
mod tests;

use crate::location::Location;
use crate::store::SymbolStore;
use crate::sym::{Payload, Symbol, SymbolId, SymbolKind};
use crate::types::TypeKind;
use crate::value::Value;
use crate::{Error, Result};

/// Where a field or base class is placed, as declared by the caller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FieldOffset {
    /// The member sits at this structure-relative offset regardless of
    /// layout.
    At(u64),
    /// The layout pass appends the member at the running offset, aligned for
    /// its type.
    Automatic,
}

/// The declared location slot of a data symbol. The *effective* offset of an
/// automatic member is derived by the layout pass; for an explicit member it
/// equals the declared offset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum DeclaredOffset {
    /// A hard-coded structure-relative or image-relative offset.
    Explicit(u64),
    /// Layout computes the effective offset.
    AutomaticAppend,
    /// A constant value instead of storage.
    ConstantValue,
    /// A constant value assigned by the enum layout pass as the successor of
    /// the previous enumerant.
    AutoIncrement,
    /// No static location; the symbol is a variable located per-PC through
    /// its live ranges.
    Scoped,
}

/// One live range of a function-scoped variable: within the half-open
/// function-relative byte range `[offset, offset + size)` the variable lives
/// at `location`.
#[derive(Clone, Debug)]
pub struct LiveRange {
    /// The handle of the range, unique within its variable.
    pub id: u64,
    /// The function-relative start offset.
    pub offset: u64,
    /// The byte extent of the range.
    pub size: u64,
    /// Where the variable lives within the range.
    pub location: Location,
}

#[derive(Default)]
pub(crate) struct LiveRanges {
    next_id: u64,
    pub(crate) ranges: Vec<LiveRange>,
}

impl LiveRanges {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn find(&self, id: u64) -> Option<usize> {
        self.ranges.iter().position(|r| r.id == id)
    }

    /// Finds the range covering a function-relative offset.
    pub fn at_offset(&self, srel_offset: u64) -> Option<&LiveRange> {
        self.ranges
            .iter()
            .find(|r| srel_offset >= r.offset && srel_offset < r.offset + r.size)
    }
}

/// The payload of a data symbol.
pub struct DataPayload {
    pub(crate) type_id: SymbolId,
    pub(crate) declared: DeclaredOffset,
    pub(crate) actual: Option<u64>,
    pub(crate) value: Value,
    /// For global data: the `(start, size)` extent currently registered in
    /// the store's address-range index.
    pub(crate) range_cache: Option<(u64, u64)>,
    pub(crate) live: LiveRanges,
}

impl DataPayload {
    fn new(type_id: SymbolId, declared: DeclaredOffset, value: Value) -> DataPayload {
        DataPayload {
            type_id,
            declared,
            actual: match declared {
                DeclaredOffset::Explicit(offset) => Some(offset),
                _ => None,
            },
            value,
            range_cache: None,
            live: LiveRanges::default(),
        }
    }

    /// The id of the symbol's type. [`SymbolId::NONE`] only for an untyped
    /// enumerant, which inherits its enum's underlying type.
    pub fn type_id(&self) -> SymbolId {
        self.type_id
    }

    /// Whether the symbol carries a constant value instead of storage.
    pub fn is_constant_value(&self) -> bool {
        matches!(
            self.declared,
            DeclaredOffset::ConstantValue | DeclaredOffset::AutoIncrement
        )
    }

    /// Whether the symbol is an auto-increment enumerant.
    pub fn is_auto_increment(&self) -> bool {
        matches!(self.declared, DeclaredOffset::AutoIncrement)
    }

    /// Whether layout derives this symbol's offset.
    pub fn is_automatic_layout(&self) -> bool {
        matches!(self.declared, DeclaredOffset::AutomaticAppend)
    }

    /// The effective offset, if one has been declared or derived.
    pub fn actual_offset(&self) -> Option<u64> {
        self.actual
    }

    /// The constant value. `Empty` until the enum layout pass has assigned an
    /// auto-increment enumerant its value.
    pub fn value(&self) -> Value {
        self.value
    }

    /// The symbol's live ranges, for parameters and locals.
    pub fn live_ranges(&self) -> &[LiveRange] {
        &self.live.ranges
    }
}

impl SymbolStore {
    fn insert_data_symbol(
        &mut self,
        kind: SymbolKind,
        owner: SymbolId,
        name: Option<&str>,
        qualified_name: Option<&str>,
        payload: DataPayload,
    ) -> Result<SymbolId> {
        let type_id = payload.type_id;
        let id = self.allocate_id();
        let symbol = Symbol::new(
            id,
            owner,
            kind,
            name.map(str::to_string),
            qualified_name.map(str::to_string),
            Payload::Data(payload),
        );
        self.insert_symbol(symbol)?;

        // The dependency chain runs from the member's type to the member, and
        // from the member to its owner: a change to either relays out the
        // owner.
        if !type_id.is_none() {
            self.add_dependent_edge(type_id, id)?;
        }
        if !owner.is_none() {
            self.add_dependent_edge(id, owner)?;
            self.attach_child(owner, id)?;
        }
        Ok(id)
    }

    /// Adds a field to a UDT.
    pub fn add_field(
        &mut self,
        owner: SymbolId,
        name: &str,
        offset: FieldOffset,
        field_type: SymbolId,
    ) -> Result<SymbolId> {
        self.update(|store| {
            store.expect_type(owner)?;
            store.expect_type(field_type)?;
            let declared = match offset {
                FieldOffset::At(o) => DeclaredOffset::Explicit(o),
                FieldOffset::Automatic => DeclaredOffset::AutomaticAppend,
            };
            store.insert_data_symbol(
                SymbolKind::Field,
                owner,
                Some(name),
                None,
                DataPayload::new(field_type, declared, Value::Empty),
            )
        })
    }

    /// Adds a base class to a UDT. Base classes are unnamed and are placed
    /// before fields by the layout pass.
    pub fn add_base_class(
        &mut self,
        owner: SymbolId,
        offset: FieldOffset,
        base_type: SymbolId,
    ) -> Result<SymbolId> {
        self.update(|store| {
            store.expect_type(owner)?;
            store.expect_type(base_type)?;
            let declared = match offset {
                FieldOffset::At(o) => DeclaredOffset::Explicit(o),
                FieldOffset::Automatic => DeclaredOffset::AutomaticAppend,
            };
            store.insert_data_symbol(
                SymbolKind::BaseClass,
                owner,
                None,
                None,
                DataPayload::new(base_type, declared, Value::Empty),
            )
        })
    }

    /// Adds a constant-valued field. An enumerant may pass
    /// [`SymbolId::NONE`] as its type to inherit the enum's underlying type,
    /// and [`Value::Empty`] to be assigned the auto-increment successor value
    /// by the enum layout pass; both are only legal when the owner is an
    /// enum.
    pub fn add_constant_field(
        &mut self,
        owner: SymbolId,
        name: &str,
        field_type: SymbolId,
        value: Value,
    ) -> Result<SymbolId> {
        self.update(|store| {
            let owner_is_enum =
                store.expect_type(owner)?.as_type()?.type_kind() == TypeKind::Enum;

            if field_type.is_none() {
                if !owner_is_enum {
                    return Err(Error::InvalidArgument(
                        "only an enumerant may omit its type".to_string(),
                    ));
                }
            } else {
                store.expect_type(field_type)?;
            }
            if value.is_empty() {
                if !field_type.is_none() || !owner_is_enum {
                    return Err(Error::InvalidArgument(
                        "only an enumerant may defer its value to enum layout".to_string(),
                    ));
                }
            }

            let declared = if value.is_empty() {
                DeclaredOffset::AutoIncrement
            } else {
                DeclaredOffset::ConstantValue
            };
            store.insert_data_symbol(
                SymbolKind::Field,
                owner,
                Some(name),
                None,
                DataPayload::new(field_type, declared, value),
            )
        })
    }

    /// Adds an enumerant. `None` makes it auto-increment: its value becomes
    /// the successor of the previous enumerant's (0 for the first).
    pub fn add_enumerant(
        &mut self,
        owner: SymbolId,
        name: &str,
        value: Option<Value>,
    ) -> Result<SymbolId> {
        self.add_constant_field(owner, name, SymbolId::NONE, value.unwrap_or(Value::Empty))
    }

    /// Creates a global data symbol at a module-relative offset. Its extent
    /// `[offset, offset + type size)` is registered in the address-range
    /// index and follows any type-size change.
    pub fn create_global_data(
        &mut self,
        name: &str,
        qualified_name: Option<&str>,
        offset: u64,
        data_type: SymbolId,
    ) -> Result<SymbolId> {
        self.update(|store| {
            let size = store.expect_type(data_type)?.as_type()?.size();
            let id = store.insert_data_symbol(
                SymbolKind::Data,
                SymbolId::NONE,
                Some(name),
                qualified_name,
                DataPayload::new(data_type, DeclaredOffset::Explicit(offset), Value::Empty),
            )?;
            store.ranges.add(offset, offset + size, id);
            store.symbol_mut(id)?.as_data_mut()?.range_cache = Some((offset, size));
            Ok(id)
        })
    }

    /// Adds a parameter to a function, after any existing parameters'
    /// declaration positions. Adding a parameter regenerates the function's
    /// type.
    pub fn add_parameter(
        &mut self,
        function: SymbolId,
        name: &str,
        param_type: SymbolId,
    ) -> Result<SymbolId> {
        self.create_variable(SymbolKind::DataParameter, function, name, param_type)
    }

    /// Adds a local variable to a function.
    pub fn add_local(
        &mut self,
        function: SymbolId,
        name: &str,
        local_type: SymbolId,
    ) -> Result<SymbolId> {
        self.create_variable(SymbolKind::DataLocal, function, name, local_type)
    }

    fn create_variable(
        &mut self,
        kind: SymbolKind,
        function: SymbolId,
        name: &str,
        var_type: SymbolId,
    ) -> Result<SymbolId> {
        self.update(|store| {
            if store.symbol(function)?.kind() != SymbolKind::Function {
                return Err(Error::InvalidArgument(format!(
                    "symbol {function:?} is not a function"
                )));
            }
            store.expect_type(var_type)?;
            store.insert_data_symbol(
                kind,
                function,
                Some(name),
                None,
                DataPayload::new(var_type, DeclaredOffset::Scoped, Value::Empty),
            )
        })
    }

    /// The resolved location of a data symbol. Parameters and locals have no
    /// static location; resolve them through a scope instead.
    pub fn data_location(&self, id: SymbolId) -> Result<Location> {
        let symbol = self.symbol(id)?;
        let data = symbol.as_data()?;

        if data.is_constant_value() {
            return Ok(Location::ConstantValue);
        }
        match symbol.kind() {
            SymbolKind::Data => Ok(Location::ImageOffset(data.actual.ok_or_else(|| {
                Error::InvalidState("global data has no offset".to_string())
            })?)),
            SymbolKind::DataParameter | SymbolKind::DataLocal => Err(Error::InvalidState(
                "a variable's location varies by program counter; resolve it through a scope"
                    .to_string(),
            )),
            _ => Ok(Location::StructureRelative(data.actual.ok_or_else(
                || Error::InvalidState("layout has not assigned the member an offset".to_string()),
            )?)),
        }
    }

    /// Changes a data symbol's type, rewiring the dependency edge from the
    /// old type to the new one and rerunning dependent layout.
    pub fn set_data_type(&mut self, id: SymbolId, new_type: SymbolId) -> Result<()> {
        self.update(|store| {
            let old_type = store.symbol(id)?.as_data()?.type_id;
            if old_type == new_type {
                return Ok(());
            }
            store.expect_type(new_type)?;

            store.remove_dependent_edge(old_type, id);
            store.add_dependent_edge(new_type, id)?;
            store.symbol_mut(id)?.as_data_mut()?.type_id = new_type;

            store.notify_dependent_change(id)?;
            store.mark_symbols_changed();
            Ok(())
        })
    }

    /// Changes a member's declared offset (or returns it to automatic
    /// layout). Constant-valued symbols have no offset; in particular an
    /// auto-increment enumerant's value slot cannot be turned into an offset.
    pub fn set_data_offset(&mut self, id: SymbolId, offset: FieldOffset) -> Result<()> {
        self.update(|store| {
            let symbol = store.symbol(id)?;
            if symbol.kind() == SymbolKind::Data && matches!(offset, FieldOffset::Automatic) {
                return Err(Error::InvalidArgument(
                    "global data requires an explicit offset".to_string(),
                ));
            }
            let data = symbol.as_data()?;
            if data.is_constant_value() || matches!(data.declared, DeclaredOffset::Scoped) {
                return Err(Error::InvalidState(
                    "the symbol has no offset to set".to_string(),
                ));
            }

            let declared = match offset {
                FieldOffset::At(o) => DeclaredOffset::Explicit(o),
                FieldOffset::Automatic => DeclaredOffset::AutomaticAppend,
            };
            if data.declared == declared {
                return Ok(());
            }

            let payload = store.symbol_mut(id)?.as_data_mut()?;
            payload.declared = declared;
            payload.actual = match declared {
                DeclaredOffset::Explicit(o) => Some(o),
                _ => None,
            };

            store.notify_dependent_change(id)?;
            store.mark_symbols_changed();
            Ok(())
        })
    }

    /// Changes a constant-valued symbol's value. Assigning a concrete value
    /// to an auto-increment enumerant makes it explicit and restarts the
    /// enum's run from it.
    pub fn set_data_value(&mut self, id: SymbolId, value: Value) -> Result<()> {
        self.update(|store| {
            if value.is_empty() {
                return Err(Error::InvalidArgument(
                    "a constant value cannot be set to empty".to_string(),
                ));
            }
            let data = store.symbol(id)?.as_data()?;
            if !data.is_constant_value() {
                return Err(Error::InvalidState(
                    "the symbol does not carry a constant value".to_string(),
                ));
            }

            let payload = store.symbol_mut(id)?.as_data_mut()?;
            payload.declared = DeclaredOffset::ConstantValue;
            payload.value = value;

            store.notify_dependent_change(id)?;
            store.mark_symbols_changed();
            Ok(())
        })
    }

    /// Re-registers a global's address range after its offset or type size
    /// changed.
    pub(crate) fn recache_global_range(&mut self, id: SymbolId) -> Result<()> {
        let (type_id, cached, start) = {
            let data = self.symbol(id)?.as_data()?;
            if data.is_constant_value() {
                return Ok(());
            }
            (data.type_id, data.range_cache, data.actual)
        };
        let start = match start {
            Some(s) => s,
            None => return Ok(()),
        };
        let size = self.expect_type(type_id)?.as_type()?.size();

        if cached == Some((start, size)) {
            return Ok(());
        }
        if let Some((old_start, old_size)) = cached {
            self.ranges.remove(old_start, old_start + old_size, id);
        }
        self.ranges.add(start, start + size, id);
        self.symbol_mut(id)?.as_data_mut()?.range_cache = Some((start, size));
        Ok(())
    }

    //
    // Live ranges.
    //

    fn expect_variable(&self, id: SymbolId) -> Result<&Symbol> {
        let symbol = self.symbol(id)?;
        if !symbol.kind().is_variable() {
            return Err(Error::Unsupported(format!(
                "symbol {id:?} is not a parameter or local"
            )));
        }
        Ok(symbol)
    }

    /// Checks that `[offset, offset + size)` stays inside the owning
    /// function's primary range and does not overlap any live range of the
    /// variable other than `ignore_range`.
    fn validate_live_range(
        &self,
        variable: SymbolId,
        offset: u64,
        size: u64,
        ignore_range: u64,
    ) -> Result<()> {
        let symbol = self.expect_variable(variable)?;
        let function = self.symbol(symbol.parent())?.as_function()?;
        let function_size = function.ranges().first().map(|&(_, s)| s).unwrap_or(0);

        let end = offset
            .checked_add(size)
            .ok_or_else(|| Error::InvalidArgument("live range extent overflows".to_string()))?;
        if size == 0 || end > function_size {
            return Err(Error::InvalidArgument(format!(
                "live range [{offset:#x}, {end:#x}) lies outside the function"
            )));
        }

        let data = symbol.as_data()?;
        for range in &data.live.ranges {
            if range.id == ignore_range {
                continue;
            }
            if offset < range.offset + range.size && range.offset < end {
                return Err(Error::InvalidArgument(format!(
                    "live range [{offset:#x}, {end:#x}) overlaps range {}",
                    range.id
                )));
            }
        }
        Ok(())
    }

    /// Adds a live range to a parameter or local and returns its handle.
    pub fn add_live_range(
        &mut self,
        variable: SymbolId,
        offset: u64,
        size: u64,
        location: Location,
    ) -> Result<u64> {
        self.update(|store| {
            store.validate_live_range(variable, offset, size, 0)?;
            let live = &mut store.symbol_mut(variable)?.as_data_mut()?.live;
            let id = live.allocate();
            live.ranges.push(LiveRange {
                id,
                offset,
                size,
                location,
            });
            store.mark_symbols_changed();
            Ok(id)
        })
    }

    /// The live ranges of a parameter or local, in creation order.
    pub fn live_ranges(&self, variable: SymbolId) -> Result<&[LiveRange]> {
        Ok(self.expect_variable(variable)?.as_data()?.live_ranges())
    }

    /// Moves a live range. Keeping the current offset is a no-op success.
    pub fn set_live_range_offset(
        &mut self,
        variable: SymbolId,
        range: u64,
        offset: u64,
    ) -> Result<()> {
        self.update(|store| {
            let (idx, size, old_offset) = store.find_live_range(variable, range)?;
            if old_offset == offset {
                return Ok(());
            }
            store.validate_live_range(variable, offset, size, range)?;
            store.symbol_mut(variable)?.as_data_mut()?.live.ranges[idx].offset = offset;
            store.mark_symbols_changed();
            Ok(())
        })
    }

    /// Resizes a live range. Keeping the current size is a no-op success.
    pub fn set_live_range_size(
        &mut self,
        variable: SymbolId,
        range: u64,
        size: u64,
    ) -> Result<()> {
        self.update(|store| {
            let (idx, old_size, offset) = store.find_live_range(variable, range)?;
            if old_size == size {
                return Ok(());
            }
            store.validate_live_range(variable, offset, size, range)?;
            store.symbol_mut(variable)?.as_data_mut()?.live.ranges[idx].size = size;
            store.mark_symbols_changed();
            Ok(())
        })
    }

    /// Changes where the variable lives within a range.
    pub fn set_live_range_location(
        &mut self,
        variable: SymbolId,
        range: u64,
        location: Location,
    ) -> Result<()> {
        self.update(|store| {
            let (idx, _, _) = store.find_live_range(variable, range)?;
            store.symbol_mut(variable)?.as_data_mut()?.live.ranges[idx].location = location;
            store.mark_symbols_changed();
            Ok(())
        })
    }

    /// Deletes one live range.
    pub fn delete_live_range(&mut self, variable: SymbolId, range: u64) -> Result<()> {
        self.update(|store| {
            let (idx, _, _) = store.find_live_range(variable, range)?;
            store
                .symbol_mut(variable)?
                .as_data_mut()?
                .live
                .ranges
                .remove(idx);
            store.mark_symbols_changed();
            Ok(())
        })
    }

    /// Deletes every live range of a variable.
    pub fn delete_all_live_ranges(&mut self, variable: SymbolId) -> Result<()> {
        self.update(|store| {
            store.expect_variable(variable)?;
            let live = &mut store.symbol_mut(variable)?.as_data_mut()?.live;
            if !live.ranges.is_empty() {
                live.ranges.clear();
                store.mark_symbols_changed();
            }
            Ok(())
        })
    }

    fn find_live_range(&self, variable: SymbolId, range: u64) -> Result<(usize, u64, u64)> {
        let data = self.expect_variable(variable)?.as_data()?;
        let idx = data
            .live
            .find(range)
            .ok_or_else(|| Error::NotFound(format!("variable has no live range {range}")))?;
        let r = &data.live.ranges[idx];
        Ok((idx, r.size, r.offset))
    }
}
