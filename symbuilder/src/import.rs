//! On-demand symbol import.
//!
//! An importer lazily copies symbols from an external source (a symbol
//! server, another debugger's symbol set) into the store the first time a
//! query asks for a name or offset it has not seen. [`SymbolImporter`] is
//! the interface a store consults; [`OnDemandImporter`] is the concrete
//! implementation over any [`ImportSource`], memoizing what it has already
//! imported so repeated queries are cheap and idempotent.

#[cfg(test)]
mod tests;

use crate::data::FieldOffset;
use crate::store::SymbolStore;
use crate::sym::{SymbolId, SymbolKind};
use crate::types::PointerKind;
use crate::value::Value;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, trace};

/// What an import call accomplished.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ImportOutcome {
    /// The source was consulted and matching symbols were copied in.
    Imported,
    /// The necessary imports had already happened; nothing was done.
    AlreadySatisfied,
}

/// An on-demand symbol importer, as consulted by a store's name and offset
/// queries.
///
/// Implementations must not publish cache-invalidation events per imported
/// symbol; the store batches them and emits one at the end of the triggering
/// query.
pub trait SymbolImporter {
    /// Establishes the session with the underlying source. An importer whose
    /// `connect` fails is discarded, never attached.
    fn connect(&mut self) -> Result<()>;

    /// Releases the underlying session.
    fn disconnect(&mut self);

    /// Ensures every symbol in the source whose address covers `offset` (and
    /// whose kind matches, if one is given) has been copied into `store`.
    fn import_for_offset(
        &mut self,
        store: &mut SymbolStore,
        kind: Option<SymbolKind>,
        offset: u64,
    ) -> Result<ImportOutcome>;

    /// Ensures every symbol in the source with a matching name (and kind, if
    /// given) has been copied into `store`. A `None` name requests a full
    /// import, which implementations are permitted to refuse.
    fn import_for_name(
        &mut self,
        store: &mut SymbolStore,
        kind: Option<SymbolKind>,
        name: Option<&str>,
    ) -> Result<ImportOutcome>;
}

/// Identifies a record in an external source.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordId(pub u64);

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R#{}", self.0)
    }
}

/// One member of an external UDT record.
#[derive(Clone, Debug)]
pub enum MemberRecord {
    /// A base class at a declared offset.
    BaseClass {
        /// The structure-relative offset of the base class subobject.
        offset: u64,
        /// The base class type.
        base_type: RecordId,
    },
    /// A field at a declared offset.
    Field {
        /// The member name.
        name: String,
        /// The declared structure-relative offset.
        offset: u64,
        /// The member type.
        field_type: RecordId,
    },
    /// A constant-valued member.
    Constant {
        /// The member name.
        name: String,
        /// The literal value.
        value: Value,
        /// The member type, if the source carries one.
        value_type: Option<RecordId>,
    },
}

/// A classified record from an external source.
#[derive(Clone, Debug)]
pub enum ImportRecord {
    /// A basic machine type.
    Basic {
        /// The canonical type name (see the basic C type seed list).
        name: String,
        /// The intrinsic kind.
        kind: crate::types::IntrinsicKind,
        /// The packing size in bytes.
        size: u64,
    },
    /// A user-defined aggregate.
    Udt {
        /// The qualified type name.
        name: String,
        /// Members in declaration order.
        members: Vec<MemberRecord>,
    },
    /// A pointer or reference. Sources that cannot distinguish r-value
    /// references report them as plain references.
    Pointer {
        /// The pointed-to type.
        pointee: RecordId,
        /// Whether this is a reference rather than a pointer.
        reference: bool,
    },
    /// An array, described by its total byte length.
    Array {
        /// The element type.
        element: RecordId,
        /// The total array length in bytes.
        total_size: u64,
    },
    /// A typedef.
    Typedef {
        /// The alias name.
        name: String,
        /// The aliased type.
        aliased: RecordId,
    },
    /// An enumeration with its enumerants.
    Enum {
        /// The qualified type name.
        name: String,
        /// The underlying intrinsic type.
        underlying: RecordId,
        /// `(name, value)` pairs in declaration order.
        enumerants: Vec<(String, Value)>,
    },
    /// A function signature type.
    FunctionType {
        /// The return type.
        return_type: RecordId,
        /// Parameter types in order.
        params: Vec<RecordId>,
    },
    /// A function with code extent and parameters.
    Function {
        /// The function name.
        name: String,
        /// The module-relative entry offset.
        offset: u64,
        /// The code size in bytes.
        size: u64,
        /// The return type.
        return_type: RecordId,
        /// `(name, type)` pairs in declaration order.
        params: Vec<(String, RecordId)>,
    },
    /// A global variable.
    Data {
        /// The variable name.
        name: String,
        /// The module-relative offset of the storage.
        offset: u64,
        /// The variable's type.
        data_type: RecordId,
    },
    /// A public symbol.
    Public {
        /// The symbol name.
        name: String,
        /// The module-relative address.
        offset: u64,
    },
}

impl ImportRecord {
    /// The store symbol kind this record materializes as.
    fn symbol_kind(&self) -> SymbolKind {
        match self {
            ImportRecord::Function { .. } => SymbolKind::Function,
            ImportRecord::Data { .. } => SymbolKind::Data,
            ImportRecord::Public { .. } => SymbolKind::Public,
            _ => SymbolKind::Type,
        }
    }
}

/// An external provider of symbol records, adapted to one upstream API.
pub trait ImportSource {
    /// Opens the source. Called once, through [`SymbolImporter::connect`].
    fn connect(&mut self) -> Result<()>;

    /// Closes the source.
    fn disconnect(&mut self);

    /// Records whose name matches exactly.
    fn records_by_name(&mut self, name: &str) -> Result<Vec<RecordId>>;

    /// Records whose address extent covers the module-relative offset.
    fn records_by_offset(&mut self, offset: u64) -> Result<Vec<RecordId>>;

    /// Every record in the source, for a full import.
    fn all_records(&mut self) -> Result<Vec<RecordId>>;

    /// Fetches and classifies one record.
    fn record(&mut self, id: RecordId) -> Result<ImportRecord>;
}

/// The concrete on-demand importer over an [`ImportSource`].
pub struct OnDemandImporter<S> {
    source: S,
    /// external record id -> store id, so dependent imports reuse symbols
    /// already materialized.
    imported: HashMap<RecordId, SymbolId>,
    offset_queries: HashSet<u64>,
    name_queries: HashSet<String>,
    full_import_done: bool,
    allow_full_import: bool,
}

impl<S: ImportSource> OnDemandImporter<S> {
    /// Creates an importer over `source`. Full implicit imports (a name
    /// query with no name) are refused unless enabled with
    /// [`OnDemandImporter::allow_full_import`].
    pub fn new(source: S) -> Self {
        OnDemandImporter {
            source,
            imported: HashMap::new(),
            offset_queries: HashSet::new(),
            name_queries: HashSet::new(),
            full_import_done: false,
            allow_full_import: false,
        }
    }

    /// Permits a `None` name query to import the entire source.
    pub fn allow_full_import(mut self, allow: bool) -> Self {
        self.allow_full_import = allow;
        self
    }

    fn import_records(
        &mut self,
        store: &mut SymbolStore,
        records: Vec<RecordId>,
        kind: Option<SymbolKind>,
    ) -> Result<ImportOutcome> {
        let mut outcome = ImportOutcome::AlreadySatisfied;
        for record_id in records {
            if let Some(kind) = kind {
                let record = self.source.record(record_id)?;
                if record.symbol_kind() != kind {
                    continue;
                }
            }
            self.import_record(store, record_id)?;
            outcome = ImportOutcome::Imported;
        }
        Ok(outcome)
    }

    /// Copies one record (and, transitively, everything it references) into
    /// the store, reusing anything already imported or already present under
    /// the same qualified name.
    fn import_record(&mut self, store: &mut SymbolStore, record_id: RecordId) -> Result<SymbolId> {
        if let Some(&id) = self.imported.get(&record_id) {
            return Ok(id);
        }

        let record = self.source.record(record_id)?;
        trace!("importing {record_id:?}: {record:?}");

        // Named types already in the store are reused rather than recreated,
        // which keeps repeated imports idempotent.
        if let ImportRecord::Basic { name, .. }
        | ImportRecord::Udt { name, .. }
        | ImportRecord::Typedef { name, .. }
        | ImportRecord::Enum { name, .. } = &record
        {
            if let Ok(existing) = store.find_type_by_name(name, false) {
                self.imported.insert(record_id, existing);
                return Ok(existing);
            }
        }

        let id = match record {
            ImportRecord::Basic { name, kind, size } => store.add_basic_type(&name, kind, size)?,

            ImportRecord::Udt { name, members } => {
                let udt = store.create_udt(SymbolId::NONE, &name, None)?;
                // Record the mapping before walking members: a member may
                // point back at the UDT itself.
                self.imported.insert(record_id, udt);

                for member in &members {
                    if let MemberRecord::BaseClass { offset, base_type } = member {
                        let base = self.import_record(store, *base_type)?;
                        store.add_base_class(udt, FieldOffset::At(*offset), base)?;
                    }
                }
                for member in &members {
                    match member {
                        MemberRecord::BaseClass { .. } => {}
                        MemberRecord::Field {
                            name,
                            offset,
                            field_type,
                        } => {
                            let field = self.import_record(store, *field_type)?;
                            store.add_field(udt, name, FieldOffset::At(*offset), field)?;
                        }
                        MemberRecord::Constant {
                            name,
                            value,
                            value_type,
                        } => {
                            let value_type = match value_type {
                                Some(t) => self.import_record(store, *t)?,
                                None => SymbolId::NONE,
                            };
                            store.add_constant_field(udt, name, value_type, *value)?;
                        }
                    }
                }
                udt
            }

            ImportRecord::Pointer { pointee, reference } => {
                let pointee = self.import_record(store, pointee)?;
                // Lossy sources cannot distinguish r-value references; both
                // reference flavors import as plain references.
                let kind = if reference {
                    PointerKind::Reference
                } else {
                    PointerKind::Standard
                };
                store.create_pointer_type(pointee, kind)?
            }

            ImportRecord::Array {
                element,
                total_size,
            } => {
                let element = self.import_record(store, element)?;
                let element_size = store.symbol(element)?.as_type()?.size();
                if element_size == 0 {
                    return Err(Error::ImportFailure(
                        "cannot derive an array dimension over a zero-sized element".to_string(),
                    ));
                }
                store.create_array_type(element, total_size / element_size)?
            }

            ImportRecord::Typedef { name, aliased } => {
                let aliased = self.import_record(store, aliased)?;
                store.create_typedef(SymbolId::NONE, &name, None, aliased)?
            }

            ImportRecord::Enum {
                name,
                underlying,
                enumerants,
            } => {
                let underlying = self.import_record(store, underlying)?;
                let enum_id = store.create_enum(SymbolId::NONE, &name, None, underlying)?;
                for (enumerant, value) in enumerants {
                    store.add_enumerant(enum_id, &enumerant, Some(value))?;
                }
                enum_id
            }

            ImportRecord::FunctionType {
                return_type,
                params,
            } => {
                let return_type = self.import_record(store, return_type)?;
                let mut param_ids = Vec::with_capacity(params.len());
                for param in params {
                    param_ids.push(self.import_record(store, param)?);
                }
                store.create_function_type(return_type, &param_ids)?
            }

            ImportRecord::Function {
                name,
                offset,
                size,
                return_type,
                params,
            } => {
                let return_type = self.import_record(store, return_type)?;
                let function = store.create_function(
                    SymbolId::NONE,
                    &name,
                    None,
                    return_type,
                    offset,
                    size,
                )?;
                for (param_name, param_type) in params {
                    let param_type = self.import_record(store, param_type)?;
                    store.add_parameter(function, &param_name, param_type)?;
                }
                function
            }

            ImportRecord::Data {
                name,
                offset,
                data_type,
            } => {
                let data_type = self.import_record(store, data_type)?;
                store.create_global_data(&name, None, offset, data_type)?
            }

            ImportRecord::Public { name, offset } => store.create_public(&name, None, offset)?,
        };

        self.imported.insert(record_id, id);
        Ok(id)
    }
}

impl<S: ImportSource> SymbolImporter for OnDemandImporter<S> {
    fn connect(&mut self) -> Result<()> {
        self.source.connect()
    }

    fn disconnect(&mut self) {
        self.source.disconnect();
    }

    fn import_for_offset(
        &mut self,
        store: &mut SymbolStore,
        kind: Option<SymbolKind>,
        offset: u64,
    ) -> Result<ImportOutcome> {
        if self.full_import_done || !self.offset_queries.insert(offset) {
            return Ok(ImportOutcome::AlreadySatisfied);
        }

        let records = self.source.records_by_offset(offset)?;
        debug!(
            "import query for offset {offset:#x}: {} source records",
            records.len()
        );
        self.import_records(store, records, kind)
    }

    fn import_for_name(
        &mut self,
        store: &mut SymbolStore,
        kind: Option<SymbolKind>,
        name: Option<&str>,
    ) -> Result<ImportOutcome> {
        if self.full_import_done {
            return Ok(ImportOutcome::AlreadySatisfied);
        }

        let name = match name {
            Some(name) => name,
            None => {
                // A nameless query asks for everything the source has.
                if !self.allow_full_import {
                    return Ok(ImportOutcome::AlreadySatisfied);
                }
                let records = self.source.all_records()?;
                debug!("full import: {} source records", records.len());
                let outcome = self.import_records(store, records, kind)?;
                self.full_import_done = true;
                return Ok(outcome);
            }
        };

        if !self.name_queries.insert(name.to_string()) {
            return Ok(ImportOutcome::AlreadySatisfied);
        }

        let records = self.source.records_by_name(name)?;
        debug!(
            "import query for name {name:?}: {} source records",
            records.len()
        );
        self.import_records(store, records, kind)
    }
}
