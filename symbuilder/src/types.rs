//! Type symbols: intrinsics, UDTs, pointers, arrays, typedefs, enums, and
//! function types, together with the layout passes that keep their sizes,
//! alignments, offsets, and enumerant values consistent under mutation.


use crate::data::DeclaredOffset;
use crate::store::SymbolStore;
use crate::sym::{Payload, Symbol, SymbolId, SymbolKind};
use crate::utils::align::align_up;
use crate::value::{Value, ValueKind};
use crate::{Error, Result};
use tracing::trace;

/// The subkind of a type symbol.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TypeKind {
    /// A basic machine type (`int`, `float`, ...).
    Intrinsic,
    /// A user-defined aggregate (struct/class/union).
    Udt,
    /// A pointer or reference.
    Pointer,
    /// A one-dimensional, zero-based array.
    Array,
    /// An alias for another type.
    Typedef,
    /// An enumeration.
    Enum,
    /// A function signature. Not storage; size and alignment are 0.
    Function,
}

/// The particular kind of an intrinsic type.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum IntrinsicKind {
    Void,
    Bool,
    Char,
    WChar,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Char16,
    Char32,
}

/// The kind of a pointer type.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PointerKind {
    /// `T *`
    Standard,
    /// `T &`
    Reference,
    /// `T &&`
    RValueReference,
    /// `T ^` (C++/CX managed reference)
    CXHat,
}

impl PointerKind {
    /// The C++ (/CX) declarator suffix for this pointer kind.
    pub fn suffix(self) -> &'static str {
        match self {
            PointerKind::Standard => "*",
            PointerKind::Reference => "&",
            PointerKind::RValueReference => "&&",
            PointerKind::CXHat => "^",
        }
    }
}

pub(crate) enum TypeDetail {
    Intrinsic {
        kind: IntrinsicKind,
    },
    Udt,
    Pointer {
        pointee: SymbolId,
        pointer_kind: PointerKind,
    },
    Array {
        element: SymbolId,
        dimension: u64,
        /// The element size captured at creation and refreshed on dependency
        /// notification.
        element_size: u64,
    },
    Typedef {
        aliased: SymbolId,
    },
    Enum {
        underlying: SymbolId,
        intrinsic: IntrinsicKind,
        packing: ValueKind,
    },
    Function {
        return_type: SymbolId,
        param_types: Vec<SymbolId>,
    },
}

/// The payload of a type symbol.
pub struct TypePayload {
    pub(crate) type_kind: TypeKind,
    pub(crate) size: u64,
    pub(crate) alignment: u64,
    pub(crate) detail: TypeDetail,
}

impl TypePayload {
    /// The subkind of this type.
    pub fn type_kind(&self) -> TypeKind {
        self.type_kind
    }

    /// The overall size of the type as laid out in memory.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The alignment requirement of the type, at least 1.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// The intrinsic kind and packing size, for intrinsics and enums.
    pub fn intrinsic(&self) -> Result<(IntrinsicKind, u64)> {
        match &self.detail {
            TypeDetail::Intrinsic { kind } => Ok((*kind, self.size)),
            TypeDetail::Enum { intrinsic, .. } => Ok((*intrinsic, self.size)),
            _ => Err(Error::Unsupported(
                "the type has no intrinsic information".to_string(),
            )),
        }
    }

    /// The pointer kind, for pointers.
    pub fn pointer_kind(&self) -> Result<PointerKind> {
        match &self.detail {
            TypeDetail::Pointer { pointer_kind, .. } => Ok(*pointer_kind),
            _ => Err(Error::Unsupported("the type is not a pointer".to_string())),
        }
    }

    /// The single type this type derives from: the pointee for pointers, the
    /// element for arrays, the aliased type for typedefs, the underlying
    /// intrinsic for enums.
    pub fn base_type(&self) -> Result<SymbolId> {
        match &self.detail {
            TypeDetail::Pointer { pointee, .. } => Ok(*pointee),
            TypeDetail::Array { element, .. } => Ok(*element),
            TypeDetail::Typedef { aliased } => Ok(*aliased),
            TypeDetail::Enum { underlying, .. } => Ok(*underlying),
            _ => Err(Error::Unsupported(
                "the type is not derived from a single base type".to_string(),
            )),
        }
    }

    /// The array dimension and element stride, for arrays.
    pub fn array_dimensions(&self) -> Result<(u64, u64)> {
        match &self.detail {
            TypeDetail::Array {
                dimension,
                element_size,
                ..
            } => Ok((*dimension, *element_size)),
            _ => Err(Error::Unsupported("the type is not an array".to_string())),
        }
    }

    /// The value packing of an enum.
    pub fn enum_packing(&self) -> Result<ValueKind> {
        match &self.detail {
            TypeDetail::Enum { packing, .. } => Ok(*packing),
            _ => Err(Error::Unsupported("the type is not an enum".to_string())),
        }
    }

    /// The return type of a function type.
    pub fn return_type(&self) -> Result<SymbolId> {
        match &self.detail {
            TypeDetail::Function { return_type, .. } => Ok(*return_type),
            _ => Err(Error::Unsupported(
                "the type is not a function type".to_string(),
            )),
        }
    }

    /// The parameter types of a function type, in order.
    pub fn param_types(&self) -> Result<&[SymbolId]> {
        match &self.detail {
            TypeDetail::Function { param_types, .. } => Ok(param_types),
            _ => Err(Error::Unsupported(
                "the type is not a function type".to_string(),
            )),
        }
    }

    /// Every type this type registered itself as a dependent of.
    pub(crate) fn referenced_types(&self) -> Vec<SymbolId> {
        match &self.detail {
            TypeDetail::Intrinsic { .. } | TypeDetail::Udt => Vec::new(),
            TypeDetail::Pointer { pointee, .. } => vec![*pointee],
            TypeDetail::Array { element, .. } => vec![*element],
            TypeDetail::Typedef { aliased } => vec![*aliased],
            TypeDetail::Enum { underlying, .. } => vec![*underlying],
            TypeDetail::Function {
                return_type,
                param_types,
            } => {
                let mut refs = vec![*return_type];
                refs.extend_from_slice(param_types);
                refs
            }
        }
    }
}

/// Derives the enumerant packing from an enum's underlying intrinsic.
fn enum_packing_for(kind: IntrinsicKind, size: u64) -> Result<ValueKind> {
    let signed = match kind {
        IntrinsicKind::Bool => return Ok(ValueKind::Bool),
        IntrinsicKind::Char | IntrinsicKind::Int | IntrinsicKind::Long => true,
        IntrinsicKind::WChar | IntrinsicKind::UInt | IntrinsicKind::ULong => false,
        _ => {
            return Err(Error::InvalidArgument(
                "the underlying type of an enum must be an ordinal intrinsic".to_string(),
            ))
        }
    };
    Ok(match (size, signed) {
        (1, true) => ValueKind::I1,
        (2, true) => ValueKind::I2,
        (4, true) => ValueKind::I4,
        (8, true) => ValueKind::I8,
        (1, false) => ValueKind::U1,
        (2, false) => ValueKind::U2,
        (4, false) => ValueKind::U4,
        (8, false) => ValueKind::U8,
        _ => {
            return Err(Error::InvalidArgument(format!(
                "an enum cannot pack to an underlying type of size {size}"
            )))
        }
    })
}

impl SymbolStore {
    fn insert_type(
        &mut self,
        parent: SymbolId,
        name: Option<String>,
        qualified_name: Option<String>,
        payload: TypePayload,
    ) -> Result<SymbolId> {
        let id = self.allocate_id();
        let symbol = Symbol::new(
            id,
            parent,
            SymbolKind::Type,
            name,
            qualified_name,
            Payload::Type(payload),
        );
        self.insert_symbol(symbol)?;
        if !parent.is_none() {
            self.attach_child(parent, id)?;
        }
        Ok(id)
    }

    /// Creates an intrinsic type. Alignment equals the packing size (with
    /// the zero-sized `void` aligned to 1). Intrinsics are immutable.
    pub fn add_basic_type(
        &mut self,
        name: &str,
        kind: IntrinsicKind,
        packing_size: u64,
    ) -> Result<SymbolId> {
        self.update(|store| {
            store.insert_type(
                SymbolId::NONE,
                Some(name.to_string()),
                None,
                TypePayload {
                    type_kind: TypeKind::Intrinsic,
                    size: packing_size,
                    alignment: packing_size.max(1),
                    detail: TypeDetail::Intrinsic { kind },
                },
            )
        })
    }

    /// Creates an empty user-defined type. Fields and base classes added
    /// later drive its layout.
    pub fn create_udt(
        &mut self,
        parent: SymbolId,
        name: &str,
        qualified_name: Option<&str>,
    ) -> Result<SymbolId> {
        self.update(|store| {
            if !parent.is_none() {
                store.expect_type(parent)?;
            }
            store.insert_type(
                parent,
                Some(name.to_string()),
                qualified_name.map(str::to_string),
                TypePayload {
                    type_kind: TypeKind::Udt,
                    size: 0,
                    alignment: 1,
                    detail: TypeDetail::Udt,
                },
            )
        })
    }

    /// Creates a pointer type over `pointee`. Its name is the pointee's name
    /// with the declarator suffix appended; its size and alignment are the
    /// module's pointer size and do not change when the pointee changes.
    pub fn create_pointer_type(
        &mut self,
        pointee: SymbolId,
        pointer_kind: PointerKind,
    ) -> Result<SymbolId> {
        self.update(|store| {
            let pointee_sym = store.expect_type(pointee)?;
            let name = pointee_sym
                .name()
                .map(|n| format!("{n} {}", pointer_kind.suffix()));
            let qualified = pointee_sym
                .qualified_name()
                .map(|n| format!("{n} {}", pointer_kind.suffix()));

            let pointer_size = store.pointer_size();
            let id = store.insert_type(
                SymbolId::NONE,
                name,
                qualified,
                TypePayload {
                    type_kind: TypeKind::Pointer,
                    size: pointer_size,
                    alignment: pointer_size,
                    detail: TypeDetail::Pointer {
                        pointee,
                        pointer_kind,
                    },
                },
            )?;
            store.add_dependent_edge(pointee, id)?;
            Ok(id)
        })
    }

    /// Creates an array type of `dimension` elements. The element size is
    /// captured now and refreshed whenever the element type changes.
    pub fn create_array_type(&mut self, element: SymbolId, dimension: u64) -> Result<SymbolId> {
        self.update(|store| {
            if dimension == 0 {
                return Err(Error::InvalidArgument(
                    "an array must have a positive dimension".to_string(),
                ));
            }

            let element_sym = store.expect_type(element)?;
            let element_type = element_sym.as_type()?;
            let element_size = element_type.size();
            let alignment = element_type.alignment();
            let size = element_size.checked_mul(dimension).ok_or_else(|| {
                Error::InvalidArgument(format!("array size overflows: {dimension} elements"))
            })?;

            let name = element_sym.name().map(|n| format!("{n}[{dimension}]"));
            let qualified = element_sym
                .qualified_name()
                .map(|n| format!("{n}[{dimension}]"));

            let id = store.insert_type(
                SymbolId::NONE,
                name,
                qualified,
                TypePayload {
                    type_kind: TypeKind::Array,
                    size,
                    alignment,
                    detail: TypeDetail::Array {
                        element,
                        dimension,
                        element_size,
                    },
                },
            )?;
            store.add_dependent_edge(element, id)?;
            Ok(id)
        })
    }

    /// Creates a typedef. Size and alignment forward from the aliased type,
    /// refreshed whenever it changes.
    pub fn create_typedef(
        &mut self,
        parent: SymbolId,
        name: &str,
        qualified_name: Option<&str>,
        aliased: SymbolId,
    ) -> Result<SymbolId> {
        self.update(|store| {
            let aliased_type = store.expect_type(aliased)?.as_type()?;
            let (size, alignment) = (aliased_type.size(), aliased_type.alignment());
            if !parent.is_none() {
                store.expect_type(parent)?;
            }

            let id = store.insert_type(
                parent,
                Some(name.to_string()),
                qualified_name.map(str::to_string),
                TypePayload {
                    type_kind: TypeKind::Typedef,
                    size,
                    alignment,
                    detail: TypeDetail::Typedef { aliased },
                },
            )?;
            store.add_dependent_edge(aliased, id)?;
            Ok(id)
        })
    }

    /// Creates an enum over an ordinal intrinsic underlying type. Size and
    /// alignment follow the underlying type; enumerant values pack to it.
    pub fn create_enum(
        &mut self,
        parent: SymbolId,
        name: &str,
        qualified_name: Option<&str>,
        underlying: SymbolId,
    ) -> Result<SymbolId> {
        self.update(|store| {
            let underlying_sym = store.expect_type(underlying)?;
            let underlying_type = underlying_sym.as_type()?;
            if underlying_type.type_kind() != TypeKind::Intrinsic {
                return Err(Error::InvalidArgument(
                    "the underlying type of an enum must be an intrinsic".to_string(),
                ));
            }
            let (intrinsic, _) = underlying_type.intrinsic()?;
            let size = underlying_type.size();
            let alignment = underlying_type.alignment();
            let packing = enum_packing_for(intrinsic, size)?;
            if !parent.is_none() {
                store.expect_type(parent)?;
            }

            let id = store.insert_type(
                parent,
                Some(name.to_string()),
                qualified_name.map(str::to_string),
                TypePayload {
                    type_kind: TypeKind::Enum,
                    size,
                    alignment,
                    detail: TypeDetail::Enum {
                        underlying,
                        intrinsic,
                        packing,
                    },
                },
            )?;
            store.add_dependent_edge(underlying, id)?;
            Ok(id)
        })
    }

    /// Creates a function type from a signature. Function types are not
    /// storage; size and alignment are 0.
    pub fn create_function_type(
        &mut self,
        return_type: SymbolId,
        param_types: &[SymbolId],
    ) -> Result<SymbolId> {
        self.update(|store| {
            store.expect_type(return_type)?;
            for &param in param_types {
                store.expect_type(param)?;
            }

            let id = store.insert_type(
                SymbolId::NONE,
                None,
                None,
                TypePayload {
                    type_kind: TypeKind::Function,
                    size: 0,
                    alignment: 1,
                    detail: TypeDetail::Function {
                        return_type,
                        param_types: param_types.to_vec(),
                    },
                },
            )?;
            store.add_dependent_edge(return_type, id)?;
            for &param in param_types {
                store.add_dependent_edge(param, id)?;
            }
            Ok(id)
        })
    }

    /// Lays out a UDT: base classes first, then fields, in declared order,
    /// with one running offset across both passes. An automatic-layout child
    /// is placed at the running offset rounded up to its type's alignment; an
    /// explicit-offset child sits at its declared offset regardless.
    /// Constant-valued children occupy no storage. The aggregate's alignment
    /// is the maximum child alignment and its size is the maximum extent
    /// rounded up to that alignment.
    pub(crate) fn layout_udt(&mut self, id: SymbolId) -> Result<()> {
        let children = self.symbol(id)?.children.clone();

        let mut type_size = 0u64;
        let mut cur_offset = 0u64;
        let mut max_alignment = 1u64;
        let mut placements: Vec<(SymbolId, u64)> = Vec::new();

        for pass_kind in [SymbolKind::BaseClass, SymbolKind::Field] {
            for &child in &children {
                let child_sym = self.symbol(child)?;
                if child_sym.kind != pass_kind {
                    continue;
                }
                let data = child_sym.as_data()?;
                if data.is_constant_value() {
                    continue;
                }

                let member_type = self.expect_type(data.type_id())?.as_type()?;
                let member_size = member_type.size();
                let member_alignment = member_type.alignment();
                max_alignment = max_alignment.max(member_alignment);

                let offset = match data.declared {
                    DeclaredOffset::Explicit(declared) => declared,
                    _ => {
                        let placed = align_up(cur_offset, member_alignment);
                        placements.push((child, placed));
                        placed
                    }
                };

                cur_offset = offset + member_size;
                type_size = type_size.max(cur_offset);
            }
        }

        for (child, offset) in placements {
            self.symbol_mut(child)?.as_data_mut()?.actual = Some(offset);
        }

        let payload = self.symbol_mut(id)?.as_type_mut()?;
        payload.alignment = max_alignment;
        payload.size = align_up(type_size, max_alignment);
        trace!(
            "laid out UDT {id:?}: size {} alignment {}",
            payload.size,
            payload.alignment
        );
        Ok(())
    }

    /// Lays out an enum: walks the enumerants in order, assigning each
    /// auto-increment enumerant the successor of the previous enumerant's
    /// value in the enum's packing (0 for the first), and letting each
    /// explicit enumerant restart the run at its own value.
    pub(crate) fn layout_enum(&mut self, id: SymbolId) -> Result<()> {
        let (children, packing) = {
            let sym = self.symbol(id)?;
            (sym.children.clone(), sym.as_type()?.enum_packing()?)
        };

        let mut current = Value::zero(packing);
        let mut found_first = false;
        for child in children {
            let child_sym = self.symbol(child)?;
            if child_sym.kind != SymbolKind::Field {
                continue;
            }
            let data = child_sym.as_data()?;
            if !data.is_constant_value() {
                continue;
            }

            if data.is_auto_increment() {
                if found_first {
                    current = current.succ();
                }
                self.symbol_mut(child)?.as_data_mut()?.value = current;
            } else {
                current = data.value().repack(packing)?;
            }
            found_first = true;
        }
        Ok(())
    }

    /// Refreshes an array after its element type changed: recaptures the
    /// element size and alignment and recomputes the total size.
    pub(crate) fn refresh_array(&mut self, id: SymbolId) -> Result<()> {
        let element = self.symbol(id)?.as_type()?.base_type()?;
        let element_type = self.expect_type(element)?.as_type()?;
        let (new_element_size, new_alignment) = (element_type.size(), element_type.alignment());

        let payload = self.symbol_mut(id)?.as_type_mut()?;
        if let TypeDetail::Array {
            dimension,
            element_size,
            ..
        } = &mut payload.detail
        {
            *element_size = new_element_size;
            payload.size = new_element_size.saturating_mul(*dimension);
            payload.alignment = new_alignment;
        }
        Ok(())
    }

    /// Refreshes a typedef's forwarded size and alignment from its aliased
    /// type.
    pub(crate) fn refresh_typedef(&mut self, id: SymbolId) -> Result<()> {
        let aliased = self.symbol(id)?.as_type()?.base_type()?;
        let aliased_type = self.expect_type(aliased)?.as_type()?;
        let (size, alignment) = (aliased_type.size(), aliased_type.alignment());

        let payload = self.symbol_mut(id)?.as_type_mut()?;
        payload.size = size;
        payload.alignment = alignment;
        Ok(())
    }
}
