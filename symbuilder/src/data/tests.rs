use super::*;
use crate::testing::test_store;

#[test]
fn constant_field_validation() {
    let (mut store, _) = test_store();
    let int_type = store.find_type_by_name("int", false).unwrap();

    let s = store.create_udt(SymbolId::NONE, "S", None).unwrap();

    // A typed constant member of a UDT is fine.
    store
        .add_constant_field(s, "K", int_type, Value::I4(5))
        .unwrap();

    // An untyped member is only legal on an enum.
    let err = store
        .add_constant_field(s, "BAD", SymbolId::NONE, Value::I4(1))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    // A deferred (auto-increment) value is only legal on an enum.
    let err = store
        .add_constant_field(s, "BAD", SymbolId::NONE, Value::Empty)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn constant_members_occupy_no_storage() {
    let (mut store, _) = test_store();
    let int_type = store.find_type_by_name("int", false).unwrap();

    let s = store.create_udt(SymbolId::NONE, "S", None).unwrap();
    store
        .add_constant_field(s, "K", int_type, Value::I4(5))
        .unwrap();
    let a = store
        .add_field(s, "a", FieldOffset::Automatic, int_type)
        .unwrap();

    assert_eq!(
        store.symbol(a).unwrap().as_data().unwrap().actual_offset(),
        Some(0)
    );
    assert_eq!(store.symbol(s).unwrap().as_type().unwrap().size(), 4);
}

#[test]
fn set_data_type_rewires_dependency() {
    let (mut store, _) = test_store();
    let int_type = store.find_type_by_name("int", false).unwrap();
    let short_type = store.find_type_by_name("short", false).unwrap();

    let s = store.create_udt(SymbolId::NONE, "S", None).unwrap();
    let a = store
        .add_field(s, "a", FieldOffset::Automatic, int_type)
        .unwrap();
    assert_eq!(store.symbol(s).unwrap().as_type().unwrap().size(), 4);
    assert_eq!(store.symbol(int_type).unwrap().dependents.count(a), 1);

    store.set_data_type(a, short_type).unwrap();
    assert_eq!(store.symbol(int_type).unwrap().dependents.count(a), 0);
    assert_eq!(store.symbol(short_type).unwrap().dependents.count(a), 1);
    assert_eq!(store.symbol(s).unwrap().as_type().unwrap().size(), 2);

    // Setting the same type again is a no-op.
    store.set_data_type(a, short_type).unwrap();
    assert_eq!(store.symbol(short_type).unwrap().dependents.count(a), 1);
}

#[test]
fn set_data_offset_rules() {
    let (mut store, _) = test_store();
    let int_type = store.find_type_by_name("int", false).unwrap();

    let s = store.create_udt(SymbolId::NONE, "S", None).unwrap();
    let a = store
        .add_field(s, "a", FieldOffset::Automatic, int_type)
        .unwrap();
    let b = store
        .add_field(s, "b", FieldOffset::Automatic, int_type)
        .unwrap();

    store.set_data_offset(b, FieldOffset::At(0x10)).unwrap();
    assert_eq!(
        store.symbol(b).unwrap().as_data().unwrap().actual_offset(),
        Some(0x10)
    );
    assert_eq!(store.symbol(s).unwrap().as_type().unwrap().size(), 0x14);

    // Back to automatic layout.
    store.set_data_offset(b, FieldOffset::Automatic).unwrap();
    assert_eq!(
        store.symbol(b).unwrap().as_data().unwrap().actual_offset(),
        Some(4)
    );
    let _ = a;

    // An auto-increment enumerant has a value slot, not an offset.
    let e = store.create_enum(SymbolId::NONE, "E", None, int_type).unwrap();
    let auto = store.add_enumerant(e, "A", None).unwrap();
    let err = store.set_data_offset(auto, FieldOffset::At(0)).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[test]
fn set_data_value_restarts_enum_run() {
    let (mut store, _) = test_store();
    let int_type = store.find_type_by_name("int", false).unwrap();

    let e = store.create_enum(SymbolId::NONE, "E", None, int_type).unwrap();
    let a = store.add_enumerant(e, "A", None).unwrap();
    let b = store.add_enumerant(e, "B", None).unwrap();

    store.set_data_value(a, Value::I4(100)).unwrap();
    let value = |store: &SymbolStore, id: SymbolId| {
        store.symbol(id).unwrap().as_data().unwrap().value()
    };
    assert_eq!(value(&store, a), Value::I4(100));
    assert_eq!(value(&store, b), Value::I4(101));

    // Non-constant symbols reject values.
    let s = store.create_udt(SymbolId::NONE, "S", None).unwrap();
    let f = store
        .add_field(s, "f", FieldOffset::Automatic, int_type)
        .unwrap();
    let err = store.set_data_value(f, Value::I4(1)).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[test]
fn global_data_registers_its_extent() {
    let (mut store, _) = test_store();
    let int_type = store.find_type_by_name("int", false).unwrap();

    let s = store.create_udt(SymbolId::NONE, "S", None).unwrap();
    store
        .add_field(s, "a", FieldOffset::Automatic, int_type)
        .unwrap();

    let g = store.create_global_data("g_state", None, 0x5000, s).unwrap();
    assert_eq!(store.find_symbols_by_offset(0x5003, false).unwrap(), [g]);
    assert!(store.find_symbols_by_offset(0x5004, false).is_err());

    // Growing the type widens the registered extent.
    store
        .add_field(s, "b", FieldOffset::Automatic, int_type)
        .unwrap();
    assert_eq!(store.find_symbols_by_offset(0x5007, false).unwrap(), [g]);

    // Shrinking it narrows the extent again.
    let short_type = store.find_type_by_name("short", false).unwrap();
    let g2 = store.create_global_data("g_small", None, 0x6000, short_type).unwrap();
    assert_eq!(store.find_symbols_by_offset(0x6001, false).unwrap(), [g2]);

    assert_eq!(
        store.data_location(g).unwrap(),
        Location::ImageOffset(0x5000)
    );
}

#[test]
fn live_range_validation() {
    let (mut store, _) = test_store();
    let int_type = store.find_type_by_name("int", false).unwrap();
    let void_type = store.find_type_by_name("void", false).unwrap();

    let f = store
        .create_function(SymbolId::NONE, "f", None, void_type, 0x1000, 0x100)
        .unwrap();
    let p = store.add_parameter(f, "arg", int_type).unwrap();

    let rcx = store.parse_location("@rcx").unwrap();
    let spill = store.parse_location("[@rsp + 20]").unwrap();

    let r1 = store.add_live_range(p, 0, 0x10, rcx).unwrap();
    let r2 = store.add_live_range(p, 0x10, 0x20, spill).unwrap();
    assert_ne!(r1, r2);
    assert_eq!(store.live_ranges(p).unwrap().len(), 2);

    // Overlap fails.
    let err = store.add_live_range(p, 0x8, 0x10, rcx).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    // Extending past the function fails.
    let err = store.add_live_range(p, 0xf0, 0x20, rcx).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    // A resize to the same extent is a no-op success.
    store.set_live_range_size(p, r1, 0x10).unwrap();

    // A resize that would collide fails, leaving the range intact.
    let err = store.set_live_range_size(p, r1, 0x20).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(store.live_ranges(p).unwrap()[0].size, 0x10);

    // A resize over the range's own extent succeeds (the range under edit is
    // excluded from the overlap check).
    store.set_live_range_offset(p, r2, 0x18).unwrap();
    store.set_live_range_size(p, r2, 0x28).unwrap();

    store.delete_live_range(p, r1).unwrap();
    assert_eq!(store.live_ranges(p).unwrap().len(), 1);
    store.delete_all_live_ranges(p).unwrap();
    assert!(store.live_ranges(p).unwrap().is_empty());
}

#[test]
fn variable_location_requires_scope() {
    let (mut store, _) = test_store();
    let int_type = store.find_type_by_name("int", false).unwrap();
    let void_type = store.find_type_by_name("void", false).unwrap();

    let f = store
        .create_function(SymbolId::NONE, "f", None, void_type, 0x1000, 0x100)
        .unwrap();
    let p = store.add_parameter(f, "arg", int_type).unwrap();

    let err = store.data_location(p).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    // Fields resolve structure-relative; constants resolve as constants.
    let s = store.create_udt(SymbolId::NONE, "S", None).unwrap();
    let a = store
        .add_field(s, "a", FieldOffset::Automatic, int_type)
        .unwrap();
    assert_eq!(
        store.data_location(a).unwrap(),
        Location::StructureRelative(0)
    );
    let k = store
        .add_constant_field(s, "K", int_type, Value::I4(1))
        .unwrap();
    assert_eq!(store.data_location(k).unwrap(), Location::ConstantValue);
}
