use super::*;
use crate::testing::test_store;
use crate::types::{IntrinsicKind, TypeKind};
use std::collections::HashMap;

/// A canned import source over a record table.
#[derive(Default)]
struct TestSource {
    records: HashMap<RecordId, ImportRecord>,
    extents: Vec<(u64, u64, RecordId)>,
    connected: bool,
    fetches: u32,
}

impl TestSource {
    fn add(&mut self, id: u64, record: ImportRecord) -> RecordId {
        let record_id = RecordId(id);
        if let ImportRecord::Function { offset, size, .. } = &record {
            self.extents.push((*offset, *offset + *size, record_id));
        }
        if let ImportRecord::Data { offset, .. } = &record {
            self.extents.push((*offset, *offset + 1, record_id));
        }
        self.records.insert(record_id, record);
        record_id
    }
}

impl ImportSource for TestSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn records_by_name(&mut self, name: &str) -> Result<Vec<RecordId>> {
        let mut out: Vec<RecordId> = self
            .records
            .iter()
            .filter(|(_, record)| match record {
                ImportRecord::Basic { name: n, .. }
                | ImportRecord::Udt { name: n, .. }
                | ImportRecord::Typedef { name: n, .. }
                | ImportRecord::Enum { name: n, .. }
                | ImportRecord::Function { name: n, .. }
                | ImportRecord::Data { name: n, .. }
                | ImportRecord::Public { name: n, .. } => n == name,
                _ => false,
            })
            .map(|(&id, _)| id)
            .collect();
        out.sort();
        Ok(out)
    }

    fn records_by_offset(&mut self, offset: u64) -> Result<Vec<RecordId>> {
        let mut out: Vec<RecordId> = self
            .extents
            .iter()
            .filter(|&&(start, end, _)| start <= offset && offset < end)
            .map(|&(_, _, id)| id)
            .collect();
        out.sort();
        Ok(out)
    }

    fn all_records(&mut self) -> Result<Vec<RecordId>> {
        let mut out: Vec<RecordId> = self.records.keys().copied().collect();
        out.sort();
        Ok(out)
    }

    fn record(&mut self, id: RecordId) -> Result<ImportRecord> {
        self.fetches += 1;
        self.records
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::ImportFailure(format!("source has no record {id:?}")))
    }
}

fn int_record(source: &mut TestSource, id: u64) -> RecordId {
    source.add(
        id,
        ImportRecord::Basic {
            name: "int".to_string(),
            kind: IntrinsicKind::Int,
            size: 4,
        },
    )
}

#[test]
fn name_import_is_idempotent() {
    let (mut store, _) = test_store();

    let mut source = TestSource::default();
    let int_rec = int_record(&mut source, 1);
    source.add(
        2,
        ImportRecord::Udt {
            name: "X".to_string(),
            members: vec![MemberRecord::Field {
                name: "a".to_string(),
                offset: 0,
                field_type: int_rec,
            }],
        },
    );

    let mut importer = OnDemandImporter::new(source);
    importer.connect().unwrap();
    store.set_importer(Box::new(importer));

    let x = store.find_symbol_by_name("X").unwrap();
    let count_after_first = store.all_symbols().count();

    let x_again = store.find_symbol_by_name("X").unwrap();
    assert_eq!(x, x_again);
    assert_eq!(
        store.all_symbols().count(),
        count_after_first,
        "the second query must not add symbols"
    );

    // The imported UDT has the declared layout over the store's own `int`.
    let int_type = store.find_type_by_name("int", false).unwrap();
    let payload = store.symbol(x).unwrap().as_type().unwrap();
    assert_eq!(payload.size(), 4);
    let field = store.symbol(x).unwrap().children()[0];
    assert_eq!(store.symbol(field).unwrap().as_data().unwrap().type_id(), int_type);
}

#[test]
fn import_follows_type_references_through_cycles() {
    let (mut store, _) = test_store();

    let mut source = TestSource::default();
    let int_rec = int_record(&mut source, 1);
    // Node { Node *next; int value; } — the pointer points back at the UDT.
    let node_rec = RecordId(2);
    let ptr_rec = source.add(
        3,
        ImportRecord::Pointer {
            pointee: node_rec,
            reference: false,
        },
    );
    source.add(
        2,
        ImportRecord::Udt {
            name: "Node".to_string(),
            members: vec![
                MemberRecord::Field {
                    name: "next".to_string(),
                    offset: 0,
                    field_type: ptr_rec,
                },
                MemberRecord::Field {
                    name: "value".to_string(),
                    offset: 8,
                    field_type: int_rec,
                },
            ],
        },
    );

    let mut importer = OnDemandImporter::new(source);
    importer.connect().unwrap();
    store.set_importer(Box::new(importer));

    let node = store.find_symbol_by_name("Node").unwrap();
    let payload = store.symbol(node).unwrap().as_type().unwrap();
    assert_eq!(payload.type_kind(), TypeKind::Udt);
    assert_eq!(payload.size(), 16);

    let next = store.symbol(node).unwrap().children()[0];
    let next_type = store.symbol(next).unwrap().as_data().unwrap().type_id();
    let next_payload = store.symbol(next_type).unwrap().as_type().unwrap();
    assert_eq!(next_payload.type_kind(), TypeKind::Pointer);
    assert_eq!(next_payload.base_type().unwrap(), node);
}

#[test]
fn enum_and_base_class_import() {
    let (mut store, _) = test_store();

    let mut source = TestSource::default();
    let int_rec = int_record(&mut source, 1);
    let color_rec = source.add(
        2,
        ImportRecord::Enum {
            name: "Color".to_string(),
            underlying: int_rec,
            enumerants: vec![
                ("RED".to_string(), Value::I4(0)),
                ("BLUE".to_string(), Value::I4(5)),
            ],
        },
    );
    source.add(
        3,
        ImportRecord::Udt {
            name: "Base".to_string(),
            members: vec![MemberRecord::Field {
                name: "tag".to_string(),
                offset: 0,
                field_type: color_rec,
            }],
        },
    );
    let base_rec = RecordId(3);
    source.add(
        4,
        ImportRecord::Udt {
            name: "Derived".to_string(),
            members: vec![
                // Declared after the field, still laid out first.
                MemberRecord::Field {
                    name: "extra".to_string(),
                    offset: 4,
                    field_type: int_rec,
                },
                MemberRecord::BaseClass {
                    offset: 0,
                    base_type: base_rec,
                },
            ],
        },
    );

    let mut importer = OnDemandImporter::new(source);
    importer.connect().unwrap();
    store.set_importer(Box::new(importer));

    let derived = store.find_symbol_by_name("Derived").unwrap();
    assert_eq!(store.symbol(derived).unwrap().as_type().unwrap().size(), 8);

    // Base classes precede fields in the child list.
    let children = store.symbol(derived).unwrap().children().to_vec();
    assert_eq!(store.symbol(children[0]).unwrap().kind(), SymbolKind::BaseClass);

    let color = store.find_symbol_by_name("Color").unwrap();
    let enumerants = store.symbol(color).unwrap().children().to_vec();
    let value = |id| store.symbol(id).unwrap().as_data().unwrap().value();
    assert_eq!(value(enumerants[0]), Value::I4(0));
    assert_eq!(value(enumerants[1]), Value::I4(5));
}

#[test]
fn offset_import_materializes_functions() {
    let (mut store, sink) = test_store();

    let mut source = TestSource::default();
    let int_rec = int_record(&mut source, 1);
    source.add(
        2,
        ImportRecord::Function {
            name: "compute".to_string(),
            offset: 0x1000,
            size: 0x40,
            return_type: int_rec,
            params: vec![("a".to_string(), int_rec)],
        },
    );

    let mut importer = OnDemandImporter::new(source);
    importer.connect().unwrap();
    store.set_importer(Box::new(importer));

    let before = sink.count();
    let found = store.find_symbols_by_offset(0x1010, false).unwrap();
    assert_eq!(found.len(), 1);
    // The whole import batch published one cache-invalidation event.
    assert_eq!(sink.count() - before, 1);

    let f = found[0];
    assert_eq!(store.symbol(f).unwrap().name(), Some("compute"));
    let payload = store.symbol(f).unwrap().as_function().unwrap();
    assert_eq!(payload.ranges(), [(0x1000, 0x40)]);

    // The offset query is memoized: asking again touches no new state and
    // publishes nothing.
    let before = sink.count();
    let again = store.find_symbols_by_offset(0x1010, false).unwrap();
    assert_eq!(again, found);
    assert_eq!(sink.count(), before);
}

#[test]
fn array_import_derives_dimension() {
    let (mut store, _) = test_store();

    let mut source = TestSource::default();
    let int_rec = int_record(&mut source, 1);
    let arr_rec = source.add(
        2,
        ImportRecord::Array {
            element: int_rec,
            total_size: 48,
        },
    );
    source.add(
        3,
        ImportRecord::Typedef {
            name: "dozen_t".to_string(),
            aliased: arr_rec,
        },
    );

    let mut importer = OnDemandImporter::new(source);
    importer.connect().unwrap();
    store.set_importer(Box::new(importer));

    let td = store.find_symbol_by_name("dozen_t").unwrap();
    let arr = store.symbol(td).unwrap().as_type().unwrap().base_type().unwrap();
    let (dimension, stride) = store
        .symbol(arr)
        .unwrap()
        .as_type()
        .unwrap()
        .array_dimensions()
        .unwrap();
    assert_eq!(dimension, 12);
    assert_eq!(stride, 4);
}

#[test]
fn full_import_is_refused_unless_allowed() {
    let (mut store, _) = test_store();
    let mut source = TestSource::default();
    int_record(&mut source, 1);
    source.add(
        2,
        ImportRecord::Public {
            name: "export_a".to_string(),
            offset: 0x2000,
        },
    );

    let mut importer = OnDemandImporter::new(source);
    importer.connect().unwrap();
    let outcome = importer.import_for_name(&mut store, None, None).unwrap();
    assert_eq!(outcome, ImportOutcome::AlreadySatisfied);
    assert!(store.find_symbol_by_name("export_a").is_err());

    let mut source = TestSource::default();
    int_record(&mut source, 1);
    source.add(
        2,
        ImportRecord::Public {
            name: "export_a".to_string(),
            offset: 0x2000,
        },
    );
    let mut importer = OnDemandImporter::new(source).allow_full_import(true);
    importer.connect().unwrap();
    let outcome = importer.import_for_name(&mut store, None, None).unwrap();
    assert_eq!(outcome, ImportOutcome::Imported);
    assert!(store.find_symbol_by_name("export_a").is_ok());

    // After a full import, everything is already satisfied.
    let outcome = importer
        .import_for_name(&mut store, None, Some("whatever"))
        .unwrap();
    assert_eq!(outcome, ImportOutcome::AlreadySatisfied);
}

#[test]
fn failed_member_import_keeps_earlier_work() {
    let (mut store, _) = test_store();

    let mut source = TestSource::default();
    // "Broken" has a member whose type record does not exist.
    source.add(
        1,
        ImportRecord::Udt {
            name: "Broken".to_string(),
            members: vec![MemberRecord::Field {
                name: "bad".to_string(),
                offset: 0,
                field_type: RecordId(99),
            }],
        },
    );

    let mut importer = OnDemandImporter::new(source);
    importer.connect().unwrap();
    let err = importer
        .import_for_name(&mut store, None, Some("Broken"))
        .unwrap_err();
    assert!(matches!(err, Error::ImportFailure(_)));

    // The shell created before the failure remains; the store is consistent.
    let shell = store.find_type_by_name("Broken", false).unwrap();
    assert_eq!(store.symbol(shell).unwrap().as_type().unwrap().size(), 0);
}

#[test]
fn kind_filter_limits_what_is_copied() {
    let (mut store, _) = test_store();

    let mut source = TestSource::default();
    let int_rec = int_record(&mut source, 1);
    source.add(
        2,
        ImportRecord::Data {
            name: "thing".to_string(),
            offset: 0x3000,
            data_type: int_rec,
        },
    );
    source.add(
        3,
        ImportRecord::Public {
            name: "thing".to_string(),
            offset: 0x3000,
        },
    );

    let mut importer = OnDemandImporter::new(source);
    importer.connect().unwrap();
    importer
        .import_for_name(&mut store, Some(SymbolKind::Public), Some("thing"))
        .unwrap();

    // Only the public came in, and name lookup resolves to it.
    let id = store.lookup_name("thing").unwrap();
    assert_eq!(store.symbol(id).unwrap().kind(), SymbolKind::Public);
    assert!(store.all_symbols().all(|s| s.kind() != SymbolKind::Data));
}
