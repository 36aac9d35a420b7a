//! End-to-end scenarios driving the public API the way a host debugger
//! would: building symbols, querying them, and watching invalidation events.

use std::cell::RefCell;
use std::rc::Rc;
use symbuilder::import::{
    ImportRecord, ImportSource, MemberRecord, OnDemandImporter, RecordId, SymbolImporter,
};
use symbuilder::{
    FieldOffset, Position, Result, SymbolId, SymbolKind, SymbolStore, Value,
};
use symsvc::{
    Architecture, CacheInvalidation, EventSink, Module, ModuleKey, ProcessKey,
    RegisterInformation, RegisterSet,
};

struct HostModule;

impl Module for HostModule {
    fn base_address(&self) -> u64 {
        0x1_4000_0000
    }
    fn size(&self) -> u64 {
        0x20_0000
    }
    fn name(&self) -> &str {
        "sample.exe"
    }
    fn path(&self) -> &str {
        "c:\\samples\\sample.exe"
    }
    fn containing_process_key(&self) -> ProcessKey {
        ProcessKey(1)
    }
    fn key(&self) -> ModuleKey {
        ModuleKey(0x10)
    }
}

struct Amd64;

impl Architecture for Amd64 {
    fn pointer_size(&self) -> u64 {
        8
    }
    fn register_by_name(&self, name: &str) -> Option<RegisterInformation> {
        RegisterSet::amd64().by_name(name)
    }
    fn register_by_id(&self, id: u32) -> Option<RegisterInformation> {
        RegisterSet::amd64().by_id(id)
    }
}

#[derive(Default)]
struct InvalidationLog {
    events: RefCell<Vec<CacheInvalidation>>,
}

impl EventSink for InvalidationLog {
    fn symbol_cache_invalidate(&self, event: &CacheInvalidation) {
        self.events.borrow_mut().push(*event);
    }
}

fn new_store() -> (SymbolStore, Rc<InvalidationLog>) {
    let log = Rc::new(InvalidationLog::default());
    let store = SymbolStore::new(
        Rc::new(HostModule),
        Rc::new(Amd64),
        Some(Rc::clone(&log) as Rc<dyn EventSink>),
        true,
    )
    .expect("store creation");
    (store, log)
}

fn udt_size(store: &SymbolStore, id: SymbolId) -> u64 {
    store.symbol(id).unwrap().as_type().unwrap().size()
}

#[test]
fn basic_layout() {
    let (mut store, _) = new_store();
    let int_type = store.find_type_by_name("int", false).unwrap();
    let char_type = store.find_type_by_name("char", false).unwrap();

    let s = store.create_udt(SymbolId::NONE, "S", None).unwrap();
    let fields = [
        store.add_field(s, "a", FieldOffset::Automatic, int_type).unwrap(),
        store.add_field(s, "b", FieldOffset::Automatic, char_type).unwrap(),
        store.add_field(s, "c", FieldOffset::Automatic, int_type).unwrap(),
    ];

    let offsets: Vec<u64> = fields
        .iter()
        .map(|&f| {
            store
                .symbol(f)
                .unwrap()
                .as_data()
                .unwrap()
                .actual_offset()
                .unwrap()
        })
        .collect();
    assert_eq!(offsets, [0, 4, 8]);
    assert_eq!(udt_size(&store, s), 12);
    assert_eq!(store.symbol(s).unwrap().as_type().unwrap().alignment(), 4);
}

#[test]
fn explicit_union() {
    let (mut store, _) = new_store();
    let int_type = store.find_type_by_name("int", false).unwrap();
    let float_type = store.find_type_by_name("float", false).unwrap();

    let u = store.create_udt(SymbolId::NONE, "U", None).unwrap();
    let i = store.add_field(u, "i", FieldOffset::At(0), int_type).unwrap();
    let f = store.add_field(u, "f", FieldOffset::At(0), float_type).unwrap();

    let offset = |store: &SymbolStore, id| {
        store
            .symbol(id)
            .unwrap()
            .as_data()
            .unwrap()
            .actual_offset()
            .unwrap()
    };
    assert_eq!(offset(&store, i), 0);
    assert_eq!(offset(&store, f), 0);
    assert_eq!(udt_size(&store, u), 4);
    assert_eq!(store.symbol(u).unwrap().as_type().unwrap().alignment(), 4);
}

#[test]
fn enum_auto_increment_runs() {
    let (mut store, _) = new_store();
    let int_type = store.find_type_by_name("int", false).unwrap();

    let e = store.create_enum(SymbolId::NONE, "E", None, int_type).unwrap();
    let a = store.add_enumerant(e, "A", None).unwrap();
    let b = store.add_enumerant(e, "B", Some(Value::I4(10))).unwrap();
    let c = store.add_enumerant(e, "C", None).unwrap();
    let d = store.add_enumerant(e, "D", None).unwrap();

    let value = |id| store.symbol(id).unwrap().as_data().unwrap().value();
    assert_eq!(value(a), Value::I4(0));
    assert_eq!(value(b), Value::I4(10));
    assert_eq!(value(c), Value::I4(11));
    assert_eq!(value(d), Value::I4(12));
}

#[test]
fn dependent_propagation_with_one_invalidation() {
    let (mut store, log) = new_store();
    let int_type = store.find_type_by_name("int", false).unwrap();

    let s = store.create_udt(SymbolId::NONE, "S", None).unwrap();
    store.add_field(s, "a", FieldOffset::Automatic, int_type).unwrap();

    let t = store.create_array_type(s, 3).unwrap();
    assert_eq!(udt_size(&store, t), 12);

    let before = log.events.borrow().len();
    store.add_field(s, "b", FieldOffset::Automatic, int_type).unwrap();

    assert_eq!(udt_size(&store, s), 8);
    assert_eq!(udt_size(&store, t), 24);

    let events = log.events.borrow();
    assert_eq!(events.len() - before, 1, "exactly one invalidation event");
    assert_eq!(events.last().unwrap().module, ModuleKey(0x10));
    assert_eq!(events.last().unwrap().process, ProcessKey(1));
}

#[test]
fn address_range_query() {
    let (mut store, _) = new_store();
    let void_type = store.find_type_by_name("void", false).unwrap();

    let f = store
        .create_function(SymbolId::NONE, "F", None, void_type, 0x1000, 0x40)
        .unwrap();
    let p = store.create_public("P", None, 0x1000).unwrap();

    let both = store.find_symbols_by_offset(0x1020, false).unwrap();
    assert_eq!(both, [f, p]);

    assert!(store.find_symbols_by_offset(0x1020, true).is_err());

    let exact = store.find_symbols_by_offset(0x1000, true).unwrap();
    assert_eq!(exact, [f, p]);
}

/// An import source exposing one UDT `X` with one `int` field.
#[derive(Default)]
struct OneUdtSource;

impl ImportSource for OneUdtSource {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }
    fn disconnect(&mut self) {}

    fn records_by_name(&mut self, name: &str) -> Result<Vec<RecordId>> {
        Ok(match name {
            "X" => vec![RecordId(1)],
            "int" => vec![RecordId(2)],
            _ => vec![],
        })
    }

    fn records_by_offset(&mut self, _offset: u64) -> Result<Vec<RecordId>> {
        Ok(vec![])
    }

    fn all_records(&mut self) -> Result<Vec<RecordId>> {
        Ok(vec![RecordId(1)])
    }

    fn record(&mut self, id: RecordId) -> Result<ImportRecord> {
        Ok(match id {
            RecordId(1) => ImportRecord::Udt {
                name: "X".to_string(),
                members: vec![MemberRecord::Field {
                    name: "a".to_string(),
                    offset: 0,
                    field_type: RecordId(2),
                }],
            },
            _ => ImportRecord::Basic {
                name: "int".to_string(),
                kind: symbuilder::IntrinsicKind::Int,
                size: 4,
            },
        })
    }
}

#[test]
fn importer_idempotence() {
    let (mut store, _) = new_store();

    let mut importer = OnDemandImporter::new(OneUdtSource::default());
    importer.connect().unwrap();
    store.set_importer(Box::new(importer));

    let x = store.find_symbol_by_name("X").unwrap();
    assert_eq!(store.symbol(x).unwrap().kind(), SymbolKind::Type);
    let symbols_after_first = store.all_symbols().count();

    let x_again = store.find_symbol_by_name("X").unwrap();
    assert_eq!(x, x_again);
    assert_eq!(store.all_symbols().count(), symbols_after_first);
}

#[test]
fn location_wire_format_round_trips() {
    let (store, _) = new_store();
    for text in ["7ff23ac", "@rcx", "[@rbp + 8]", "[@rsp + 20] + 8"] {
        let loc = store.parse_location(text).unwrap();
        assert_eq!(store.location_to_string(&loc).unwrap(), text);
    }
    assert!(store.parse_location("@not_a_register").is_err());
}

#[test]
fn position_wire_format() {
    assert_eq!(Position::parse("min"), Some(Position::MIN));
    assert_eq!(
        Position::parse("1f:2"),
        Some(Position {
            sequence: 0x1f,
            steps: 2
        })
    );
    let p = Position {
        sequence: 0xabc,
        steps: 0x1,
    };
    assert_eq!(Position::parse(&p.to_string()), Some(p));
}
