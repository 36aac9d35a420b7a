use super::*;
use symsvc::RegisterSet;

struct TestArch(RegisterSet);

impl Architecture for TestArch {
    fn pointer_size(&self) -> u64 {
        8
    }
    fn register_by_name(&self, name: &str) -> Option<symsvc::RegisterInformation> {
        self.0.by_name(name)
    }
    fn register_by_id(&self, id: u32) -> Option<symsvc::RegisterInformation> {
        self.0.by_id(id)
    }
}

fn arch() -> TestArch {
    TestArch(RegisterSet::amd64())
}

#[test]
fn parse_virtual_address() {
    let loc = parse_location("7ff23ac", &arch()).unwrap();
    assert_eq!(loc, Location::VirtualAddress(0x7ff23ac));
}

#[test]
fn parse_register() {
    let loc = parse_location("@rcx", &arch()).unwrap();
    assert_eq!(
        loc,
        Location::Register {
            register: 329,
            size: 8
        }
    );
}

#[test]
fn parse_register_relative() {
    let loc = parse_location("[@rbp + 8]", &arch()).unwrap();
    assert_eq!(
        loc,
        Location::RegisterRelative {
            register: 334,
            size: 8,
            offset: 8
        }
    );

    let loc = parse_location("[@rbp - 20]", &arch()).unwrap();
    assert_eq!(
        loc,
        Location::RegisterRelative {
            register: 334,
            size: 8,
            offset: -0x20
        }
    );

    let loc = parse_location("[@rsp]", &arch()).unwrap();
    assert_eq!(
        loc,
        Location::RegisterRelative {
            register: 335,
            size: 8,
            offset: 0
        }
    );
}

#[test]
fn parse_register_relative_indirect() {
    let loc = parse_location("[@rbp + 8] + 1c", &arch()).unwrap();
    assert_eq!(
        loc,
        Location::RegisterRelativeIndirect {
            register: 334,
            size: 8,
            pre_offset: 8,
            post_offset: 0x1c
        }
    );

    let loc = parse_location("[@rbp - 8] - 4", &arch()).unwrap();
    assert_eq!(
        loc,
        Location::RegisterRelativeIndirect {
            register: 334,
            size: 8,
            pre_offset: -8,
            post_offset: -4
        }
    );
}

#[test]
fn parse_tolerates_whitespace() {
    let a = parse_location("  [ @rbp+8 ]  ", &arch()).unwrap();
    let b = parse_location("[@rbp + 8]", &arch()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn parse_rejects_garbage() {
    let arch = arch();
    assert!(parse_location("", &arch).is_err());
    assert!(parse_location("@nosuchreg", &arch).is_err());
    assert!(parse_location("[1000]", &arch).is_err());
    assert!(parse_location("[@rbp", &arch).is_err());
    assert!(parse_location("7ff23ac zap", &arch).is_err());
    assert!(parse_location("[@rbp + zz]", &arch).is_err());
}

#[test]
fn round_trip_canonical_forms() {
    let arch = arch();
    for text in [
        "7ff23ac",
        "@rcx",
        "[@rbp]",
        "[@rbp + 8]",
        "[@rbp - 20]",
        "[@rsp + 8] + 1c",
        "[@rbp - 8] - 4",
    ] {
        let loc = parse_location(text, &arch).unwrap();
        let emitted = location_to_string(&loc, &arch).unwrap();
        assert_eq!(emitted, text, "canonical form should round-trip");
        let reparsed = parse_location(&emitted, &arch).unwrap();
        assert_eq!(reparsed, loc);
    }
}

#[test]
fn format_rejects_storage_free_kinds() {
    let arch = arch();
    assert!(location_to_string(&Location::ConstantValue, &arch).is_err());
    assert!(location_to_string(&Location::StructureRelative(4), &arch).is_err());
}
