//! End-to-end scenarios from spec §8, run against the hand-built fixture in
//! `tests/common`: enumerator lookup, variable-to-memory resolution, type
//! lookup, DIE-ancestor reconstruction and PC-scope resolution.

mod common;

use common::*;
use dwarf_core::consts::{DW_TAG_ENUMERATION_TYPE, DW_TAG_ENUMERATOR, DW_TAG_VARIABLE};
use dwarf_core::die::{Dwarf, Die};
use dwarf_core::object::ObjectLocation;
use dwarf_core::types::TypeKind;
use dwarf_core::{ObjectFlags, Session, TypeSearchKind};

fn fixture_module() -> (FakeModule, FixtureDies) {
    let (debug_info, debug_abbrev, dies) = build_fixture();
    (
        FakeModule {
            debug_info,
            debug_abbrev,
            platform: FakePlatform {
                address_size: 8,
                little_endian: true,
            },
        },
        dies,
    )
}

#[test]
fn enumerator_lookup_yields_int_typed_constant() {
    let (module, dies) = fixture_module();
    let dwarf = Dwarf::from_module(&module).unwrap();
    let index = FakeIndex::new().with(&[], "GREEN", DW_TAG_ENUMERATOR, dies.enumerator_green);
    let session = Session::new(&dwarf, &module, &index, 0);

    let flags = ObjectFlags {
        constant: true,
        function: false,
        variable: false,
    };
    let obj = session.find_object("GREEN", None, flags, None, None).unwrap();

    assert_eq!(obj.bit_size, 32);
    match obj.location {
        ObjectLocation::Value(bytes) => assert_eq!(bytes, vec![1, 0, 0, 0]),
        _ => panic!("expected a Value location for an enumerator constant"),
    }
}

#[test]
fn variable_lookup_resolves_to_its_memory_address() {
    let (module, dies) = fixture_module();
    let dwarf = Dwarf::from_module(&module).unwrap();
    let index = FakeIndex::new().with(&[], "g", DW_TAG_VARIABLE, dies.variable_g);
    let session = Session::new(&dwarf, &module, &index, 0);
    let memory = FakeMemory::new();

    let flags = ObjectFlags {
        constant: false,
        function: false,
        variable: true,
    };
    let obj = session.find_object("g", None, flags, None, Some(&memory)).unwrap();

    match obj.location {
        ObjectLocation::Memory { address } => assert_eq!(address, VARIABLE_G_ADDRESS),
        _ => panic!("expected a Memory location for a plain DW_OP_addr expression"),
    }
}

#[test]
fn find_type_locates_enum_definition_by_name() {
    let (module, dies) = fixture_module();
    let dwarf = Dwarf::from_module(&module).unwrap();
    let index = FakeIndex::new().with(&[], "Color", DW_TAG_ENUMERATION_TYPE, dies.color_enum);
    let session = Session::new(&dwarf, &module, &index, 0);

    let qt = session.find_type(TypeSearchKind::Enum, "Color", None).unwrap();
    match &qt.ty.kind {
        TypeKind::Enum(e) => {
            assert_eq!(e.tag_name.as_deref(), Some("Color"));
            assert_eq!(e.enumerators.len(), 3);
            assert_eq!(e.enumerators[1].name.as_ref(), "GREEN");
            assert_eq!(e.enumerators[1].value, 1);
        }
        _ => panic!("expected an enum type"),
    }
}

#[test]
fn qualified_name_namespace_prefix_is_consulted() {
    let (module, dies) = fixture_module();
    let dwarf = Dwarf::from_module(&module).unwrap();
    let index = FakeIndex::new().with(&["Outer"], "Color", DW_TAG_ENUMERATION_TYPE, dies.color_enum);
    let session = Session::new(&dwarf, &module, &index, 0);

    assert!(session.find_type(TypeSearchKind::Enum, "Color", None).is_err());
    assert!(session.find_type(TypeSearchKind::Enum, "Outer::Color", None).is_ok());
}

#[test]
fn find_die_ancestors_returns_root_to_target_chain() {
    let (module, dies) = fixture_module();
    let dwarf = Dwarf::from_module(&module).unwrap();
    let index = FakeIndex::new();
    let session = Session::new(&dwarf, &module, &index, 0);

    let target = Die {
        unit: 0,
        offset: dies.enumerator_green,
    };
    let chain = session.find_die_ancestors(target).unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[0].offset, dies.cu);
    assert_eq!(chain[1].offset, dies.color_enum);
    assert_eq!(chain[2].offset, dies.enumerator_green);
}

#[test]
fn find_dwarf_scopes_always_includes_the_compile_unit() {
    let (module, dies) = fixture_module();
    let dwarf = Dwarf::from_module(&module).unwrap();
    let index = FakeIndex::new();
    let session = Session::new(&dwarf, &module, &index, 0);

    let (bias, scopes) = session.find_dwarf_scopes(0x1234).unwrap();
    assert_eq!(bias, 0);
    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes[0].offset, dies.cu);
}
