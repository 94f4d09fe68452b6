use std::{path::Path, str::FromStr};

use bigdecimal::BigDecimal;
use irvmodel::{
    constraints::{ConstraintRecord, manager::PlacementConstraintManager},
    geometry::{BoundingBox, Geometry},
    hierarchy::Hierarchy,
    macros::Macro,
    tech::{Alignment, Direction, Stackup, TechMetalLayer, check_alignment},
};

// Helpers
fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn single_layer(pitch: &str) -> Stackup {
    Stackup::new(vec![
        TechMetalLayer::new("M1", Direction::Horizontal, dec(pitch)).unwrap(),
    ])
}

#[test]
fn grid_examples_for_one_horizontal_layer() {
    let p = dec("0.14");
    let stackup = single_layer("0.14");
    let width = &p * BigDecimal::from(2);

    let on_grid = BoundingBox::new(dec("0"), dec("0.05"), width.clone(), dec("1"));
    assert_eq!(check_alignment(&on_grid, Some(&stackup)), Alignment::Aligned);

    let off_grid = BoundingBox::new(dec("1"), dec("0"), width, dec("1"));
    assert_eq!(
        check_alignment(&off_grid, Some(&stackup)),
        Alignment::Misaligned(vec!["M1".into()])
    );

    assert_eq!(check_alignment(&on_grid, None), Alignment::Unknown);
    assert_eq!(
        check_alignment(&on_grid, Some(&Stackup::default())),
        Alignment::Unknown
    );
}

#[test]
fn checks_are_repeatable() {
    let stackup = single_layer("0.2");
    let bbox = BoundingBox::new(dec("0.3"), dec("0"), dec("1"), dec("1"));
    let first = check_alignment(&bbox, Some(&stackup));
    for _ in 0..3 {
        assert_eq!(check_alignment(&bbox, Some(&stackup)), first);
    }
}

#[test]
fn constraints_follow_geometry_and_stackup_changes() {
    let manager = PlacementConstraintManager::default();
    let mut hierarchy = Hierarchy::default();
    hierarchy.register_source(
        Path::new("top.sv"),
        "module top(); sram_1k u_mem(); endmodule",
    );
    hierarchy.resolve_instances();

    let outline = manager
        .deserialize(
            &ConstraintRecord::new("top", "toplevel")
                .with_position(dec("0"), dec("0"))
                .with_size(dec("100"), dec("80")),
            &mut hierarchy,
        )
        .unwrap();
    let mem = manager
        .deserialize(
            &ConstraintRecord::new("top/u_mem", "hardmacro").with_position(dec("10.1"), dec("10")),
            &mut hierarchy,
        )
        .unwrap();

    assert!(hierarchy.constraint(outline).unwrap().alignment().is_unknown());
    hierarchy.set_stackup(Some(single_layer("0.2")));
    assert!(hierarchy.constraint(outline).unwrap().alignment().is_aligned());
    // Width still unknown until the macro is bound.
    assert!(hierarchy.constraint(mem).unwrap().alignment().is_unknown());

    hierarchy
        .macros_mut()
        .insert(Macro::new("sram_1k", dec("30"), dec("20")));
    hierarchy.resolve_pending();
    let constraint = hierarchy.constraint(mem).unwrap();
    assert_eq!(constraint.failing_layers(), ["M1".to_string()]);

    hierarchy
        .set_constraint_geometry(mem, Geometry::new(dec("10"), dec("10"), None, None))
        .unwrap();
    assert!(hierarchy.constraint(mem).unwrap().alignment().is_aligned());

    let top = hierarchy.module_key("top").unwrap();
    let order: Vec<_> = hierarchy.constraints_of(top).map(|(key, _)| key).collect();
    assert_eq!(order, [outline, mem]);
}

#[test]
fn top_module_selection() {
    let mut hierarchy = Hierarchy::default();
    hierarchy.register_source(
        Path::new("d.sv"),
        "module chip(); block b0(); endmodule\nmodule block(); endmodule",
    );
    hierarchy.resolve_instances();

    let chip = hierarchy.module_key("chip").unwrap();
    assert_eq!(hierarchy.candidate_tops(), [chip]);
    assert_eq!(hierarchy.top_module(), None);
    assert_eq!(hierarchy.set_top_module_by_name("chip").unwrap(), chip);
    assert_eq!(hierarchy.top_module(), Some(chip));

    hierarchy.remove_module("chip");
    assert_eq!(hierarchy.top_module(), None);
}
