use super::*;
use proptest::prelude::*;
use std::collections::HashSet;

fn server() -> (wayland_server::Display<ServerState>, ServerState) {
    let display = wayland_server::Display::<ServerState>::new().expect("display");
    let state = ServerState::new(display.handle(), 8192);
    (display, state)
}

fn positions(manager: &VirtualDesktopManagementInterface) -> Vec<(String, Cell)> {
    let mut positions: Vec<(String, Cell)> = manager
        .desktops()
        .map(|d| (d.id().to_string(), d.layout_position()))
        .collect();
    positions.sort();
    positions
}

fn cell(manager: &VirtualDesktopManagementInterface, id: &str) -> Cell {
    manager.desktop(id).expect("desktop").layout_position()
}

#[test]
fn test_single_row_layout_and_reposition() {
    let (_display, mut state) = server();
    let manager = state.create_virtual_desktop_management(1);
    for id in ["a", "b", "c"] {
        manager.create_desktop(id);
    }

    assert_eq!((manager.rows(), manager.columns()), (1, 3));
    assert_eq!(cell(manager, "a"), (0, 0));
    assert_eq!(cell(manager, "b"), (0, 1));
    assert_eq!(cell(manager, "c"), (0, 2));

    manager.set_layout_position("c", 0, 0);

    assert_eq!(cell(manager, "a"), (0, 1));
    assert_eq!(cell(manager, "b"), (0, 2));
    assert_eq!(cell(manager, "c"), (0, 0));

    let order: Vec<&str> = manager.desktops().map(|d| d.id()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[test]
fn test_reposition_into_middle() {
    let (_display, mut state) = server();
    let manager = state.create_virtual_desktop_management(1);
    for id in ["a", "b", "c"] {
        manager.create_desktop(id);
    }

    manager.set_layout_position("c", 0, 1);

    assert_eq!(cell(manager, "a"), (0, 0));
    assert_eq!(cell(manager, "c"), (0, 1));
    assert_eq!(cell(manager, "b"), (0, 2));
}

#[test]
fn test_two_rows_fill_row_major() {
    let (_display, mut state) = server();
    let manager = state.create_virtual_desktop_management(2);
    for id in ["a", "b", "c", "d", "e"] {
        manager.create_desktop(id);
    }

    assert_eq!(manager.columns(), 3);
    assert_eq!(cell(manager, "a"), (0, 0));
    assert_eq!(cell(manager, "b"), (0, 1));
    assert_eq!(cell(manager, "c"), (0, 2));
    assert_eq!(cell(manager, "d"), (1, 0));
    assert_eq!(cell(manager, "e"), (1, 1));
}

#[test]
fn test_create_existing_returns_it() {
    let (_display, mut state) = server();
    let manager = state.create_virtual_desktop_management(1);
    manager.create_desktop("a");
    manager.set_name("a", "Work");

    let again = manager.create_desktop("a");
    assert_eq!(again.name(), "Work");
    assert_eq!(manager.len(), 1);
}

#[test]
fn test_first_desktop_is_active() {
    let (_display, mut state) = server();
    let manager = state.create_virtual_desktop_management(1);
    assert!(manager.active_desktop().is_none());

    manager.create_desktop("a");
    manager.create_desktop("b");

    assert_eq!(manager.active_desktop().map(|d| d.id()), Some("a"));
    assert!(!manager.desktop("b").unwrap().is_active());
}

#[test]
fn test_activation_moves_flag() {
    let (_display, mut state) = server();
    let manager = state.create_virtual_desktop_management(1);
    manager.create_desktop("a");
    manager.create_desktop("b");

    assert!(manager.set_active_desktop("b"));
    assert_eq!(manager.active_desktop().map(|d| d.id()), Some("b"));
    assert!(!manager.desktop("a").unwrap().is_active());

    assert!(!manager.set_active_desktop("zz"));
    assert_eq!(manager.active_desktop().map(|d| d.id()), Some("b"));
}

#[test]
fn test_remove_closes_gap() {
    let (_display, mut state) = server();
    let manager = state.create_virtual_desktop_management(1);
    for id in ["a", "b", "c"] {
        manager.create_desktop(id);
    }

    assert!(manager.remove_desktop("b"));
    assert!(!manager.remove_desktop("b"));

    assert_eq!(manager.columns(), 2);
    assert_eq!(cell(manager, "a"), (0, 0));
    assert_eq!(cell(manager, "c"), (0, 1));
}

#[test]
fn test_removing_active_desktop_activates_first_remaining() {
    let (_display, mut state) = server();
    let manager = state.create_virtual_desktop_management(1);
    for id in ["a", "b", "c"] {
        manager.create_desktop(id);
    }

    manager.remove_desktop("a");
    assert_eq!(manager.active_desktop().map(|d| d.id()), Some("b"));

    manager.remove_desktop("b");
    manager.remove_desktop("c");
    assert!(manager.active_desktop().is_none());
    assert_eq!(manager.columns(), 0);
}

#[test]
fn test_set_rows() {
    let (_display, mut state) = server();
    let manager = state.create_virtual_desktop_management(1);
    for id in ["a", "b", "c", "d"] {
        manager.create_desktop(id);
    }

    manager.set_rows(0);
    assert_eq!((manager.rows(), manager.columns()), (1, 4));

    manager.set_rows(2);
    assert_eq!((manager.rows(), manager.columns()), (2, 2));
    assert_eq!(
        positions(manager),
        vec![
            ("a".to_string(), (0, 0)),
            ("b".to_string(), (0, 1)),
            ("c".to_string(), (1, 0)),
            ("d".to_string(), (1, 1)),
        ]
    );
}

#[test]
fn test_names() {
    let (_display, mut state) = server();
    let manager = state.create_virtual_desktop_management(1);
    manager.create_desktop("a");
    assert_eq!(manager.desktop("a").unwrap().name(), "");

    manager.set_name("a", "Mail");
    assert_eq!(manager.desktop("a").unwrap().name(), "Mail");

    // Unknown ids are ignored
    manager.set_name("nope", "Ghost");
    assert!(manager.desktop("nope").is_none());
}

#[test]
fn test_create_after_reposition_keeps_cells_unique() {
    let (_display, mut state) = server();
    let manager = state.create_virtual_desktop_management(2);
    for id in ["a", "b", "c", "d"] {
        manager.create_desktop(id);
    }
    // Column count never changes below, so the new desktop's default slot is reused
    manager.set_layout_position("a", 1, 1);
    manager.remove_desktop("d");
    manager.create_desktop("e");

    let cells: HashSet<Cell> = manager.desktops().map(|d| d.layout_position()).collect();
    assert_eq!(cells.len(), manager.len());
}

#[derive(Debug, Clone)]
enum Op {
    Create(u8),
    Remove(u8),
    Reposition(u8, u32, u32),
    SetRows(u32),
    Activate(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..8).prop_map(Op::Create),
        1 => (0u8..8).prop_map(Op::Remove),
        2 => (0u8..8, 0u32..4, 0u32..5).prop_map(|(d, r, c)| Op::Reposition(d, r, c)),
        1 => (0u32..4).prop_map(Op::SetRows),
        1 => (0u8..8).prop_map(Op::Activate),
    ]
}

proptest! {
    #[test]
    fn test_grid_invariants_hold(rows in 1u32..4, ops in prop::collection::vec(op(), 1..40)) {
        let (_display, mut state) = server();
        let manager = state.create_virtual_desktop_management(rows);

        for op in ops {
            match op {
                Op::Create(d) => { manager.create_desktop(format!("d{}", d)); }
                Op::Remove(d) => { manager.remove_desktop(&format!("d{}", d)); }
                Op::Reposition(d, r, c) => manager.set_layout_position(&format!("d{}", d), r, c),
                Op::SetRows(r) => manager.set_rows(r),
                Op::Activate(d) => { manager.set_active_desktop(&format!("d{}", d)); }
            }

            let count = manager.len() as u32;
            prop_assert!(manager.rows() >= 1);
            prop_assert_eq!(manager.columns(), count.div_ceil(manager.rows()));

            let cells: HashSet<Cell> = manager.desktops().map(|d| d.layout_position()).collect();
            prop_assert_eq!(cells.len(), manager.len());

            let active = manager.desktops().filter(|d| d.is_active()).count();
            prop_assert_eq!(active, usize::from(!manager.is_empty()));
        }
    }
}
