//! Tests for the process-wide mapping registry.
//!
//! Kept in one test so that `reset_mappings` cannot race other lookups.

mod common;

use std::sync::Arc;
use std::thread;

use common::{Product, Ticket};
use synctrack_core::{mapping, mapping_with_flags, reset_mappings, CreateFlags};

#[test]
fn test_registry_lifecycle() {
    // cached per type
    let first = mapping::<Product>().unwrap();
    let second = mapping::<Product>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // same flags hit the cache, other flags rebuild and replace
    let implicit = mapping_with_flags::<Ticket>(CreateFlags::IMPLICIT_PK).unwrap();
    assert!(implicit.pk().is_some());
    let again = mapping_with_flags::<Ticket>(CreateFlags::IMPLICIT_PK).unwrap();
    assert!(Arc::ptr_eq(&implicit, &again));
    assert!(Arc::ptr_eq(&implicit, &mapping::<Ticket>().unwrap()));

    let plain = mapping_with_flags::<Ticket>(CreateFlags::NONE).unwrap();
    assert!(plain.pk().is_none());
    assert!(Arc::ptr_eq(&plain, &mapping::<Ticket>().unwrap()));

    // reset drops every entry; rebuilt mappings are equal
    reset_mappings();
    let rebuilt = mapping::<Product>().unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
    assert_eq!(**first.table(), **rebuilt.table());

    // concurrent first use converges on one mapping
    reset_mappings();
    let handles: Vec<_> = (0..8)
        .map(|_| thread::spawn(|| mapping::<Product>().unwrap()))
        .collect();
    let mappings: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let cached = mapping::<Product>().unwrap();
    assert!(mappings.iter().all(|m| Arc::ptr_eq(m, &cached)));
}
