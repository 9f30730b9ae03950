//! Stub Indirection Tests
//!
//! Field access through stubs: round trips, swap-in on first touch, kernel
//! fault-in, and failure propagation.

mod common;

use common::{assert_direct, assert_stub, FailingBackend, SwapFixture};
use reclaim::object::FieldOffset;
use reclaim::swap::FaultOutcome;
use reclaim::table::EntryState;
use reclaim::ReclaimError;
use std::sync::Arc;

// ============================================================================
// ROUND TRIPS
// ============================================================================

/// **Invariant verified:** a value set through a stub reads back, and the
/// entry is resident afterwards
#[test]
fn test_stub_set_get_round_trip() {
    let fixture = SwapFixture::new();
    let cx = fixture.runtime.context();
    let address = fixture.object_with_words(4, 10);
    let handle = fixture.swap_out(address);

    let entry = cx.table().entry(handle).unwrap();
    assert_eq!(entry.state(), EntryState::NonResident);
    assert!(entry.page_count() >= 1);
    assert_eq!(entry.stub_back_pointer(), address.raw());

    let object = fixture.runtime.object(address).unwrap();
    object.set_field_64(cx, FieldOffset::of_word(2), -5).unwrap();
    assert_eq!(object.get_field_64(cx, FieldOffset::of_word(2)).unwrap(), -5);
    assert_eq!(object.get_field_64(cx, FieldOffset::of_word(3)).unwrap(), 13);

    assert!(entry.resident_bit());
    assert_eq!(entry.state(), EntryState::Resident);
    assert_ne!(entry.object_address(), 0);
    assert_eq!(entry.app_lock_counter(), 3);
    assert_stub(&fixture.runtime, address);
}

/// **Invariant verified:** a handle taken before swap-out redirects through
/// the stub afterwards, so its writes land in the authoritative copy
#[test]
fn test_handle_held_across_swap_out() {
    let fixture = SwapFixture::new();
    let cx = fixture.runtime.context();
    let address = fixture.object_with_words(2, 5);
    let held = fixture.runtime.object(address).unwrap();
    assert!(!held.is_stub());

    let handle = fixture.swap_out(address);
    assert!(held.is_stub());
    assert_eq!(held.as_stub().unwrap().entry(), handle);

    held.set_field_64(cx, FieldOffset::of_word(0), 99).unwrap();
    assert_eq!(fixture.read_word(address, 0).unwrap(), 99);
    assert_eq!(held.get_field_64(cx, FieldOffset::of_word(1)).unwrap(), 6);

    let entry = cx.table().entry(handle).unwrap();
    assert!(entry.resident_bit());
    assert_eq!(entry.app_lock_counter(), 3);
    assert_eq!(cx.stats().swap_ins(), 1);
}

/// Mixed widths stay within their own bytes through the stub
#[test]
fn test_narrow_fields_through_stub() {
    let fixture = SwapFixture::new();
    let cx = fixture.runtime.context();
    let address = fixture.object_with_words(2, 0);
    fixture.swap_out(address);
    let object = fixture.runtime.object(address).unwrap();

    object.set_field_byte(cx, FieldOffset::new(0), -1).unwrap();
    object.set_field_boolean(cx, FieldOffset::new(1), true).unwrap();
    object.set_field_char(cx, FieldOffset::new(2), 0xbeef).unwrap();
    object.set_field_32_volatile(cx, FieldOffset::new(4), 77).unwrap();
    object.set_field_f64(cx, FieldOffset::new(8), 2.5).unwrap();

    assert_eq!(object.get_field_byte(cx, FieldOffset::new(0)).unwrap(), -1);
    assert!(object.get_field_boolean_volatile(cx, FieldOffset::new(1)).unwrap());
    assert_eq!(object.get_field_char(cx, FieldOffset::new(2)).unwrap(), 0xbeef);
    assert_eq!(object.get_field_32(cx, FieldOffset::new(4)).unwrap(), 77);
    assert_eq!(object.get_field_f64_volatile(cx, FieldOffset::new(8)).unwrap(), 2.5);
}

#[test]
fn test_references_through_stub() {
    let fixture = SwapFixture::new();
    let cx = fixture.runtime.context();
    let holder = fixture.node(2);
    let target = fixture.object_with_words(1, 1);
    fixture.link(holder, 0, Some(target));
    fixture.swap_out(holder);

    let object = fixture.runtime.object(holder).unwrap();
    assert_eq!(object.get_field_object(cx, FieldOffset::of_word(0)).unwrap(), Some(target));
    assert_eq!(object.get_field_object(cx, FieldOffset::of_word(1)).unwrap(), None);

    assert!(object
        .cas_field_object(cx, FieldOffset::of_word(1), None, Some(holder))
        .unwrap());
    let old = object
        .exchange_field_object(cx, FieldOffset::of_word(0), None)
        .unwrap();
    assert_eq!(old, Some(target));

    let mut seen = Vec::new();
    object
        .visit_references(cx, |offset, reference| seen.push((offset.value(), reference)))
        .unwrap();
    assert_eq!(seen, vec![(0, None), (8, Some(holder))]);
}

/// Direct objects never consult the table
#[test]
fn test_direct_object_has_no_entry() {
    let fixture = SwapFixture::new();
    let address = fixture.object_with_words(2, 3);
    assert_direct(&fixture.runtime, address);
    assert_eq!(fixture.read_word(address, 1).unwrap(), 4);
    assert_eq!(fixture.runtime.context().stats().stub_accesses(), 0);
    assert!(fixture.runtime.context().entry_for(address).is_none());
}

// ============================================================================
// KERNEL ROLE
// ============================================================================

/// **Bug this finds:** a mutator re-reading storage the kernel already populated
#[test]
fn test_fault_in_then_access_reads_once() {
    let backend = Arc::new(FailingBackend::new());
    let fixture = SwapFixture::with_backend(backend.clone());
    let address = fixture.object_with_words(3, 40);
    let handle = fixture.swap_out(address);

    assert_eq!(fixture.runtime.fault_in(address).unwrap(), FaultOutcome::Populated);
    assert_eq!(
        fixture.runtime.fault_in(address).unwrap(),
        FaultOutcome::AlreadyResident
    );
    assert_eq!(backend.reads(), 1);

    assert_eq!(fixture.read_word(address, 2).unwrap(), 42);
    assert_eq!(backend.reads(), 1);

    let entry = fixture.runtime.context().table().entry(handle).unwrap();
    assert!(!entry.kernel_lock_bit());
    assert_eq!(fixture.runtime.context().stats().kernel_swap_ins(), 1);
}

#[test]
fn test_fault_in_busy_while_kernel_holds_entry() {
    let fixture = SwapFixture::new();
    let address = fixture.object_with_words(1, 0);
    let handle = fixture.swap_out(address);
    let entry = fixture.runtime.context().table().entry(handle).unwrap();

    assert!(entry.try_kernel_lock());
    assert_eq!(fixture.runtime.fault_in(address).unwrap(), FaultOutcome::Busy);
    entry.kernel_unlock();
    assert_eq!(fixture.runtime.fault_in(address).unwrap(), FaultOutcome::Populated);
}

// ============================================================================
// FAILURES
// ============================================================================

/// **Invariant verified:** a failed swap-in releases the handshake and
/// leaves the entry non-resident, so a later access retries
#[test]
fn test_swap_in_failure_then_retry() {
    let backend = Arc::new(FailingBackend::new());
    let fixture = SwapFixture::with_backend(backend.clone());
    let address = fixture.object_with_words(2, 8);
    let handle = fixture.swap_out(address);

    backend.fail_reads(true);
    let err = fixture.read_word(address, 0).unwrap_err();
    assert!(matches!(err, ReclaimError::SwapInFailed { entry, .. } if entry == handle.index()));

    let entry = fixture.runtime.context().table().entry(handle).unwrap();
    assert_eq!(entry.state(), EntryState::NonResident);
    assert_eq!(entry.app_lock_counter(), 1);
    assert_eq!(fixture.runtime.context().stats().swap_in_failures(), 1);

    backend.fail_reads(false);
    assert_eq!(fixture.read_word(address, 1).unwrap(), 9);
    assert_eq!(entry.state(), EntryState::Resident);
    assert_eq!(backend.reads(), 2);
}

/// A rejected write leaves the object direct and the table empty
#[test]
fn test_swap_out_failure_releases_entry() {
    let backend = Arc::new(FailingBackend::new());
    let fixture = SwapFixture::with_backend(backend.clone());
    let address = fixture.object_with_words(2, 0);

    backend.fail_writes(true);
    let err = fixture.runtime.swap_out(address).unwrap_err();
    assert!(matches!(err, ReclaimError::SwapOutFailed { .. }));
    assert_direct(&fixture.runtime, address);
    assert_eq!(fixture.runtime.context().table().occupied_count(), 0);
    assert_eq!(fixture.runtime.context().bound_count(), 0);
}

#[test]
fn test_out_of_bounds_access_through_stub() {
    let fixture = SwapFixture::new();
    let address = fixture.object_with_words(1, 0);
    let handle = fixture.swap_out(address);

    let err = fixture.read_word(address, 4).unwrap_err();
    assert!(matches!(err, ReclaimError::FieldOutOfBounds { .. }));
    assert_eq!(fixture.counter(handle), 1);
}

#[test]
fn test_table_full_is_recoverable() {
    let fixture = SwapFixture::with_config(reclaim::SwapConfig {
        table_entries: 2,
        ..common::test_config()
    });
    let objects: Vec<_> = (0..3).map(|i| fixture.object_with_words(1, i)).collect();
    fixture.swap_out(objects[0]);
    fixture.swap_out(objects[1]);

    let err = fixture.runtime.swap_out(objects[2]).unwrap_err();
    assert!(matches!(err, ReclaimError::TableFull { capacity: 2 }));
    assert!(err.is_recoverable());
    assert_direct(&fixture.runtime, objects[2]);
}
