//! Unit tests for worker memory introspection.

use fork_session::worker::memory::MemoryProbe;

const MIB: u64 = 1024 * 1024;

/// The configured limit is reported in bytes.
#[test]
fn limit_is_reported_as_max() {
    let probe = MemoryProbe::new(Some(64));
    assert_eq!(probe.max_memory(), 64 * MIB);
}

/// The running process always uses some memory.
#[test]
fn total_memory_is_nonzero() {
    let probe = MemoryProbe::new(None);
    assert!(probe.total_memory() > 0);
}

/// Headroom never exceeds the limit.
#[test]
fn free_memory_is_bounded_by_max() {
    let probe = MemoryProbe::new(Some(1024));
    assert!(probe.free_memory() <= probe.max_memory());
}

/// A limit smaller than current usage leaves no headroom.
#[test]
fn tiny_limit_saturates_to_zero_free() {
    let probe = MemoryProbe::new(Some(1));
    if probe.total_memory() > MIB {
        assert_eq!(probe.free_memory(), 0);
    }
}

/// Without a limit the physical memory is the ceiling.
#[test]
fn no_limit_falls_back_to_physical_memory() {
    let probe = MemoryProbe::new(None);
    assert!(probe.max_memory() >= probe.total_memory());
}
