//! Live instance tracking for leak reports.
//!
//! Enabled with `OXITYPE_DEBUG=objects` or
//! [`set_debug_objects`](crate::config::set_debug_objects). Only instances
//! created while tracking is on are recorded.

use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::runtime::types::Type;

static LIVE: Mutex<Option<FxHashMap<usize, Type>>> = Mutex::new(None);

pub(crate) fn track(addr: usize, ty: Type) {
    LIVE.lock().get_or_insert_with(FxHashMap::default).insert(addr, ty);
}

pub(crate) fn untrack(addr: usize) {
    if let Some(live) = LIVE.lock().as_mut() {
        live.remove(&addr);
    }
}

/// Number of tracked instances still alive.
pub fn live_instance_count() -> usize {
    LIVE.lock().as_ref().map_or(0, FxHashMap::len)
}

/// Addresses and types of the tracked instances still alive.
pub fn live_instances() -> Vec<(usize, Type)> {
    let mut live: Vec<_> = LIVE
        .lock()
        .as_ref()
        .map(|m| m.iter().map(|(a, t)| (*a, *t)).collect())
        .unwrap_or_default();
    live.sort_unstable_by_key(|(addr, _)| *addr);
    live
}

/// Logs one warning per live tracked instance. Returns how many there are.
pub fn report_leaks() -> usize {
    let live = live_instances();
    for (addr, ty) in &live {
        oxitype_log::warn!("leaked instance of '{}' at {:#x}", ty.name(), addr);
    }
    if !live.is_empty() {
        oxitype_log::info!("{} instance(s) still alive", live.len());
    }
    live.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_untrack() {
        // Fake addresses far from any real allocation.
        let base = usize::MAX - 0x1000;
        track(base, Type::OBJECT);
        track(base + 8, Type::INITIALLY_UNOWNED);
        let live = live_instances();
        assert!(live.contains(&(base, Type::OBJECT)));
        assert!(live.contains(&(base + 8, Type::INITIALLY_UNOWNED)));

        untrack(base);
        untrack(base + 8);
        assert!(!live_instances().iter().any(|(a, _)| *a >= base));
    }
}
