//! Live-object registry
//!
//! When the `ref-count-map` feature is enabled, every heap allocation the VM
//! makes is recorded here and removed again when it is destroyed. A
//! well-formed program ends with an empty registry (modulo reference cycles,
//! which the language admits and never collects); `deva --debug-dump` prints
//! whatever is left so leaks can be tracked down.
//!
//! With the feature off, every call compiles to nothing.

#[cfg(feature = "ref-count-map")]
mod imp {
    use std::cell::RefCell;
    use std::collections::HashMap;

    thread_local! {
        static LIVE: RefCell<HashMap<usize, &'static str>> = RefCell::new(HashMap::new());
    }

    pub fn track(kind: &'static str, addr: usize) {
        LIVE.with(|m| {
            m.borrow_mut().insert(addr, kind);
        });
    }

    pub fn forget(addr: usize) {
        LIVE.with(|m| {
            m.borrow_mut().remove(&addr);
        });
    }

    pub fn live_count() -> usize {
        LIVE.with(|m| m.borrow().len())
    }

    /// (kind, count) pairs for everything still alive, sorted by kind.
    pub fn report() -> Vec<(&'static str, usize)> {
        LIVE.with(|m| {
            let mut counts: HashMap<&'static str, usize> = HashMap::new();
            for kind in m.borrow().values() {
                *counts.entry(kind).or_insert(0) += 1;
            }
            let mut out: Vec<_> = counts.into_iter().collect();
            out.sort();
            out
        })
    }

    pub fn reset() {
        LIVE.with(|m| m.borrow_mut().clear());
    }
}

#[cfg(not(feature = "ref-count-map"))]
mod imp {
    pub fn track(_kind: &'static str, _addr: usize) {}
    pub fn forget(_addr: usize) {}
    pub fn live_count() -> usize {
        0
    }
    pub fn report() -> Vec<(&'static str, usize)> {
        Vec::new()
    }
    pub fn reset() {}
}

pub use imp::{forget, live_count, report, reset, track};

#[cfg(all(test, feature = "ref-count-map"))]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_forget() {
        reset();
        track("vector", 0x1000);
        track("map", 0x2000);
        assert_eq!(live_count(), 2);
        forget(0x1000);
        assert_eq!(live_count(), 1);
        assert_eq!(report(), vec![("map", 1)]);
        reset();
    }
}
