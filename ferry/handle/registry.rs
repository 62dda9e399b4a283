//! Debug-only registry of allocation addresses owned by a control block.
//!
//! Two control blocks owning one allocation would release it twice. Debug builds record every
//! owned address and panic when a second block claims it. Release builds compile to nothing.

#[cfg(debug_assertions)]
mod tracked {
    use hashbrown::HashSet;
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;

    static OWNED: Lazy<Mutex<HashSet<usize>>> = Lazy::new(|| Mutex::new(HashSet::new()));

    pub fn track(addr: usize, size: usize) -> usize {
        // Zero-sized allocations share dangling addresses
        if size == 0 {
            return 0;
        }

        if !OWNED.lock().insert(addr) {
            panic!("allocation {addr:#x} is already owned by another control block");
        }
        addr
    }

    pub fn untrack(addr: usize) {
        if addr != 0 {
            OWNED.lock().remove(&addr);
        }
    }

    #[cfg(test)]
    pub fn is_tracked(addr: usize) -> bool {
        OWNED.lock().contains(&addr)
    }
}

#[cfg(not(debug_assertions))]
mod tracked {
    #[inline]
    pub fn track(_addr: usize, _size: usize) -> usize {
        0
    }

    #[inline]
    pub fn untrack(_addr: usize) {}

    #[cfg(test)]
    pub fn is_tracked(_addr: usize) -> bool {
        false
    }
}

#[cfg(test)]
pub(crate) use tracked::is_tracked;
pub(crate) use tracked::{track, untrack};
