//! Single-descriptor CAS protocol.
//!
//! Every operation here is a lock-free retry loop over one
//! [`AtomicU64`]. The kernel writes the *present* bit out from under us
//! at any time (on reclaim, it clears it and sets the whole word to the
//! [`UNDER_RECLAIM`] sentinel while it works); everything else is user
//! space arithmetic on the refcount bits.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bit 0: present. Kernel-owned.
const PRESENT_MASK: u64 = 1;

/// Refcount is stored pre-shifted by one so it never collides with the
/// present bit; one "pin" is worth `REFCNT_ONE`, not `1`.
const REFCNT_ONE: u64 = 2;

/// All bits set except bit 0. Not a reachable refcount (it would take
/// 2^63 concurrent pins), so it's safe to reserve as the kernel's
/// mid-reclaim marker.
const UNDER_RECLAIM: u64 = !1u64;

/// A decoded view of one descriptor word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PteState {
    /// The kernel is mid-reclaim on this page; callers must back off and
    /// retry rather than act on stale present/refcount data.
    UnderReclaim,
    /// A stable descriptor: `present` reflects whether the backing page
    /// currently holds kernel-populated content, `refs` is the number of
    /// outstanding pins.
    Live { present: bool, refs: u64 },
}

fn decode(raw: u64) -> PteState {
    if raw == UNDER_RECLAIM {
        PteState::UnderReclaim
    } else {
        PteState::Live {
            present: raw & PRESENT_MASK != 0,
            refs: raw >> 1,
        }
    }
}

/// Borrowed handle to one descriptor slot within a mapped [`super::UxPageTable`].
pub(crate) struct Pte<'a> {
    word: &'a AtomicU64,
}

impl<'a> Pte<'a> {
    pub(crate) fn new(word: &'a AtomicU64) -> Self {
        Pte { word }
    }

    pub(crate) fn load(&self) -> PteState {
        decode(self.word.load(Ordering::SeqCst))
    }

    fn cas_loop(&self, mut f: impl FnMut(bool, u64) -> u64) -> PteState {
        loop {
            let raw = self.word.load(Ordering::SeqCst);
            if raw == UNDER_RECLAIM {
                std::thread::yield_now();
                continue;
            }
            let present = raw & PRESENT_MASK != 0;
            let refs = raw >> 1;
            let new_raw = f(present, refs);
            match self.word.compare_exchange_weak(
                raw,
                new_raw,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return decode(new_raw),
                Err(_) => continue,
            }
        }
    }

    /// Adds one pin, preserving whatever the present bit currently reads
    /// as. Retries if the kernel is mid-reclaim. If the refcount is
    /// already at its maximum, the page is silently left at its current
    /// count rather than wrapping.
    pub(crate) fn add(&self) -> PteState {
        self.cas_loop(|present, refs| {
            let next = refs.checked_add(1).unwrap_or(refs);
            (next << 1) | present as u64
        })
    }

    /// Removes one pin. Saturates at zero rather than underflowing: a
    /// caller that unpins more times than it pinned is a bug elsewhere,
    /// not something this layer should panic over.
    pub(crate) fn sub(&self) -> PteState {
        self.cas_loop(|present, refs| (refs.saturating_sub(1) << 1) | present as u64)
    }

    /// Resets the descriptor to the empty state: not present, no pins.
    /// Used when tearing down a table or discarding a page's content.
    pub(crate) fn clear(&self) -> PteState {
        self.cas_loop(|_present, _refs| 0)
    }
}
