//! Raw `mmap(2)` flag bits consumed, not defined, by this crate.
//!
//! `MAP_PURGEABLE` and `MAP_USEREXPTE` are not part of upstream Linux's
//! uapi headers: they are the two kernel extensions this entire subsystem
//! is built on top of. Hosts that lack them simply fail the second `mmap`
//! in [`crate::probe`], and the capability flips off; see the crate's
//! Non-goals around portability. The bit positions below match the
//! reference kernel patch this crate targets; a host carrying a different
//! patch revision would need to adjust them, which is why they live in one
//! place.
#[cfg(unix)]
pub(crate) const MAP_PURGEABLE: i32 = 0x0004_0000;
#[cfg(unix)]
pub(crate) const MAP_USEREXPTE: i32 = 0x0008_0000;
