//! Purgeable memory regions.
//!
//! A [`Region`] is an anonymous memory mapping the kernel may silently
//! depopulate under memory pressure, paired with a companion
//! [UXPT](purgemem_uxpt) that detects reclamation via an atomic
//! refcounted descriptor per page. A read or write session transparently
//! rebuilds lost content, exactly once, even when multiple readers
//! observe the purge concurrently.
//!
//! ```no_run
//! let region = purgemem::Region::create(4096, |buf| {
//!     buf.fill(0x5A);
//!     true
//! }).expect("create region");
//!
//! let read = region.begin_read().expect("begin read session");
//! assert_eq!(read.content()[0], 0x5A);
//! read.end();
//! ```

mod builder;
mod config;
mod error;
mod mmap;
mod region;

pub use config::ContentSize;
pub use error::PurgeMemError;
pub use region::{ReadGuard, Region, WriteGuard};

/// Whether this process can back regions with real kernel-purgeable
/// mappings. When `false`, regions still work, but fall back to an
/// ordinary private anonymous mapping that the kernel never reclaims on
/// its own; content is only ever rebuilt on first use.
pub fn is_enabled() -> bool {
    purgemem_uxpt::is_enabled()
}
