//! Process-wide capability probe.
//!
//! Whether purgeable memory and its companion UXPT mapping work at all
//! depends on the running kernel, not just the target triple, so this
//! can't be a compile-time `cfg`. The probe maps a throwaway page of
//! each kind, requiring both to succeed, and tears both down before
//! reporting a verdict — the mappings exist only to be asked "did this
//! work", never to be used afterward.

use std::sync::OnceLock;

use crate::sys;

/// Tears down whatever raw mapping it holds on drop, regardless of which
/// branch of the probe got there. Mirrors the unconditional cleanup the
/// original capability check performs before returning, so a failed
/// second mapping can never leak the first.
struct ScopedMapping {
    ptr: *mut u8,
    len: usize,
}

impl Drop for ScopedMapping {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            let _ = sys::munmap(self.ptr, self.len);
        }
    }
}

fn probe_once() -> bool {
    let page = sys::page_size();

    let data = match sys::mmap_data(page, true) {
        Ok(ptr) => ScopedMapping { ptr, len: page },
        Err(_) => return false,
    };

    let uxpt = match sys::mmap_uxpt(page, 0) {
        Ok(ptr) => ScopedMapping { ptr, len: page },
        Err(_) => return false,
    };

    drop(uxpt);
    drop(data);
    true
}

/// Whether this process can use purgeable regions backed by a real
/// kernel UXPT, cached after the first call.
///
/// Callers should check this before calling [`crate::UxPageTable::init`]:
/// on a kernel without the extension, `init` itself fails, since it maps
/// the same `MAP_USEREXPTE` range this probe does. When the capability is
/// off, a region falls back to an ordinary private anonymous data
/// mapping with no UXPT at all and treats its content as always present.
pub fn is_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        let enabled = probe_once();
        if enabled {
            tracing::debug!("purgeable memory capability probe succeeded");
        } else {
            tracing::info!("purgeable memory capability probe failed; falling back to private anonymous mappings");
        }
        enabled
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_idempotent() {
        let first = is_enabled();
        let second = is_enabled();
        assert_eq!(first, second);
    }
}
