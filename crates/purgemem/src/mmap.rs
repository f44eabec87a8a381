use std::mem::ManuallyDrop;

use crate::error::PurgeMemError;

/// RAII handle to the raw data mapping backing a region.
///
/// The actual `mmap`/`munmap` calls, and the non-upstream
/// `MAP_PURGEABLE` flag bit, live in `purgemem-internal-uxpt` — the
/// crate that already owns the sibling `MAP_USEREXPTE` bit for exactly
/// the same reason. This type is a thin safe wrapper that turns the raw
/// pointer into a `&mut [u8]` view and unmaps on drop.
pub(crate) struct DataMapping {
    ptr: *mut u8,
    len: usize,
}

impl DataMapping {
    /// Maps `len` bytes, rounded up to a whole page, as purgeable
    /// anonymous memory if `purgeable` is true and the host supports it,
    /// else as ordinary private anonymous memory.
    pub(crate) fn new(len: usize, purgeable: bool) -> Result<Self, PurgeMemError> {
        let page = purgemem_uxpt::page_size();
        let mapped_len = round_up(len, page);
        let ptr = purgemem_uxpt::map_data(mapped_len, purgeable)
            .map_err(|_| PurgeMemError::MmapPurgFail)?;
        Ok(DataMapping { ptr, len: mapped_len })
    }

    /// Explicitly unmaps, consuming `self` so its `Drop` impl never
    /// runs, and surfaces a syscall failure instead of only logging it —
    /// unlike the implicit unmap that happens when a mapping is simply
    /// dropped.
    pub(crate) fn unmap(self) -> Result<(), PurgeMemError> {
        let this = ManuallyDrop::new(self);
        purgemem_uxpt::unmap_data(this.ptr, this.len).map_err(|_| PurgeMemError::UnmapPurgFail)
    }

    pub(crate) fn addr(&self) -> u64 {
        self.ptr as u64
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of this
        // mapping; all mutation of the underlying memory goes through
        // `&mut self` methods on this same type, so aliasing rules hold.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: see `as_slice`; `&mut self` here rules out concurrent
        // shared access through the same handle.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for DataMapping {
    fn drop(&mut self) {
        if let Err(err) = purgemem_uxpt::unmap_data(self.ptr, self.len) {
            tracing::warn!(?err, "failed to unmap purgeable data range on drop");
        }
    }
}

fn round_up(val: usize, align: usize) -> usize {
    if align == 0 {
        return val;
    }
    val.div_ceil(align) * align
}

// The data mapping is touched only through synchronized paths in
// `Region` (the rwlock, plus UXPT pin/unpin bracketing every access).
unsafe impl Send for DataMapping {}
unsafe impl Sync for DataMapping {}
