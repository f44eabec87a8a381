//! The UXPT itself: a mapped array of descriptors, one per data page,
//! addressed by the data page's offset from the table's base address.

use std::sync::atomic::AtomicU64;

use crate::error::UxptError;
use crate::pte::{Pte, PteState};
use crate::sys;
use crate::{round_up, uxpte_offset, uxpte_page_no, virt_page, UXPTE_SIZE_SHIFT};

/// A mapped companion page table covering one data region.
///
/// `UxPageTable` owns the descriptor mapping (not the data mapping it
/// describes) and is unmapped on [`UxPageTable::deinit`] or [`Drop`],
/// whichever comes first — `deinit` is idempotent so a region's own
/// `Drop` impl can call it unconditionally after an explicit `destroy`.
pub struct UxPageTable {
    data_addr: u64,
    data_size: usize,
    page_shift: u32,
    uxpt_ptr: *mut u8,
    uxpt_len: usize,
    /// False when the capability probe found no kernel support. In that
    /// case no descriptor mapping exists at all: `get`/`put`/`clear` are
    /// no-ops and `is_present` unconditionally reports `true`.
    enabled: bool,
}

// The descriptor words are accessed exclusively through `AtomicU64`
// operations; there is no unsynchronized access to the raw mapping once
// `init` returns.
unsafe impl Send for UxPageTable {}
unsafe impl Sync for UxPageTable {}

impl UxPageTable {
    /// Maps a companion descriptor range covering `[data_addr, data_addr +
    /// data_size)` at page granularity.
    ///
    /// When [`crate::is_enabled`] reports no kernel support, this
    /// succeeds without mapping anything: the table degrades to a no-op
    /// that reports every page present.
    pub fn init(data_addr: u64, data_size: usize) -> Result<Self, UxptError> {
        let page_shift = sys::page_size().trailing_zeros();

        if !crate::is_enabled() {
            return Ok(UxPageTable {
                data_addr,
                data_size,
                page_shift,
                uxpt_ptr: std::ptr::null_mut(),
                uxpt_len: 0,
                enabled: false,
            });
        }

        let page_size = 1u64 << page_shift;
        // Sized like the original `GetUxPageSize`: the number of whole
        // *descriptor* pages spanned by `[data_addr, data_addr+data_size)`,
        // not `data_size`'s own page count — `uxpte_offset(data_addr)` can
        // be nonzero, so the last data page's descriptor can fall on a
        // descriptor page beyond a naive `data_pages * 8` sizing.
        let uxpte_page_offset = uxpte_page_no(data_addr, page_shift);
        let last_uxpte_page = uxpte_page_no(data_addr + data_size as u64 - 1, page_shift);
        let uxpt_len = ((last_uxpte_page - uxpte_page_offset + 1) * page_size) as usize;
        let ptr =
            sys::mmap_uxpt(uxpt_len, uxpte_page_offset).map_err(|_| UxptError::MmapFail)?;

        let table = UxPageTable {
            data_addr,
            data_size,
            page_shift,
            uxpt_ptr: ptr,
            uxpt_len,
            enabled: true,
        };
        // The mapping is freshly zeroed by the kernel already; this CAS
        // pass is about establishing the canonical "absent, unpinned"
        // state through the same path every other mutation goes through,
        // not about the bits themselves.
        table.clear(data_addr, data_size)?;
        Ok(table)
    }

    /// Unmaps the descriptor range. Safe to call more than once; the
    /// second and later calls, and every call on a disabled table, are
    /// no-ops.
    pub fn deinit(&mut self) -> Result<(), UxptError> {
        if self.uxpt_ptr.is_null() {
            return Ok(());
        }
        sys::munmap(self.uxpt_ptr, self.uxpt_len).map_err(|_| UxptError::UnmapFail)?;
        self.uxpt_ptr = std::ptr::null_mut();
        self.uxpt_len = 0;
        Ok(())
    }

    fn descriptor_count(&self) -> u64 {
        round_up(self.data_size as u64, 1u64 << self.page_shift) >> self.page_shift
    }

    fn words(&self) -> &[AtomicU64] {
        let count = (self.uxpt_len >> UXPTE_SIZE_SHIFT) as usize;
        // SAFETY: `uxpt_ptr` was obtained from a successful `mmap` of at
        // least `uxpt_len` bytes in `init` and is not written through any
        // path other than `AtomicU64` operations on the slice it yields.
        unsafe { std::slice::from_raw_parts(self.uxpt_ptr as *const AtomicU64, count) }
    }

    fn pages_for_range(&self, addr: u64, len: usize) -> Result<std::ops::Range<u64>, UxptError> {
        if len == 0 || addr < self.data_addr || addr - self.data_addr + len as u64 > self.data_size as u64 {
            return Err(UxptError::OutOfRange { addr, len });
        }
        let rel_start = addr - self.data_addr;
        let rel_end = rel_start + len as u64 - 1;
        // The kernel writes each data page's descriptor at word index
        // `uxpte_offset(data_addr) + i`, not `i`: the `MAP_USEREXPTE`
        // mapping is based at the descriptor *page* containing
        // `data_addr`'s own descriptor, which is usually not word 0 of
        // that page. See `uxpte_offset`'s doc comment and
        // `GetIndexInUxpte` in the original source.
        let base = uxpte_offset(self.data_addr, self.page_shift);
        let first_page = base + virt_page(rel_start, self.page_shift);
        let last_page = base + virt_page(rel_end, self.page_shift);
        Ok(first_page..last_page + 1)
    }

    fn pte(&self, index: u64) -> Pte<'_> {
        Pte::new(&self.words()[index as usize])
    }

    /// Pins every page covering `[addr, addr+len)`: adds one reference to
    /// each covered descriptor. Retries transparently while the kernel is
    /// mid-reclaim on any of them. A no-op on a disabled table.
    pub fn get(&self, addr: u64, len: usize) -> Result<(), UxptError> {
        if !self.enabled {
            return Ok(());
        }
        let range = self.pages_for_range(addr, len)?;
        for idx in range {
            self.pte(idx).add();
        }
        Ok(())
    }

    /// Unpins every page covering `[addr, addr+len)`. A no-op on a
    /// disabled table.
    pub fn put(&self, addr: u64, len: usize) -> Result<(), UxptError> {
        if !self.enabled {
            return Ok(());
        }
        let range = self.pages_for_range(addr, len)?;
        for idx in range {
            self.pte(idx).sub();
        }
        Ok(())
    }

    /// Resets every descriptor covering `[addr, addr+len)` to "not
    /// present, unpinned". Used after a rebuild has repopulated the data
    /// pages out from under a stale descriptor, and during teardown. A
    /// no-op on a disabled table.
    pub fn clear(&self, addr: u64, len: usize) -> Result<(), UxptError> {
        if !self.enabled {
            return Ok(());
        }
        let range = self.pages_for_range(addr, len)?;
        for idx in range {
            self.pte(idx).clear();
        }
        Ok(())
    }

    /// True only if every page covering `[addr, addr+len)` is currently
    /// present. Blocks (cooperatively) on any descriptor the kernel is
    /// mid-reclaim on. Unconditionally `true` on a disabled table.
    pub fn is_present(&self, addr: u64, len: usize) -> Result<bool, UxptError> {
        if !self.enabled {
            return Ok(true);
        }
        let range = self.pages_for_range(addr, len)?;
        for idx in range {
            loop {
                match self.pte(idx).load() {
                    PteState::UnderReclaim => std::thread::yield_now(),
                    PteState::Live { present, .. } => {
                        if !present {
                            return Ok(false);
                        }
                        break;
                    }
                }
            }
        }
        Ok(true)
    }

    /// Number of data pages this table covers, for callers that want to
    /// size a full-range operation without redoing the rounding math.
    pub fn covered_len(&self) -> usize {
        (self.descriptor_count() << self.page_shift) as usize
    }
}

impl Drop for UxPageTable {
    fn drop(&mut self) {
        let _ = self.deinit();
    }
}
