//! Thin, `cfg`-gated syscall layer. Everything above this module talks in
//! terms of `Result`s and addresses; nothing above it touches `libc`
//! directly.

use std::sync::OnceLock;

/// The runtime page size, queried once and cached.
///
/// On unix this goes through `rustix`'s `param` feature rather than a
/// hardcoded `4096`, since the UXPT indexing math (`PAGE_SIZE / 8`
/// descriptors per descriptor page) is wrong on any host with a larger
/// page size.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                rustix::param::page_size()
            } else if #[cfg(windows)] {
                windows::page_size()
            } else {
                4096
            }
        }
    })
}

#[cfg(unix)]
mod unix {
    use crate::flags::{MAP_PURGEABLE, MAP_USEREXPTE};
    use std::io;

    fn mmap_raw(len: usize, flags: i32, offset: i64) -> io::Result<*mut u8> {
        // SAFETY: `mmap` with `MAP_ANONYMOUS` ignores `fd`; `len` is
        // caller-validated to be non-zero and page-aligned by every caller
        // in this module.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            Err(io::Error::last_os_error())
        } else {
            Ok(ptr as *mut u8)
        }
    }

    /// Maps `len` bytes of purgeable anonymous memory, falling back to an
    /// ordinary private anonymous mapping when `purgeable` is false.
    pub(crate) fn mmap_data(len: usize, purgeable: bool) -> io::Result<*mut u8> {
        let ty = if purgeable {
            MAP_PURGEABLE
        } else {
            libc::MAP_PRIVATE
        };
        mmap_raw(len, libc::MAP_ANONYMOUS | ty, 0)
    }

    /// Maps `len` bytes of the UXPT companion range at descriptor-page
    /// offset `uxpte_page_offset` (a page count, as bytes, not a file
    /// offset: `MAP_USEREXPTE` mappings have no backing file).
    pub(crate) fn mmap_uxpt(len: usize, uxpte_page_offset: u64) -> io::Result<*mut u8> {
        let offset = (uxpte_page_offset as i64)
            .checked_mul(super::page_size() as i64)
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        mmap_raw(len, libc::MAP_ANONYMOUS | MAP_USEREXPTE, offset)
    }

    pub(crate) fn munmap(ptr: *mut u8, len: usize) -> io::Result<()> {
        // SAFETY: callers only pass back pointers/lengths obtained from a
        // prior successful call to `mmap_data`/`mmap_uxpt` in this module,
        // and only once.
        let ret = unsafe { libc::munmap(ptr as *mut libc::c_void, len) };
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::io;
    use std::mem::MaybeUninit;
    use windows_sys::Win32::System::SystemInformation::GetSystemInfo;

    /// Queried through `GetSystemInfo` rather than hardcoded, same
    /// reasoning as the unix side: the UXPT descriptor-per-page math
    /// depends on the real page size, even though this subsystem never
    /// gets far enough on Windows to need it for addressing.
    pub(crate) fn page_size() -> usize {
        // SAFETY: `GetSystemInfo` fills the struct unconditionally; no
        // out-parameter is left uninitialized on any documented Windows
        // version.
        unsafe {
            let mut info = MaybeUninit::zeroed();
            GetSystemInfo(info.as_mut_ptr());
            info.assume_init().dwPageSize as usize
        }
    }

    /// `MAP_PURGEABLE`/`MAP_USEREXPTE` are Linux-kernel extensions; this
    /// subsystem has no equivalent on Windows, so every mapping attempt
    /// fails and [`crate::probe::is_enabled`] latches to `false`. See the
    /// crate's Non-goals on portability.
    pub(crate) fn mmap_data(_len: usize, _purgeable: bool) -> io::Result<*mut u8> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    pub(crate) fn mmap_uxpt(_len: usize, _uxpte_page_offset: u64) -> io::Result<*mut u8> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    pub(crate) fn munmap(_ptr: *mut u8, _len: usize) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
pub(crate) use unix::{mmap_data, mmap_uxpt, munmap};
#[cfg(windows)]
pub(crate) use windows::{mmap_data, mmap_uxpt, munmap};
