/// Failure modes raised by the UXPT engine.
#[derive(Debug, thiserror::Error)]
pub enum UxptError {
    /// A requested mapping (data or uxpt companion range) could not be
    /// obtained from the kernel.
    #[error("mmap failed")]
    MmapFail,

    /// A previously obtained mapping could not be released.
    #[error("munmap failed")]
    UnmapFail,

    /// The requested `[addr, addr+len)` range falls outside the table's
    /// covered data range.
    #[error("address range 0x{addr:x}+{len:#x} is outside the uxpt's covered range")]
    OutOfRange {
        /// Start of the requested range.
        addr: u64,
        /// Length, in bytes, of the requested range.
        len: usize,
    },

    /// At least one page covered by the requested range is not present.
    #[error("at least one covered page is not present")]
    NotPresent,
}
