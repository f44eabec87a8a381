use purgemem_uxpt::UxptError;

/// Failure modes raised by a purgeable region across its lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum PurgeMemError {
    /// A caller-supplied argument was invalid: zero size, or (for
    /// [`crate::Region::create`]) an empty initial builder.
    #[error("invalid argument")]
    InvalidArgument,

    /// The data mapping could not be obtained from the kernel. Distinct
    /// from `Uxpt(UxptError::MmapFail)`, which is the companion UXPT
    /// mapping failing instead of the data mapping itself.
    #[error("mmap of the purgeable data range failed")]
    MmapPurgFail,

    /// The data mapping could not be released, raised from
    /// [`crate::Region::destroy`]. Distinct from
    /// `Uxpt(UxptError::UnmapFail)`, which is the UXPT deinit step that
    /// runs right after.
    #[error("munmap of the purgeable data range failed")]
    UnmapPurgFail,

    /// The builder chain returned `false` while rebuilding content.
    #[error("builder chain failed during rebuild")]
    BuildAllFail,

    /// The region's rwlock was poisoned by a panic in another session.
    /// Per the source's own treatment of lock-acquire failure, this is
    /// fatal: the region is no longer usable.
    #[error("region lock poisoned by a prior panic")]
    LockPoisoned,

    /// A UXPT-level operation failed; see the wrapped error for which one.
    #[error("uxpt operation failed: {0}")]
    Uxpt(#[from] UxptError),
}
