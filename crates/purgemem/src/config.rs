use crate::error::PurgeMemError;

/// A validated, non-zero content length for a region.
///
/// Wrapping this in a constructor-validated newtype instead of taking a
/// bare `usize` at the [`crate::Region::create`] boundary keeps the
/// `size == 0` rejection in one place instead of re-checked at every
/// call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentSize(usize);

impl ContentSize {
    pub fn new(bytes: usize) -> Result<Self, PurgeMemError> {
        if bytes == 0 {
            Err(PurgeMemError::InvalidArgument)
        } else {
            Ok(ContentSize(bytes))
        }
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl TryFrom<usize> for ContentSize {
    type Error = PurgeMemError;

    fn try_from(bytes: usize) -> Result<Self, Self::Error> {
        ContentSize::new(bytes)
    }
}
