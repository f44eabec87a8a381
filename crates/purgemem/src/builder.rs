/// One entry in a region's content-builder chain.
///
/// The original design pairs a function pointer with an opaque
/// parameter; a boxed closure captures its own parameter instead, so
/// there is nothing here but the callable itself.
type BuilderFn = Box<dyn Fn(&mut [u8]) -> bool + Send + Sync>;

/// An ordered, append-only sequence of content builders.
///
/// Applying the chain to a zeroed buffer reproduces a region's canonical
/// content deterministically. Stored flat rather than as a linked list:
/// there is no node ownership to manage and `append` is just a `push`.
#[derive(Default)]
pub(crate) struct BuilderChain {
    entries: Vec<BuilderFn>,
}

impl BuilderChain {
    pub(crate) fn new() -> Self {
        BuilderChain { entries: Vec::new() }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, f: BuilderFn) {
        self.entries.push(f);
    }

    /// Zeroes `dst`, then applies every builder in append order. Stops
    /// and returns `false` at the first builder that does.
    pub(crate) fn build_all(&self, dst: &mut [u8]) -> bool {
        dst.fill(0);
        for f in &self.entries {
            if !f(dst) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_apply_in_append_order() {
        let mut chain = BuilderChain::new();
        chain.push(Box::new(|dst| {
            dst.fill(0x5A);
            true
        }));
        chain.push(Box::new(|dst| {
            dst[0..4].fill(0xFF);
            true
        }));

        let mut buf = vec![0u8; 16];
        assert!(chain.build_all(&mut buf));
        assert_eq!(&buf[0..4], &[0xFF; 4]);
        assert_eq!(&buf[4..], &[0x5A; 12]);
    }

    #[test]
    fn a_failing_builder_stops_the_chain() {
        let mut chain = BuilderChain::new();
        chain.push(Box::new(|dst| {
            dst.fill(1);
            false
        }));
        chain.push(Box::new(|dst| {
            dst.fill(2);
            true
        }));

        let mut buf = vec![0u8; 4];
        assert!(!chain.build_all(&mut buf));
        assert_eq!(&buf, &[1, 1, 1, 1]);
    }

    #[test]
    fn rebuild_always_starts_from_zero() {
        let mut chain = BuilderChain::new();
        chain.push(Box::new(|dst| {
            for b in dst.iter_mut() {
                *b += 1;
            }
            true
        }));

        let mut buf = vec![0xFFu8; 4];
        assert!(chain.build_all(&mut buf));
        assert_eq!(&buf, &[1, 1, 1, 1]);
    }
}
