use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use purgemem_uxpt::UxPageTable;

use crate::builder::BuilderChain;
use crate::config::ContentSize;
use crate::error::PurgeMemError;
use crate::mmap::DataMapping;

/// A purgeable memory region: an anonymous mapping the kernel may
/// silently depopulate, paired with a UXPT that detects reclamation and
/// a builder chain that deterministically regenerates lost content.
pub struct Region {
    /// Wrapped in `ManuallyDrop` so [`Region::teardown`] can take and
    /// unmap it explicitly — before the post-unmap UXPT sanity check,
    /// and before `uxpt` itself is deinitialized — regardless of
    /// whether teardown runs from an explicit [`Region::destroy`] call
    /// or from [`Drop::drop`].
    data: ManuallyDrop<RwLock<DataMapping>>,
    /// Cached for addressing: stable for the region's lifetime, so
    /// reading it never needs to lock `data`.
    data_addr: u64,
    /// Also `ManuallyDrop`, for the same reason as `data`: teardown
    /// deinitializes it explicitly, in between the data unmap and the
    /// sanity check, rather than relying on its own `Drop` impl.
    uxpt: ManuallyDrop<UxPageTable>,
    builder: RwLock<BuilderChain>,
    build_count: AtomicU64,
    size_input: usize,
    /// Set once [`Region::teardown`] has run, so that an explicit
    /// [`Region::destroy`] followed by the implicit [`Drop::drop`] that
    /// still runs on the by-value `self` it consumed tears down the
    /// data/UXPT mappings exactly once.
    torn_down: AtomicBool,
}

impl Region {
    /// Creates a region of `size` content bytes, applying `builder` once
    /// immediately to produce its initial content.
    ///
    /// The supplied builder runs against the raw (zeroed) buffer during
    /// this call, exactly as the first entry of the chain always would on
    /// a rebuild — `create` does not defer that first build to the
    /// caller's first session.
    pub fn create(
        size: usize,
        builder: impl Fn(&mut [u8]) -> bool + Send + Sync + 'static,
    ) -> Result<Self, PurgeMemError> {
        let size_input = ContentSize::new(size)?.get();
        let purgeable = purgemem_uxpt::is_enabled();

        let mut data = DataMapping::new(size_input, purgeable)?;
        let data_addr = data.addr();
        let uxpt = UxPageTable::init(data_addr, data.len())?;

        let mut chain = BuilderChain::new();
        let boxed: Box<dyn Fn(&mut [u8]) -> bool + Send + Sync> = Box::new(builder);
        if !boxed(&mut data.as_mut_slice()[..size_input]) {
            return Err(PurgeMemError::BuildAllFail);
        }
        chain.push(boxed);

        Ok(Region {
            data: ManuallyDrop::new(RwLock::new(data)),
            data_addr,
            uxpt: ManuallyDrop::new(uxpt),
            builder: RwLock::new(chain),
            build_count: AtomicU64::new(1),
            size_input,
            torn_down: AtomicBool::new(false),
        })
    }

    /// The caller-visible content length (may be smaller than the mapped,
    /// page-rounded size).
    pub fn content_size(&self) -> usize {
        self.size_input
    }

    fn is_purged(&self) -> Result<bool, PurgeMemError> {
        if self.build_count.load(Ordering::SeqCst) == 0 {
            return Ok(true);
        }
        let present = self.uxpt.is_present(self.data_addr(), self.size_input)?;
        Ok(!present)
    }

    fn data_addr(&self) -> u64 {
        self.data_addr
    }

    fn rebuild(&self, data: &mut RwLockWriteGuard<'_, DataMapping>) -> Result<(), PurgeMemError> {
        let chain = self
            .builder
            .read()
            .map_err(|_| PurgeMemError::LockPoisoned)?;
        let size = self.size_input;
        let ok = chain.build_all(&mut data.as_mut_slice()[..size]);
        if !ok {
            return Err(PurgeMemError::BuildAllFail);
        }
        self.build_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Begins a read session: pins the region's pages, then returns a
    /// guard over guaranteed-present content.
    ///
    /// If the content was purged (or never built), this transparently
    /// rebuilds it under a brief write-lock upgrade before returning. The
    /// returned [`ReadGuard`] is `!Send`; [`ReadGuard::end`] (or simply
    /// dropping it) must happen on the thread that began the session.
    pub fn begin_read(&self) -> Result<ReadGuard<'_>, PurgeMemError> {
        self.uxpt.get(self.data_addr(), self.size_input)?;

        loop {
            match self.try_begin_read_once() {
                Ok(Some(guard)) => return Ok(guard),
                Ok(None) => continue,
                Err(err) => {
                    let _ = self.uxpt.put(self.data_addr(), self.size_input);
                    return Err(err);
                }
            }
        }
    }

    /// One iteration of the `beginRead` fast-path/upgrade loop. `Ok(None)`
    /// means the caller should loop back and retry after a rebuild.
    fn try_begin_read_once(&self) -> Result<Option<ReadGuard<'_>>, PurgeMemError> {
        let guard = self.data.read().map_err(|_| PurgeMemError::LockPoisoned)?;
        if !self.is_purged()? {
            return Ok(Some(ReadGuard {
                region: self,
                guard,
                _not_send: std::marker::PhantomData,
            }));
        }
        drop(guard);
        self.ensure_built()?;
        Ok(None)
    }

    /// Rechecks purged state under the write lock and rebuilds if still
    /// purged, tolerating the race where another thread beat us to it.
    fn ensure_built(&self) -> Result<(), PurgeMemError> {
        if !self.is_purged()? {
            return Ok(());
        }
        let mut data = self.data.write().map_err(|_| PurgeMemError::LockPoisoned)?;
        if self.is_purged()? {
            self.rebuild(&mut data)?;
        }
        Ok(())
    }

    /// Begins a write session: pins the region's pages and takes the
    /// write lock directly, rebuilding in place if the content was
    /// purged. The returned [`WriteGuard`] is `!Send` and must be ended
    /// on the thread that began the session.
    pub fn begin_write(&self) -> Result<WriteGuard<'_>, PurgeMemError> {
        self.uxpt.get(self.data_addr(), self.size_input)?;

        let guard = match self.data.write() {
            Ok(guard) => guard,
            Err(_) => {
                let _ = self.uxpt.put(self.data_addr(), self.size_input);
                return Err(PurgeMemError::LockPoisoned);
            }
        };

        if self.is_purged()? {
            let mut guard = guard;
            if let Err(err) = self.rebuild(&mut guard) {
                drop(guard);
                let _ = self.uxpt.put(self.data_addr(), self.size_input);
                return Err(err);
            }
            return Ok(WriteGuard {
                region: self,
                guard,
                _not_send: std::marker::PhantomData,
            });
        }

        Ok(WriteGuard {
            region: self,
            guard,
            _not_send: std::marker::PhantomData,
        })
    }

    /// Applies `f` to the current content immediately, then, on success,
    /// appends it to the builder chain so future rebuilds reproduce the
    /// same mutation. Must be called while holding a write session.
    pub fn append_modify(
        &self,
        guard: &mut WriteGuard<'_>,
        f: impl Fn(&mut [u8]) -> bool + Send + Sync + 'static,
    ) -> Result<(), PurgeMemError> {
        let size = self.size_input;
        let boxed: Box<dyn Fn(&mut [u8]) -> bool + Send + Sync> = Box::new(f);
        if !boxed(&mut guard.guard.as_mut_slice()[..size]) {
            return Err(PurgeMemError::BuildAllFail);
        }
        let mut chain = self
            .builder
            .write()
            .map_err(|_| PurgeMemError::LockPoisoned)?;
        chain.push(boxed);
        Ok(())
    }

    /// Tears down the region: unmaps the data range, then deinitializes
    /// the UXPT. Idempotent via `torn_down`, so it is safe to call once
    /// from [`Region::destroy`] and once more implicitly when the
    /// consumed `self` finishes dropping right after.
    fn teardown(&mut self) -> Result<(), PurgeMemError> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // SAFETY: guarded by the `torn_down` swap above, so this runs at
        // most once per `Region`.
        let data = unsafe { ManuallyDrop::take(&mut self.data) };
        let mapping = data.into_inner().map_err(|_| PurgeMemError::LockPoisoned)?;
        mapping.unmap()?;

        // Advisory only: a mismatch is logged, never turned into an
        // error, matching the source's own post-unmap check. Runs while
        // `uxpt` is still initialized, before it is deinitialized below.
        match self.uxpt.is_present(self.data_addr, self.size_input) {
            Ok(true) => {
                tracing::warn!("region torn down while uxpt still reports present pages")
            }
            Ok(false) => {}
            Err(err) => tracing::warn!(?err, "post-teardown uxpt sanity check failed"),
        }

        // SAFETY: guarded by the `torn_down` swap above, so this runs at
        // most once per `Region`.
        let mut uxpt = unsafe { ManuallyDrop::take(&mut self.uxpt) };
        uxpt.deinit()?;
        Ok(())
    }

    /// Explicitly destroys the region, surfacing a data-unmap or
    /// UXPT-deinit failure instead of only logging it, as plain `drop`
    /// would. Equivalent to dropping the region when the result is
    /// discarded: both paths run the same [`Region::teardown`] exactly
    /// once.
    pub fn destroy(mut self) -> Result<(), PurgeMemError> {
        self.teardown()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            tracing::warn!(?err, "region teardown failed on drop");
        }
    }
}

/// An active read session. Ends the session (unpins, releases the read
/// lock) on drop or on an explicit call to [`ReadGuard::end`].
///
/// Deliberately `!Send`: the original protocol requires the matching
/// `endRead` to run on the thread that called `beginRead`.
pub struct ReadGuard<'r> {
    region: &'r Region,
    guard: RwLockReadGuard<'r, DataMapping>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl<'r> ReadGuard<'r> {
    pub fn content(&self) -> &[u8] {
        &self.guard.as_slice()[..self.region.size_input]
    }

    pub fn end(self) {
        // Drop performs the unpin; this just gives the call a name at
        // the use site.
        drop(self)
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.region.uxpt.put(self.region.data_addr(), self.region.size_input) {
            tracing::warn!(?err, "failed to unpin region pages on endRead");
        }
    }
}

/// An active write session. Ends the session (unpins, releases the
/// write lock) on drop or on an explicit call to [`WriteGuard::end`].
///
/// Deliberately `!Send`: the original protocol requires the matching
/// `endWrite` to run on the thread that called `beginWrite`.
pub struct WriteGuard<'r> {
    region: &'r Region,
    guard: RwLockWriteGuard<'r, DataMapping>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl<'r> WriteGuard<'r> {
    pub fn content(&self) -> &[u8] {
        &self.guard.as_slice()[..self.region.size_input]
    }

    pub fn content_mut(&mut self) -> &mut [u8] {
        let size = self.region.size_input;
        &mut self.guard.as_mut_slice()[..size]
    }

    pub fn end(self) {
        drop(self)
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.region.uxpt.put(self.region.data_addr(), self.region.size_input) {
            tracing::warn!(?err, "failed to unpin region pages on endWrite");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Forces the next session to observe a purge by clearing every
    /// covered descriptor's present bit directly, standing in for the
    /// kernel reclaimer. Only reachable from in-crate tests: `Region`
    /// does not expose its `UxPageTable` outside this crate.
    fn simulate_purge(region: &Region) {
        region
            .uxpt
            .clear(region.data_addr(), region.size_input)
            .expect("clear uxpt descriptors");
    }

    #[test]
    fn fresh_read_reflects_the_initial_builder() {
        let region = Region::create(4096, |buf| {
            buf.fill(0x5A);
            true
        })
        .expect("create region");

        let read = region.begin_read().expect("begin read");
        assert_eq!(read.content()[0], 0x5A);
        assert_eq!(read.content().len(), 4096);
        read.end();

        assert_eq!(region.build_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn appended_modifier_layers_on_top_of_the_initial_content() {
        let region = Region::create(4096, |buf| {
            buf.fill(0x5A);
            true
        })
        .expect("create region");

        {
            let mut write = region.begin_write().expect("begin write");
            region
                .append_modify(&mut write, |buf| {
                    buf[0..16].fill(0xFF);
                    true
                })
                .expect("append modify");
            write.end();
        }

        let read = region.begin_read().expect("begin read");
        assert_eq!(&read.content()[0..16], &[0xFF; 16]);
        assert_eq!(read.content()[16], 0x5A);
        assert_eq!(read.content()[4095], 0x5A);
        read.end();
    }

    #[test]
    fn simulated_purge_forces_exactly_one_rebuild() {
        let region = Region::create(256, |buf| {
            buf.fill(0x5A);
            true
        })
        .expect("create region");

        {
            let mut write = region.begin_write().expect("begin write");
            region
                .append_modify(&mut write, |buf| {
                    buf[0..16].fill(0xFF);
                    true
                })
                .expect("append modify");
            write.end();
        }

        simulate_purge(&region);
        assert_eq!(region.build_count.load(Ordering::SeqCst), 1);

        let read = region.begin_read().expect("begin read after purge");
        assert_eq!(&read.content()[0..16], &[0xFF; 16]);
        assert_eq!(read.content()[16], 0x5A);
        read.end();

        assert_eq!(region.build_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_readers_after_a_purge_rebuild_exactly_once() {
        let region = Arc::new(
            Region::create(4096, |buf| {
                buf.fill(0x5A);
                true
            })
            .expect("create region"),
        );
        simulate_purge(&region);

        let mismatches = Arc::new(AtomicUsize::new(0));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let region = Arc::clone(&region);
                let mismatches = Arc::clone(&mismatches);
                scope.spawn(move || {
                    let read = region.begin_read().expect("begin read");
                    if read.content()[0] != 0x5A {
                        mismatches.fetch_add(1, Ordering::SeqCst);
                    }
                    read.end();
                });
            }
        });

        assert_eq!(mismatches.load(Ordering::SeqCst), 0);
        assert_eq!(region.build_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn a_builder_that_fails_only_on_rebuild_surfaces_the_failure_and_unpins() {
        let fail_on_rebuild = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let region = {
            let fail_on_rebuild = Arc::clone(&fail_on_rebuild);
            Region::create(64, move |buf| {
                if fail_on_rebuild.load(Ordering::SeqCst) {
                    false
                } else {
                    buf.fill(0x5A);
                    true
                }
            })
            .expect("create region")
        };

        fail_on_rebuild.store(true, Ordering::SeqCst);
        simulate_purge(&region);

        let err = region.begin_read().expect_err("rebuild should fail");
        assert!(matches!(err, PurgeMemError::BuildAllFail));
        assert_eq!(region.build_count.load(Ordering::SeqCst), 1);

        fail_on_rebuild.store(false, Ordering::SeqCst);
        let mut write = region.begin_write().expect("begin write after failed rebuild");
        region
            .append_modify(&mut write, |buf| {
                buf.fill(0x5A);
                true
            })
            .expect("recovery append succeeds");
        write.end();
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = Region::create(0, |_buf| true).unwrap_err();
        assert!(matches!(err, PurgeMemError::InvalidArgument));
    }
}
