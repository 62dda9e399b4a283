use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt, mem,
    ptr::NonNull,
    sync::atomic::{fence, AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use super::{keep_alive::Releasable, registry};

/// Counts above this are treated as a leak of handles and abort the process, matching the
/// overflow behavior of `std::sync::Arc`.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Shared bookkeeping for one allocation.
///
/// The strong count is the number of live `Handle`s (including those stored as patients). The
/// weak count is the number of live `WeakHandle`s plus one held collectively by the strong
/// handles, so the block itself outlives every handle that can observe it.
pub struct ControlBlock {
    strong: AtomicUsize,
    weak: AtomicUsize,
    state: Mutex<BlockState>,
}

pub(crate) struct BlockState {
    pub(crate) patients: Vec<Box<dyn Releasable>>,
    release: Option<Release>,
}

/// Type-erased release of the allocation a control block owns.
pub(crate) struct Release {
    ptr: *mut (),
    drop_fn: unsafe fn(*mut ()),
    /// Address registered in the debug allocation registry, 0 if untracked
    tracked: usize,
}

// SAFETY: owning constructors only accept `Send + Sync` allocations, and the release runs at
// most once, from whichever thread drops the last strong handle.
unsafe impl Send for Release {}

impl Release {
    /// Release that drops a `Box<T>` produced by `Box::into_raw`.
    pub(crate) fn boxed<T>(ptr: NonNull<T>) -> Release {
        unsafe fn drop_box<T>(ptr: *mut ()) {
            drop(Box::from_raw(ptr as *mut T));
        }

        Release {
            ptr: ptr.as_ptr() as *mut (),
            drop_fn: drop_box::<T>,
            tracked: registry::track(ptr.as_ptr() as usize, mem::size_of::<T>()),
        }
    }

    /// Release that drops one strong count of an `Arc<T>` produced by `Arc::into_raw`.
    pub(crate) fn arc<T>(ptr: NonNull<T>) -> Release {
        unsafe fn drop_arc<T>(ptr: *mut ()) {
            drop(std::sync::Arc::from_raw(ptr as *const T));
        }

        Release {
            ptr: ptr.as_ptr() as *mut (),
            drop_fn: drop_arc::<T>,
            // Every adoption owns its own strong count of the Arc
            tracked: 0,
        }
    }

    fn run(self) {
        registry::untrack(self.tracked);
        unsafe { (self.drop_fn)(self.ptr) }
    }
}

impl ControlBlock {
    /// Allocate a block with one strong handle. A block without a release aliases memory it does
    /// not own.
    pub(crate) fn allocate(release: Option<Release>) -> NonNull<ControlBlock> {
        let block = Box::new(ControlBlock {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            state: Mutex::new(BlockState {
                patients: Vec::new(),
                release,
            }),
        });
        NonNull::from(Box::leak(block))
    }

    #[inline]
    pub fn strong_count(&self) -> usize {
        self.strong.load(Ordering::Acquire)
    }

    /// Number of weak handles, not counting the implicit weak reference of the strong handles.
    #[inline]
    pub fn weak_count(&self) -> usize {
        let weak = self.weak.load(Ordering::Acquire);
        if self.strong_count() == 0 {
            weak
        } else {
            weak - 1
        }
    }

    /// Stable identity of this block for as long as any handle to it is alive.
    #[inline]
    pub fn id(&self) -> usize {
        self as *const ControlBlock as usize
    }

    /// Number of patients currently kept alive by this block.
    pub fn patient_count(&self) -> usize {
        self.state.lock().patients.len()
    }

    #[inline]
    pub(crate) fn state(&self) -> &Mutex<BlockState> {
        &self.state
    }

    /// Add a strong reference. Caller must already hold one.
    #[inline]
    pub(crate) fn increment_strong(&self) {
        let old = self.strong.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
    }

    /// Add a strong reference unless the count has already reached zero.
    pub(crate) fn try_increment_strong(&self) -> bool {
        let mut count = self.strong.load(Ordering::Relaxed);
        loop {
            if count == 0 {
                return false;
            }
            if count > MAX_REFCOUNT {
                std::process::abort();
            }
            match self.strong.compare_exchange_weak(
                count,
                count + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => count = current,
            }
        }
    }

    #[inline]
    pub(crate) fn increment_weak(&self) {
        let old = self.weak.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
    }

    /// Add a strong reference owned by the returned guard. Caller must already hold one.
    pub(crate) fn retain(&self) -> BlockRef {
        self.increment_strong();
        BlockRef(NonNull::from(self))
    }
}

/// Drop one strong reference, destroying the block's contents if it was the last.
///
/// # Safety
/// `block` must be live and the caller must own the strong reference being released.
pub(crate) unsafe fn release_strong(block: NonNull<ControlBlock>) {
    if block.as_ref().strong.fetch_sub(1, Ordering::Release) != 1 {
        return;
    }
    fence(Ordering::Acquire);
    cascade(block);
}

/// Drop one weak reference, freeing the block if it was the last.
///
/// # Safety
/// `block` must be live and the caller must own the weak reference being released.
pub(crate) unsafe fn release_weak(block: NonNull<ControlBlock>) {
    if block.as_ref().weak.fetch_sub(1, Ordering::Release) != 1 {
        return;
    }
    fence(Ordering::Acquire);
    drop(Box::from_raw(block.as_ptr()));
}

/// An owned strong reference to a block, without a typed view of its allocation.
pub(crate) struct BlockRef(NonNull<ControlBlock>);

// SAFETY: a BlockRef only touches the block's atomics and lock.
unsafe impl Send for BlockRef {}
unsafe impl Sync for BlockRef {}

impl Drop for BlockRef {
    fn drop(&mut self) {
        unsafe { release_strong(self.0) }
    }
}

// ============================================================================
// Release cascade
// ============================================================================

/// Blocks whose strong count reached zero while a release was already running on this thread.
/// Draining them iteratively keeps keep-alive chains of any length from growing the stack.
struct Cascade {
    active: Cell<bool>,
    queue: RefCell<VecDeque<NonNull<ControlBlock>>>,
}

thread_local! {
    static CASCADE: Cascade = const {
        Cascade {
            active: Cell::new(false),
            queue: RefCell::new(VecDeque::new()),
        }
    };
}

/// Resets the cascade if a destructor unwinds. Blocks still queued are picked up by the next
/// cascade on this thread.
struct CascadeGuard;

impl Drop for CascadeGuard {
    fn drop(&mut self) {
        let _ = CASCADE.try_with(|cascade| cascade.active.set(false));
    }
}

unsafe fn cascade(block: NonNull<ControlBlock>) {
    let entered = CASCADE.try_with(|cascade| {
        if cascade.active.get() {
            cascade.queue.borrow_mut().push_back(block);
            None
        } else {
            cascade.active.set(true);
            Some(CascadeGuard)
        }
    });

    let _guard = match entered {
        Ok(Some(guard)) => guard,
        Ok(None) => return,
        // Thread-local storage is being torn down, release without queueing
        Err(_) => {
            destroy(block);
            return;
        }
    };

    destroy(block);
    while let Some(next) = CASCADE.with(|cascade| cascade.queue.borrow_mut().pop_front()) {
        destroy(next);
    }
}

/// Release the allocation, then the patients, then the implicit weak reference.
unsafe fn destroy(block: NonNull<ControlBlock>) {
    let (release, patients) = {
        let mut state = block.as_ref().state.lock();
        (state.release.take(), mem::take(&mut state.patients))
    };

    tracing::trace!(
        block = ?block.as_ptr(),
        patients = patients.len(),
        owned = release.is_some(),
        "releasing control block"
    );

    if let Some(release) = release {
        release.run();
    }
    drop(patients);

    release_weak(block);
}

impl fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("strong", &self.strong.load(Ordering::Relaxed))
            .field("weak", &self.weak.load(Ordering::Relaxed))
            .finish()
    }
}
