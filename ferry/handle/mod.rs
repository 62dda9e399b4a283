//! Reference counted ownership handles.
//!
//! A [`Handle`] is a strong reference to one native allocation through a shared
//! [`ControlBlock`]. Handles may be empty, may be cast to a differently typed view of the same
//! allocation, and may be downgraded to a [`WeakHandle`] that upgrades only while some strong
//! handle is still alive.

mod control_block;
pub mod keep_alive;
mod registry;


use std::{
    any::Any,
    fmt,
    marker::PhantomData,
    ops::Deref,
    ptr::{self, NonNull},
    sync::Arc,
};

use crate::{BridgeError, BridgeResult};

pub use control_block::ControlBlock;
pub use keep_alive::{keep_alive, Releasable};

use control_block::{release_strong, release_weak, Release};

/// A typed view into an allocation together with the block that owns it.
struct RawHandle<T: ?Sized> {
    ptr: NonNull<T>,
    block: NonNull<ControlBlock>,
}

impl<T: ?Sized> Clone for RawHandle<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for RawHandle<T> {}

/// Strong reference to a native allocation.
pub struct Handle<T: ?Sized> {
    raw: Option<RawHandle<T>>,
    phantom_data: PhantomData<T>,
}

// SAFETY: handles share `T` across threads and the last one may drop it on any thread.
unsafe impl<T: ?Sized + Send + Sync> Send for Handle<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Handle<T> {}

impl<T: Send + Sync + 'static> Handle<T> {
    /// Allocate `value` and own it.
    #[inline]
    pub fn new(value: T) -> Handle<T> {
        Handle::from_box(Box::new(value))
    }

    /// Take ownership of an existing boxed allocation.
    pub fn from_box(value: Box<T>) -> Handle<T> {
        let ptr = NonNull::from(Box::leak(value));
        Handle::owning(ptr, Release::boxed(ptr))
    }

    /// Take ownership of a raw allocation.
    ///
    /// # Safety
    /// `ptr` must come from `Box::into_raw` and must not be owned by anything else. Debug builds
    /// panic if another control block already owns it.
    pub unsafe fn from_raw(ptr: *mut T) -> BridgeResult<Handle<T>> {
        let ptr = NonNull::new(ptr).ok_or_else(|| BridgeError::null_handle("Handle::from_raw"))?;
        Ok(Handle::owning(ptr, Release::boxed(ptr)))
    }

    /// Adopt an `Arc`. The control block holds the `Arc`'s strong count until released.
    pub fn from_arc(value: Arc<T>) -> Handle<T> {
        let ptr = unsafe { NonNull::new_unchecked(Arc::into_raw(value) as *mut T) };
        Handle::owning(ptr, Release::arc(ptr))
    }

    fn owning(ptr: NonNull<T>, release: Release) -> Handle<T> {
        Handle {
            raw: Some(RawHandle {
                ptr,
                block: ControlBlock::allocate(Some(release)),
            }),
            phantom_data: PhantomData,
        }
    }
}

impl<T: ?Sized> Handle<T> {
    /// The empty handle.
    #[inline]
    pub const fn empty() -> Handle<T> {
        Handle {
            raw: None,
            phantom_data: PhantomData,
        }
    }

    /// Alias memory that lives forever. The handle gets its own control block that releases
    /// nothing.
    pub fn from_static(value: &'static T) -> Handle<T> {
        unsafe { Handle::disconnected(NonNull::from(value)) }
    }

    /// Alias memory without owning it.
    ///
    /// # Safety
    /// The memory behind `ptr` must outlive every handle derived from the result.
    pub unsafe fn disconnected(ptr: NonNull<T>) -> Handle<T> {
        Handle {
            raw: Some(RawHandle {
                ptr,
                block: ControlBlock::allocate(None),
            }),
            phantom_data: PhantomData,
        }
    }

    /// Resolve a weak handle, returning the empty handle if it has expired.
    #[inline]
    pub fn from_weak(weak: &WeakHandle<T>) -> Handle<T> {
        weak.upgrade().unwrap_or_default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.raw.map(|raw| unsafe { &*raw.ptr.as_ptr() })
    }

    /// Raw address of the viewed value, null for the empty handle.
    #[inline]
    pub fn as_ptr(&self) -> *const T
    where
        T: Sized,
    {
        match self.raw {
            Some(raw) => raw.ptr.as_ptr(),
            None => ptr::null(),
        }
    }

    /// Address of the viewed value, or 0 for the empty handle.
    #[inline]
    pub fn addr(&self) -> usize {
        match self.raw {
            Some(raw) => raw.ptr.as_ptr() as *const () as usize,
            None => 0,
        }
    }

    #[inline]
    pub fn control_block(&self) -> Option<&ControlBlock> {
        self.raw.map(|raw| unsafe { &*raw.block.as_ptr() })
    }

    /// Identity of the shared control block, or 0 for the empty handle.
    #[inline]
    pub fn block_id(&self) -> usize {
        self.control_block().map_or(0, ControlBlock::id)
    }

    #[inline]
    pub fn strong_count(&self) -> usize {
        self.control_block().map_or(0, ControlBlock::strong_count)
    }

    #[inline]
    pub fn weak_count(&self) -> usize {
        self.control_block().map_or(0, ControlBlock::weak_count)
    }

    /// Whether both handles view the same address. Two empty handles are equal.
    #[inline]
    pub fn ptr_eq<U: ?Sized>(&self, other: &Handle<U>) -> bool {
        self.addr() == other.addr()
    }

    /// Whether both handles share a control block, regardless of which part they view.
    #[inline]
    pub fn same_allocation<U: ?Sized>(&self, other: &Handle<U>) -> bool {
        !self.is_empty() && self.block_id() == other.block_id()
    }

    pub fn downgrade(&self) -> WeakHandle<T> {
        match self.control_block() {
            Some(block) => {
                block.increment_weak();
                WeakHandle {
                    raw: self.raw,
                    phantom_data: PhantomData,
                }
            }
            None => WeakHandle::new(),
        }
    }

    /// A differently typed view of the same allocation sharing this handle's control block. Use
    /// it to project a field or to unsize to a trait object.
    pub fn cast<U: ?Sized>(&self, f: impl FnOnce(&T) -> &U) -> Handle<U> {
        match self.raw {
            Some(raw) => {
                let target = NonNull::from(f(unsafe { raw.ptr.as_ref() }));
                unsafe { raw.block.as_ref() }.increment_strong();
                Handle {
                    raw: Some(RawHandle {
                        ptr: target,
                        block: raw.block,
                    }),
                    phantom_data: PhantomData,
                }
            }
            None => Handle::empty(),
        }
    }

    /// Same as `cast`, reusing this handle's strong reference.
    pub fn into_cast<U: ?Sized>(mut self, f: impl FnOnce(&T) -> &U) -> Handle<U> {
        let Some(raw) = self.raw else {
            return Handle::empty();
        };
        let target = NonNull::from(f(unsafe { raw.ptr.as_ref() }));
        // The reference moves to the new handle
        self.raw = None;
        Handle {
            raw: Some(RawHandle {
                ptr: target,
                block: raw.block,
            }),
            phantom_data: PhantomData,
        }
    }

    /// Reject the empty handle at a boundary that requires a value.
    pub fn non_null(self, context: &str) -> BridgeResult<Handle<T>> {
        if self.is_empty() {
            Err(BridgeError::null_handle(context))
        } else {
            Ok(self)
        }
    }
}

impl Handle<dyn Any + Send + Sync> {
    /// Recover a typed view of an erased handle.
    pub fn downcast<U: Any + Send + Sync>(self) -> Result<Handle<U>, Self> {
        if !self.get().is_some_and(|value| value.is::<U>()) {
            return Err(self);
        }
        Ok(self.into_cast(|value| match value.downcast_ref::<U>() {
            Some(typed) => typed,
            None => unreachable!("type was checked above"),
        }))
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = self.control_block() {
            block.increment_strong();
        }
        Handle {
            raw: self.raw,
            phantom_data: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for Handle<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            unsafe { release_strong(raw.block) }
        }
    }
}

impl<T: ?Sized> Default for Handle<T> {
    #[inline]
    fn default() -> Self {
        Handle::empty()
    }
}

impl<T: ?Sized> Deref for Handle<T> {
    type Target = T;

    /// Dereferencing the empty handle is a contract violation.
    #[inline]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty handle"),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => write!(f, "Handle({:?})", value),
            None => write!(f, "Handle(empty)"),
        }
    }
}

/// Weak reference to a native allocation.
///
/// Does not keep the allocation alive. `upgrade` succeeds only while the strong count is nonzero.
pub struct WeakHandle<T: ?Sized> {
    raw: Option<RawHandle<T>>,
    phantom_data: PhantomData<T>,
}

unsafe impl<T: ?Sized + Send + Sync> Send for WeakHandle<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for WeakHandle<T> {}

impl<T: ?Sized> WeakHandle<T> {
    /// A weak handle that never upgrades.
    #[inline]
    pub const fn new() -> WeakHandle<T> {
        WeakHandle {
            raw: None,
            phantom_data: PhantomData,
        }
    }

    /// Resolve to a strong handle if the allocation is still alive. Races with a concurrent final
    /// release resolve to either a live handle or `None`, never to a released allocation.
    pub fn upgrade(&self) -> Option<Handle<T>> {
        let raw = self.raw?;
        let block = unsafe { raw.block.as_ref() };
        if block.try_increment_strong() {
            Some(Handle {
                raw: Some(raw),
                phantom_data: PhantomData,
            })
        } else {
            None
        }
    }

    #[inline]
    pub fn expired(&self) -> bool {
        self.strong_count() == 0
    }

    #[inline]
    pub fn strong_count(&self) -> usize {
        match self.raw {
            Some(raw) => unsafe { raw.block.as_ref() }.strong_count(),
            None => 0,
        }
    }

    /// Identity of the control block this handle observes, or 0.
    #[inline]
    pub fn block_id(&self) -> usize {
        match self.raw {
            Some(raw) => raw.block.as_ptr() as usize,
            None => 0,
        }
    }
}

impl<T: ?Sized> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            unsafe { raw.block.as_ref() }.increment_weak();
        }
        WeakHandle {
            raw: self.raw,
            phantom_data: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            unsafe { release_weak(raw.block) }
        }
    }
}

impl<T: ?Sized> Default for WeakHandle<T> {
    fn default() -> Self {
        WeakHandle::new()
    }
}

impl<T: ?Sized> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expired() {
            write!(f, "WeakHandle(expired)")
        } else {
            write!(f, "WeakHandle({:#x})", self.block_id())
        }
    }
}
