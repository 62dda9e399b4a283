//! Return value policies.
//!
//! A generated adapter picks one policy per function signature. The policy decides how the value
//! the function returns becomes a [`Handle`]. The category of the returned value is expressed in
//! its type:
//!
//! | category              | types                                 |
//! |-----------------------|---------------------------------------|
//! | owning pointer        | `Box<T>`, `Handle<T>`, `Arc<T>`       |
//! | persistent reference  | `&T`, `&mut T`                        |
//! | temporary / by value  | [`ByValue<T>`]                        |
//! | unowned alias         | `&'static T`, [`Unowned<T>`]          |
//!
//! A policy that cannot be applied to a category has no implementation for it, so the mismatch
//! is a compile error:
//!
//! ```compile_fail
//! use ferry::policy::{invoke, Take};
//!
//! let value = 5u32;
//! // Take on a borrowed reference would claim ownership of memory it does not own
//! let handle = invoke::<Take, _>(|| &value);
//! ```
//!
//! ```compile_fail
//! use ferry::policy::{invoke, Move};
//! use std::sync::Arc;
//!
//! // Cannot move out of a shared pointer
//! let handle = invoke::<Move, _>(|| Arc::new(String::new()));
//! ```
//!
//! ```compile_fail
//! use ferry::policy::{invoke, Void};
//!
//! // Void requires the function to return nothing, use Discard to drop a result
//! invoke::<Void, _>(|| 5u32);
//! ```

#[cfg(test)]
mod tests;

use std::{fmt, mem, ptr::NonNull, sync::Arc};

use crate::Handle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Take,
    Copy,
    Move,
    Disconnect,
    Automatic,
    Void,
    Discard,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyKind::Take => "take",
            PolicyKind::Copy => "copy",
            PolicyKind::Move => "move",
            PolicyKind::Disconnect => "disconnect",
            PolicyKind::Automatic => "automatic",
            PolicyKind::Void => "void",
            PolicyKind::Discard => "discard",
        };
        f.write_str(name)
    }
}

/// Marker types name a policy.
pub trait PolicyTag {
    const KIND: PolicyKind;
}

/// Conversion of a function result of type `R` under a policy.
pub trait ReturnValuePolicy<R>: PolicyTag {
    type Output;

    fn apply(result: R) -> Self::Output;
}

/// Call `f` and convert its result with policy `P`.
#[inline]
pub fn invoke<P, R>(f: impl FnOnce() -> R) -> P::Output
where
    P: ReturnValuePolicy<R>,
{
    P::apply(f())
}

/// A result returned by value, or a temporary. Every policy that accepts it allocates a new
/// handle owning the value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ByValue<T>(pub T);

/// An alias to memory the caller guarantees will outlive every handle made from it.
pub struct Unowned<T: ?Sized> {
    ptr: NonNull<T>,
}

impl<T: ?Sized> Unowned<T> {
    /// # Safety
    /// `value` must outlive every handle created from this alias, including clones and casts.
    pub unsafe fn new(value: &T) -> Unowned<T> {
        Unowned {
            ptr: NonNull::from(value),
        }
    }
}

/// Take ownership of a returned pointer without copying.
#[derive(Debug)]
pub struct Take;
/// Copy-construct a new allocation from the returned value.
#[derive(Debug)]
pub struct Copy;
/// Move-construct a new allocation, leaving the source in its default state.
#[derive(Debug)]
pub struct Move;
/// Alias the returned memory without owning it.
#[derive(Debug)]
pub struct Disconnect;
/// Take for pointers and temporaries, Copy for references.
#[derive(Debug)]
pub struct Automatic;
/// The function returns nothing.
#[derive(Debug)]
pub struct Void;
/// Drop whatever the function returns.
#[derive(Debug)]
pub struct Discard;

macro_rules! policy_tag {
    ($($policy:ident),*) => {
        $(
            impl PolicyTag for $policy {
                const KIND: PolicyKind = PolicyKind::$policy;
            }
        )*
    };
}

policy_tag!(Take, Copy, Move, Disconnect, Automatic, Void, Discard);

/// Every policy value-constructs a returned temporary.
macro_rules! by_value {
    ($($policy:ident),*) => {
        $(
            impl<T: Send + Sync + 'static> ReturnValuePolicy<ByValue<T>> for $policy {
                type Output = Handle<T>;

                #[inline]
                fn apply(result: ByValue<T>) -> Handle<T> {
                    Handle::new(result.0)
                }
            }
        )*
    };
}

by_value!(Take, Copy, Move, Disconnect, Automatic);

// ============================================================================
// Take
// ============================================================================

impl<T: Send + Sync + 'static> ReturnValuePolicy<Box<T>> for Take {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: Box<T>) -> Handle<T> {
        Handle::from_box(result)
    }
}

impl<T: ?Sized> ReturnValuePolicy<Handle<T>> for Take {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: Handle<T>) -> Handle<T> {
        result
    }
}

impl<T: Send + Sync + 'static> ReturnValuePolicy<Arc<T>> for Take {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: Arc<T>) -> Handle<T> {
        Handle::from_arc(result)
    }
}

// ============================================================================
// Copy
// ============================================================================

impl<T: Clone + Send + Sync + 'static> ReturnValuePolicy<&T> for Copy {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: &T) -> Handle<T> {
        Handle::new(result.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> ReturnValuePolicy<&mut T> for Copy {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: &mut T) -> Handle<T> {
        Handle::new(result.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> ReturnValuePolicy<Box<T>> for Copy {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: Box<T>) -> Handle<T> {
        Handle::new(T::clone(&result))
    }
}

impl<T: Clone + Send + Sync + 'static> ReturnValuePolicy<Arc<T>> for Copy {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: Arc<T>) -> Handle<T> {
        Handle::new(T::clone(&result))
    }
}

/// Copying through an empty handle yields the empty handle.
impl<T: Clone + Send + Sync + 'static> ReturnValuePolicy<Handle<T>> for Copy {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: Handle<T>) -> Handle<T> {
        match result.get() {
            Some(value) => Handle::new(value.clone()),
            None => Handle::empty(),
        }
    }
}

// ============================================================================
// Move
// ============================================================================

impl<T: Default + Send + Sync + 'static> ReturnValuePolicy<&mut T> for Move {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: &mut T) -> Handle<T> {
        Handle::new(mem::take(result))
    }
}

impl<T: Send + Sync + 'static> ReturnValuePolicy<Box<T>> for Move {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: Box<T>) -> Handle<T> {
        Handle::new(*result)
    }
}

// ============================================================================
// Disconnect
// ============================================================================

impl<T: ?Sized> ReturnValuePolicy<&'static T> for Disconnect {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: &'static T) -> Handle<T> {
        Handle::from_static(result)
    }
}

impl<T: ?Sized> ReturnValuePolicy<Unowned<T>> for Disconnect {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: Unowned<T>) -> Handle<T> {
        // SAFETY: the creator of `Unowned` vouched for the lifetime.
        unsafe { Handle::disconnected(result.ptr) }
    }
}

// ============================================================================
// Automatic
// ============================================================================

macro_rules! automatic_as {
    ($policy:ident: $($category:ty),*) => {
        $(
            impl<T: Clone + Send + Sync + 'static> ReturnValuePolicy<$category> for Automatic {
                type Output = Handle<T>;

                #[inline]
                fn apply(result: $category) -> Handle<T> {
                    <$policy as ReturnValuePolicy<$category>>::apply(result)
                }
            }
        )*
    };
}

automatic_as!(Copy: &T, &mut T);

impl<T: Send + Sync + 'static> ReturnValuePolicy<Box<T>> for Automatic {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: Box<T>) -> Handle<T> {
        Take::apply(result)
    }
}

impl<T: ?Sized> ReturnValuePolicy<Handle<T>> for Automatic {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: Handle<T>) -> Handle<T> {
        result
    }
}

impl<T: Send + Sync + 'static> ReturnValuePolicy<Arc<T>> for Automatic {
    type Output = Handle<T>;

    #[inline]
    fn apply(result: Arc<T>) -> Handle<T> {
        Take::apply(result)
    }
}

// ============================================================================
// Void and Discard
// ============================================================================

impl ReturnValuePolicy<()> for Void {
    type Output = ();

    #[inline]
    fn apply(_: ()) {}
}

impl<R> ReturnValuePolicy<R> for Discard {
    type Output = ();

    #[inline]
    fn apply(result: R) {
        drop(result);
    }
}
