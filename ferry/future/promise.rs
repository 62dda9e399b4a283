use std::{
    fmt,
    future::Future,
    mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

use super::Continuation;
use crate::{BridgeError, NativeException};

enum State<T> {
    Pending {
        waker: Option<Waker>,
        continuation: Option<Continuation<T>>,
    },
    Ready(Result<T, NativeException>),
    Taken,
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

/// The producing side of a native single-shot completion.
///
/// Dropping it without completing rejects the future with `BrokenPromise`.
pub struct NativePromise<T> {
    shared: Option<Arc<Shared<T>>>,
}

/// The consuming side of a native single-shot completion.
pub struct NativeFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> NativePromise<T> {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (NativePromise<T>, NativeFuture<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Pending {
                waker: None,
                continuation: None,
            }),
        });
        (
            NativePromise {
                shared: Some(shared.clone()),
            },
            NativeFuture { shared },
        )
    }

    pub fn resolve(mut self, value: T) {
        self.complete(Ok(value));
    }

    pub fn reject(mut self, exception: NativeException) {
        self.complete(Err(exception));
    }
}

impl<T> NativePromise<T> {
    fn complete(&mut self, outcome: Result<T, NativeException>) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        let mut state = shared.state.lock();
        match mem::replace(&mut *state, State::Taken) {
            State::Pending {
                continuation: Some(continuation),
                ..
            } => {
                drop(state);
                continuation(outcome);
            }
            State::Pending { waker, .. } => {
                *state = State::Ready(outcome);
                drop(state);
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
            State::Ready(_) | State::Taken => unreachable!("a promise completes once"),
        }
    }
}

impl<T> Drop for NativePromise<T> {
    fn drop(&mut self) {
        if self.shared.is_some() {
            tracing::debug!("promise dropped without a value");
            self.complete(Err(NativeException::new(BridgeError::BrokenPromise)));
        }
    }
}

impl<T> fmt::Debug for NativePromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativePromise").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> NativeFuture<T> {
    /// A future that is already complete.
    pub fn ready(outcome: Result<T, NativeException>) -> NativeFuture<T> {
        NativeFuture {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Ready(outcome)),
            }),
        }
    }

    /// Run `f` with the outcome once it is available, on the thread that completes the promise,
    /// or right away if it already is.
    pub fn then(self, f: impl FnOnce(Result<T, NativeException>) + Send + 'static) {
        let mut state = self.shared.state.lock();
        match mem::replace(&mut *state, State::Taken) {
            State::Pending { waker, .. } => {
                *state = State::Pending {
                    waker,
                    continuation: Some(Box::new(f)),
                };
            }
            State::Ready(outcome) => {
                drop(state);
                f(outcome);
            }
            State::Taken => {
                tracing::debug!("continuation attached to a consumed future");
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Ready(_))
    }
}

impl<T> Future for NativeFuture<T> {
    type Output = Result<T, NativeException>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match mem::replace(&mut *state, State::Taken) {
            State::Pending {
                mut waker,
                continuation,
            } => {
                if !waker.as_ref().is_some_and(|w| w.will_wake(cx.waker())) {
                    waker = Some(cx.waker().clone());
                }
                *state = State::Pending {
                    waker,
                    continuation,
                };
                Poll::Pending
            }
            State::Ready(outcome) => Poll::Ready(outcome),
            State::Taken => panic!("NativeFuture polled after completion"),
        }
    }
}

impl<T> fmt::Debug for NativeFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.state.lock() {
            State::Pending { .. } => "pending",
            State::Ready(Ok(_)) => "resolved",
            State::Ready(Err(_)) => "rejected",
            State::Taken => "taken",
        };
        write!(f, "NativeFuture({})", state)
    }
}
