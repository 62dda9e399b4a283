//! Exception marshaling between native code and the host.
//!
//! A native exception thrown to the host is stored in an [`ExceptionRegistry`] and the host error
//! carries only its [`ExceptionToken`]. When that host error comes back, the token resolves to the
//! identical native exception. Host errors without a resolvable token become [`HostException`]s,
//! which in turn unwrap to the original host error if they cross back.

mod registry;


use std::{any::Any, error::Error as StdError, fmt, sync::Arc};

use crate::host::{HostError, HostRuntime};

pub use registry::ExceptionRegistry;

/// Opaque back-reference from a host error to a stored native exception.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExceptionToken(u64);

impl ExceptionToken {
    #[inline]
    pub fn from_raw(raw: u64) -> ExceptionToken {
        ExceptionToken(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExceptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exception#{}", self.0)
    }
}

/// A native error, shared by identity. Clones are the same exception.
#[derive(Clone)]
pub struct NativeException {
    error: Arc<dyn StdError + Send + Sync + 'static>,
    type_name: &'static str,
}

impl NativeException {
    pub fn new<E>(error: E) -> NativeException
    where
        E: StdError + Send + Sync + 'static,
    {
        NativeException {
            error: Arc::new(error),
            type_name: std::any::type_name::<E>(),
        }
    }

    /// Full path of the wrapped error type.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The wrapped error type without its module path or generic arguments.
    pub fn short_name(&self) -> &'static str {
        let base = match self.type_name.find('<') {
            Some(generics) => &self.type_name[..generics],
            None => self.type_name,
        };
        match base.rfind("::") {
            Some(separator) => &base[separator + 2..],
            None => base,
        }
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }

    /// Whether both wrap the same error object.
    pub fn ptr_eq(&self, other: &NativeException) -> bool {
        Arc::as_ptr(&self.error) as *const () == Arc::as_ptr(&other.error) as *const ()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.error.is::<E>()
    }
}

impl fmt::Display for NativeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl fmt::Debug for NativeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeException({}: {})", self.short_name(), self.error)
    }
}

impl StdError for NativeException {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.source()
    }
}

/// A host error that crossed into native code without a native origin.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{name}: {message}")]
pub struct HostException {
    pub name: String,
    pub message: String,
    original: Option<Arc<dyn Any + Send + Sync>>,
}

impl HostException {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> HostException {
        HostException {
            name: name.into(),
            message: message.into(),
            original: None,
        }
    }

    /// Wrap a host error, keeping the original so it can be rethrown unchanged.
    pub fn from_host_error<E: HostError>(error: &E) -> HostException {
        HostException {
            name: error.name(),
            message: error.message(),
            original: Some(Arc::new(error.clone())),
        }
    }

    /// The original host error, if this exception wraps one of type `E`.
    pub fn original<E: Clone + 'static>(&self) -> Option<E> {
        self.original.as_ref()?.downcast_ref::<E>().cloned()
    }
}

/// Converts exceptions in both directions for one session.
pub struct ExceptionBridge {
    registry: ExceptionRegistry,
    prefix: String,
}

impl ExceptionBridge {
    pub fn new(capacity: usize, prefix: impl Into<String>) -> ExceptionBridge {
        ExceptionBridge {
            registry: ExceptionRegistry::new(capacity),
            prefix: prefix.into(),
        }
    }

    /// The host error to throw for `exception`.
    pub fn to_host_error<H: HostRuntime>(&self, host: &H, exception: &NativeException) -> H::Error {
        if let Some(original) = exception
            .downcast_ref::<HostException>()
            .and_then(HostException::original::<H::Error>)
        {
            return original;
        }

        let token = self.registry.insert(exception.clone());
        let message = format!("{}{}", self.prefix, exception.message());
        host.new_error(exception.short_name(), &message, Some(token))
    }

    /// The native exception for a caught host error.
    pub fn from_host_error<H: HostRuntime>(&self, error: &H::Error) -> NativeException {
        if let Some(token) = error.native_token() {
            if let Some(exception) = self.registry.get(token) {
                return exception;
            }
            tracing::debug!(%token, "exception token no longer registered, using message");
        }

        NativeException::new(HostException::from_host_error(error))
    }

    /// Convert the outcome of a host call into a native result.
    pub fn check_host_result<H: HostRuntime, T>(
        &self,
        result: Result<T, H::Error>,
    ) -> Result<T, NativeException> {
        result.map_err(|error| self.from_host_error::<H>(&error))
    }

    pub fn registry(&self) -> &ExceptionRegistry {
        &self.registry
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Debug for ExceptionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionBridge")
            .field("registered", &self.registry.len())
            .field("prefix", &self.prefix)
            .finish()
    }
}
