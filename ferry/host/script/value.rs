use std::{
    fmt,
    sync::{Arc, Weak},
};

use ferry_gc::GcRef;

use super::HostInner;
use crate::{host::HostError, ExceptionToken, WeakProxy};

/// A rooted reference to a script object. The object is not collected while any `ScriptRef` to it
/// exists.
pub struct ScriptRef {
    pub(super) host: Arc<HostInner>,
    pub(super) object: GcRef,
    pub(super) id: u64,
}

impl ScriptRef {
    /// Caller must already have added a root for `object`.
    pub(super) fn rooted(host: Arc<HostInner>, object: GcRef, id: u64) -> ScriptRef {
        ScriptRef { host, object, id }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn downgrade(&self) -> ScriptWeak {
        ScriptWeak {
            host: Arc::downgrade(&self.host),
            object: self.object,
            id: self.id,
        }
    }
}

impl Clone for ScriptRef {
    fn clone(&self) -> Self {
        self.host.state.lock().roots.add(self.object);
        ScriptRef {
            host: self.host.clone(),
            object: self.object,
            id: self.id,
        }
    }
}

impl Drop for ScriptRef {
    fn drop(&mut self) {
        self.host.state.lock().roots.remove(self.object);
    }
}

impl PartialEq for ScriptRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.host, &other.host) && self.object == other.object
    }
}

impl Eq for ScriptRef {}

impl fmt::Debug for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptRef({}, {:?})", self.id, self.object)
    }
}

/// A reference that does not keep its object alive.
#[derive(Clone)]
pub struct ScriptWeak {
    host: Weak<HostInner>,
    object: GcRef,
    id: u64,
}

impl WeakProxy for ScriptWeak {
    type Strong = ScriptRef;

    fn upgrade(&self) -> Option<ScriptRef> {
        let host = self.host.upgrade()?;
        {
            let mut state = host.state.lock();
            if !state.heap.contains(self.object) {
                return None;
            }
            state.roots.add(self.object);
        }
        Some(ScriptRef::rooted(host, self.object, self.id))
    }

    fn is_alive(&self) -> bool {
        self.host
            .upgrade()
            .is_some_and(|host| host.state.lock().heap.contains(self.object))
    }
}

impl fmt::Debug for ScriptWeak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptWeak({})", self.id)
    }
}

/// A script error value. Clones are the same error.
#[derive(Clone)]
pub struct ScriptError(Arc<ErrorInner>);

struct ErrorInner {
    name: String,
    message: String,
    token: Option<ExceptionToken>,
}

impl ScriptError {
    pub fn new(name: &str, message: &str) -> ScriptError {
        ScriptError::with_token(name, message, None)
    }

    pub(crate) fn with_token(
        name: &str,
        message: &str,
        token: Option<ExceptionToken>,
    ) -> ScriptError {
        ScriptError(Arc::new(ErrorInner {
            name: name.to_owned(),
            message: message.to_owned(),
            token,
        }))
    }

    pub fn type_error(message: &str) -> ScriptError {
        ScriptError::new("TypeError", message)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    /// Whether both are the same error object.
    pub fn ptr_eq(&self, other: &ScriptError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl HostError for ScriptError {
    fn name(&self) -> String {
        self.0.name.clone()
    }

    fn message(&self) -> String {
        self.0.message.clone()
    }

    fn native_token(&self) -> Option<ExceptionToken> {
        self.0.token
    }
}

impl PartialEq for ScriptError {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptError({}: {})", self.0.name, self.0.message)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.name, self.0.message)
    }
}

impl std::error::Error for ScriptError {}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum ScriptValue {
    #[default]
    Undefined,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Object(ScriptRef),
    Error(ScriptError),
}

impl ScriptValue {
    pub fn as_object(&self) -> Option<&ScriptRef> {
        match self {
            ScriptValue::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(string) => Some(string),
            _ => None,
        }
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Number(value)
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::String(value.into())
    }
}

impl From<ScriptRef> for ScriptValue {
    fn from(value: ScriptRef) -> Self {
        ScriptValue::Object(value)
    }
}

/// A value as stored inside the heap. Object references are traced instead of rooted.
#[derive(Clone)]
pub(super) enum FieldValue {
    Undefined,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Object(GcRef),
    Error(ScriptError),
}
