//! An in-process script runtime implementing [`HostRuntime`].
//!
//! Objects live in a [`ferry_gc::Heap`] and are collected by tracing from the roots held by
//! [`ScriptRef`]s. Native proxies are registered with a finalization registry; their finalizers
//! only run when [`ScriptHost::run_finalizers`] is called, which may be long after the collection
//! that found them dead.

mod promise;
mod value;

#[cfg(test)]
mod tests;

use std::{collections::VecDeque, fmt, sync::Arc};

use ferry_gc::{FinalizationRegistry, GcContext, GcRef, GcVisitor, Heap, Trace};
use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{FinalizerHook, HostRuntime, SettleCallback};
use crate::{ExceptionToken, ProxyToken};

pub use promise::{ScriptPromise, ScriptResolvers};
pub use value::{ScriptError, ScriptRef, ScriptValue, ScriptWeak};

use value::FieldValue;

type Microtask = Box<dyn FnOnce() + Send>;

/// A function defined on a script object.
pub type ScriptMethod = Arc<
    dyn Fn(&ScriptHost, &ScriptRef, &[ScriptValue]) -> Result<ScriptValue, ScriptError>
        + Send
        + Sync,
>;

enum ObjectKind {
    Plain,
    NativeProxy(ProxyToken),
}

pub(crate) struct ScriptObject {
    id: u64,
    kind: ObjectKind,
    fields: HashMap<Arc<str>, FieldValue>,
    methods: HashMap<Arc<str>, ScriptMethod>,
}

impl ScriptObject {
    fn new(id: u64, kind: ObjectKind) -> ScriptObject {
        ScriptObject {
            id,
            kind,
            fields: HashMap::new(),
            methods: HashMap::new(),
        }
    }
}

impl Trace for ScriptObject {
    fn trace(&self, visitor: &mut impl GcVisitor) {
        for field in self.fields.values() {
            if let FieldValue::Object(target) = field {
                visitor.visit(*target);
            }
        }
    }
}

/// Root counts plus the finalization registry: everything the collector needs besides the heap.
pub(crate) struct Roots {
    counts: HashMap<GcRef, usize>,
    registry: FinalizationRegistry<ProxyToken>,
}

impl Roots {
    pub(crate) fn add(&mut self, object: GcRef) {
        *self.counts.entry(object).or_insert(0) += 1;
    }

    pub(crate) fn remove(&mut self, object: GcRef) {
        if let Some(count) = self.counts.get_mut(&object) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&object);
            }
        }
    }
}

impl GcContext<ScriptObject> for Roots {
    fn visit_roots(&mut self, visitor: &mut impl GcVisitor) {
        for root in self.counts.keys() {
            visitor.visit(*root);
        }
    }

    fn process_weak_refs(&mut self, heap: &Heap<ScriptObject>) {
        self.registry.process(heap);
    }
}

pub(crate) struct HostState {
    pub(crate) heap: Heap<ScriptObject>,
    pub(crate) roots: Roots,
    next_id: u64,
}

impl HostState {
    fn alloc(&mut self, kind: ObjectKind) -> (GcRef, u64) {
        let id = self.next_id;
        self.next_id += 1;

        let token = match &kind {
            ObjectKind::NativeProxy(token) => Some(*token),
            ObjectKind::Plain => None,
        };

        let HostState { heap, roots, .. } = self;
        let object = heap.alloc(roots, ScriptObject::new(id, kind));
        roots.add(object);
        if let Some(token) = token {
            roots.registry.register(object, token);
        }
        (object, id)
    }
}

pub(crate) struct HostInner {
    pub(crate) state: Mutex<HostState>,
    finalizer: Mutex<Option<Arc<dyn Fn(ProxyToken) + Send + Sync>>>,
    pub(crate) microtasks: Mutex<VecDeque<Microtask>>,
}

/// A garbage collected script runtime.
#[derive(Clone)]
pub struct ScriptHost {
    inner: Arc<HostInner>,
}

impl ScriptHost {
    pub fn new() -> ScriptHost {
        ScriptHost {
            inner: Arc::new(HostInner {
                state: Mutex::new(HostState {
                    heap: Heap::new(),
                    roots: Roots {
                        counts: HashMap::new(),
                        registry: FinalizationRegistry::new(),
                    },
                    next_id: 1,
                }),
                finalizer: Mutex::new(None),
                microtasks: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn new_object(&self) -> ScriptRef {
        self.allocate(ObjectKind::Plain)
    }

    fn allocate(&self, kind: ObjectKind) -> ScriptRef {
        let (object, id, swept) = {
            let mut state = self.inner.state.lock();
            let (object, id) = state.alloc(kind);
            let swept = if state.heap.should_gc() {
                let HostState { heap, roots, .. } = &mut *state;
                heap.collect(roots);
                heap.take_swept()
            } else {
                Vec::new()
            };
            (object, id, swept)
        };
        drop(swept);
        ScriptRef::rooted(self.inner.clone(), object, id)
    }

    /// Run a full collection. Returns the number of objects freed. Finalizers of collected native
    /// proxies are queued, not run.
    pub fn collect(&self) -> usize {
        let (freed, swept) = {
            let mut state = self.inner.state.lock();
            let HostState { heap, roots, .. } = &mut *state;
            heap.collect(roots);
            (heap.objects_freed_this_cycle(), heap.take_swept())
        };
        tracing::debug!(freed, "script heap collected");
        drop(swept);
        freed
    }

    /// Run the finalizers queued by earlier collections, returning how many ran.
    pub fn run_finalizers(&self) -> usize {
        let Some(hook) = self.inner.finalizer.lock().clone() else {
            return 0;
        };

        let pending = self.inner.state.lock().roots.registry.take_pending();
        for token in &pending {
            hook(*token);
        }
        pending.len()
    }

    /// Collect, then run every queued finalizer.
    pub fn collect_and_finalize(&self) -> usize {
        self.collect();
        self.run_finalizers()
    }

    /// Drain the microtask queue, including tasks queued while draining. Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.inner.microtasks.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn set_field(&self, object: &ScriptRef, name: &str, value: ScriptValue) {
        let stored = match &value {
            ScriptValue::Undefined => FieldValue::Undefined,
            ScriptValue::Bool(b) => FieldValue::Bool(*b),
            ScriptValue::Number(n) => FieldValue::Number(*n),
            ScriptValue::String(s) => FieldValue::String(s.clone()),
            ScriptValue::Object(target) => FieldValue::Object(target.object),
            ScriptValue::Error(error) => FieldValue::Error(error.clone()),
        };

        {
            let mut state = self.inner.state.lock();
            if let FieldValue::Object(target) = &stored {
                state.heap.write_barrier(*target);
            }
            if let Some(slot) = state.heap.get_mut(object.object) {
                slot.fields.insert(name.into(), stored);
            }
        }
        drop(value);
    }

    pub fn get_field(&self, object: &ScriptRef, name: &str) -> ScriptValue {
        let mut state = self.inner.state.lock();
        let field = state
            .heap
            .get(object.object)
            .and_then(|slot| slot.fields.get(name))
            .cloned();

        match field {
            None | Some(FieldValue::Undefined) => ScriptValue::Undefined,
            Some(FieldValue::Bool(b)) => ScriptValue::Bool(b),
            Some(FieldValue::Number(n)) => ScriptValue::Number(n),
            Some(FieldValue::String(s)) => ScriptValue::String(s),
            Some(FieldValue::Error(error)) => ScriptValue::Error(error),
            Some(FieldValue::Object(target)) => match state.heap.get(target).map(|slot| slot.id) {
                Some(id) => {
                    state.roots.add(target);
                    ScriptValue::Object(ScriptRef::rooted(self.inner.clone(), target, id))
                }
                None => ScriptValue::Undefined,
            },
        }
    }

    /// Remove a field, returning whether it existed.
    pub fn delete_field(&self, object: &ScriptRef, name: &str) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            state
                .heap
                .get_mut(object.object)
                .and_then(|slot| slot.fields.remove(name))
        };
        removed.is_some()
    }

    pub fn define_method(&self, object: &ScriptRef, name: &str, method: ScriptMethod) {
        let previous = {
            let mut state = self.inner.state.lock();
            state
                .heap
                .get_mut(object.object)
                .and_then(|slot| slot.methods.insert(name.into(), method))
        };
        drop(previous);
    }

    /// Call a method defined on `object`. The method runs without any host lock held.
    pub fn call_method(
        &self,
        object: &ScriptRef,
        name: &str,
        args: &[ScriptValue],
    ) -> Result<ScriptValue, ScriptError> {
        let method = self
            .inner
            .state
            .lock()
            .heap
            .get(object.object)
            .and_then(|slot| slot.methods.get(name).cloned());

        match method {
            Some(method) => method(self, object, args),
            None => Err(ScriptError::type_error(&format!("{} is not a function", name))),
        }
    }

    pub fn num_objects(&self) -> usize {
        self.inner.state.lock().heap.num_objects()
    }

    /// Number of distinct rooted objects
    pub fn root_count(&self) -> usize {
        self.inner.state.lock().roots.counts.len()
    }

    /// Native proxies registered for finalization and not yet found dead
    pub fn finalization_registrations(&self) -> usize {
        self.inner.state.lock().roots.registry.len()
    }

    pub fn pending_finalizers(&self) -> usize {
        self.inner.state.lock().roots.registry.pending_len()
    }

    pub fn pending_microtasks(&self) -> usize {
        self.inner.microtasks.lock().len()
    }
}

impl Default for ScriptHost {
    fn default() -> Self {
        ScriptHost::new()
    }
}

impl fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHost")
            .field("objects", &self.num_objects())
            .finish()
    }
}

impl HostRuntime for ScriptHost {
    type Object = ScriptRef;
    type Weak = ScriptWeak;
    type Error = ScriptError;
    type Value = ScriptValue;
    type Promise = ScriptPromise;
    type Resolvers = ScriptResolvers;

    #[inline]
    fn object_id(&self, object: &ScriptRef) -> u64 {
        object.id()
    }

    #[inline]
    fn downgrade(&self, object: &ScriptRef) -> ScriptWeak {
        object.downgrade()
    }

    fn install_finalizer(&self, hook: FinalizerHook) {
        *self.inner.finalizer.lock() = Some(Arc::from(hook));
    }

    fn new_native_proxy(&self, token: ProxyToken) -> ScriptRef {
        self.allocate(ObjectKind::NativeProxy(token))
    }

    fn native_token(&self, object: &ScriptRef) -> Option<ProxyToken> {
        match self.inner.state.lock().heap.get(object.object)?.kind {
            ObjectKind::NativeProxy(token) => Some(token),
            ObjectKind::Plain => None,
        }
    }

    fn new_error(&self, name: &str, message: &str, token: Option<ExceptionToken>) -> ScriptError {
        ScriptError::with_token(name, message, token)
    }

    fn new_promise(&self) -> (ScriptPromise, ScriptResolvers) {
        ScriptPromise::new(Arc::downgrade(&self.inner))
    }

    fn on_settled(&self, promise: &ScriptPromise, callback: SettleCallback<Self>) {
        promise.then(callback);
    }
}
