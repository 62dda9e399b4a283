use std::{
    fmt, mem,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use super::{HostInner, ScriptError, ScriptHost, ScriptValue};
use crate::host::{HostResolvers, SettleCallback};

type Outcome = Result<ScriptValue, ScriptError>;

enum PromiseState {
    Pending(Vec<SettleCallback<ScriptHost>>),
    Settled(Outcome),
}

/// A script promise. Reactions run as microtasks of the host that created it.
#[derive(Clone)]
pub struct ScriptPromise {
    state: Arc<Mutex<PromiseState>>,
    host: Weak<HostInner>,
}

impl ScriptPromise {
    pub(super) fn new(host: Weak<HostInner>) -> (ScriptPromise, ScriptResolvers) {
        let promise = ScriptPromise {
            state: Arc::new(Mutex::new(PromiseState::Pending(Vec::new()))),
            host,
        };
        let resolvers = ScriptResolvers {
            promise: promise.clone(),
        };
        (promise, resolvers)
    }

    /// The outcome, if settled.
    pub fn outcome(&self) -> Option<Outcome> {
        match &*self.state.lock() {
            PromiseState::Pending(_) => None,
            PromiseState::Settled(outcome) => Some(outcome.clone()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*self.state.lock(), PromiseState::Pending(_))
    }

    pub(super) fn then(&self, callback: SettleCallback<ScriptHost>) {
        let settled = {
            let mut state = self.state.lock();
            match &mut *state {
                PromiseState::Pending(reactions) => {
                    reactions.push(callback);
                    return;
                }
                PromiseState::Settled(outcome) => outcome.clone(),
            }
        };
        self.schedule(vec![callback], settled);
    }

    fn settle(&self, outcome: Outcome) {
        let reactions = {
            let mut state = self.state.lock();
            match &mut *state {
                PromiseState::Pending(reactions) => {
                    let reactions = mem::take(reactions);
                    *state = PromiseState::Settled(outcome.clone());
                    reactions
                }
                PromiseState::Settled(_) => {
                    tracing::debug!("ignored settling an already settled promise");
                    return;
                }
            }
        };
        self.schedule(reactions, outcome);
    }

    fn schedule(&self, reactions: Vec<SettleCallback<ScriptHost>>, outcome: Outcome) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        let mut microtasks = host.microtasks.lock();
        for reaction in reactions {
            let outcome = outcome.clone();
            microtasks.push_back(Box::new(move || reaction(outcome)));
        }
    }
}

impl fmt::Debug for ScriptPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome() {
            None => write!(f, "ScriptPromise(pending)"),
            Some(Ok(value)) => write!(f, "ScriptPromise(resolved {:?})", value),
            Some(Err(error)) => write!(f, "ScriptPromise(rejected {:?})", error),
        }
    }
}

/// The settle side of a [`ScriptPromise`].
pub struct ScriptResolvers {
    promise: ScriptPromise,
}

impl HostResolvers<ScriptValue, ScriptError> for ScriptResolvers {
    fn resolve(self, value: ScriptValue) {
        self.promise.settle(Ok(value));
    }

    fn reject(self, error: ScriptError) {
        self.promise.settle(Err(error));
    }
}
