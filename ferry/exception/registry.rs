use std::collections::VecDeque;

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{ExceptionToken, NativeException};

/// Native exceptions referenced by host errors, oldest evicted first once full.
pub struct ExceptionRegistry {
    state: Mutex<RegistryState>,
    capacity: usize,
}

struct RegistryState {
    entries: HashMap<ExceptionToken, NativeException>,
    order: VecDeque<ExceptionToken>,
    next_token: u64,
}

impl ExceptionRegistry {
    pub fn new(capacity: usize) -> ExceptionRegistry {
        ExceptionRegistry {
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_token: 1,
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&self, exception: NativeException) -> ExceptionToken {
        let mut evicted = Vec::new();

        let token = {
            let mut state = self.state.lock();
            let token = ExceptionToken::from_raw(state.next_token);
            state.next_token += 1;

            state.entries.insert(token, exception);
            state.order.push_back(token);

            while state.order.len() > self.capacity {
                let Some(oldest) = state.order.pop_front() else {
                    break;
                };
                if let Some(exception) = state.entries.remove(&oldest) {
                    tracing::debug!(token = %oldest, "evicted registered exception");
                    evicted.push(exception);
                }
            }
            token
        };

        drop(evicted);
        token
    }

    pub fn get(&self, token: ExceptionToken) -> Option<NativeException> {
        self.state.lock().entries.get(&token).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
