use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use uuid::Uuid;

use crate::app::models::DeviceState;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    BuildInfoChanged,
    ClientListChanged,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        serial: String,
        previous: DeviceState,
        current: DeviceState,
    },
    BuildInfoChanged {
        serial: String,
    },
    ClientListChanged {
        serial: String,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::StateChanged { .. } => EventKind::StateChanged,
            SessionEvent::BuildInfoChanged { .. } => EventKind::BuildInfoChanged,
            SessionEvent::ClientListChanged { .. } => EventKind::ClientListChanged,
        }
    }
}

pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(Uuid);

struct Registration {
    kind: EventKind,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    // Uuid v4 ordering is random, so registration order is keyed by a sequence number.
    entries: BTreeMap<u64, (ListenerId, Registration)>,
    next_seq: u64,
}

#[derive(Default)]
pub struct EventHub {
    registry: Mutex<Registry>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = ListenerId(Uuid::new_v4());
        let mut registry = self.registry();
        registry.next_seq += 1;
        let seq = registry.next_seq;
        registry
            .entries
            .insert(seq, (id, Registration { kind, listener }));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut registry = self.registry();
        let before = registry.entries.len();
        registry.entries.retain(|_, (candidate, _)| *candidate != id);
        registry.entries.len() != before
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry()
            .entries
            .values()
            .filter(|(_, registration)| registration.kind == kind)
            .count()
    }

    pub fn publish(&self, event: &SessionEvent) {
        let targets: Vec<Listener> = self
            .registry()
            .entries
            .values()
            .filter(|(_, registration)| registration.kind == event.kind())
            .map(|(_, registration)| Arc::clone(&registration.listener))
            .collect();
        for listener in targets {
            listener(event);
        }
    }
}
