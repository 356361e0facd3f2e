use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Options handed to the static-file service on start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOptions {
    /// Document root of the default host
    pub file_dir: String,
    pub hostname: String,
    pub port: u16,
    /// Configuration text appended after the service's base configuration
    pub extra_config: String,
    /// Stop the service when the host app goes to the background
    pub stop_in_background: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Inactive,
    Starting,
    Active,
    Stopping,
    Crashed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Inactive => "INACTIVE",
            ServerState::Starting => "STARTING",
            ServerState::Active => "ACTIVE",
            ServerState::Stopping => "STOPPING",
            ServerState::Crashed => "CRASHED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEvent {
    pub state: ServerState,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StateEvent {
    pub fn new(state: ServerState, details: impl Into<String>) -> Self {
        Self {
            state,
            details: details.into(),
            error: None,
        }
    }

    pub fn failed(
        state: ServerState,
        details: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            state,
            details: details.into(),
            error: Some(error.into()),
        }
    }
}

pub type StateListener = Box<dyn Fn(&StateEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Registered state listeners of a service implementation.
#[derive(Default)]
pub struct ListenerSet {
    next_id: u64,
    listeners: Vec<(ListenerId, StateListener)>,
}

impl ListenerSet {
    pub fn add(&mut self, listener: StateListener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn emit(&self, event: &StateEvent) {
        for (_, listener) in &self.listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// A local HTTP static-file service driven as a black box.
#[async_trait]
pub trait StaticServer: Send {
    /// Bring the service up; returns its origin, e.g. `http://127.0.0.1:8432`
    async fn start(&mut self, options: &ServerOptions) -> Result<String>;

    async fn stop(&mut self) -> Result<()>;

    fn add_state_listener(&mut self, listener: StateListener) -> ListenerId;

    fn remove_state_listener(&mut self, id: ListenerId);
}
