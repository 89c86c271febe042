use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::controller::{Controller, ControllerState};
use crate::load::LoadError;
use crate::route::RenderingDisposition;

/// A controller's terminal state in wire form.
///
/// The hydration payload is an index-keyed array of these; index `i`
/// corresponds to position `i` of the matched chain. The route trees on both
/// sides of the handoff must therefore be identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SerializedState {
    /// The controller settled with data.
    Ready {
        /// The loader's data.
        data: Value,
    },
    /// The controller settled with an error, kept as its message.
    Error {
        /// The rendered error message.
        message: String,
    },
    /// The controller settled as not-found.
    NotFound,
    /// The controller settled as a redirect.
    Redirect {
        /// The redirect target.
        target: String,
    },
}

impl SerializedState {
    fn of_state(state: &ControllerState) -> Option<Self> {
        match state {
            ControllerState::Loading => None,
            ControllerState::Ready { data } => Some(Self::Ready { data: data.clone() }),
            ControllerState::Failed { error } => Some(Self::Error {
                message: error.to_string(),
            }),
            ControllerState::NotFound => Some(Self::NotFound),
            ControllerState::Redirect { target } => Some(Self::Redirect {
                target: target.clone(),
            }),
        }
    }

    pub(crate) fn into_state(self) -> ControllerState {
        match self {
            Self::Ready { data } => ControllerState::Ready { data },
            Self::Error { message } => ControllerState::Failed {
                error: LoadError::Message(message),
            },
            Self::NotFound => ControllerState::NotFound,
            Self::Redirect { target } => ControllerState::Redirect { target },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Server,
    Client,
    TornDown,
}

/// Ferries settled route state from server rendering to the client.
///
/// The channel is an explicitly passed object with three phases: a server
/// side channel captures the settled chain and serializes it for embedding
/// as inline script content; a client side channel is constructed from that
/// payload and consumed positionally while the first navigation builds its
/// controllers; [`teardown`](Self::teardown) ends its life once the first
/// navigation completed.
#[derive(Debug)]
pub struct HydrationChannel {
    phase: Phase,
    states: Vec<Option<SerializedState>>,
    consumed: Vec<bool>,
}

impl HydrationChannel {
    /// Create the server side of the channel.
    pub fn server() -> Self {
        Self {
            phase: Phase::Server,
            states: Vec::new(),
            consumed: Vec::new(),
        }
    }

    /// Create the client side of the channel from a serialized payload.
    pub fn client(payload: &str) -> Result<Self, serde_json::Error> {
        let states: Vec<Option<SerializedState>> = serde_json::from_str(payload)?;
        Ok(Self {
            phase: Phase::Client,
            consumed: vec![false; states.len()],
            states,
        })
    }

    /// Capture the terminal states of a settled chain, positionally.
    ///
    /// Routes with [`RenderingDisposition::Client`] capture as absent
    /// entries, as do controllers that are still loading.
    pub fn capture<T: Clone>(&mut self, chain: &[Arc<Controller<T>>]) {
        if self.phase != Phase::Server {
            error!("hydration capture is only valid on the server side");
            return;
        }

        self.states = chain
            .iter()
            .map(|controller| {
                if controller.route().disposition() == RenderingDisposition::Client {
                    return None;
                }
                SerializedState::of_state(&controller.state())
            })
            .collect();
    }

    /// The serialized payload to embed in the server-rendered document.
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.states)
    }

    /// Take the state for chain position `index`, at most once.
    pub(crate) fn consume(&mut self, index: usize) -> Option<SerializedState> {
        if self.phase != Phase::Client {
            return None;
        }
        let Some(slot) = self.states.get_mut(index) else {
            return None;
        };
        if self.consumed[index] {
            error!("hydration state {index} consumed twice");
            return None;
        }
        self.consumed[index] = true;
        slot.take()
    }

    /// End the channel's life and drop the remaining state.
    pub fn teardown(&mut self) {
        self.states.clear();
        self.consumed.clear();
        self.phase = Phase::TornDown;
    }
}
