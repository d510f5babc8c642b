//! Session lifecycle state machine.
//!
//! ```text
//! Uninitialized -> Initializing -> Active <-> Degraded
//!                       |            |           |
//!                       v            v           v
//!                 Uninitialized    Closed <------+
//! ```
//!
//! `Closed` may re-enter `Initializing` through a fresh handshake.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Active,
    /// A recoverable transport error was seen on an active session.
    Degraded,
    Closed,
}

impl SessionState {
    /// Whether tool calls may be issued in this state.
    pub fn accepts_calls(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Degraded)
    }

    /// Whether a new handshake may start from this state.
    pub fn can_initialize(&self) -> bool {
        matches!(self, SessionState::Uninitialized | SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::Active => write!(f, "active"),
            SessionState::Degraded => write!(f, "degraded"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Server identity reported by the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Result payload of the `initialize` handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: ServerInfo,
}

/// One logical conversation with the gateway.
///
/// Owned by a single client; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    /// Opaque token assigned by the server; absent before the first handshake.
    pub id: Option<String>,
    pub protocol_version: Option<String>,
    pub state: SessionState,
    pub server_info: Option<ServerInfo>,
    pub capabilities: Value,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: None,
            protocol_version: None,
            state: SessionState::Uninitialized,
            server_info: None,
            capabilities: Value::Null,
        }
    }

    pub(crate) fn begin_initialize(&mut self) {
        debug_assert!(self.state.can_initialize());
        self.state = SessionState::Initializing;
        self.id = None;
    }

    /// Handshake failed; the next attempt starts from scratch.
    pub(crate) fn abort_initialize(&mut self) {
        self.state = SessionState::Uninitialized;
        self.id = None;
        self.protocol_version = None;
    }

    pub(crate) fn activate(&mut self, id: Option<String>, result: InitializeResult) {
        self.id = id;
        self.protocol_version = Some(result.protocol_version);
        self.server_info = Some(result.server_info);
        self.capabilities = result.capabilities;
        self.state = SessionState::Active;
    }

    /// Adopts a session id rotated by the server.
    ///
    /// Ignored once the session is closed or before a handshake started.
    pub(crate) fn rotate_id(&mut self, id: String) -> bool {
        if matches!(self.state, SessionState::Uninitialized | SessionState::Closed)
            || self.id.as_deref() == Some(id.as_str())
        {
            return false;
        }
        self.id = Some(id);
        true
    }

    pub(crate) fn degrade(&mut self) {
        if self.state == SessionState::Active {
            self.state = SessionState::Degraded;
        }
    }

    pub(crate) fn recover(&mut self) {
        if self.state == SessionState::Degraded {
            self.state = SessionState::Active;
        }
    }

    pub(crate) fn close(&mut self) -> Option<String> {
        self.state = SessionState::Closed;
        self.protocol_version = None;
        self.id.take()
    }
}
