use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Reachability of a device as judged by its poller.
///
/// Only whole poll cycles move the machine: a failed attempt that a retry
/// absorbs never reaches it.
///
/// | From    | Cycle ok | Cycle failed |
/// |---------|----------|--------------|
/// | Unknown | Online   | Offline      |
/// | Online  | Online   | Offline      |
/// | Offline | Online   | Offline      |
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    #[default]
    Unknown,
    Online,
    Offline,
}

/// Result of feeding one cycle outcome into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectivityState,
    pub to: ConnectivityState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// `true` when this transition is the one that disconnects the device.
    pub fn went_offline(&self) -> bool {
        self.changed() && self.to == ConnectivityState::Offline
    }

    pub fn came_online(&self) -> bool {
        self.changed() && self.to == ConnectivityState::Online
    }
}

impl ConnectivityState {
    pub fn on_success(&mut self) -> Transition {
        self.move_to(ConnectivityState::Online)
    }

    pub fn on_failure(&mut self) -> Transition {
        self.move_to(ConnectivityState::Offline)
    }

    fn move_to(&mut self, to: ConnectivityState) -> Transition {
        let from = *self;
        *self = to;
        Transition { from, to }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectivityState::Unknown => "unknown",
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
        };
        f.write_str(s)
    }
}
