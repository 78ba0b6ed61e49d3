pub mod connectivity;

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::{history::TimeSeriesBuffer, shelly::models::SwitchStatus};

pub use self::connectivity::{ConnectivityState, Transition};

// ---------------------------------------------------------------------------
// DeviceAddress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid device address {0:?}: expected host or host:port")]
pub struct InvalidAddress(pub String);

/// Network location of a device (`host` or `host:port`), used verbatim as the
/// authority of its RPC URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DeviceAddress {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let valid = !trimmed.is_empty()
            && !trimmed.contains("://")
            && !trimmed
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@'));
        if valid {
            Ok(Self(trimmed.to_owned()))
        } else {
            Err(InvalidAddress(s.to_owned()))
        }
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = InvalidAddress;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(a: DeviceAddress) -> Self {
        a.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// SwitchState
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SwitchState {
    On,
    Off,
    #[default]
    Unknown,
}

impl From<Option<bool>> for SwitchState {
    fn from(output: Option<bool>) -> Self {
        match output {
            Some(true) => SwitchState::On,
            Some(false) => SwitchState::Off,
            None => SwitchState::Unknown,
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
            SwitchState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// MetricSample
// ---------------------------------------------------------------------------

/// One GetStatus reading. A field the device did not report stays `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub power_watts: Option<f64>,
    pub voltage_volts: Option<f64>,
    pub current_amps: Option<f64>,
    pub temperature_c: Option<f64>,
    pub temperature_f: Option<f64>,
    /// Cumulative active energy, watt-hours.
    pub energy_wh: Option<f64>,
}

impl MetricSample {
    pub fn from_status(status: &SwitchStatus, timestamp: DateTime<Utc>) -> Self {
        let temperature = status.temperature.as_ref();
        Self {
            timestamp,
            power_watts: status.apower,
            voltage_volts: status.voltage,
            current_amps: status.current,
            temperature_c: temperature.and_then(|t| t.celsius),
            temperature_f: temperature.and_then(|t| t.fahrenheit),
            energy_wh: status.aenergy.as_ref().and_then(|e| e.total),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable point-in-time view of one device, handed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub address: DeviceAddress,
    pub switch: SwitchState,
    pub connectivity: ConnectivityState,
    /// `None` until the first successful poll and while offline.
    pub latest: Option<MetricSample>,
    /// Recency window, oldest first.
    pub history: Vec<MetricSample>,
    pub taken_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// DeviceState
// ---------------------------------------------------------------------------

/// Mutable per-device state. Owned by exactly one poller task.
#[derive(Debug)]
pub struct DeviceState {
    address: DeviceAddress,
    switch: SwitchState,
    connectivity: ConnectivityState,
    latest: Option<MetricSample>,
    history: TimeSeriesBuffer,
}

impl DeviceState {
    pub fn new(address: DeviceAddress, history: TimeSeriesBuffer) -> Self {
        Self {
            address,
            switch: SwitchState::Unknown,
            connectivity: ConnectivityState::Unknown,
            latest: None,
            history,
        }
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Applies a successful poll cycle.
    pub fn record_success(&mut self, status: &SwitchStatus, at: DateTime<Utc>) -> Transition {
        let sample = MetricSample::from_status(status, at);
        self.history.push(sample.clone());
        self.latest = Some(sample);
        self.switch = SwitchState::from(status.output);
        self.connectivity.on_success()
    }

    /// Applies a poll cycle that exhausted its retries. Displayed metrics are
    /// cleared so that stale numbers are never shown as current.
    pub fn record_failure(&mut self) -> Transition {
        self.latest = None;
        self.switch = SwitchState::Unknown;
        self.connectivity.on_failure()
    }

    pub fn set_switch(&mut self, state: SwitchState) {
        self.switch = state;
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            address: self.address.clone(),
            switch: self.switch,
            connectivity: self.connectivity,
            latest: self.latest.clone(),
            history: self.history.snapshot(),
            taken_at: Utc::now(),
        }
    }
}
