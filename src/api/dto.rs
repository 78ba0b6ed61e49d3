use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::device::{ConnectivityState, MetricSample, Snapshot, SwitchState};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SnapshotDto {
    /// `host` or `host:port` of the device.
    pub address: String,
    pub switch: SwitchState,
    pub connectivity: ConnectivityState,
    /// Absent before the first successful poll and while offline.
    pub latest: Option<MetricSample>,
    /// Recent samples, oldest first.
    pub history: Vec<MetricSample>,
    pub taken_at: DateTime<Utc>,
}

impl From<Snapshot> for SnapshotDto {
    fn from(s: Snapshot) -> Self {
        Self {
            address: s.address.into(),
            switch: s.switch,
            connectivity: s.connectivity,
            latest: s.latest,
            history: s.history,
            taken_at: s.taken_at,
        }
    }
}

/// Response for `POST /devices/{address}/toggle`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ToggleDto {
    /// State implied by the device's reply; `null` if the reply did not say.
    pub switch: Option<SwitchState>,
}

/// A form field that may arrive as a JSON number or a string.
///
/// Operator input is validated by the schedule manager, so both shapes are
/// accepted here and passed on as text.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum InputValue {
    Integer(i64),
    Text(String),
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Integer(v) => write!(f, "{v}"),
            InputValue::Text(v) => f.write_str(v),
        }
    }
}

/// Request body for `POST /devices/{address}/schedules`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateScheduleRequest {
    /// Day of week as understood by the device firmware.
    pub day: InputValue,
    /// 0-23
    pub hour: InputValue,
    /// 0-59
    pub minute: InputValue,
}

/// Response for `POST /devices/{address}/schedules`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatedScheduleDto {
    /// Job id assigned by the device, if it reported one.
    pub id: Option<u64>,
}
