use std::{fmt, sync::Arc, time::Duration};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::{
    device::DeviceAddress,
    shelly::{
        models::{CreateResponse, ScheduleListResponse},
        RpcCall, RpcClient, RpcError, DEFAULT_TIMEOUT,
    },
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Rejected locally; nothing was sent to the device.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The device refused to create the job.
    #[error("schedule rejected by device: {0}")]
    CreateRejected(String),

    /// No job with this id exists on the device.
    #[error("no schedule with id {0}")]
    NotFound(u64),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

// ---------------------------------------------------------------------------
// Timespec
// ---------------------------------------------------------------------------

/// Six-field cron expression understood by the device scheduler:
/// `second minute hour day-of-month month day-of-week`.
///
/// Schedules created here fire once a week at `hour:minute:00`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timespec {
    pub minute: u8,
    pub hour: u8,
    /// Passed through verbatim; firmware revisions disagree on whether the
    /// week starts at 0 or 1.
    pub day_of_week: u32,
}

impl Timespec {
    /// Validates raw operator input. `day` must be an integer; `hour` must be
    /// 0-23 and `minute` 0-59.
    pub fn parse(day: &str, hour: &str, minute: &str) -> Result<Self, ScheduleError> {
        let day_of_week = parse_field::<u32>("day", day)?;
        let hour = parse_field::<u8>("hour", hour)?;
        let minute = parse_field::<u8>("minute", minute)?;

        if hour > 23 {
            return Err(ScheduleError::InvalidInput(format!(
                "hour must be 0-23, got {hour}"
            )));
        }
        if minute > 59 {
            return Err(ScheduleError::InvalidInput(format!(
                "minute must be 0-59, got {minute}"
            )));
        }

        Ok(Self {
            minute,
            hour,
            day_of_week,
        })
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0 {} {} * * {}", self.minute, self.hour, self.day_of_week)
    }
}

fn parse_field<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ScheduleError> {
    raw.trim().parse::<T>().map_err(|_| {
        ScheduleError::InvalidInput(format!("{name} must be a number, got {raw:?}"))
    })
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// A job as listed by the device. Fields the device omitted are `None`; such
/// jobs are still listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Schedule {
    pub id: Option<u64>,
    pub enabled: Option<bool>,
    pub timespec: Option<String>,
    /// Method of the job's first call, e.g. `switch.toggle`.
    pub method: Option<String>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Lists, creates and deletes toggle schedules on devices.
///
/// Nothing is cached: the device is the only source of truth and may be
/// edited out of band, so every call goes to the network.
#[derive(Clone)]
pub struct ScheduleManager {
    rpc: Arc<dyn RpcClient>,
    timeout: Duration,
}

impl ScheduleManager {
    pub fn new(rpc: Arc<dyn RpcClient>) -> Self {
        Self {
            rpc,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn list(&self, address: &DeviceAddress) -> Result<Vec<Schedule>, ScheduleError> {
        let value = self
            .rpc
            .call(address, &RpcCall::schedule_list().with_timeout(self.timeout))
            .await?;

        let schedules = ScheduleListResponse::from_value(&value)
            .jobs
            .into_iter()
            .map(|job| Schedule {
                id: job.id,
                enabled: job.enable,
                timespec: job.timespec,
                method: job.calls.into_iter().next().and_then(|c| c.method),
            })
            .collect();
        Ok(schedules)
    }

    /// Creates a weekly toggle of switch 0. Returns the job id if the device
    /// reported one.
    pub async fn create(
        &self,
        address: &DeviceAddress,
        day: &str,
        hour: &str,
        minute: &str,
    ) -> Result<Option<u64>, ScheduleError> {
        let timespec = Timespec::parse(day, hour, minute)?.to_string();
        let call = RpcCall::schedule_create(&timespec).with_timeout(self.timeout);

        match self.rpc.call(address, &call).await {
            Ok(value) => {
                let id = CreateResponse::from_value(&value).id;
                info!(address = %address, timespec = %timespec, id = ?id, "Schedule created");
                Ok(id)
            }
            Err(RpcError::NotFound { message }) => {
                error!(address = %address, timespec = %timespec, message = %message, "Failed to create schedule");
                Err(ScheduleError::CreateRejected(message))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes job `id`. `NotFound` means there was nothing to delete.
    pub async fn delete(&self, address: &DeviceAddress, id: &str) -> Result<(), ScheduleError> {
        let id = parse_field::<u64>("schedule id", id)?;
        let call = RpcCall::schedule_delete(id).with_timeout(self.timeout);

        match self.rpc.call(address, &call).await {
            Ok(_) => {
                info!(address = %address, id, "Schedule deleted");
                Ok(())
            }
            Err(RpcError::NotFound { .. }) => {
                warn!(address = %address, id, "No schedule found with that id");
                Err(ScheduleError::NotFound(id))
            }
            Err(e) => Err(e.into()),
        }
    }
}
