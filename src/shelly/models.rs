use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Lenient field decoding
//
// Firmware revisions differ in which fields they report, and a field may
// carry an unexpected type (`"N/A"`, `null`). Every field below decodes
// through `lenient`, which turns a missing or mistyped value into `None`
// instead of failing the whole response.
// ---------------------------------------------------------------------------

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| serde_json::from_value(v).ok()))
}

/// Like `lenient`, but for arrays: malformed elements are kept as
/// `T::default()` rather than dropped.
fn lenient_items<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let items = match raw {
        Some(Value::Array(items)) => items,
        _ => return Ok(Vec::new()),
    };
    Ok(items
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap_or_default())
        .collect())
}

/// Decodes a response object, falling back to all-absent for anything that
/// is not a JSON object.
fn decode<T>(value: &Value) -> T
where
    T: DeserializeOwned + Default,
{
    if !value.is_object() {
        return T::default();
    }
    T::deserialize(value).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Error envelope
//
// Failed calls answer with `{ "code": -103, "message": "..." }`, usually
// together with a non-2xx status.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Returns the error envelope if `value` is one.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.get("code")?;
        ErrorBody::deserialize(value).ok()
    }
}

// ---------------------------------------------------------------------------
// Switch.GetStatus?id=0
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SwitchStatus {
    /// Relay output; `true` means the outlet is powered.
    #[serde(default, deserialize_with = "lenient")]
    pub output: Option<bool>,

    /// Active power, watts.
    #[serde(default, deserialize_with = "lenient")]
    pub apower: Option<f64>,

    /// Volts.
    #[serde(default, deserialize_with = "lenient")]
    pub voltage: Option<f64>,

    /// Amps.
    #[serde(default, deserialize_with = "lenient")]
    pub current: Option<f64>,

    #[serde(default, deserialize_with = "lenient")]
    pub temperature: Option<Temperature>,

    #[serde(default, deserialize_with = "lenient")]
    pub aenergy: Option<ActiveEnergy>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Temperature {
    #[serde(rename = "tC", default, deserialize_with = "lenient")]
    pub celsius: Option<f64>,

    #[serde(rename = "tF", default, deserialize_with = "lenient")]
    pub fahrenheit: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ActiveEnergy {
    /// Watt-hours since the counter was last reset.
    #[serde(default, deserialize_with = "lenient")]
    pub total: Option<f64>,
}

impl SwitchStatus {
    /// Decodes a GetStatus body. Never fails: anything that is not an object
    /// yields a status with every field absent.
    pub fn from_value(value: &Value) -> Self {
        decode(value)
    }
}

// ---------------------------------------------------------------------------
// Switch.Toggle?id=0
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToggleResponse {
    /// Output state *before* the toggle.
    #[serde(default, deserialize_with = "lenient")]
    pub was_on: Option<bool>,
}

impl ToggleResponse {
    pub fn from_value(value: &Value) -> Self {
        decode(value)
    }
}

// ---------------------------------------------------------------------------
// Schedule.List
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleListResponse {
    #[serde(default, deserialize_with = "lenient_items")]
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Job {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<u64>,

    #[serde(default, deserialize_with = "lenient")]
    pub enable: Option<bool>,

    #[serde(default, deserialize_with = "lenient")]
    pub timespec: Option<String>,

    #[serde(default, deserialize_with = "lenient_items")]
    pub calls: Vec<JobCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobCall {
    #[serde(default, deserialize_with = "lenient")]
    pub method: Option<String>,
}

impl ScheduleListResponse {
    pub fn from_value(value: &Value) -> Self {
        decode(value)
    }
}

// ---------------------------------------------------------------------------
// Schedule.Create?timespec=...&calls=[...]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateResponse {
    /// Job id assigned by the device.
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<u64>,
}

impl CreateResponse {
    pub fn from_value(value: &Value) -> Self {
        decode(value)
    }
}

/// One entry of the `calls` query parameter.
#[derive(Debug, Serialize)]
pub struct ScheduledCall {
    pub method: &'static str,
    pub params: ScheduledCallParams,
}

#[derive(Debug, Serialize)]
pub struct ScheduledCallParams {
    pub id: u8,
}

impl ScheduledCall {
    /// The only action this service schedules: toggle switch 0.
    pub fn toggle_switch() -> Self {
        Self {
            method: "switch.toggle",
            params: ScheduledCallParams { id: 0 },
        }
    }
}
