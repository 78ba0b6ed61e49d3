pub mod error;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::device::DeviceAddress;

pub use self::error::RpcError;
use self::{
    error::CODE_NOT_FOUND,
    models::{ErrorBody, ScheduledCall},
};

/// Timeout applied when a call does not carry its own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// The remote methods this service uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    SwitchGetStatus,
    SwitchToggle,
    ScheduleList,
    ScheduleCreate,
    ScheduleDelete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::SwitchGetStatus => "Switch.GetStatus",
            Method::SwitchToggle => "Switch.Toggle",
            Method::ScheduleList => "Schedule.List",
            Method::ScheduleCreate => "Schedule.Create",
            Method::ScheduleDelete => "Schedule.Delete",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One RPC request: method, query parameters and an optional timeout
/// override.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: Method,
    pub params: Vec<(&'static str, String)>,
    pub timeout: Option<Duration>,
}

impl RpcCall {
    fn new(method: Method, params: Vec<(&'static str, String)>) -> Self {
        Self {
            method,
            params,
            timeout: None,
        }
    }

    pub fn get_status() -> Self {
        Self::new(Method::SwitchGetStatus, vec![("id", "0".to_owned())])
    }

    pub fn toggle() -> Self {
        Self::new(Method::SwitchToggle, vec![("id", "0".to_owned())])
    }

    pub fn schedule_list() -> Self {
        Self::new(Method::ScheduleList, vec![])
    }

    /// `timespec` is the six-field cron expression; the scheduled action is
    /// always a toggle of switch 0.
    pub fn schedule_create(timespec: &str) -> Self {
        let calls = serde_json::to_string(&[ScheduledCall::toggle_switch()])
            .unwrap_or_else(|_| r#"[{"method":"switch.toggle","params":{"id":0}}]"#.to_owned());
        Self::new(
            Method::ScheduleCreate,
            vec![("timespec", timespec.to_owned()), ("calls", calls)],
        )
    }

    pub fn schedule_delete(id: u64) -> Self {
        Self::new(Method::ScheduleDelete, vec![("id", id.to_string())])
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `/rpc/{method}?k=v&...` with percent-encoded values.
    pub fn path_and_query(&self) -> String {
        let mut path = format!("/rpc/{}", self.method);
        for (i, (key, value)) in self.params.iter().enumerate() {
            path.push(if i == 0 { '?' } else { '&' });
            path.push_str(key);
            path.push('=');
            path.push_str(&urlencoding::encode(value));
        }
        path
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Sends one RPC call to a device and returns its decoded JSON body.
///
/// Callers own the execution context: implementations suspend for the full
/// round trip, bounded by the call's timeout.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(&self, address: &DeviceAddress, call: &RpcCall) -> Result<Value, RpcError>;
}

/// `RpcClient` speaking plain HTTP GET to `http://{address}/rpc/{method}`.
#[derive(Debug, Clone)]
pub struct HttpRpcClient {
    http: Client,
    default_timeout: Duration,
}

impl Default for HttpRpcClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HttpRpcClient {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            default_timeout,
        }
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn call(&self, address: &DeviceAddress, call: &RpcCall) -> Result<Value, RpcError> {
        let url = format!("http://{}{}", address, call.path_and_query());
        let timeout = call.timeout.unwrap_or(self.default_timeout);
        debug!(address = %address, method = %call.method, url = %url, "Sending RPC call");

        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(RpcError::from_reqwest)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(RpcError::from_reqwest)?;

        decode_response(status, &bytes)
    }
}

/// Classifies a raw HTTP response.
///
/// A `code: -103` envelope wins over the status line because the device
/// reports it with a non-2xx status.
pub(crate) fn decode_response(
    status: reqwest::StatusCode,
    bytes: &[u8],
) -> Result<Value, RpcError> {
    let parsed = serde_json::from_slice::<Value>(bytes);

    if let Ok(ref value) = parsed {
        if let Some(err) = ErrorBody::from_value(value) {
            if err.code == CODE_NOT_FOUND {
                return Err(RpcError::NotFound {
                    message: err.message.unwrap_or_default(),
                });
            }
            return Err(RpcError::Transport(format!(
                "device error: code={}, msg={}",
                err.code,
                err.message.as_deref().unwrap_or("(no message)")
            )));
        }
    }

    if !status.is_success() {
        return Err(RpcError::Transport(format!("HTTP {status}")));
    }

    parsed.map_err(|e| RpcError::Transport(format!("malformed JSON body: {e}")))
}
