use std::{collections::HashSet, time::Duration};

use anyhow::{bail, Context, Result};

use crate::{
    device::DeviceAddress,
    dispatcher::DEFAULT_CHANNEL_CAPACITY,
    poller::{PollSettings, RetryPolicy},
};

/// Highest `IP_ADDRESS_n` key consulted.
const MAX_NUMBERED_ADDRESSES: usize = 99;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    /// Devices to monitor, in configuration order.
    pub devices: Vec<DeviceAddress>,
    pub poll: PollSettings,
    /// Timeout of toggle and schedule calls.
    pub rpc_timeout: Duration,
    /// Per-device snapshot buffer for slow subscribers.
    pub snapshot_channel_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        let attempts: u32 = parse(&get("RETRY_ATTEMPTS", "3"), "RETRY_ATTEMPTS")?;
        if attempts == 0 {
            bail!("RETRY_ATTEMPTS must be at least 1");
        }
        let history_capacity: usize = parse(&get("HISTORY_CAPACITY", "12"), "HISTORY_CAPACITY")?;
        if history_capacity == 0 {
            bail!("HISTORY_CAPACITY must be at least 1");
        }
        let snapshot_channel_capacity: usize = parse(
            &get("SNAPSHOT_CHANNEL_CAPACITY", &DEFAULT_CHANNEL_CAPACITY.to_string()),
            "SNAPSHOT_CHANNEL_CAPACITY",
        )?;
        if snapshot_channel_capacity == 0 {
            bail!("SNAPSHOT_CHANNEL_CAPACITY must be at least 1");
        }

        let poll_timeout: u64 = parse(&get("POLL_TIMEOUT_SECS", "5"), "POLL_TIMEOUT_SECS")?;
        if poll_timeout == 0 {
            bail!("POLL_TIMEOUT_SECS must be at least 1");
        }
        let rpc_timeout: u64 = parse(&get("RPC_TIMEOUT_SECS", "10"), "RPC_TIMEOUT_SECS")?;
        if rpc_timeout == 0 {
            bail!("RPC_TIMEOUT_SECS must be at least 1");
        }

        let poll = PollSettings {
            interval: Duration::from_secs(parse(&get("POLL_INTERVAL_SECS", "5"), "POLL_INTERVAL_SECS")?),
            timeout: Duration::from_secs(poll_timeout),
            retry: RetryPolicy {
                attempts,
                delay: Duration::from_millis(parse(&get("RETRY_DELAY_MS", "1000"), "RETRY_DELAY_MS")?),
            },
            history_capacity,
        };

        Ok(Self {
            server_host: get("SERVER_HOST", "0.0.0.0"),
            server_port: parse(&get("SERVER_PORT", "8080"), "SERVER_PORT")?,
            devices: collect_devices(&lookup)?,
            poll,
            rpc_timeout: Duration::from_secs(rpc_timeout),
            snapshot_channel_capacity,
        })
    }
}

/// `DEVICE_ADDRESSES` first, then `IP_ADDRESS_1..=99`. Duplicates are
/// dropped, first occurrence wins.
fn collect_devices(lookup: &impl Fn(&str) -> Option<String>) -> Result<Vec<DeviceAddress>> {
    let mut devices = parse_device_list(&lookup("DEVICE_ADDRESSES").unwrap_or_default())?;

    for n in 1..=MAX_NUMBERED_ADDRESSES {
        let key = format!("IP_ADDRESS_{n}");
        let Some(raw) = lookup(&key).filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        let address = raw
            .parse::<DeviceAddress>()
            .with_context(|| format!("{key} is not a valid device address"))?;
        devices.push(address);
    }

    let mut seen = HashSet::new();
    devices.retain(|a| seen.insert(a.clone()));
    Ok(devices)
}

/// Parse `"host1,host2:8080"` into addresses.
fn parse_device_list(raw: &str) -> Result<Vec<DeviceAddress>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|entry| {
            entry
                .parse::<DeviceAddress>()
                .with_context(|| format!("DEVICE_ADDRESSES entry {entry:?} is not a valid device address"))
        })
        .collect()
}

fn parse<T>(raw: &str, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}"))
}
