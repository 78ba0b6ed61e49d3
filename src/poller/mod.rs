use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use crate::{
    device::{DeviceAddress, DeviceState, SwitchState, Transition},
    dispatcher::{Dispatcher, Publisher},
    history::{TimeSeriesBuffer, ZeroCapacity},
    shelly::{
        models::{SwitchStatus, ToggleResponse},
        RpcCall, RpcClient, RpcError,
    },
};

const COMMAND_BUFFER: usize = 8;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Attempts per poll cycle and the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Pause after each cycle, successful or not.
    pub interval: Duration,
    /// Timeout of each GetStatus attempt.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub history_capacity: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            history_capacity: crate::history::DEFAULT_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Instructions delivered to a running poller from other tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerCommand {
    /// Overwrite the cached switch state (used after a toggle).
    SetSwitch(SwitchState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Online,
    Offline,
    /// Stop was requested mid-cycle; the cycle's result was discarded.
    Cancelled,
}

/// Polls one device until told to stop.
///
/// The poller is the only writer of its `DeviceState`. Everything other tasks
/// need to change goes through `PollerCommand`s, which are applied between
/// RPC calls, and everything they read comes out as published snapshots.
pub struct DevicePoller {
    state: DeviceState,
    rpc: Arc<dyn RpcClient>,
    publisher: Publisher,
    settings: PollSettings,
    commands: mpsc::Receiver<PollerCommand>,
    shutdown: watch::Receiver<bool>,
}

/// Sending side of a poller's command and shutdown channels.
struct Control {
    commands: mpsc::Sender<PollerCommand>,
    shutdown: watch::Sender<bool>,
    publisher: Publisher,
}

impl DevicePoller {
    async fn build(
        address: DeviceAddress,
        rpc: Arc<dyn RpcClient>,
        dispatcher: Dispatcher,
        settings: PollSettings,
    ) -> Result<(Self, Control), ZeroCapacity> {
        let history = TimeSeriesBuffer::new(settings.history_capacity)?;
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let publisher = dispatcher.open(&address).await;

        let poller = Self {
            state: DeviceState::new(address, history),
            rpc,
            publisher: publisher.clone(),
            settings,
            commands: commands_rx,
            shutdown: shutdown_rx,
        };

        // Subscribers and readers see the device (as Unknown) from the moment
        // it is registered, before the first poll completes.
        poller.publish().await;

        let control = Control {
            commands: commands_tx,
            shutdown: shutdown_tx,
            publisher,
        };
        Ok((poller, control))
    }

    /// Starts polling `address` on its own task.
    pub async fn spawn(
        address: DeviceAddress,
        rpc: Arc<dyn RpcClient>,
        dispatcher: Dispatcher,
        settings: PollSettings,
    ) -> Result<PollerHandle, ZeroCapacity> {
        let (poller, control) = Self::build(address.clone(), rpc, dispatcher, settings).await?;
        let task = tokio::spawn(poller.run());
        Ok(PollerHandle {
            address,
            commands: control.commands,
            shutdown: control.shutdown,
            publisher: control.publisher,
            task,
        })
    }

    /// Runs poll cycles separated by the configured interval until stopped.
    pub async fn run(mut self) {
        info!(
            address = %self.state.address(),
            interval_secs = self.settings.interval.as_secs_f64(),
            attempts = self.settings.retry.attempts,
            "Poller started"
        );

        loop {
            if self.run_cycle().await == CycleOutcome::Cancelled {
                break;
            }
            if !self.wait(self.settings.interval).await {
                break;
            }
        }

        info!(address = %self.state.address(), "Poller stopped");
    }

    /// One poll cycle: GetStatus with bounded retries, then exactly one state
    /// update and one published snapshot.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let call = RpcCall::get_status().with_timeout(self.settings.timeout);
        let attempts = self.settings.retry.attempts.max(1);
        let mut attempt = 0;

        let result = loop {
            attempt += 1;
            let result = self.rpc.call(self.state.address(), &call).await;

            // An in-flight call is allowed to finish; its result is dropped.
            if self.stop_requested() {
                return CycleOutcome::Cancelled;
            }

            match result {
                Ok(value) => break Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    debug!(
                        address = %self.state.address(),
                        attempt,
                        error = %e,
                        "GetStatus attempt failed, retrying"
                    );
                    if !self.wait(self.settings.retry.delay).await {
                        return CycleOutcome::Cancelled;
                    }
                }
                Err(e) => break Err(e),
            }
        };

        let outcome = match result {
            Ok(value) => {
                let status = SwitchStatus::from_value(&value);
                let transition = self.state.record_success(&status, Utc::now());
                self.log_transition(transition, None);
                CycleOutcome::Online
            }
            Err(e) => {
                let transition = self.state.record_failure();
                self.log_transition(transition, Some(&e));
                CycleOutcome::Offline
            }
        };

        self.publish().await;
        outcome
    }

    /// Sleeps for `period`, applying commands as they arrive. Returns `false`
    /// if a stop was requested instead.
    async fn wait(&mut self, period: Duration) -> bool {
        enum Wake {
            Elapsed,
            Shutdown { closed: bool },
            Command(PollerCommand),
        }

        let sleep = time::sleep(period);
        tokio::pin!(sleep);

        loop {
            let wake = tokio::select! {
                _ = &mut sleep => Wake::Elapsed,
                changed = self.shutdown.changed() => Wake::Shutdown { closed: changed.is_err() },
                Some(cmd) = self.commands.recv() => Wake::Command(cmd),
            };

            match wake {
                Wake::Elapsed => return true,
                Wake::Shutdown { closed } => {
                    if closed || *self.shutdown.borrow() {
                        return false;
                    }
                }
                Wake::Command(cmd) => self.apply(cmd).await,
            }
        }
    }

    async fn apply(&mut self, cmd: PollerCommand) {
        match cmd {
            PollerCommand::SetSwitch(state) => {
                debug!(address = %self.state.address(), switch = %state, "Applying switch state");
                self.state.set_switch(state);
            }
        }
        self.publish().await;
    }

    async fn publish(&self) {
        self.publisher.publish(self.state.snapshot()).await;
    }

    fn stop_requested(&self) -> bool {
        self.shutdown.has_changed().is_err() || *self.shutdown.borrow()
    }

    fn log_transition(&self, transition: Transition, error: Option<&RpcError>) {
        let address = self.state.address();
        if transition.came_online() {
            info!(address = %address, from = %transition.from, "Device online");
        } else if transition.went_offline() {
            warn!(
                address = %address,
                error = %error.map(ToString::to_string).unwrap_or_default(),
                "Device offline"
            );
        } else if let Some(e) = error {
            debug!(address = %address, error = %e, "Device still offline");
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Owner's handle to a spawned poller. Dropping it also stops the poller.
pub struct PollerHandle {
    address: DeviceAddress,
    commands: mpsc::Sender<PollerCommand>,
    shutdown: watch::Sender<bool>,
    publisher: Publisher,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Hands a new switch state to the poller without waiting for it.
    /// Returns `false` if the poller has stopped or its command queue is
    /// full; the next poll then reports the real state.
    pub fn set_switch(&self, state: SwitchState) -> bool {
        match self.commands.try_send(PollerCommand::SetSwitch(state)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(address = %self.address, switch = %state, "Poller busy, switch state dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Requests a stop, waits for the task to finish, then closes the
    /// device's snapshot channel. A GetStatus call in flight completes
    /// (bounded by its timeout) and its result is discarded.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(address = %self.address, error = %e, "Poller task ended abnormally");
        }
        self.publisher.close().await;
    }
}

// ---------------------------------------------------------------------------
// Toggle
// ---------------------------------------------------------------------------

/// Switch state implied by a toggle reply: `was_on: false` means the outlet
/// is now on and vice versa. Any other reply implies nothing.
pub fn state_after_toggle(reply: &ToggleResponse) -> Option<SwitchState> {
    match reply.was_on {
        Some(false) => Some(SwitchState::On),
        Some(true) => Some(SwitchState::Off),
        None => None,
    }
}

/// Issues `Switch.Toggle` and returns the state it implies. The state is
/// inferred from the reply alone; no follow-up GetStatus is made.
pub async fn toggle(
    rpc: &dyn RpcClient,
    address: &DeviceAddress,
    timeout: Duration,
) -> Result<Option<SwitchState>, RpcError> {
    let value = rpc
        .call(address, &RpcCall::toggle().with_timeout(timeout))
        .await?;
    let next = state_after_toggle(&ToggleResponse::from_value(&value));
    match next {
        Some(state) => info!(address = %address, switch = %state, "Switch toggled"),
        None => warn!(address = %address, reply = %value, "Toggle reply carried no was_on flag"),
    }
    Ok(next)
}
