use std::{collections::BTreeMap, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    device::{DeviceAddress, Snapshot, SwitchState},
    dispatcher::{Dispatcher, Subscription},
    history::ZeroCapacity,
    poller::{self, DevicePoller, PollSettings, PollerHandle},
    schedules::{Schedule, ScheduleError, ScheduleManager},
    shelly::{RpcClient, RpcError, DEFAULT_TIMEOUT},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("device {0} is already registered")]
    AlreadyRegistered(DeviceAddress),

    #[error("device {0} is not registered")]
    UnknownDevice(DeviceAddress),

    #[error(transparent)]
    InvalidSettings(#[from] ZeroCapacity),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// The set of monitored devices and the entry point for every operation on
/// them.
///
/// Each registered device has one poller task. Manual actions (toggle,
/// schedules) run on the caller's task, never on a poller, so a slow action
/// cannot stall telemetry and vice versa.
pub struct Registry {
    rpc: Arc<dyn RpcClient>,
    settings: PollSettings,
    action_timeout: Duration,
    dispatcher: Dispatcher,
    schedules: ScheduleManager,
    pollers: Mutex<BTreeMap<DeviceAddress, PollerHandle>>,
}

impl Registry {
    pub fn new(rpc: Arc<dyn RpcClient>, settings: PollSettings, dispatcher: Dispatcher) -> Self {
        Self {
            schedules: ScheduleManager::new(rpc.clone()),
            rpc,
            settings,
            action_timeout: DEFAULT_TIMEOUT,
            dispatcher,
            pollers: Mutex::default(),
        }
    }

    /// Timeout for toggle and schedule calls.
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self.schedules = self.schedules.with_timeout(timeout);
        self
    }

    /// Starts polling `address`.
    pub async fn register(&self, address: DeviceAddress) -> Result<(), RegistryError> {
        let mut pollers = self.pollers.lock().await;
        if pollers.contains_key(&address) {
            return Err(RegistryError::AlreadyRegistered(address));
        }

        let handle = DevicePoller::spawn(
            address.clone(),
            self.rpc.clone(),
            self.dispatcher.clone(),
            self.settings,
        )
        .await?;
        pollers.insert(address.clone(), handle);

        info!(address = %address, "Device registered");
        Ok(())
    }

    /// Stops the device's poller, waits for it to finish, then discards its
    /// state and ends its subscriptions.
    pub async fn unregister(&self, address: &DeviceAddress) -> Result<(), RegistryError> {
        let handle = self
            .pollers
            .lock()
            .await
            .remove(address)
            .ok_or_else(|| RegistryError::UnknownDevice(address.clone()))?;

        handle.stop().await;

        info!(address = %address, "Device unregistered");
        Ok(())
    }

    /// Stops every poller.
    pub async fn shutdown(&self) {
        let handles: Vec<PollerHandle> = {
            let mut pollers = self.pollers.lock().await;
            std::mem::take(&mut *pollers).into_values().collect()
        };
        for handle in handles {
            handle.stop().await;
        }
        info!("All pollers stopped");
    }

    pub async fn addresses(&self) -> Vec<DeviceAddress> {
        self.pollers.lock().await.keys().cloned().collect()
    }

    pub async fn is_registered(&self, address: &DeviceAddress) -> bool {
        self.pollers.lock().await.contains_key(address)
    }

    pub async fn subscribe(&self, address: &DeviceAddress) -> Result<Subscription, RegistryError> {
        self.dispatcher
            .subscribe(address)
            .await
            .ok_or_else(|| RegistryError::UnknownDevice(address.clone()))
    }

    pub async fn snapshot(&self, address: &DeviceAddress) -> Result<Snapshot, RegistryError> {
        self.dispatcher
            .latest(address)
            .await
            .ok_or_else(|| RegistryError::UnknownDevice(address.clone()))
    }

    pub async fn snapshots(&self) -> Vec<Snapshot> {
        self.dispatcher.all_latest().await
    }

    /// Toggles the outlet and hands the implied state to the device's poller.
    /// `Ok(None)` means the reply did not say what the new state is; the
    /// cached state is left alone until the next poll.
    pub async fn toggle(&self, address: &DeviceAddress) -> Result<Option<SwitchState>, RegistryError> {
        self.ensure_registered(address).await?;

        let next = poller::toggle(self.rpc.as_ref(), address, self.action_timeout).await?;

        if let Some(state) = next {
            if let Some(handle) = self.pollers.lock().await.get(address) {
                handle.set_switch(state);
            }
        }
        Ok(next)
    }

    pub async fn list_schedules(&self, address: &DeviceAddress) -> Result<Vec<Schedule>, RegistryError> {
        self.ensure_registered(address).await?;
        Ok(self.schedules.list(address).await?)
    }

    pub async fn create_schedule(
        &self,
        address: &DeviceAddress,
        day: &str,
        hour: &str,
        minute: &str,
    ) -> Result<Option<u64>, RegistryError> {
        self.ensure_registered(address).await?;
        Ok(self.schedules.create(address, day, hour, minute).await?)
    }

    pub async fn delete_schedule(&self, address: &DeviceAddress, id: &str) -> Result<(), RegistryError> {
        self.ensure_registered(address).await?;
        Ok(self.schedules.delete(address, id).await?)
    }

    async fn ensure_registered(&self, address: &DeviceAddress) -> Result<(), RegistryError> {
        if self.is_registered(address).await {
            Ok(())
        } else {
            Err(RegistryError::UnknownDevice(address.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::time;

    use super::*;
    use crate::{
        device::ConnectivityState,
        shelly::{testing::ScriptedRpc, Method, RpcCall},
    };

    /// GetStatus answers after `delay`; every other call goes to `scripted`.
    struct SlowStatus {
        delay: Duration,
        scripted: ScriptedRpc,
    }

    #[async_trait]
    impl RpcClient for SlowStatus {
        async fn call(&self, address: &DeviceAddress, call: &RpcCall) -> Result<Value, RpcError> {
            if call.method == Method::SwitchGetStatus {
                time::sleep(self.delay).await;
                return Ok(status(true));
            }
            self.scripted.call(address, call).await
        }
    }

    fn addr(s: &str) -> DeviceAddress {
        s.parse().unwrap()
    }

    fn registry(rpc: &ScriptedRpc) -> Registry {
        Registry::new(Arc::new(rpc.clone()), PollSettings::default(), Dispatcher::default())
    }

    fn status(output: bool) -> serde_json::Value {
        json!({ "output": output, "apower": 10.0, "voltage": 230.0, "current": 0.05 })
    }

    #[tokio::test(start_paused = true)]
    async fn register_twice_is_rejected() {
        let rpc = ScriptedRpc::new();
        let reg = registry(&rpc);
        reg.register(addr("10.0.0.1")).await.unwrap();
        let err = reg.register(addr("10.0.0.1")).await.unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered(addr("10.0.0.1")));
        reg.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn registered_device_is_visible_immediately() {
        let rpc = ScriptedRpc::new();
        let reg = registry(&rpc);
        reg.register(addr("10.0.0.1")).await.unwrap();

        let snap = reg.snapshot(&addr("10.0.0.1")).await.unwrap();
        assert_eq!(snap.address, addr("10.0.0.1"));
        assert_eq!(reg.addresses().await, vec![addr("10.0.0.1")]);
        reg.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_stops_polling_and_ends_stream() {
        let rpc = ScriptedRpc::new();
        rpc.push(Method::SwitchGetStatus, Ok(status(true)));
        let reg = registry(&rpc);
        reg.register(addr("10.0.0.1")).await.unwrap();
        let mut sub = reg.subscribe(&addr("10.0.0.1")).await.unwrap();

        reg.unregister(&addr("10.0.0.1")).await.unwrap();
        let calls = rpc.call_count(Method::SwitchGetStatus);

        // Drain whatever was published before the stop; then the stream ends.
        while sub.next().await.is_some() {}
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rpc.call_count(Method::SwitchGetStatus), calls);
        assert!(reg.snapshot(&addr("10.0.0.1")).await.is_err());
        assert!(!reg.is_registered(&addr("10.0.0.1")).await);
    }

    #[tokio::test]
    async fn unregister_unknown_device_errors() {
        let reg = registry(&ScriptedRpc::new());
        let err = reg.unregister(&addr("10.0.0.9")).await.unwrap_err();
        assert_eq!(err, RegistryError::UnknownDevice(addr("10.0.0.9")));
    }

    #[tokio::test]
    async fn operations_on_unknown_device_make_no_calls() {
        let rpc = ScriptedRpc::new();
        let reg = registry(&rpc);
        let a = addr("10.0.0.9");

        assert!(matches!(reg.toggle(&a).await, Err(RegistryError::UnknownDevice(_))));
        assert!(matches!(reg.list_schedules(&a).await, Err(RegistryError::UnknownDevice(_))));
        assert!(matches!(
            reg.create_schedule(&a, "1", "2", "3").await,
            Err(RegistryError::UnknownDevice(_))
        ));
        assert!(matches!(reg.delete_schedule(&a, "1").await, Err(RegistryError::UnknownDevice(_))));
        assert!(reg.subscribe(&a).await.is_err());
        assert!(rpc.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_updates_cached_switch_state() {
        let rpc = ScriptedRpc::new();
        rpc.push(Method::SwitchGetStatus, Ok(status(false)))
            .push(Method::SwitchToggle, Ok(json!({ "was_on": false })));
        let reg = registry(&rpc);
        reg.register(addr("10.0.0.1")).await.unwrap();
        let mut sub = reg.subscribe(&addr("10.0.0.1")).await.unwrap();

        // First cycle reports the outlet off.
        assert_eq!(sub.next().await.unwrap().switch, SwitchState::Off);

        let next = reg.toggle(&addr("10.0.0.1")).await.unwrap();
        assert_eq!(next, Some(SwitchState::On));

        // The poller applies the inferred state without a GetStatus round trip.
        let snap = sub.next().await.unwrap();
        assert_eq!(snap.switch, SwitchState::On);
        assert_eq!(snap.connectivity, ConnectivityState::Online);
        assert_eq!(rpc.call_count(Method::SwitchGetStatus), 1);
        reg.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_without_flag_leaves_state_unchanged() {
        let rpc = ScriptedRpc::new();
        rpc.push(Method::SwitchGetStatus, Ok(status(true)))
            .push(Method::SwitchToggle, Ok(json!({})));
        let reg = registry(&rpc);
        reg.register(addr("10.0.0.1")).await.unwrap();
        let mut sub = reg.subscribe(&addr("10.0.0.1")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().switch, SwitchState::On);

        assert_eq!(reg.toggle(&addr("10.0.0.1")).await.unwrap(), None);
        assert_eq!(reg.snapshot(&addr("10.0.0.1")).await.unwrap().switch, SwitchState::On);
        reg.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_not_found_leaves_connectivity_alone() {
        let rpc = ScriptedRpc::new();
        rpc.push(Method::SwitchGetStatus, Ok(status(true)))
            .push(Method::ScheduleDelete, Err(RpcError::NotFound { message: String::new() }));
        let reg = registry(&rpc);
        reg.register(addr("10.0.0.1")).await.unwrap();
        let mut sub = reg.subscribe(&addr("10.0.0.1")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().connectivity, ConnectivityState::Online);

        let err = reg.delete_schedule(&addr("10.0.0.1"), "4").await.unwrap_err();
        assert_eq!(err, RegistryError::Schedule(ScheduleError::NotFound(4)));
        assert_eq!(
            reg.snapshot(&addr("10.0.0.1")).await.unwrap().connectivity,
            ConnectivityState::Online
        );
        reg.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn one_unreachable_device_does_not_block_another() {
        let rpc = ScriptedRpc::new();
        // Only one success is scripted; whichever device polls second fails.
        rpc.push(Method::SwitchGetStatus, Ok(status(true)));
        let reg = registry(&rpc);
        reg.register(addr("10.0.0.1")).await.unwrap();
        reg.register(addr("10.0.0.2")).await.unwrap();

        time::sleep(Duration::from_secs(4)).await;
        let states: Vec<ConnectivityState> =
            reg.snapshots().await.iter().map(|s| s.connectivity).collect();
        assert_eq!(states.len(), 2);
        assert!(states.contains(&ConnectivityState::Online));
        assert!(states.contains(&ConnectivityState::Offline));
        reg.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn toggles_on_a_busy_device_never_block_other_devices() {
        let scripted = ScriptedRpc::new();
        for _ in 0..12 {
            scripted.push(Method::SwitchToggle, Ok(json!({ "was_on": true })));
        }
        let reg = Registry::new(
            Arc::new(SlowStatus {
                delay: Duration::from_secs(60),
                scripted,
            }),
            PollSettings::default(),
            Dispatcher::default(),
        );
        reg.register(addr("10.0.0.1")).await.unwrap();

        // The poller sits in a long GetStatus and never drains its queue.
        for _ in 0..12 {
            let toggled = time::timeout(Duration::from_secs(1), reg.toggle(&addr("10.0.0.1")))
                .await
                .expect("toggle waited on the poller");
            assert_eq!(toggled.unwrap(), Some(SwitchState::Off));
        }

        time::timeout(Duration::from_secs(1), reg.register(addr("10.0.0.2")))
            .await
            .expect("registry lock held by a toggle")
            .unwrap();
        assert!(reg.is_registered(&addr("10.0.0.2")).await);
        reg.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reregister_during_unregister_keeps_new_channel() {
        let reg = Arc::new(Registry::new(
            Arc::new(SlowStatus {
                delay: Duration::from_secs(4),
                scripted: ScriptedRpc::new(),
            }),
            PollSettings::default(),
            Dispatcher::default(),
        ));
        let a = addr("10.0.0.1");
        reg.register(a.clone()).await.unwrap();
        time::sleep(Duration::from_millis(100)).await;

        // The old poller is mid-call, so this waits up to four seconds.
        let unregister = {
            let reg = reg.clone();
            let a = a.clone();
            tokio::spawn(async move { reg.unregister(&a).await })
        };
        time::sleep(Duration::from_millis(100)).await;
        reg.register(a.clone()).await.unwrap();
        unregister.await.unwrap().unwrap();

        let mut sub = reg.subscribe(&a).await.unwrap();
        time::sleep(Duration::from_secs(10)).await;
        assert!(reg.is_registered(&a).await);
        let snap = reg.snapshot(&a).await.unwrap();
        assert_eq!(snap.connectivity, ConnectivityState::Online);
        assert_eq!(sub.next().await.unwrap().connectivity, ConnectivityState::Online);
        reg.shutdown().await;
    }
}
