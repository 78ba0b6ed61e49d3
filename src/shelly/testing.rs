use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::Value;

use super::{Method, RpcCall, RpcClient, RpcError};
use crate::device::DeviceAddress;

/// In-memory `RpcClient` that replays queued results per method and records
/// every call it receives.
#[derive(Clone, Default)]
pub(crate) struct ScriptedRpc {
    inner: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    replies: Vec<(Method, VecDeque<Result<Value, RpcError>>)>,
    calls: Vec<(DeviceAddress, RpcCall)>,
}

impl ScriptedRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one reply for `method`. Replies are consumed in order; once a
    /// method's queue is empty its calls fail as unreachable.
    pub fn push(&self, method: Method, reply: Result<Value, RpcError>) -> &Self {
        let mut state = self.inner.lock().unwrap();
        match state.replies.iter_mut().find(|(m, _)| *m == method) {
            Some((_, queue)) => queue.push_back(reply),
            None => state.replies.push((method, VecDeque::from([reply]))),
        }
        self
    }

    pub fn calls(&self) -> Vec<(DeviceAddress, RpcCall)> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, method: Method) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(_, c)| c.method == method)
            .count()
    }
}

#[async_trait]
impl RpcClient for ScriptedRpc {
    async fn call(&self, address: &DeviceAddress, call: &RpcCall) -> Result<Value, RpcError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push((address.clone(), call.clone()));
        state
            .replies
            .iter_mut()
            .find(|(m, _)| *m == call.method)
            .and_then(|(_, queue)| queue.pop_front())
            .unwrap_or_else(|| Err(RpcError::Unreachable("no scripted reply".to_owned())))
    }
}
