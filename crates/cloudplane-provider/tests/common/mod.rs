#![allow(dead_code)]

use async_trait::async_trait;
use cloudplane_core::{CloudError, Context, Operation, RateGate, RemoteClient, Result};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

type Handler = Box<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Remote client answering from per-action scripts.
///
/// Queued replies are used first, then the action's handler, then its
/// standing reply. Anything else is an unknown action.
#[derive(Default)]
pub struct Scripted {
    queued: Mutex<HashMap<&'static str, VecDeque<Result<Value>>>>,
    handlers: Mutex<HashMap<&'static str, Handler>>,
    standing: Mutex<HashMap<&'static str, Value>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl Scripted {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer the next call of `action` with `reply`.
    pub fn reply(&self, action: &'static str, reply: Value) -> &Self {
        self.queue(action, Ok(reply))
    }

    /// Fail the next call of `action`.
    pub fn fail(&self, action: &'static str, err: CloudError) -> &Self {
        self.queue(action, Err(err))
    }

    /// Answer every unscripted call of `action` with `reply`.
    pub fn always(&self, action: &'static str, reply: Value) -> &Self {
        self.standing.lock().unwrap().insert(action, reply);
        self
    }

    pub fn handle(
        &self,
        action: &'static str,
        handler: impl Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    ) -> &Self {
        self.handlers.lock().unwrap().insert(action, Box::new(handler));
        self
    }

    fn queue(&self, action: &'static str, reply: Result<Value>) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(action)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(a, _)| a.clone()).collect()
    }

    /// Calls other than describes, in order
    pub fn mutations(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter(|a| !a.starts_with("Describe"))
            .collect()
    }

    pub fn count(&self, action: &str) -> usize {
        self.actions().iter().filter(|a| *a == action).count()
    }

    /// Payloads sent with `action`, in order
    pub fn payloads(&self, action: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == action)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteClient for Scripted {
    async fn invoke(&self, operation: &Operation) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.action.to_string(), operation.payload.clone()));

        if let Some(reply) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(operation.action)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        if let Some(handler) = self.handlers.lock().unwrap().get(operation.action) {
            return handler(&operation.payload);
        }
        if let Some(reply) = self.standing.lock().unwrap().get(operation.action) {
            return Ok(reply.clone());
        }
        Err(CloudError::api(
            "InvalidAction",
            format!("unscripted action {}", operation.action),
        ))
    }
}

pub fn context(client: &Arc<Scripted>) -> Context {
    Context::new(client.clone(), RateGate::unlimited(), "ap-guangzhou")
}

pub fn disk(id: &str, state: &str, size: u64) -> Value {
    json!({
        "DiskId": id,
        "DiskName": "data",
        "DiskType": "CLOUD_PREMIUM",
        "DiskSize": size,
        "DiskState": state,
        "DiskChargeType": "POSTPAID_BY_HOUR",
        "Placement": {"Zone": "ap-guangzhou-3", "ProjectId": 0},
        "Attached": state == "ATTACHED",
        "Portable": true,
    })
}

pub fn disk_set(disks: Vec<Value>) -> Value {
    json!({ "TotalCount": disks.len(), "DiskSet": disks })
}
