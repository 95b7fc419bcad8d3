//! Intent worker (§4.5): a single background consumer draining a FIFO
//! queue, applying each intent against the registry and topology engine,
//! verifying the result, and persisting the outcome.

pub mod ops;

use crate::device::registry::DeviceRegistry;
use crate::model::{Credentials, Device, DeviceFamily, LinkMode, Pnf, StaticRoute};
use crate::store::Store;
use crate::topology::TopologyHolder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Best-effort callback-notification timeout (§4.5 step 5); short, since a
/// slow or dead callback target must never stall the worker's single queue.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Mirrors the original `CallbackModel` wire shape.
#[derive(Debug, Serialize)]
struct CallbackPayload {
    id: String,
    operation: String,
    status: &'static str,
    detailed_status: String,
}

#[derive(Debug, Error)]
pub enum IntentError {
    #[error(transparent)]
    Device(#[from] crate::device::DeviceError),
    #[error(transparent)]
    Registry(#[from] crate::device::registry::RegistryError),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("post-mutation verification failed: {0}")]
    VerificationFailed(String),
}

impl IntentError {
    /// One of the §7 error categories.
    pub fn category(&self) -> &'static str {
        match self {
            IntentError::Device(e) => e.category(),
            IntentError::Registry(_) => "internal",
            IntentError::Store(_) => "internal",
            IntentError::PreconditionFailed(_) => "precondition_failed",
            IntentError::VerificationFailed(_) => "verification_failed",
        }
    }
}

/// The closed set of intent kinds (§4.5).
#[derive(Debug, Clone)]
pub enum IntentMessage {
    AddSwitch { device: Device },
    DelSwitch { name: String },
    AddFirewall { device: Device },
    DelFirewall { name: String },
    SetConfig { name: String, text: String },
    AddNetVlan {
        group: String,
        vid: u16,
        gateway: Option<std::net::IpAddr>,
        cidr: Option<ipnet::IpNet>,
    },
    DelNetVlan { group: String, vid: u16 },
    ModNetVlan {
        group: String,
        vid: u16,
        cidr: Option<ipnet::IpNet>,
    },
    AddPortVlan {
        switch: String,
        port: String,
        vids: Vec<u16>,
        mode: LinkMode,
    },
    DelPortVlan {
        switch: String,
        port: String,
        vids: Vec<u16>,
    },
    ModPortVlan {
        switch: String,
        port: String,
        vids: Vec<u16>,
        mode: LinkMode,
    },
    AddPnf { pnf: Pnf },
    DelPnf { name: String },
    BindGroups { group: String, other: String },
    UnbindGroups { group: String, other: String },
    AddRoute {
        switch: String,
        vrf: String,
        route: StaticRoute,
    },
    DelRoute {
        switch: String,
        vrf: String,
        route: StaticRoute,
    },
    Stop,
}

impl IntentMessage {
    pub fn kind_name(&self) -> &'static str {
        match self {
            IntentMessage::AddSwitch { .. } => "add_switch",
            IntentMessage::DelSwitch { .. } => "del_switch",
            IntentMessage::AddFirewall { .. } => "add_firewall",
            IntentMessage::DelFirewall { .. } => "del_firewall",
            IntentMessage::SetConfig { .. } => "set_config",
            IntentMessage::AddNetVlan { .. } => "add_net_vlan",
            IntentMessage::DelNetVlan { .. } => "del_net_vlan",
            IntentMessage::ModNetVlan { .. } => "mod_net_vlan",
            IntentMessage::AddPortVlan { .. } => "add_port_vlan",
            IntentMessage::DelPortVlan { .. } => "del_port_vlan",
            IntentMessage::ModPortVlan { .. } => "mod_port_vlan",
            IntentMessage::AddPnf { .. } => "add_pnf",
            IntentMessage::DelPnf { .. } => "del_pnf",
            IntentMessage::BindGroups { .. } => "bind_groups",
            IntentMessage::UnbindGroups { .. } => "unbind_groups",
            IntentMessage::AddRoute { .. } => "add_route",
            IntentMessage::DelRoute { .. } => "del_route",
            IntentMessage::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    InProgress,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub kind: String,
    pub status: OperationStatus,
    pub error_category: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub callback_url: Option<String>,
}

impl Operation {
    fn new(id: Uuid, kind: &str, callback_url: Option<String>) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            status: OperationStatus::InProgress,
            error_category: None,
            start_time: Utc::now(),
            end_time: None,
            callback_url,
        }
    }
}

struct QueueItem {
    operation_id: Uuid,
    callback_url: Option<String>,
    message: IntentMessage,
}

#[derive(Clone)]
pub struct IntentQueueHandle {
    sender: mpsc::UnboundedSender<QueueItem>,
}

impl IntentQueueHandle {
    /// Enqueues an intent, non-blocking; returns the operation id the
    /// caller polls at `/v1/api/operation/{id}`.
    pub fn submit(&self, message: IntentMessage, callback_url: Option<String>) -> Uuid {
        let operation_id = Uuid::new_v4();
        let _ = self.sender.send(QueueItem {
            operation_id,
            callback_url,
            message,
        });
        operation_id
    }

    pub fn stop(&self) {
        let _ = self.sender.send(QueueItem {
            operation_id: Uuid::new_v4(),
            callback_url: None,
            message: IntentMessage::Stop,
        });
    }
}

pub struct IntentWorker {
    receiver: mpsc::UnboundedReceiver<QueueItem>,
    pub registry: Arc<Mutex<DeviceRegistry>>,
    pub topology: TopologyHolder,
    pub store: Arc<dyn Store>,
    pub groups: Arc<Mutex<ops::GroupLedger>>,
}

impl IntentWorker {
    pub fn new(
        registry: Arc<Mutex<DeviceRegistry>>,
        topology: TopologyHolder,
        store: Arc<dyn Store>,
    ) -> (Self, IntentQueueHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = Self {
            receiver,
            registry,
            topology,
            store,
            groups: Arc::new(Mutex::new(ops::GroupLedger::default())),
        };
        (worker, IntentQueueHandle { sender })
    }

    /// Startup gate (§4.5): wait up to N×30s for every from_store device
    /// to clear `reinit`. `N` is the device count, capped at 20.
    pub async fn wait_for_reinit(&self, handles: &[Arc<Mutex<Box<dyn crate::device::DeviceAdapter>>>]) -> Result<(), IntentError> {
        let n = handles.len().min(20).max(1);
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(30 * n as u64);
        loop {
            let mut all_ready = true;
            for handle in handles {
                let adapter = handle.lock().await;
                if adapter.state() == crate::model::DeviceState::Reinit {
                    all_ready = false;
                    break;
                }
            }
            if all_ready {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(IntentError::VerificationFailed("startup gate deadline exceeded".into()));
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }

    /// Drains the queue until a `Stop` message arrives. Every intent is
    /// processed via the five-step contract (§4.5): persist InProgress,
    /// dispatch, assert the post-condition, persist the outcome, notify.
    pub async fn run(&mut self) {
        while let Some(item) = self.receiver.recv().await {
            if matches!(item.message, IntentMessage::Stop) {
                return;
            }
            self.process_one(item).await;
        }
    }

    async fn process_one(&mut self, item: QueueItem) {
        let kind = item.message.kind_name();
        let mut operation = Operation::new(item.operation_id, kind, item.callback_url.clone());
        let _ = self
            .store
            .put_typed("operations", &operation.id.to_string(), &operation)
            .await;

        let result = ops::dispatch(self, item.message).await;

        operation.end_time = Some(Utc::now());
        match result {
            Ok(()) => operation.status = OperationStatus::Success,
            Err(err) => {
                operation.status = OperationStatus::Failed;
                operation.error_category = Some(err.category().to_string());
                log::warn!("intent {kind} ({}) failed: {err}", operation.id);
            }
        }
        let _ = self
            .store
            .put_typed("operations", &operation.id.to_string(), &operation)
            .await;

        if let Some(url) = operation.callback_url.clone() {
            notify_callback(url, &operation).await;
        }
    }
}

/// §4.5 step 5: best-effort delivery, never fails the operation. A
/// callback target that's slow or unreachable only produces a log line.
async fn notify_callback(url: String, operation: &Operation) {
    let payload = CallbackPayload {
        id: operation.id.to_string(),
        operation: operation.kind.clone(),
        status: match operation.status {
            OperationStatus::Success => "success",
            OperationStatus::Failed => "failed",
            OperationStatus::InProgress => "in_progress",
        },
        detailed_status: operation.error_category.clone().unwrap_or_default(),
    };
    let client = match reqwest::Client::builder().timeout(CALLBACK_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            log::warn!("could not build callback client for {url}: {err}");
            return;
        }
    };
    if let Err(err) = client.post(&url).json(&payload).send().await {
        log::warn!("callback to {url} for operation {} failed: {err}", operation.id);
    }
}

pub fn dialect_requires_vrf_support(family: DeviceFamily) -> bool {
    !matches!(family, DeviceFamily::FamilyC)
}

pub fn credentials_user(credentials: &Credentials) -> &str {
    match credentials {
        Credentials::UserSecret { user, .. } => user,
        Credentials::ClientKey { client_id, .. } => client_id,
    }
}
