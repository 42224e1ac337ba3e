//! The CSE itself: dispatcher pipeline, resource lifecycle, access control,
//! subscriptions and notifications, group fan-out, CSE federation,
//! announcements, and the background workers that keep it all honest.
//!
//! A [`Cse`] is a process-local handle (cheap to clone) over the shared
//! instance state; there are no module-level singletons.

mod announce;
mod dispatcher;
mod expiration;
mod group;
mod ops;
mod polling;
mod registration;
mod security;
mod stats;
mod subscription;

pub use stats::Statistics;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ocse_core::{
    id, time, CseConfig, CseError, CseHooks, EventBus, NoHooks, Request, RequestSender,
    ResourceEvent, Response, Worker,
};
use ocse_model::{PolicyRegistry, Resource, ResourceType};
use ocse_storage::Storage;

use polling::PollingChannel;

/// A peer CSE known through a `<remoteCSE>` resource.
#[derive(Clone, Debug)]
pub(crate) struct RemoteCse {
    pub(crate) csr_ri: String,
    pub(crate) csi: String,
    pub(crate) cb: String,
    pub(crate) poa: Vec<String>,
    pub(crate) failures: u32,
    pub(crate) registered_at: tokio::time::Instant,
}

#[derive(Default)]
pub(crate) struct RegistrarState {
    pub(crate) registered: bool,
    pub(crate) failures: u32,
}

/// One queued notification delivery for a subscription's sticky worker.
pub(crate) struct DeliveryJob {
    pub(crate) targets: Vec<String>,
    pub(crate) sgn: Value,
    pub(crate) sub_ri: String,
}

pub(crate) struct CseInner {
    pub(crate) config: CseConfig,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) registry: PolicyRegistry,
    pub(crate) events: EventBus,
    pub(crate) sender: Arc<dyn RequestSender>,
    pub(crate) hooks: Arc<dyn CseHooks>,
    /// Admission control for binding-delivered requests.
    pub(crate) request_permits: Arc<tokio::sync::Semaphore>,
    pub(crate) queued_requests: std::sync::atomic::AtomicUsize,
    /// Lazily allocated per-ri write mutexes (request linearization).
    pub(crate) locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// parent ri -> subscription ri list.
    pub(crate) sub_index: std::sync::RwLock<HashMap<String, Vec<String>>>,
    pub(crate) stats: Statistics,
    pub(crate) shutdown: CancellationToken,
    /// csi -> remote CSE bookkeeping.
    pub(crate) remotes: std::sync::RwLock<HashMap<String, RemoteCse>>,
    pub(crate) registrar_state: std::sync::Mutex<RegistrarState>,
    /// "original ri|target csi" -> address of the announced copy.
    pub(crate) annc_links: DashMap<String, String>,
    /// Announcements awaiting retry: (original ri, target csi).
    pub(crate) annc_pending: std::sync::Mutex<Vec<(String, String)>>,
    /// Subscription ri -> instant of the oldest batched notification.
    pub(crate) batch_first: DashMap<String, tokio::time::Instant>,
    /// Sticky per-subscription delivery queues (async mode).
    pub(crate) sub_workers: DashMap<String, tokio::sync::mpsc::UnboundedSender<DeliveryJob>>,
    /// Polling-channel owner ri -> queue.
    pub(crate) polling: DashMap<String, Arc<PollingChannel>>,
    pub(crate) workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running CSE instance.
#[derive(Clone)]
pub struct Cse {
    pub(crate) inner: Arc<CseInner>,
}

/// Builder wiring storage, outbound sender, and hooks into a [`Cse`].
pub struct CseBuilder {
    config: CseConfig,
    storage: Option<Arc<dyn Storage>>,
    sender: Option<Arc<dyn RequestSender>>,
    hooks: Arc<dyn CseHooks>,
}

impl CseBuilder {
    pub fn new(config: CseConfig) -> Self {
        Self {
            config,
            storage: None,
            sender: None,
            hooks: Arc::new(NoHooks),
        }
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn sender(mut self, sender: Arc<dyn RequestSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn CseHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Bootstrap the CSEBase, rebuild runtime indexes, and spawn the
    /// background workers.
    pub async fn start(self) -> Result<Cse, CseError> {
        let storage = self
            .storage
            .ok_or_else(|| CseError::internal("a storage backend is required"))?;
        let sender: Arc<dyn RequestSender> = self.sender.unwrap_or_else(|| Arc::new(NullSender));

        let mut registry = PolicyRegistry::with_defaults();
        if let Some(dir) = &self.config.flex_container_policy_dir {
            let loaded = registry
                .load_specializations(dir)
                .map_err(CseError::internal)?;
            tracing::info!(count = loaded, "loaded flexContainer specializations");
        }

        let request_permits = Arc::new(tokio::sync::Semaphore::new(
            self.config.max_concurrent_requests.max(1),
        ));
        let cse = Cse {
            inner: Arc::new(CseInner {
                config: self.config,
                storage,
                registry,
                events: EventBus::new(),
                sender,
                hooks: self.hooks,
                request_permits,
                queued_requests: std::sync::atomic::AtomicUsize::new(0),
                locks: DashMap::new(),
                sub_index: std::sync::RwLock::new(HashMap::new()),
                stats: Statistics::new(),
                shutdown: CancellationToken::new(),
                remotes: std::sync::RwLock::new(HashMap::new()),
                registrar_state: std::sync::Mutex::new(RegistrarState::default()),
                annc_links: DashMap::new(),
                annc_pending: std::sync::Mutex::new(Vec::new()),
                batch_first: DashMap::new(),
                sub_workers: DashMap::new(),
                polling: DashMap::new(),
                workers: std::sync::Mutex::new(Vec::new()),
            }),
        };

        cse.bootstrap_cse_base().await?;
        cse.rebuild_subscription_index().await?;
        cse.load_remotes().await?;
        if let Some(snapshot) = cse.inner.storage.stats_read().await? {
            cse.inner.stats.restore(&snapshot)?;
        }
        cse.install_event_handlers().await;
        cse.spawn_workers();

        tracing::info!(
            cse_id = %cse.inner.config.cse_id,
            cse_name = %cse.inner.config.cse_name,
            "CSE started"
        );
        Ok(cse)
    }
}

/// Outbound sender used when no binding is wired in (tests, offline mode).
struct NullSender;

#[async_trait::async_trait]
impl RequestSender for NullSender {
    async fn send(&self, target: &str, _request: &Request) -> Result<Response, CseError> {
        Err(CseError::unreachable(format!(
            "no outbound binding configured (target {target})"
        )))
    }
}

impl Cse {
    pub fn builder(config: CseConfig) -> CseBuilder {
        CseBuilder::new(config)
    }

    pub fn config(&self) -> &CseConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    pub fn statistics(&self) -> &Statistics {
        &self.inner.stats
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Cancel all workers and wait for in-progress ticks to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.inner.workers.lock().expect("worker list poisoned");
            guard.drain(..).collect()
        };
        for worker in workers {
            let _ = worker.await;
        }
        if self.inner.config.statistics.enable {
            let _ = self
                .inner
                .storage
                .stats_write(self.inner.stats.snapshot())
                .await;
        }
        tracing::info!("CSE stopped");
    }

    /// The resource identifier of the CSEBase (the CSE-ID without its slash).
    pub(crate) fn cse_ri(&self) -> &str {
        self.inner.config.cse_id.trim_start_matches('/')
    }

    pub(crate) async fn cse_base(&self) -> Result<Resource, CseError> {
        self.inner
            .storage
            .resource_by_ri(self.cse_ri())
            .await?
            .ok_or_else(|| CseError::internal("CSEBase missing from storage"))
    }

    async fn bootstrap_cse_base(&self) -> Result<(), CseError> {
        if self
            .inner
            .storage
            .resource_by_ri(self.cse_ri())
            .await?
            .is_some()
        {
            return Ok(());
        }
        let config = &self.inner.config;
        let now = time::now_timestamp();
        let mut cb = Resource::new(ResourceType::CseBase);
        cb.set("ri", self.cse_ri());
        cb.set("rn", config.cse_name.as_str());
        cb.set("pi", "");
        cb.set("ct", now.as_str());
        cb.set("lt", now.as_str());
        cb.set("csi", config.cse_id.as_str());
        cb.set("cst", config.cse_type.code());
        cb.set(
            "srt",
            Value::Array(
                SUPPORTED_TYPE_CODES
                    .iter()
                    .map(|code| Value::from(*code))
                    .collect(),
            ),
        );
        cb.set(
            "srv",
            Value::Array(
                config
                    .supported_release_versions
                    .iter()
                    .map(|v| Value::from(v.as_str()))
                    .collect(),
            ),
        );
        cb.set(
            "poa",
            Value::Array(vec![Value::from(format!("http://{}", config.http.listen))]),
        );
        cb.set(
            "csz",
            Value::Array(vec![Value::from(
                config.default_serialization.content_type(),
            )]),
        );
        cb.set_srn(config.cse_name.as_str());

        // Default policy: the admin originator keeps full access to the
        // CSEBase even when the blanket admin bypass is disabled.
        let acp_ri = unique_ri(&self.inner.storage, config.id_length).await?;
        let mut acp = Resource::new(ResourceType::Acp);
        acp.set("ri", acp_ri.as_str());
        acp.set("rn", "acpCSEBaseAccess");
        acp.set("pi", self.cse_ri());
        acp.set("ct", now.as_str());
        acp.set("lt", now.as_str());
        acp.set(
            "pv",
            serde_json::json!({ "acr": [{ "acor": [config.admin_originator.as_str()], "acop": 63 }] }),
        );
        acp.set(
            "pvs",
            serde_json::json!({ "acr": [{ "acor": [config.admin_originator.as_str()], "acop": 63 }] }),
        );
        acp.set_srn(format!("{}/acpCSEBaseAccess", config.cse_name));
        cb.set("acpi", serde_json::json!([acp_ri]));

        let mut tx = self.inner.storage.begin().await?;
        tx.insert(cb);
        tx.insert(acp);
        tx.commit().await?;
        tracing::info!(rn = %config.cse_name, "created CSEBase");
        Ok(())
    }

    async fn install_event_handlers(&self) {
        let cse = self.clone();
        self.inner
            .events
            .subscribe(move |event: Arc<ResourceEvent>| {
                let cse = cse.clone();
                async move {
                    cse.on_bus_event(&event).await;
                }
            })
            .await;
    }

    async fn on_bus_event(&self, event: &ResourceEvent) {
        self.inner.hooks.on_event(event);
        self.count_event(event);
        self.handle_subscription_event(event).await;
        self.handle_announcement_event(event).await;
        self.handle_registration_event(event).await;
    }

    fn count_event(&self, event: &ResourceEvent) {
        use std::sync::atomic::Ordering;
        match event.kind {
            ocse_core::EventKind::Created => {
                self.inner.stats.created.fetch_add(1, Ordering::Relaxed);
            }
            ocse_core::EventKind::Updated => {
                self.inner.stats.updated.fetch_add(1, Ordering::Relaxed);
            }
            ocse_core::EventKind::Deleted => {
                self.inner.stats.deleted.fetch_add(1, Ordering::Relaxed);
            }
            ocse_core::EventKind::Expired => {
                self.inner.stats.expired.fetch_add(1, Ordering::Relaxed);
                self.inner.stats.deleted.fetch_add(1, Ordering::Relaxed);
            }
            ocse_core::EventKind::BareRetrieve => {}
        }
    }

    /// Emit post-commit events onto the bus.
    ///
    /// Emission waits for the handlers so that events of requests
    /// serialized on the same resource reach consumers in commit order;
    /// actual notification delivery still detaches onto the per-subscription
    /// workers in async mode.
    pub(crate) async fn emit_events(&self, events: Vec<ResourceEvent>) {
        for event in events {
            self.inner.events.emit_and_wait(event).await;
        }
    }

    /// Acquire the write mutex for a resource identifier.
    pub(crate) async fn lock_ri(&self, ri: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = self
            .inner
            .locks
            .entry(ri.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    pub(crate) fn request_deadline(&self) -> String {
        time::format_timestamp(
            time::now()
                + chrono::Duration::seconds(self.inner.config.request_expiration_delta as i64),
        )
    }

    fn spawn_workers(&self) {
        let token = self.inner.shutdown.clone();
        let mut workers = self.inner.workers.lock().expect("worker list poisoned");

        let cse = self.clone();
        workers.push(Worker::interval(
            "expiration-sweeper",
            Duration::from_secs(self.inner.config.check_expirations_interval),
            token.clone(),
            move || {
                let cse = cse.clone();
                async move { cse.sweep_expired().await }
            },
        ));

        let cse = self.clone();
        workers.push(Worker::interval(
            "announcement-checker",
            Duration::from_secs(self.inner.config.announcements.check_interval),
            token.clone(),
            move || {
                let cse = cse.clone();
                async move { cse.retry_pending_announcements().await }
            },
        ));

        let cse = self.clone();
        workers.push(Worker::interval(
            "batch-flusher",
            Duration::from_secs(self.inner.config.notifications.flush_interval),
            token.clone(),
            move || {
                let cse = cse.clone();
                async move { cse.flush_due_batches().await }
            },
        ));

        if self.inner.config.statistics.enable {
            let cse = self.clone();
            workers.push(Worker::interval(
                "statistics-writer",
                Duration::from_secs(self.inner.config.statistics.write_interval),
                token.clone(),
                move || {
                    let cse = cse.clone();
                    async move {
                        cse.inner
                            .storage
                            .stats_write(cse.inner.stats.snapshot())
                            .await?;
                        Ok(())
                    }
                },
            ));
        }

        if let Some(registrar) = &self.inner.config.registrar {
            let cse = self.clone();
            workers.push(Worker::interval(
                "registrar",
                Duration::from_secs(registrar.check_interval),
                token.clone(),
                move || {
                    let cse = cse.clone();
                    async move { cse.registrar_tick().await }
                },
            ));
        }

        if self.inner.config.enable_remote_cse {
            let interval = self
                .inner
                .config
                .registrar
                .as_ref()
                .map(|r| r.check_interval)
                .unwrap_or(30);
            let cse = self.clone();
            workers.push(Worker::interval(
                "remote-liveness",
                Duration::from_secs(interval),
                token.clone(),
                move || {
                    let cse = cse.clone();
                    async move { cse.probe_remotes_tick().await }
                },
            ));
        }
    }
}

/// Type codes advertised in the CSEBase `srt` attribute.
const SUPPORTED_TYPE_CODES: &[u32] = &[1, 2, 3, 4, 5, 9, 15, 16, 17, 23, 28];

/// Generate a resource identifier that does not collide with stored ones.
pub(crate) async fn unique_ri(
    storage: &Arc<dyn Storage>,
    len: usize,
) -> Result<String, CseError> {
    for _ in 0..8 {
        let candidate = id::generate_ri(len);
        if storage.resource_by_ri(&candidate).await?.is_none() {
            return Ok(candidate);
        }
    }
    Err(CseError::internal("resource identifier space exhausted"))
}
