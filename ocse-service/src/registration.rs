use std::sync::atomic::Ordering;

use serde_json::{json, Value};

use ocse_core::config::RegistrarConfig;
use ocse_core::{
    CseError, EventKind, Operation, Request, Response, ResponseStatusCode, ResourceEvent,
    ResultContent,
};

use crate::{Cse, RemoteCse};

/// Hop ceiling for transit forwarding; a request bouncing more often than
/// this is looping.
const MAX_HOPS: u32 = 16;

impl Cse {
    /// Rebuild the remote-CSE map from stored `<remoteCSE>` resources.
    pub(crate) async fn load_remotes(&self) -> Result<(), CseError> {
        let csrs = self.inner.storage.resources_of_type(16).await?;
        let mut remotes = self.inner.remotes.write().expect("remotes lock poisoned");
        for csr in &csrs {
            let Some(csi) = csr.get_str("csi") else {
                continue;
            };
            remotes.insert(
                csi.to_string(),
                RemoteCse {
                    csr_ri: csr.ri().to_string(),
                    csi: csi.to_string(),
                    cb: csr.get_str("cb").unwrap_or_default().to_string(),
                    poa: csr.get_str_list("poa"),
                    failures: 0,
                    registered_at: tokio::time::Instant::now(),
                },
            );
        }
        if !csrs.is_empty() {
            tracing::info!(count = csrs.len(), "loaded remote CSEs");
        }
        Ok(())
    }

    /// Keep the remote map in sync with `<remoteCSE>` lifecycle events.
    pub(crate) async fn handle_registration_event(&self, event: &ResourceEvent) {
        if event.ty != 16 {
            return;
        }
        let inner = event
            .snapshot
            .as_object()
            .and_then(|outer| outer.values().next())
            .and_then(Value::as_object);
        let Some(inner) = inner else {
            return;
        };
        let Some(csi) = inner.get("csi").and_then(Value::as_str) else {
            return;
        };
        match event.kind {
            EventKind::Created | EventKind::Updated => {
                let poa = inner
                    .get("poa")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                let cb = inner
                    .get("cb")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut remotes = self.inner.remotes.write().expect("remotes lock poisoned");
                let registered_at = remotes
                    .get(csi)
                    .map(|existing| existing.registered_at)
                    .unwrap_or_else(tokio::time::Instant::now);
                remotes.insert(
                    csi.to_string(),
                    RemoteCse {
                        csr_ri: event.ri.clone(),
                        csi: csi.to_string(),
                        cb,
                        poa,
                        failures: 0,
                        registered_at,
                    },
                );
                tracing::info!(csi = %csi, "remote CSE registered");
            }
            EventKind::Deleted | EventKind::Expired => {
                self.forget_remote(csi);
                tracing::info!(csi = %csi, "remote CSE deregistered");
            }
            EventKind::BareRetrieve => {}
        }
    }

    pub(crate) fn forget_remote(&self, csi: &str) {
        self.inner
            .remotes
            .write()
            .expect("remotes lock poisoned")
            .remove(csi);
    }

    pub(crate) fn remote_by_csi(&self, csi: &str) -> Option<RemoteCse> {
        self.inner
            .remotes
            .read()
            .expect("remotes lock poisoned")
            .get(csi)
            .cloned()
    }

    /// Transit: relay a request to the CSE owning the target. The response
    /// is returned verbatim except that `rqi` is mapped back.
    pub(crate) async fn forward_request(
        &self,
        csi: &str,
        request: &Request,
    ) -> Result<Response, CseError> {
        if request.hc >= MAX_HOPS {
            return Err(CseError::bad_request(format!(
                "forwarding loop detected (hop count {})",
                request.hc
            )));
        }
        let remote = self
            .remote_by_csi(csi)
            .ok_or_else(|| CseError::not_found(format!("unknown remote CSE: {csi}")))?;
        let poa = remote
            .poa
            .iter()
            .find(|url| url.starts_with("http://") || url.starts_with("https://"))
            .ok_or_else(|| {
                CseError::unreachable(format!("remote CSE {csi} has no usable point of access"))
            })?;

        let mut forwarded = request.clone();
        forwarded.hc = request.hc + 1;
        self.inner.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(csi = %csi, to = %request.to, "forwarding request");

        let mut response = self
            .inner
            .sender
            .send(poa, &forwarded)
            .await
            .map_err(|err| {
                CseError::unreachable(format!("remote CSE {csi} unreachable: {}", err.message()))
            })?;
        response.rqi = request.rqi.clone();
        Ok(response)
    }

    /// Registrar worker tick: register until it sticks, then probe liveness.
    pub(crate) async fn registrar_tick(&self) -> Result<(), CseError> {
        let Some(registrar) = self.inner.config.registrar.clone() else {
            return Ok(());
        };
        let registered = {
            self.inner
                .registrar_state
                .lock()
                .expect("registrar state poisoned")
                .registered
        };
        if !registered {
            self.register_with_registrar(&registrar).await;
        } else if registrar.enable_liveness {
            self.probe_registrar(&registrar).await;
        }
        Ok(())
    }

    async fn register_with_registrar(&self, registrar: &RegistrarConfig) {
        let config = &self.inner.config;
        let body = json!({
            "m2m:csr": {
                "rn": self.cse_ri(),
                "csi": config.cse_id.as_str(),
                "cb": format!("{}/{}", config.cse_id, config.cse_name),
                "cst": config.cse_type.code(),
                "rr": true,
                "poa": [format!("http://{}", config.http.listen)],
                "srv": config
                    .supported_release_versions
                    .iter()
                    .map(|v| v.as_str())
                    .collect::<Vec<_>>(),
                "csz": [config.default_serialization.content_type()],
            }
        });
        let request = Request::builder(
            Operation::Create,
            registrar.cse_id.as_str(),
            config.cse_id.as_str(),
        )
        .ty(16)
        .pc(body)
        .rvi(config.release_version)
        .rqet(self.request_deadline())
        .build();

        match self.inner.sender.send(&registrar.address, &request).await {
            Ok(response)
                if matches!(
                    response.rsc,
                    ResponseStatusCode::Created
                        | ResponseStatusCode::Conflict
                        | ResponseStatusCode::AlreadyExists
                ) =>
            {
                {
                    let mut state = self
                        .inner
                        .registrar_state
                        .lock()
                        .expect("registrar state poisoned");
                    state.registered = true;
                    state.failures = 0;
                }
                tracing::info!(registrar = %registrar.cse_id, "registered with registrar CSE");
                self.ensure_registrar_mirror(registrar).await;
            }
            Ok(response) => {
                tracing::warn!(
                    registrar = %registrar.cse_id,
                    rsc = response.rsc.code(),
                    "registrar rejected registration"
                );
            }
            Err(err) => {
                tracing::debug!(
                    registrar = %registrar.cse_id,
                    error = %err.message(),
                    "registrar not reachable, will retry"
                );
            }
        }
    }

    /// Create the local `<remoteCSE>` mirror of the registrar.
    async fn ensure_registrar_mirror(&self, registrar: &RegistrarConfig) {
        if self.remote_by_csi(&registrar.cse_id).is_some() {
            return;
        }
        let config = &self.inner.config;
        let body = json!({
            "m2m:csr": {
                "rn": registrar.cse_id.trim_start_matches('/'),
                "csi": registrar.cse_id.as_str(),
                "cb": format!("{}/{}", registrar.cse_id, registrar.cse_name),
                "poa": [registrar.address.as_str()],
                "rr": true,
            }
        });
        let request = Request::builder(
            Operation::Create,
            config.cse_name.as_str(),
            config.admin_originator.as_str(),
        )
        .ty(16)
        .pc(body)
        .rcn(ResultContent::Nothing)
        .build();
        let response = self.process(request).await;
        if !response.is_success() && response.rsc != ResponseStatusCode::Conflict {
            tracing::warn!(rsc = response.rsc.code(), "cannot mirror registrar CSE");
        }
    }

    async fn probe_registrar(&self, registrar: &RegistrarConfig) {
        let request = Request::builder(
            Operation::Retrieve,
            registrar.cse_id.as_str(),
            self.inner.config.cse_id.as_str(),
        )
        .rqet(self.request_deadline())
        .build();
        let alive = matches!(
            self.inner.sender.send(&registrar.address, &request).await,
            Ok(ref response) if response.is_success()
        );
        let invalidate = {
            let mut state = self
                .inner
                .registrar_state
                .lock()
                .expect("registrar state poisoned");
            if alive {
                state.failures = 0;
                false
            } else {
                state.failures += 1;
                if state.failures >= 3 {
                    state.registered = false;
                    state.failures = 0;
                    true
                } else {
                    false
                }
            }
        };
        if invalidate {
            tracing::warn!(registrar = %registrar.cse_id, "registrar down, invalidating registration");
            if let Some(remote) = self.remote_by_csi(&registrar.cse_id) {
                let request = Request::builder(
                    Operation::Delete,
                    remote.csr_ri.as_str(),
                    self.inner.config.admin_originator.as_str(),
                )
                .rcn(ResultContent::Nothing)
                .build();
                let _ = self.process(request).await;
            }
        }
    }

    /// Liveness tick for descendant remotes: probe each peer's CSEBase over
    /// its point of access; three consecutive failures invalidate its CSR.
    pub(crate) async fn probe_remotes_tick(&self) -> Result<(), CseError> {
        let registrar_csi = self
            .inner
            .config
            .registrar
            .as_ref()
            .map(|r| r.cse_id.clone());
        let peers: Vec<RemoteCse> = {
            self.inner
                .remotes
                .read()
                .expect("remotes lock poisoned")
                .values()
                .filter(|remote| Some(&remote.csi) != registrar_csi.as_ref())
                .cloned()
                .collect()
        };
        for peer in peers {
            let Some(poa) = peer
                .poa
                .iter()
                .find(|url| url.starts_with("http://") || url.starts_with("https://"))
            else {
                continue;
            };
            let request = Request::builder(
                Operation::Retrieve,
                peer.cb.as_str(),
                self.inner.config.cse_id.as_str(),
            )
            .rqet(self.request_deadline())
            .build();
            let alive = matches!(
                self.inner.sender.send(poa, &request).await,
                Ok(ref response) if response.is_success()
            );
            let failures = {
                let mut remotes = self.inner.remotes.write().expect("remotes lock poisoned");
                match remotes.get_mut(&peer.csi) {
                    Some(entry) => {
                        entry.failures = if alive { 0 } else { entry.failures + 1 };
                        entry.failures
                    }
                    None => continue,
                }
            };
            if failures >= 3 {
                tracing::warn!(csi = %peer.csi, "remote CSE down, invalidating its registration");
                let request = Request::builder(
                    Operation::Delete,
                    peer.csr_ri.as_str(),
                    self.inner.config.admin_originator.as_str(),
                )
                .rcn(ResultContent::Nothing)
                .build();
                let _ = self.process(request).await;
            }
        }
        Ok(())
    }
}
