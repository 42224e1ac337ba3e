use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::{json, Map, Value};

use ocse_core::address::{self, Address, VirtualKind};
use ocse_core::config::FlexBlockingPreference;
use ocse_core::{
    id, time, CseError, EventKind, FilterUsage, Operation, Request, Response,
    ResponseStatusCode, ResponseType,
};
use ocse_model::{Resource, ResourceType};

use crate::ops::resource_event;
use crate::{unique_ri, Cse};

/// Outcome of target resolution: this CSE, or a known peer.
pub(crate) enum Route {
    Local { id: String },
    Remote { csi: String },
}

impl Cse {
    /// Process one canonical request through the full pipeline and return
    /// the canonical response. This is the single entry point every binding
    /// and every internally originated primitive goes through.
    pub async fn process(&self, request: Request) -> Response {
        let request = match self.inner.hooks.on_request(&request) {
            Some(rewritten) => rewritten,
            None => request,
        };
        let rqi = request.rqi.clone();
        self.inner.stats.count_request(request.op);

        // Admission control for binding-delivered requests. Internally
        // originated primitives (fan-out members, sweeps, forwarders) bypass
        // it, so nested dispatch cannot starve itself.
        let _permit = if request.origin != ocse_core::Origin::Internal {
            match self.inner.request_permits.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    // All workers busy: queue up to the configured cap.
                    let queued = self.inner.queued_requests.fetch_add(1, Ordering::AcqRel);
                    if queued >= self.inner.config.max_queued_requests {
                        self.inner.queued_requests.fetch_sub(1, Ordering::AcqRel);
                        let err = CseError::internal("request queue full");
                        self.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
                        return Response::from_error(rqi, &err);
                    }
                    let permit = self
                        .inner
                        .request_permits
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("request semaphore closed");
                    self.inner.queued_requests.fetch_sub(1, Ordering::AcqRel);
                    Some(permit)
                }
            }
        } else {
            None
        };

        match self.process_inner(request).await {
            Ok(response) => response,
            Err(err) => {
                self.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(rqi = %rqi, rsc = err.rsc().code(), error = %err.message(), "request failed");
                Response::from_error(rqi, &err)
            }
        }
    }

    fn process_inner(
        &self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response, CseError>> + Send + '_>> {
        Box::pin(self.process_inner_impl(request))
    }

    async fn process_inner_impl(&self, request: Request) -> Result<Response, CseError> {
        // 1. Deadline.
        if let Some(rqet) = &request.rqet {
            if time::is_past(rqet)? {
                return Err(CseError::timeout(format!(
                    "request expired at {rqet}"
                )));
            }
        }

        // 2./3. Target resolution and transit.
        let route = self.resolve_route(&request.to)?;
        let local_id = match route {
            Route::Remote { csi } => {
                return self.forward_request(&csi, &request).await;
            }
            Route::Local { id } => id,
        };

        // 4. Release version.
        let rvi = request
            .rvi
            .ok_or_else(|| CseError::bad_request("release version indicator is mandatory"))?;
        if !self
            .inner
            .config
            .supported_release_versions
            .contains(&rvi)
        {
            return Err(CseError::release_version_not_supported(format!(
                "release {rvi} not supported"
            )));
        }

        // 5.-11. Response scheduling around the execution core.
        let rt = match request.rt {
            ResponseType::FlexBlocking => match self.inner.config.flex_blocking_preference {
                FlexBlockingPreference::Blocking => ResponseType::Blocking,
                FlexBlockingPreference::NonBlocking => ResponseType::NonBlockingSync,
            },
            other => other,
        };
        match rt {
            ResponseType::Blocking => self.execute_local(&request, &local_id).await,
            ResponseType::NonBlockingSync => {
                self.schedule_non_blocking(request, local_id, false).await
            }
            ResponseType::NonBlockingAsync => {
                self.schedule_non_blocking(request, local_id, true).await
            }
            ResponseType::NoResponse => {
                let cse = self.clone();
                let rqi = request.rqi.clone();
                tokio::spawn(async move {
                    let _ = cse.execute_local(&request, &local_id).await;
                });
                Ok(Response::new(ResponseStatusCode::Accepted, rqi))
            }
            ResponseType::FlexBlocking => unreachable!("resolved above"),
        }
    }

    /// Map a target address onto this CSE or a remote one.
    pub(crate) fn resolve_route(&self, to: &str) -> Result<Route, CseError> {
        let address = Address::parse(to)?;
        if let Some(sp_id) = address.sp_id() {
            if sp_id != self.inner.config.service_provider_id {
                return Err(CseError::new(
                    ResponseStatusCode::RemoteEntityNotReachable,
                    format!("unknown service provider: {sp_id}"),
                ));
            }
        }
        match address.cse_id() {
            Some(csi) if csi != self.inner.config.cse_id => {
                if !self.inner.config.enable_remote_cse {
                    return Err(CseError::unreachable(
                        "remote CSE support is disabled",
                    ));
                }
                Ok(Route::Remote {
                    csi: csi.to_string(),
                })
            }
            _ => Ok(Route::Local {
                id: address.local_id().to_string(),
            }),
        }
    }

    /// Execute a primitive against a local target: resolve the resource,
    /// run access control and the operation, emit post-commit events.
    pub(crate) async fn execute_local(
        &self,
        request: &Request,
        local_id: &str,
    ) -> Result<Response, CseError> {
        // Fan-out requests are recognized by their `fopt` path segment and
        // re-dispatched per member.
        if let Some((base, rest)) = split_fanout(local_id) {
            let group = self
                .resolve_local(&base)
                .await?
                .ok_or_else(|| CseError::not_found(format!("no such resource: {base}")))?;
            if group.ty() != ResourceType::Grp {
                return Err(CseError::operation_not_allowed(
                    "fopt addressed below a non-group resource",
                ));
            }
            return self.fanout(request, &group, rest.as_deref()).await;
        }

        let (base, virt) = address::split_virtual(local_id);
        let target = self
            .resolve_local(base)
            .await?
            .ok_or_else(|| CseError::not_found(format!("no such resource: {base}")))?;

        match virt {
            Some(VirtualKind::Latest) | Some(VirtualKind::Oldest) => {
                self.execute_instance_op(request, &target, virt == Some(VirtualKind::Latest))
                    .await
            }
            Some(VirtualKind::PollingChannelUri) => {
                self.execute_polling_op(request, &target).await
            }
            Some(VirtualKind::FanOutPoint) => unreachable!("handled by split_fanout"),
            None => self.execute_op(request, &target).await,
        }
    }

    async fn execute_op(
        &self,
        request: &Request,
        target: &Resource,
    ) -> Result<Response, CseError> {
        match request.op {
            Operation::Create => {
                let ty_code = request
                    .ty
                    .ok_or_else(|| CseError::bad_request("ty is mandatory for CREATE"))?;
                let ty = ResourceType::from_code(ty_code).ok_or_else(|| {
                    CseError::bad_request(format!("unsupported resource type: {ty_code}"))
                })?;
                if !ty.is_api_creatable() {
                    return Err(CseError::operation_not_allowed(format!(
                        "resource type {ty} cannot be created"
                    )));
                }
                // Content deserialization precedes access control: malformed
                // content is 4000 regardless of privileges.
                let (attrs, wrapper) = self.deserialize_content(request)?;
                // AE and CSR creation under the CSEBase is registration; it
                // runs before any policy could exist for the originator.
                let registration = matches!(ty, ResourceType::Ae | ResourceType::Csr)
                    && target.ty() == ResourceType::CseBase;
                // A registered peer CSE may place announced copies here.
                let peer_announcement =
                    ty.is_announced() && self.remote_by_csi(&request.from).is_some();
                if !registration && !peer_announcement {
                    self.check_access(&request.from, Operation::Create, target)
                        .await?;
                }
                let _guard = self.lock_ri(target.ri()).await;
                // Re-read the parent under the lock: its bookkeeping
                // (lt, st, cni, cbs) must not be stale.
                let parent = self
                    .inner
                    .storage
                    .resource_by_ri(target.ri())
                    .await?
                    .ok_or_else(|| {
                        CseError::not_found(format!("no such resource: {}", target.ri()))
                    })?;
                let (response, events) =
                    self.op_create(request, ty, &parent, attrs, wrapper).await?;
                self.emit_events(events).await;
                Ok(response)
            }
            Operation::Retrieve | Operation::Discovery => {
                let discovery = request.op == Operation::Discovery
                    || request.fc.fu == Some(FilterUsage::Discovery);
                let access_op = if discovery {
                    Operation::Discovery
                } else {
                    Operation::Retrieve
                };
                self.check_access(&request.from, access_op, target).await?;
                if discovery {
                    self.op_discover(request, target).await
                } else {
                    let (response, events) = self.op_retrieve(request, target).await?;
                    self.emit_events(events).await;
                    Ok(response)
                }
            }
            Operation::Update => {
                // Content deserialization precedes access control.
                let (changes, wrapper) = self.deserialize_content(request)?;
                self.check_access(&request.from, Operation::Update, target)
                    .await?;
                let _guard = self.lock_ri(target.ri()).await;
                // Re-read under the lock so concurrent updates linearize.
                let current = self
                    .inner
                    .storage
                    .resource_by_ri(target.ri())
                    .await?
                    .ok_or_else(|| {
                        CseError::not_found(format!("no such resource: {}", target.ri()))
                    })?;
                let (response, events) =
                    self.op_update(request, &current, changes, wrapper).await?;
                self.emit_events(events).await;
                Ok(response)
            }
            Operation::Delete => {
                self.check_access(&request.from, Operation::Delete, target)
                    .await?;
                // Container bookkeeping is adjusted on instance deletion, so
                // the parent lock is taken first (parent-before-child order
                // keeps lock acquisition cycle-free).
                let _parent_guard = if target.ty() == ResourceType::Cin {
                    Some(self.lock_ri(target.pi()).await)
                } else {
                    None
                };
                let _guard = self.lock_ri(target.ri()).await;
                let (response, events) = self.op_delete(request, target).await?;
                self.emit_events(events).await;
                Ok(response)
            }
            Operation::Notify => {
                self.check_access(&request.from, Operation::Notify, target)
                    .await?;
                self.op_notify(request, target).await
            }
        }
    }

    /// `la`/`ol` below a container: retrieve or delete the edge instance.
    async fn execute_instance_op(
        &self,
        request: &Request,
        container: &Resource,
        latest: bool,
    ) -> Result<Response, CseError> {
        if container.ty() != ResourceType::Cnt {
            return Err(CseError::operation_not_allowed(
                "la/ol addressed below a non-container resource",
            ));
        }
        match request.op {
            Operation::Retrieve => {
                self.check_access(&request.from, Operation::Retrieve, container)
                    .await?;
                let (response, events) =
                    self.op_retrieve_instance(request, container, latest).await?;
                self.emit_events(events).await;
                Ok(response)
            }
            Operation::Delete => {
                self.check_access(&request.from, Operation::Delete, container)
                    .await?;
                let _guard = self.lock_ri(container.ri()).await;
                let instance = self
                    .edge_instance(container, latest)
                    .await?
                    .ok_or_else(|| CseError::not_found("container holds no instance"))?;
                let (response, events) = self.op_delete(request, &instance).await?;
                self.emit_events(events).await;
                Ok(response)
            }
            _ => Err(CseError::operation_not_allowed(
                "only RETRIEVE and DELETE are supported on la/ol",
            )),
        }
    }

    /// `pcu` below a polling channel: long-poll for queued primitives.
    async fn execute_polling_op(
        &self,
        request: &Request,
        channel: &Resource,
    ) -> Result<Response, CseError> {
        if channel.ty() != ResourceType::Pch {
            return Err(CseError::operation_not_allowed(
                "pcu addressed below a non-pollingChannel resource",
            ));
        }
        if request.op != Operation::Retrieve {
            return Err(CseError::operation_not_allowed(
                "only RETRIEVE is supported on pcu",
            ));
        }
        self.check_access(&request.from, Operation::Retrieve, channel)
            .await?;
        let timeout = match &request.rqet {
            Some(rqet) => {
                let deadline = time::parse_timestamp(rqet)?;
                (deadline - time::now())
                    .to_std()
                    .unwrap_or(Duration::from_secs(0))
            }
            None => Duration::from_secs(self.inner.config.request_expiration_delta),
        };
        match self.polling_poll(channel.pi(), timeout).await {
            Some(item) => {
                Ok(Response::new(ResponseStatusCode::Ok, request.rqi.clone()).with_pc(item))
            }
            None => Err(CseError::timeout("no primitive queued before deadline")),
        }
    }

    /// Unwrap the primitive content of a CREATE/UPDATE into its attribute
    /// map and wrapper key. Runs before access control per the pipeline
    /// order: a missing or malformed `pc` is 4000.
    fn deserialize_content(
        &self,
        request: &Request,
    ) -> Result<(Map<String, Value>, String), CseError> {
        let pc = request.pc.as_ref().ok_or_else(|| {
            CseError::bad_request(format!(
                "primitive content is mandatory for {}",
                request.op
            ))
        })?;
        Resource::unwrap_pc(pc)
    }

    /// Resolve a CSE-local identifier: unstructured `ri`, structured `srn`,
    /// or the hybrid form (an `ri` prefix with a structured tail). An empty
    /// identifier names the CSEBase.
    pub(crate) async fn resolve_local(&self, id: &str) -> Result<Option<Resource>, CseError> {
        if id.is_empty() {
            return Ok(Some(self.cse_base().await?));
        }
        if address::is_structured(id) {
            if let Some(resource) = self.inner.storage.resource_by_srn(id).await? {
                return Ok(Some(resource));
            }
            // Hybrid: first segment as an ri, remainder as a structured path.
            if let Some((head, tail)) = id.split_once('/') {
                if let Some(anchor) = self.inner.storage.resource_by_ri(head).await? {
                    let srn = format!("{}/{tail}", anchor.srn());
                    return Ok(self.inner.storage.resource_by_srn(&srn).await?);
                }
            }
            return Ok(None);
        }
        if let Some(resource) = self.inner.storage.resource_by_ri(id).await? {
            return Ok(Some(resource));
        }
        if id == self.inner.config.cse_name {
            return Ok(Some(self.cse_base().await?));
        }
        Ok(None)
    }

    /// Materialize a `<request>` resource and run the primitive detached.
    ///
    /// nonBlockingSync returns 1001 plus the `<request>` address; the final
    /// status is written into that resource. nonBlockingAsync additionally
    /// notifies the response-target URIs with the outcome.
    async fn schedule_non_blocking(
        &self,
        request: Request,
        local_id: String,
        asynch: bool,
    ) -> Result<Response, CseError> {
        let ri = unique_ri(&self.inner.storage, self.inner.config.id_length).await?;
        let now = time::now_timestamp();
        let lifetime = self.inner.config.request_expiration_delta.max(60);
        let et = time::format_timestamp(
            time::now() + chrono::Duration::seconds(lifetime as i64),
        );

        let base = self.cse_base().await?;
        let mut req_res = Resource::new(ResourceType::Req);
        req_res.set("ri", ri.as_str());
        req_res.set("rn", id::generate_rn("req"));
        req_res.set("pi", base.ri());
        req_res.set("ct", now.as_str());
        req_res.set("lt", now.as_str());
        req_res.set("et", et.as_str());
        req_res.set("op", request.op.code());
        req_res.set("tg", request.to.as_str());
        req_res.set("org", request.from.as_str());
        req_res.set("rid", request.rqi.as_str());
        req_res.set(
            "mi",
            json!({
                "rcn": request.result_content().code(),
                "rt": request.rt.code(),
            }),
        );
        req_res.set("rs", REQUEST_STATUS_PENDING);
        req_res.set_srn(format!("{}/{}", base.srn(), req_res.rn()));

        let mut tx = self.inner.storage.begin().await?;
        tx.insert(req_res.clone());
        tx.commit().await?;
        self.emit_events(vec![resource_event(
            EventKind::Created,
            &req_res,
            Vec::new(),
            &request.from,
        )])
        .await;

        let cse = self.clone();
        let rqi = request.rqi.clone();
        let rtu = request.rtu.clone();
        let req_ri = ri.clone();
        tokio::spawn(async move {
            let outcome = match cse.execute_local(&request, &local_id).await {
                Ok(response) => response,
                Err(err) => Response::from_error(request.rqi.clone(), &err),
            };
            cse.finalize_request_resource(&req_ri, &outcome).await;
            if asynch {
                for target in &rtu {
                    let notification = json!({
                        "m2m:rsp": {
                            "rsc": outcome.rsc.code(),
                            "rqi": outcome.rqi.as_str(),
                            "pc": outcome.pc.clone(),
                        }
                    });
                    if let Err(err) = cse.deliver_to_target(target, &notification).await {
                        tracing::warn!(target = %target, error = %err, "async response delivery failed");
                    }
                }
            }
        });

        let rsc = if asynch {
            ResponseStatusCode::AcceptedNonBlockingAsync
        } else {
            ResponseStatusCode::AcceptedNonBlockingSync
        };
        Ok(Response::new(rsc, rqi).with_pc(json!({ "m2m:uri": ri })))
    }

    /// Write the outcome of a detached primitive into its `<request>`.
    async fn finalize_request_resource(&self, req_ri: &str, outcome: &Response) {
        let result = async {
            let mut req_res = self
                .inner
                .storage
                .resource_by_ri(req_ri)
                .await?
                .ok_or_else(|| CseError::not_found("request resource purged"))?;
            let status = if outcome.is_success() {
                REQUEST_STATUS_COMPLETED
            } else {
                REQUEST_STATUS_FAILED
            };
            req_res.set("rs", status);
            req_res.set(
                "ors",
                json!({
                    "rsc": outcome.rsc.code(),
                    "rqi": outcome.rqi.as_str(),
                    "pc": outcome.pc.clone(),
                }),
            );
            req_res.set("lt", time::now_timestamp());
            let mut tx = self.inner.storage.begin().await?;
            tx.update(req_res);
            tx.commit().await?;
            Ok::<(), CseError>(())
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(req = %req_ri, error = %err, "cannot finalize request resource");
        }
    }
}

const REQUEST_STATUS_COMPLETED: u64 = 1;
const REQUEST_STATUS_FAILED: u64 = 2;
const REQUEST_STATUS_PENDING: u64 = 3;

/// Split a fan-out path: `grp1/fopt/cin` -> (`grp1`, Some(`cin`)).
fn split_fanout(id: &str) -> Option<(String, Option<String>)> {
    let segments: Vec<&str> = id.split('/').collect();
    let position = segments.iter().position(|s| *s == "fopt")?;
    if position == 0 {
        return None;
    }
    let base = segments[..position].join("/");
    let rest = if position + 1 < segments.len() {
        Some(segments[position + 1..].join("/"))
    } else {
        None
    };
    Some((base, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fanout_split() {
        assert_eq!(split_fanout("grp1/fopt"), Some(("grp1".into(), None)));
        assert_eq!(
            split_fanout("cse-in/grp1/fopt/data/la"),
            Some(("cse-in/grp1".into(), Some("data/la".into())))
        );
        assert_eq!(split_fanout("cse-in/cnt"), None);
        assert_eq!(split_fanout("fopt"), None);
    }
}
