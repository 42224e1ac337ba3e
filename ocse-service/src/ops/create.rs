use serde_json::{json, Map, Value};

use ocse_core::{
    id, time, CseError, EventKind, Origin, Request, Response, ResponseStatusCode, ResourceEvent,
};
use ocse_model::{validate_create, Resource, ResourceType};

use crate::ops::resource_event;
use crate::{unique_ri, Cse};

/// Group consistency strategies (`csy`).
const CSY_ABANDON_MEMBER: u64 = 1;
const CSY_ABANDON_GROUP: u64 = 2;
const CSY_SET_MIXED: u64 = 3;
/// `mt` value meaning "mixed member types".
const MT_MIXED: u64 = 24;

impl Cse {
    /// Execute a CREATE under `parent` with the already-deserialized
    /// content (the dispatcher unwraps `pc` before access control). Returns
    /// the response and the post-commit events (creation, auto-created
    /// policies, evictions).
    pub(crate) async fn op_create(
        &self,
        request: &Request,
        ty: ResourceType,
        parent: &Resource,
        mut attrs: Map<String, Value>,
        wrapper: String,
    ) -> Result<(Response, Vec<ResourceEvent>), CseError> {
        if !parent.ty().can_have_child(ty) {
            return Err(CseError::invalid_child_type(format!(
                "{} cannot be created under {}",
                ty,
                parent.ty()
            )));
        }

        if ty != ResourceType::Fcnt && wrapper != ty.tpe() {
            return Err(CseError::bad_request(format!(
                "content wrapper {wrapper} does not match requested type {ty}"
            )));
        }

        // `"cr": null` asks the CSE to record the creator.
        let record_creator = matches!(attrs.get("cr"), Some(Value::Null));
        if record_creator {
            attrs.remove("cr");
        }

        validate_create(&self.inner.registry, ty, &attrs)?;

        // Stamp identity and lifecycle attributes.
        let ri = unique_ri(&self.inner.storage, self.inner.config.id_length).await?;
        let now = time::now_timestamp();
        let rn = match attrs.get("rn").and_then(Value::as_str) {
            Some(rn) => rn.to_string(),
            None => id::generate_rn(ty.short()),
        };
        let mut resource = Resource::from_parts(ty, attrs);
        resource.set("ri", ri.as_str());
        resource.set("rn", rn.as_str());
        resource.set("pi", parent.ri());
        resource.set("ct", now.as_str());
        resource.set("lt", now.as_str());
        let et = time::clamp_expiration(
            resource.get_str("et"),
            self.inner.config.max_expiration_delta,
        )?;
        resource.set("et", et.as_str());
        if record_creator {
            resource.set("cr", request.from.as_str());
        }
        resource.set_srn(format!("{}/{}", parent.srn(), rn));
        if ty == ResourceType::Fcnt && wrapper != "m2m:fcnt" {
            resource.set_tpe_override(wrapper);
        }

        // Type-specific preparation.
        let mut extra_inserts: Vec<Resource> = Vec::new();
        match ty {
            ResourceType::Ae => {
                self.prepare_ae(request, &mut resource, &mut extra_inserts)
                    .await?;
            }
            ResourceType::Csr => {
                self.prepare_csr(&resource).await?;
            }
            ResourceType::Sub => {
                self.prepare_sub(request, &resource).await?;
            }
            ResourceType::Grp => {
                self.prepare_grp(&mut resource).await?;
            }
            ResourceType::Pch => {
                let siblings = self.inner.storage.children_of(parent.ri()).await?;
                if siblings.iter().any(|s| s.ty() == ResourceType::Pch) {
                    return Err(CseError::conflict(
                        "a pollingChannel already exists under this parent",
                    ));
                }
            }
            _ => {}
        }

        // Stage the transaction: insert, parent bookkeeping, evictions.
        let mut events: Vec<ResourceEvent> = Vec::new();
        let mut parent_up = parent.clone();
        parent_up.set("lt", now.as_str());

        let mut tx = self.inner.storage.begin().await?;
        if ty == ResourceType::Cin {
            let cs = resource.content_size();
            if let Some(mbs) = parent.get_u64("mbs") {
                if cs > mbs {
                    return Err(CseError::new(
                        ResponseStatusCode::NotAcceptable,
                        format!("content size {cs} exceeds container mbs {mbs}"),
                    ));
                }
            }
            resource.set("cs", cs);
            let st = parent.get_u64("st").unwrap_or(0) + 1;
            resource.set("st", st);
            parent_up.set("st", st);

            let mut cni = parent.get_u64("cni").unwrap_or(0) + 1;
            let mut cbs = parent.get_u64("cbs").unwrap_or(0) + cs;
            let mut instances: Vec<Resource> = self
                .inner
                .storage
                .children_of(parent.ri())
                .await?
                .into_iter()
                .filter(|c| c.ty() == ResourceType::Cin)
                .collect();
            let mni = parent.get_u64("mni");
            let mbs = parent.get_u64("mbs");
            while (mni.is_some_and(|m| cni > m) || mbs.is_some_and(|m| cbs > m))
                && !instances.is_empty()
            {
                let evicted = instances.remove(0);
                cni -= 1;
                cbs = cbs.saturating_sub(evicted.content_size());
                tx.delete(evicted.ri());
                events.push(resource_event(
                    EventKind::Deleted,
                    &evicted,
                    Vec::new(),
                    &self.inner.config.admin_originator,
                ));
            }
            parent_up.set("cni", cni);
            parent_up.set("cbs", cbs);
        }

        tx.insert(resource.clone());
        for extra in &extra_inserts {
            tx.insert(extra.clone());
        }
        tx.update(parent_up);
        tx.commit().await?;

        // Creation events go first so subscribers observe causal order.
        let mut all_events = vec![resource_event(
            EventKind::Created,
            &resource,
            Vec::new(),
            &request.from,
        )];
        for extra in &extra_inserts {
            all_events.push(resource_event(
                EventKind::Created,
                extra,
                Vec::new(),
                &request.from,
            ));
        }
        all_events.extend(events);

        // Runtime index updates that must be visible before the next request.
        match ty {
            ResourceType::Sub => self.index_subscription(parent.ri(), resource.ri()),
            ResourceType::Pch => self.polling_register(parent.ri()),
            _ => {}
        }

        let response = self.create_response(request, &resource);
        Ok((response, all_events))
    }

    async fn prepare_ae(
        &self,
        request: &Request,
        resource: &mut Resource,
        extra_inserts: &mut Vec<Resource>,
    ) -> Result<(), CseError> {
        let aei = id::assign_aei(&request.from, self.inner.config.id_length).ok_or_else(|| {
            CseError::new(
                ResponseStatusCode::OriginatorNotRegistered,
                format!(
                    "originator {} is not a valid AE-ID stem",
                    request.from
                ),
            )
        })?;
        let registered = self.inner.storage.resources_of_type(2).await?;
        if registered
            .iter()
            .any(|ae| ae.get_str("aei") == Some(aei.as_str()))
        {
            return Err(CseError::new(
                ResponseStatusCode::AlreadyRegistered,
                format!("AE-ID {aei} is already registered"),
            ));
        }
        resource.set("aei", aei.as_str());

        // Auto-grant: a policy under the AE giving the registrant and the
        // admin full access, referenced from the AE's acpi.
        let acp_ri = unique_ri(&self.inner.storage, self.inner.config.id_length).await?;
        let acp_rn = id::generate_rn("acp");
        let admin = self.inner.config.admin_originator.as_str();
        let mut acp = Resource::new(ResourceType::Acp);
        acp.set("ri", acp_ri.as_str());
        acp.set("rn", acp_rn.as_str());
        acp.set("pi", resource.ri());
        acp.set("ct", resource.ct());
        acp.set("lt", resource.lt());
        if let Some(et) = resource.et() {
            acp.set("et", et);
        }
        acp.set(
            "pv",
            json!({ "acr": [{ "acor": [aei.as_str(), admin], "acop": 63 }] }),
        );
        acp.set(
            "pvs",
            json!({ "acr": [{ "acor": [aei.as_str(), admin], "acop": 63 }] }),
        );
        acp.set_srn(format!("{}/{}", resource.srn(), acp_rn));
        resource.set("acpi", json!([acp_ri]));
        extra_inserts.push(acp);
        Ok(())
    }

    async fn prepare_csr(&self, resource: &Resource) -> Result<(), CseError> {
        let csi = resource
            .get_str("csi")
            .ok_or_else(|| CseError::bad_request("csi is mandatory"))?;
        if !csi.starts_with('/') {
            return Err(CseError::bad_request(format!(
                "csi must begin with '/': {csi}"
            )));
        }
        let existing = self.inner.storage.resources_of_type(16).await?;
        if existing.iter().any(|csr| csr.get_str("csi") == Some(csi)) {
            return Err(CseError::conflict(format!(
                "remote CSE {csi} is already registered"
            )));
        }
        Ok(())
    }

    async fn prepare_sub(&self, request: &Request, resource: &Resource) -> Result<(), CseError> {
        if let Some(bn) = resource.get("bn") {
            let num = bn.get("num").and_then(Value::as_u64);
            if num == Some(0) {
                return Err(CseError::bad_request("bn.num must be positive"));
            }
        }
        if self.inner.config.notifications.enable_verification_requests
            && request.origin != Origin::Internal
        {
            let targets = resource.get_str_list("nu");
            self.verify_subscription(resource, &targets).await?;
        }
        Ok(())
    }

    async fn prepare_grp(&self, resource: &mut Resource) -> Result<(), CseError> {
        let mids = resource.get_str_list("mid");
        let mnm = resource
            .get_u64("mnm")
            .ok_or_else(|| CseError::bad_request("mnm is mandatory"))?;
        if mids.len() as u64 > mnm {
            return Err(CseError::new(
                ResponseStatusCode::MaxNumberOfMemberExceeded,
                format!("{} members exceed mnm {mnm}", mids.len()),
            ));
        }

        let mt = resource.get_u64("mt").filter(|mt| *mt != MT_MIXED);
        let csy = resource.get_u64("csy").unwrap_or(CSY_ABANDON_MEMBER);
        let mut kept: Vec<String> = Vec::new();
        let mut mtv = false;
        if let Some(expected) = mt {
            mtv = true;
            for mid in mids {
                match self.resolve_member(&mid).await? {
                    Some(member) if u64::from(member.ty().code()) == expected => {
                        if !kept.contains(&mid) {
                            kept.push(mid);
                        }
                    }
                    Some(_) => match csy {
                        CSY_ABANDON_GROUP => {
                            return Err(CseError::new(
                                ResponseStatusCode::GroupMemberTypeInconsistent,
                                format!("member {mid} does not have type {expected}"),
                            ));
                        }
                        CSY_SET_MIXED => {
                            resource.set("mt", MT_MIXED);
                            if !kept.contains(&mid) {
                                kept.push(mid);
                            }
                        }
                        _ => {
                            tracing::debug!(member = %mid, "abandoning type-inconsistent member");
                        }
                    },
                    // Remote or dangling members cannot be validated here.
                    None => {
                        mtv = false;
                        if !kept.contains(&mid) {
                            kept.push(mid);
                        }
                    }
                }
            }
        } else {
            kept = mids;
        }

        resource.set(
            "mid",
            Value::Array(kept.iter().map(|m| Value::from(m.as_str())).collect()),
        );
        resource.set("cnm", kept.len() as u64);
        resource.set("mtv", mtv);
        Ok(())
    }

    /// Resolve a group member reference when it is local; remote members
    /// yield `None`.
    pub(crate) async fn resolve_member(
        &self,
        mid: &str,
    ) -> Result<Option<Resource>, CseError> {
        let local = mid
            .strip_prefix(&format!("{}/", self.inner.config.cse_id))
            .unwrap_or(mid);
        if local.starts_with('/') {
            return Ok(None);
        }
        self.resolve_local(local).await
    }

    fn create_response(&self, request: &Request, resource: &Resource) -> Response {
        use ocse_core::ResultContent::*;
        let response = Response::new(ResponseStatusCode::Created, request.rqi.clone());
        match request.result_content() {
            Nothing => response,
            HierarchicalAddress => {
                response.with_pc(json!({ "m2m:uri": resource.srn() }))
            }
            HierarchicalAddressAttributes => {
                let mut wrapped = resource.wrapped();
                if let Some(obj) = wrapped.as_object_mut() {
                    obj.insert("m2m:uri".to_string(), Value::from(resource.srn()));
                }
                response.with_pc(wrapped)
            }
            ModifiedAttributes => {
                let assigned = ["ri", "rn", "pi", "ct", "lt", "et", "aei", "st", "cs"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>();
                response.with_pc(resource.wrapped_partial(&assigned))
            }
            _ => response.with_pc(resource.wrapped()),
        }
    }
}
