use serde_json::{json, Map, Value};

use ocse_core::{time, CseError, EventKind, Request, Response, ResponseStatusCode, ResourceEvent,
    ResultContent};
use ocse_model::{validate_update, Resource, ResourceType};

use crate::ops::resource_event;
use crate::Cse;

impl Cse {
    /// Execute an UPDATE with the already-deserialized content (the
    /// dispatcher unwraps `pc` before access control): partial merge,
    /// bookkeeping, quota re-enforcement.
    pub(crate) async fn op_update(
        &self,
        request: &Request,
        target: &Resource,
        changes: Map<String, Value>,
        wrapper: String,
    ) -> Result<(Response, Vec<ResourceEvent>), CseError> {
        if matches!(target.ty(), ResourceType::Cin | ResourceType::Req) {
            return Err(CseError::operation_not_allowed(format!(
                "{} resources are immutable",
                target.ty()
            )));
        }

        if wrapper != target.tpe() {
            return Err(CseError::bad_request(format!(
                "content wrapper {wrapper} does not match resource type"
            )));
        }

        validate_update(&self.inner.registry, target.ty(), &changes, target.attrs())?;

        let mut updated = target.clone();
        let changed = updated.merge_update(&changes);
        let now = time::now_timestamp();
        updated.set("lt", now.as_str());
        if changed.contains(&"et".to_string()) {
            let et = time::clamp_expiration(
                updated.get_str("et"),
                self.inner.config.max_expiration_delta,
            )?;
            updated.set("et", et);
        }
        if matches!(target.ty(), ResourceType::Cnt | ResourceType::Fcnt) {
            updated.set("st", target.get_u64("st").unwrap_or(0) + 1);
        }
        if target.ty() == ResourceType::Grp {
            self.revalidate_group(&mut updated).await?;
        }

        let mut events: Vec<ResourceEvent> = Vec::new();
        let mut tx = self.inner.storage.begin().await?;

        // Shrinking a container's caps evicts oldest instances immediately.
        if target.ty() == ResourceType::Cnt {
            let mut instances: Vec<Resource> = self
                .inner
                .storage
                .children_of(target.ri())
                .await?
                .into_iter()
                .filter(|c| c.ty() == ResourceType::Cin)
                .collect();
            let mut cni = instances.len() as u64;
            let mut cbs: u64 = instances.iter().map(Resource::content_size).sum();
            let mni = updated.get_u64("mni");
            let mbs = updated.get_u64("mbs");
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
            updated.set("cni", cni);
            updated.set("cbs", cbs);
        }

        tx.update(updated.clone());
        tx.commit().await?;

        let mut all_events = vec![resource_event(
            EventKind::Updated,
            &updated,
            changed.clone(),
            &request.from,
        )];
        all_events.extend(events);

        let response = Response::new(ResponseStatusCode::Updated, request.rqi.clone());
        let response = match request.result_content() {
            ResultContent::Nothing => response,
            ResultContent::ModifiedAttributes => {
                response.with_pc(updated.wrapped_partial(&changed))
            }
            _ => response.with_pc(updated.wrapped()),
        };
        Ok((response, all_events))
    }

    /// Re-check group invariants after a member-list update.
    async fn revalidate_group(&self, group: &mut Resource) -> Result<(), CseError> {
        let mids = group.get_str_list("mid");
        let mnm = group
            .get_u64("mnm")
            .ok_or_else(|| CseError::bad_request("mnm is mandatory"))?;
        if mids.len() as u64 > mnm {
            return Err(CseError::new(
                ResponseStatusCode::MaxNumberOfMemberExceeded,
                format!("{} members exceed mnm {mnm}", mids.len()),
            ));
        }
        group.set("cnm", mids.len() as u64);
        group.set(
            "mid",
            Value::Array(mids.iter().map(|m| json!(m)).collect()),
        );
        Ok(())
    }
}
