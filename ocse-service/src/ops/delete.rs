use ocse_core::{time, CseError, EventKind, Request, Response, ResponseStatusCode, ResourceEvent,
    ResultContent};
use ocse_model::{Resource, ResourceType};

use crate::ops::resource_event;
use crate::Cse;

impl Cse {
    /// Execute a DELETE: remove the resource and its subtree, adjust parent
    /// bookkeeping, and emit deletion events carrying final snapshots.
    pub(crate) async fn op_delete(
        &self,
        request: &Request,
        target: &Resource,
    ) -> Result<(Response, Vec<ResourceEvent>), CseError> {
        if target.ty() == ResourceType::CseBase {
            return Err(CseError::operation_not_allowed(
                "the CSEBase cannot be deleted",
            ));
        }

        let descendants = self.inner.storage.descendants_of(target.ri()).await?;
        let parent = self
            .inner
            .storage
            .resource_by_ri(target.pi())
            .await?
            .ok_or_else(|| CseError::internal("parent missing for stored resource"))?;

        let mut parent_up = parent.clone();
        parent_up.set("lt", time::now_timestamp());
        if target.ty() == ResourceType::Cin && parent.ty() == ResourceType::Cnt {
            let cni = parent.get_u64("cni").unwrap_or(0).saturating_sub(1);
            let cbs = parent
                .get_u64("cbs")
                .unwrap_or(0)
                .saturating_sub(target.content_size());
            parent_up.set("cni", cni);
            parent_up.set("cbs", cbs);
            parent_up.set("st", parent.get_u64("st").unwrap_or(0) + 1);
        }

        let mut tx = self.inner.storage.begin().await?;
        for descendant in descendants.iter().rev() {
            tx.delete(descendant.ri());
        }
        tx.delete(target.ri());
        tx.update(parent_up);
        tx.commit().await?;

        // Deletion events carry the final snapshots; the target first, then
        // the subtree in tree order.
        let mut events = vec![resource_event(
            EventKind::Deleted,
            target,
            Vec::new(),
            &request.from,
        )];
        for descendant in &descendants {
            events.push(resource_event(
                EventKind::Deleted,
                descendant,
                Vec::new(),
                &request.from,
            ));
        }

        // Runtime cleanup for everything that just went away.
        for gone in std::iter::once(target).chain(descendants.iter()) {
            match gone.ty() {
                ResourceType::Sub => {
                    self.unindex_subscription(gone.pi(), gone.ri());
                    self.on_subscription_deleted(gone).await;
                }
                ResourceType::Pch => self.polling_unregister(gone.pi()),
                ResourceType::Csr => {
                    if let Some(csi) = gone.get_str("csi") {
                        self.forget_remote(csi);
                    }
                }
                _ => {}
            }
        }

        let response = Response::new(ResponseStatusCode::Deleted, request.rqi.clone());
        let response = match request.result_content() {
            ResultContent::Nothing => response,
            _ => response.with_pc(target.wrapped()),
        };
        Ok((response, events))
    }
}
