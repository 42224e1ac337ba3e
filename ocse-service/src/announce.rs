use serde_json::Value;

use ocse_core::{CseError, EventKind, Operation, Request, ResourceEvent, ResultContent};
use ocse_model::Resource;

use crate::Cse;

impl Cse {
    /// Mirror announceable resources (`at` set) to their target CSEs.
    /// Runs post-commit off the event bus; failures go to the retry queue.
    pub(crate) async fn handle_announcement_event(&self, event: &ResourceEvent) {
        // Announced copies themselves are never re-announced.
        if event.ty >= 10000 {
            return;
        }
        let targets = announce_targets(&event.snapshot);
        if targets.is_empty() {
            return;
        }
        match event.kind {
            EventKind::Created | EventKind::Updated => {
                let resource = match self.inner.storage.resource_by_ri(&event.ri).await {
                    Ok(Some(resource)) => resource,
                    _ => return,
                };
                for csi in targets {
                    self.announce_to(&resource, &csi).await;
                }
            }
            EventKind::Deleted | EventKind::Expired => {
                for csi in targets {
                    self.retract_from(&event.ri, &csi).await;
                }
            }
            EventKind::BareRetrieve => {}
        }
    }

    pub(crate) async fn announce_to(&self, resource: &Resource, csi: &str) {
        let config = &self.inner.config;
        if csi == config.cse_id && !config.announcements.allow_to_hosting_cse {
            tracing::debug!(ri = %resource.ri(), "announcement to hosting CSE disallowed");
            return;
        }

        // Announcements are held back briefly after a peer registers.
        if csi != config.cse_id {
            let ready = self.remote_by_csi(csi).is_some_and(|remote| {
                remote.registered_at.elapsed().as_secs()
                    >= config.announcements.delay_after_registration
            });
            if !ready {
                self.queue_pending_announcement(resource.ri(), csi);
                return;
            }
        }

        let lnk = format!("{}/{}", config.cse_id, resource.ri());
        let Some(annc) = resource.announced_copy(&self.inner.registry, &lnk) else {
            tracing::warn!(ri = %resource.ri(), "resource type is not announceable");
            return;
        };
        let key = link_key(resource.ri(), csi);

        if let Some(address) = self.inner.annc_links.get(&key).map(|e| e.value().clone()) {
            // Already mirrored: push an update.
            let request = Request::builder(
                Operation::Update,
                address.as_str(),
                config.cse_id.as_str(),
            )
            .pc(annc.wrapped())
            .rcn(ResultContent::Nothing)
            .build();
            let response = self.process(request).await;
            if !response.is_success() {
                tracing::warn!(ri = %resource.ri(), csi = %csi, rsc = response.rsc.code(), "announcement update failed");
                self.queue_pending_announcement(resource.ri(), csi);
            }
            return;
        }

        // Announced copies land under the target's CSEBase; for the hosting
        // CSE that is our own CSEBase. The local create is detached: the
        // triggering request may still hold the CSEBase write lock.
        if csi == config.cse_id {
            let cse = self.clone();
            let to = config.cse_name.clone();
            let from = config.cse_id.clone();
            let ty = annc.ty().code();
            let wrapped = annc.wrapped();
            let original = resource.ri().to_string();
            tokio::spawn(async move {
                let request = Request::builder(Operation::Create, to, from)
                    .ty(ty)
                    .pc(wrapped)
                    .build();
                let response = cse.process(request).await;
                if response.is_success() {
                    if let Some(local_ri) = created_ri(&response.pc) {
                        cse.inner.annc_links.insert(key, local_ri);
                    }
                } else {
                    tracing::warn!(ri = %original, rsc = response.rsc.code(), "local announcement failed");
                }
            });
            return;
        }

        let request = Request::builder(Operation::Create, csi, config.cse_id.as_str())
            .ty(annc.ty().code())
            .pc(annc.wrapped())
            .build();
        let response = self.process(request).await;
        if response.is_success() {
            if let Some(remote_ri) = created_ri(&response.pc) {
                self.inner
                    .annc_links
                    .insert(key, format!("{csi}/{remote_ri}"));
            }
            tracing::debug!(ri = %resource.ri(), csi = %csi, "resource announced");
        } else {
            tracing::warn!(ri = %resource.ri(), csi = %csi, rsc = response.rsc.code(), "announcement failed, queued for retry");
            self.queue_pending_announcement(resource.ri(), csi);
        }
    }

    async fn retract_from(&self, ri: &str, csi: &str) {
        let key = link_key(ri, csi);
        {
            let mut pending = self.inner.annc_pending.lock().expect("pending lock poisoned");
            pending.retain(|(p_ri, p_csi)| !(p_ri == ri && p_csi == csi));
        }
        let Some((_, address)) = self.inner.annc_links.remove(&key) else {
            return;
        };
        let request = Request::builder(
            Operation::Delete,
            address.as_str(),
            self.inner.config.cse_id.as_str(),
        )
        .rcn(ResultContent::Nothing)
        .build();
        let response = self.process(request).await;
        if !response.is_success() {
            tracing::warn!(ri = %ri, csi = %csi, rsc = response.rsc.code(), "announcement retraction failed");
        }
    }

    fn queue_pending_announcement(&self, ri: &str, csi: &str) {
        let mut pending = self.inner.annc_pending.lock().expect("pending lock poisoned");
        if !pending
            .iter()
            .any(|(p_ri, p_csi)| p_ri == ri && p_csi == csi)
        {
            pending.push((ri.to_string(), csi.to_string()));
        }
    }

    /// Worker tick: retry announcements that could not be delivered.
    pub(crate) async fn retry_pending_announcements(&self) -> Result<(), CseError> {
        let pending: Vec<(String, String)> = {
            let mut guard = self.inner.annc_pending.lock().expect("pending lock poisoned");
            guard.drain(..).collect()
        };
        for (ri, csi) in pending {
            match self.inner.storage.resource_by_ri(&ri).await? {
                Some(resource) => self.announce_to(&resource, &csi).await,
                // The original is gone; nothing left to announce.
                None => continue,
            }
        }
        Ok(())
    }
}

fn link_key(ri: &str, csi: &str) -> String {
    format!("{ri}|{csi}")
}

fn announce_targets(snapshot: &Value) -> Vec<String> {
    snapshot
        .as_object()
        .and_then(|outer| outer.values().next())
        .and_then(|inner| inner.get("at"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Extract the assigned `ri` from a CREATE response's wrapped content.
fn created_ri(pc: &Option<Value>) -> Option<String> {
    pc.as_ref()?
        .as_object()?
        .values()
        .next()?
        .get("ri")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn targets_from_snapshot() {
        let snapshot = json!({"m2m:cnt": {"ri": "c1", "at": ["/id-in", "/id-mn"]}});
        assert_eq!(announce_targets(&snapshot), vec!["/id-in", "/id-mn"]);
        assert!(announce_targets(&json!({"m2m:cnt": {"ri": "c1"}})).is_empty());
    }

    #[test]
    fn created_ri_from_response_pc() {
        let pc = Some(json!({"m2m:cntA": {"ri": "annc1", "lnk": "/id-mn/c1"}}));
        assert_eq!(created_ri(&pc), Some("annc1".to_string()));
        assert_eq!(created_ri(&None), None);
    }
}
