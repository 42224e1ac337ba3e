use std::collections::HashMap;
use std::sync::atomic::Ordering;

use serde_json::{json, Map, Value};

use ocse_core::{
    CseError, EventKind, Operation, Request, Response, ResponseStatusCode, ResourceEvent,
};
use ocse_model::Resource;

use crate::dispatcher::Route;
use crate::{Cse, DeliveryJob};

/// Notification event types (`enc.net`).
const NET_UPDATE: u64 = 1;
const NET_DELETE: u64 = 2;
const NET_CREATE_CHILD: u64 = 3;
const NET_DELETE_CHILD: u64 = 4;
const NET_RETRIEVE_NO_CHILD: u64 = 5;

impl Cse {
    // -- index maintenance (write lock on subscription CRUD) --

    pub(crate) fn index_subscription(&self, parent_ri: &str, sub_ri: &str) {
        let mut index = self.inner.sub_index.write().expect("sub index poisoned");
        let entry = index.entry(parent_ri.to_string()).or_default();
        if !entry.iter().any(|s| s == sub_ri) {
            entry.push(sub_ri.to_string());
        }
    }

    pub(crate) fn unindex_subscription(&self, parent_ri: &str, sub_ri: &str) {
        let mut index = self.inner.sub_index.write().expect("sub index poisoned");
        if let Some(entry) = index.get_mut(parent_ri) {
            entry.retain(|s| s != sub_ri);
            if entry.is_empty() {
                index.remove(parent_ri);
            }
        }
    }

    pub(crate) fn subs_for(&self, parent_ri: &str) -> Vec<String> {
        self.inner
            .sub_index
            .read()
            .expect("sub index poisoned")
            .get(parent_ri)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) async fn rebuild_subscription_index(&self) -> Result<(), CseError> {
        let subs = self.inner.storage.resources_of_type(23).await?;
        let mut index: HashMap<String, Vec<String>> = HashMap::new();
        for sub in &subs {
            index
                .entry(sub.pi().to_string())
                .or_default()
                .push(sub.ri().to_string());
        }
        let count = subs.len();
        *self.inner.sub_index.write().expect("sub index poisoned") = index;
        if count > 0 {
            tracing::info!(count, "rebuilt subscription index");
        }
        Ok(())
    }

    // -- event matching --

    /// Match a committed event against the subscription index and dispatch
    /// notifications. Called from the event-bus handler, post-commit.
    pub(crate) async fn handle_subscription_event(&self, event: &ResourceEvent) {
        let interests: Vec<(String, u64)> = match event.kind {
            EventKind::Created => vec![(event.pi.clone(), NET_CREATE_CHILD)],
            EventKind::Updated => vec![(event.ri.clone(), NET_UPDATE)],
            EventKind::Deleted | EventKind::Expired => vec![
                (event.ri.clone(), NET_DELETE),
                (event.pi.clone(), NET_DELETE_CHILD),
            ],
            EventKind::BareRetrieve => vec![(event.ri.clone(), NET_RETRIEVE_NO_CHILD)],
        };

        for (key, net) in interests {
            for sub_ri in self.subs_for(&key) {
                let sub = match self.inner.storage.resource_by_ri(&sub_ri).await {
                    Ok(Some(sub)) => sub,
                    Ok(None) => {
                        // Resolution failure after deletion degrades to
                        // "not found": drop the stale index entry.
                        self.unindex_subscription(&key, &sub_ri);
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(sub = %sub_ri, error = %err, "cannot load subscription");
                        continue;
                    }
                };
                if !enc_matches(&sub, net, event) {
                    continue;
                }
                // Originator filter: the subscription's own policies decide
                // which originators may trigger it.
                let acpi = sub.acpi();
                if !acpi.is_empty()
                    && self
                        .check_access_with(&acpi, &event.originator, Operation::Notify, sub.ri())
                        .await
                        .is_err()
                {
                    continue;
                }
                let sgn = build_sgn(&sub, net, event);
                self.dispatch_notification(&sub, sgn).await;
            }
        }
    }

    // -- delivery --

    async fn dispatch_notification(&self, sub: &Resource, sgn: Value) {
        // Expiration counter: each matched notification consumes one credit.
        let mut delete_after = false;
        if let Some(exc) = sub.get_u64("exc") {
            delete_after = exc <= 1;
            let mut decremented = sub.clone();
            decremented.set("exc", exc.saturating_sub(1));
            let result = async {
                let mut tx = self.inner.storage.begin().await?;
                tx.update(decremented);
                tx.commit().await?;
                Ok::<(), CseError>(())
            }
            .await;
            if let Err(err) = result {
                tracing::warn!(sub = %sub.ri(), error = %err, "cannot decrement exc");
            }
        }

        let targets = sub.get_str_list("nu");
        if let Some(bn) = sub.get("bn").cloned() {
            if let Err(err) = self.batch_notification(sub, &sgn, &bn).await {
                tracing::warn!(sub = %sub.ri(), error = %err, "batching failed");
            }
        } else if self
            .inner
            .config
            .notifications
            .async_subscription_notifications
        {
            self.enqueue_delivery(sub.ri(), targets, sgn);
        } else {
            self.deliver_notification_now(&targets, &sgn, sub.ri()).await;
        }

        if delete_after {
            tracing::debug!(sub = %sub.ri(), "expiration counter exhausted");
            let request = Request::builder(
                Operation::Delete,
                sub.ri(),
                self.inner.config.admin_originator.as_str(),
            )
            .build();
            let _ = self.process(request).await;
        }
    }

    /// Queue on the sticky per-subscription worker: one worker per
    /// subscription keeps deliveries to the same target in commit order.
    fn enqueue_delivery(&self, sub_ri: &str, targets: Vec<String>, sgn: Value) {
        let sender = self
            .inner
            .sub_workers
            .entry(sub_ri.to_string())
            .or_insert_with(|| {
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DeliveryJob>();
                let cse = self.clone();
                tokio::spawn(async move {
                    while let Some(job) = rx.recv().await {
                        cse.deliver_notification_now(&job.targets, &job.sgn, &job.sub_ri)
                            .await;
                    }
                });
                tx
            })
            .clone();
        let _ = sender.send(DeliveryJob {
            targets,
            sgn,
            sub_ri: sub_ri.to_string(),
        });
    }

    pub(crate) async fn deliver_notification_now(
        &self,
        targets: &[String],
        sgn: &Value,
        sub_ri: &str,
    ) {
        for target in targets {
            match self.deliver_to_target(target, sgn).await {
                Ok(()) => {
                    self.inner
                        .stats
                        .notifications_sent
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.inner
                        .stats
                        .notifications_dropped
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(sub = %sub_ri, target = %target, error = %err.message(), "notification dropped");
                }
            }
        }
    }

    /// Deliver a notification payload to a target URI or resource address.
    pub(crate) async fn deliver_to_target(
        &self,
        target: &str,
        payload: &Value,
    ) -> Result<(), CseError> {
        if target.starts_with("http://") || target.starts_with("https://") {
            let request = Request::builder(
                Operation::Notify,
                target,
                self.inner.config.cse_id.as_str(),
            )
            .pc(payload.clone())
            .rqet(self.request_deadline())
            .build();
            let response = self.inner.sender.send(target, &request).await?;
            return expect_success(response);
        }
        match self.resolve_route(target)? {
            Route::Remote { csi } => {
                let request = Request::builder(
                    Operation::Notify,
                    target,
                    self.inner.config.cse_id.as_str(),
                )
                .pc(payload.clone())
                .rqet(self.request_deadline())
                .build();
                let response = self.forward_request(&csi, &request).await?;
                expect_success(response)
            }
            Route::Local { id } => {
                let resource = self
                    .resolve_local(&id)
                    .await?
                    .ok_or_else(|| CseError::not_found(format!("no such target: {target}")))?;
                let request = Request::builder(
                    Operation::Notify,
                    target,
                    self.inner.config.cse_id.as_str(),
                )
                .pc(payload.clone())
                .rqet(self.request_deadline())
                .build();
                let response = self.op_notify(&request, &resource).await?;
                if response.is_success() {
                    Ok(())
                } else {
                    Err(CseError::new(response.rsc, "notification rejected"))
                }
            }
        }
    }

    // -- verification and deletion notices --

    /// Send a verification request (`vrq`) to each target; a target that
    /// does not acknowledge makes the subscription unacceptable.
    pub(crate) async fn verify_subscription(
        &self,
        sub: &Resource,
        targets: &[String],
    ) -> Result<(), CseError> {
        let sgn = json!({
            "m2m:sgn": { "vrq": true, "sur": sub.ri() }
        });
        for target in targets {
            self.deliver_to_target(target, &sgn).await.map_err(|err| {
                CseError::new(
                    ResponseStatusCode::TargetNotSubscribable,
                    format!(
                        "subscription verification failed for {target}: {}",
                        err.message()
                    ),
                )
            })?;
        }
        Ok(())
    }

    /// Flush leftovers and notify the subscriber when a subscription dies.
    pub(crate) async fn on_subscription_deleted(&self, sub: &Resource) {
        if sub.get("bn").is_some() {
            if let Err(err) = self.flush_batch(sub).await {
                tracing::debug!(sub = %sub.ri(), error = %err, "final batch flush failed");
            }
        }
        self.inner.batch_first.remove(sub.ri());
        self.inner.sub_workers.remove(sub.ri());

        if let Some(su) = sub.get_str("su") {
            let sgn = json!({
                "m2m:sgn": { "sud": true, "sur": sub.ri() }
            });
            if let Err(err) = self.deliver_to_target(su, &sgn).await {
                tracing::debug!(sub = %sub.ri(), error = %err, "deletion notice failed");
            }
        }
    }

    // -- batching --

    async fn batch_notification(
        &self,
        sub: &Resource,
        sgn: &Value,
        bn: &Value,
    ) -> Result<(), CseError> {
        let num = bn.get("num").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;
        let len = self.inner.storage.batch_append(sub.ri(), sgn.clone()).await?;
        self.inner
            .batch_first
            .entry(sub.ri().to_string())
            .or_insert_with(tokio::time::Instant::now);

        // Backpressure: bound the buffer, dropping oldest.
        let cap = num * self.inner.config.notifications.batch_buffer_factor.max(1);
        if len > cap {
            let overflow = len - cap;
            self.inner
                .storage
                .batch_drop_oldest(sub.ri(), overflow)
                .await?;
            self.inner
                .stats
                .notifications_dropped
                .fetch_add(overflow as u64, Ordering::Relaxed);
            tracing::warn!(sub = %sub.ri(), dropped = overflow, "batch buffer overflow");
        }

        if len >= num {
            self.flush_batch(sub).await?;
        }
        Ok(())
    }

    pub(crate) async fn flush_batch(&self, sub: &Resource) -> Result<(), CseError> {
        let items = self.inner.storage.batch_take(sub.ri()).await?;
        self.inner.batch_first.remove(sub.ri());
        if items.is_empty() {
            return Ok(());
        }
        let inner: Vec<Value> = items
            .into_iter()
            .map(|item| item.get("m2m:sgn").cloned().unwrap_or(item))
            .collect();
        let agn = json!({ "m2m:agn": { "m2m:sgn": inner } });
        let targets = sub.get_str_list("nu");
        if self
            .inner
            .config
            .notifications
            .async_subscription_notifications
        {
            self.enqueue_delivery(sub.ri(), targets, agn);
        } else {
            self.deliver_notification_now(&targets, &agn, sub.ri()).await;
        }
        Ok(())
    }

    /// Worker tick: flush batches whose `bn.dur` window has elapsed.
    pub(crate) async fn flush_due_batches(&self) -> Result<(), CseError> {
        let due: Vec<String> = {
            let mut due = Vec::new();
            for entry in self.inner.batch_first.iter() {
                due.push(entry.key().clone());
            }
            due
        };
        for sub_ri in due {
            let Some(sub) = self.inner.storage.resource_by_ri(&sub_ri).await? else {
                self.inner.batch_first.remove(&sub_ri);
                let _ = self.inner.storage.batch_take(&sub_ri).await;
                continue;
            };
            let Some(first) = self.inner.batch_first.get(&sub_ri).map(|e| *e.value()) else {
                continue;
            };
            let dur_secs = sub
                .get("bn")
                .and_then(|bn| bn.get("dur"))
                .and_then(batch_duration_secs);
            if let Some(dur) = dur_secs {
                if first.elapsed() >= std::time::Duration::from_secs(dur) {
                    self.flush_batch(&sub).await?;
                }
            }
        }
        Ok(())
    }
}

/// `bn.dur` accepts an ISO-8601 period or a bare number of seconds.
fn batch_duration_secs(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let s = value.as_str()?;
    ocse_core::time::parse_duration(s)
        .ok()
        .and_then(|d| u64::try_from(d.num_seconds()).ok())
}

/// Does the subscription's event notification criteria accept this event?
fn enc_matches(sub: &Resource, net: u64, event: &ResourceEvent) -> bool {
    let enc = sub.get("enc");
    let nets: Vec<u64> = enc
        .and_then(|e| e.get("net"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_else(|| vec![NET_UPDATE]);
    if !nets.contains(&net) {
        return false;
    }
    if matches!(net, NET_CREATE_CHILD | NET_DELETE_CHILD) {
        if let Some(chty) = enc.and_then(|e| e.get("chty")).and_then(Value::as_array) {
            if !chty
                .iter()
                .filter_map(Value::as_u64)
                .any(|ty| ty == u64::from(event.ty))
            {
                return false;
            }
        }
    }
    if net == NET_UPDATE {
        if let Some(atr) = enc.and_then(|e| e.get("atr")).and_then(Value::as_array) {
            let watched: Vec<&str> = atr.iter().filter_map(Value::as_str).collect();
            if !event.changed.iter().any(|c| watched.contains(&c.as_str())) {
                return false;
            }
        }
    }
    true
}

/// Build the `m2m:sgn` notification for a matched event.
fn build_sgn(sub: &Resource, net: u64, event: &ResourceEvent) -> Value {
    let nct = sub.get_u64("nct").unwrap_or(1);
    let rep = match nct {
        3 => json!({ "m2m:uri": event.ri.as_str() }),
        2 => {
            // Modified attributes only.
            let mut subset = Map::new();
            if let Some(inner) = event
                .snapshot
                .as_object()
                .and_then(|outer| outer.values().next())
                .and_then(Value::as_object)
            {
                for name in &event.changed {
                    if let Some(value) = inner.get(name) {
                        subset.insert(name.clone(), value.clone());
                    }
                }
            }
            let mut outer = Map::new();
            let tpe = event
                .snapshot
                .as_object()
                .and_then(|o| o.keys().next().cloned())
                .unwrap_or_else(|| "m2m:res".to_string());
            outer.insert(tpe, Value::Object(subset));
            Value::Object(outer)
        }
        _ => event.snapshot.clone(),
    };
    json!({
        "m2m:sgn": {
            "nev": { "rep": rep, "net": net },
            "sur": sub.ri(),
        }
    })
}

fn expect_success(response: Response) -> Result<(), CseError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(CseError::new(
            response.rsc,
            format!("notification target answered {}", response.rsc),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocse_model::ResourceType;

    fn sub_with_enc(enc: Value) -> Resource {
        let mut sub = Resource::new(ResourceType::Sub);
        sub.set("ri", "sub1");
        sub.set("enc", enc);
        sub
    }

    fn event(kind: EventKind, ty: u32, changed: Vec<&str>) -> ResourceEvent {
        ResourceEvent {
            kind,
            ri: "res1".into(),
            pi: "parent1".into(),
            ty,
            srn: "cse-in/res1".into(),
            snapshot: json!({"m2m:cnt": {"ri": "res1", "mni": 5}}),
            changed: changed.into_iter().map(String::from).collect(),
            originator: "CAdmin".into(),
        }
    }

    #[test]
    fn net_defaults_to_update_only() {
        let sub = Resource::new(ResourceType::Sub);
        assert!(enc_matches(&sub, NET_UPDATE, &event(EventKind::Updated, 3, vec![])));
        assert!(!enc_matches(
            &sub,
            NET_CREATE_CHILD,
            &event(EventKind::Created, 4, vec![])
        ));
    }

    #[test]
    fn net_list_respected() {
        let sub = sub_with_enc(json!({"net": [3]}));
        assert!(enc_matches(
            &sub,
            NET_CREATE_CHILD,
            &event(EventKind::Created, 4, vec![])
        ));
        assert!(!enc_matches(&sub, NET_UPDATE, &event(EventKind::Updated, 3, vec![])));
    }

    #[test]
    fn chty_filters_child_events() {
        let sub = sub_with_enc(json!({"net": [3], "chty": [4]}));
        assert!(enc_matches(
            &sub,
            NET_CREATE_CHILD,
            &event(EventKind::Created, 4, vec![])
        ));
        assert!(!enc_matches(
            &sub,
            NET_CREATE_CHILD,
            &event(EventKind::Created, 3, vec![])
        ));
    }

    #[test]
    fn atr_filters_update_events() {
        let sub = sub_with_enc(json!({"net": [1], "atr": ["mni"]}));
        assert!(enc_matches(
            &sub,
            NET_UPDATE,
            &event(EventKind::Updated, 3, vec!["mni", "lbl"])
        ));
        assert!(!enc_matches(
            &sub,
            NET_UPDATE,
            &event(EventKind::Updated, 3, vec!["lbl"])
        ));
    }

    #[test]
    fn sgn_carries_sur_and_rep() {
        let mut sub = Resource::new(ResourceType::Sub);
        sub.set("ri", "sub42");
        let sgn = build_sgn(&sub, NET_CREATE_CHILD, &event(EventKind::Created, 4, vec![]));
        assert_eq!(sgn["m2m:sgn"]["sur"], "sub42");
        assert_eq!(sgn["m2m:sgn"]["nev"]["net"], 3);
        assert_eq!(sgn["m2m:sgn"]["nev"]["rep"]["m2m:cnt"]["ri"], "res1");
    }

    #[test]
    fn sgn_nct_modes() {
        let mut sub = Resource::new(ResourceType::Sub);
        sub.set("ri", "sub1");
        sub.set("nct", 3u64);
        let sgn = build_sgn(&sub, NET_UPDATE, &event(EventKind::Updated, 3, vec!["mni"]));
        assert_eq!(sgn["m2m:sgn"]["nev"]["rep"]["m2m:uri"], "res1");

        sub.set("nct", 2u64);
        let sgn = build_sgn(&sub, NET_UPDATE, &event(EventKind::Updated, 3, vec!["mni"]));
        assert_eq!(sgn["m2m:sgn"]["nev"]["rep"]["m2m:cnt"]["mni"], 5);
        assert!(sgn["m2m:sgn"]["nev"]["rep"]["m2m:cnt"].get("ri").is_none());
    }

    #[test]
    fn batch_duration_forms() {
        assert_eq!(batch_duration_secs(&json!(5)), Some(5));
        assert_eq!(batch_duration_secs(&json!("PT10S")), Some(10));
        assert_eq!(batch_duration_secs(&json!("garbage")), None);
    }
}
