use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::{json, Map, Value};

use ocse_core::{CseError, EventKind, Operation, Request, Response, ResponseStatusCode,
    ResourceEvent, ResultContent};
use ocse_model::{matches_filter, Resource, ResourceType};

use crate::ops::resource_event;
use crate::Cse;

impl Cse {
    /// Execute a plain RETRIEVE, shaping the result per `rcn`.
    pub(crate) async fn op_retrieve(
        &self,
        request: &Request,
        target: &Resource,
    ) -> Result<(Response, Vec<ResourceEvent>), CseError> {
        let mut events = Vec::new();
        if target.ty() == ResourceType::Cnt {
            // "Retrieve of container with no child" is a notification event.
            if self.inner.storage.children_of(target.ri()).await?.is_empty() {
                events.push(resource_event(
                    EventKind::BareRetrieve,
                    target,
                    Vec::new(),
                    &request.from,
                ));
            }
        }

        if !request.atrl.is_empty() {
            let response = Response::new(ResponseStatusCode::Ok, request.rqi.clone())
                .with_pc(target.wrapped_partial(&request.atrl));
            return Ok((response, events));
        }

        let response = Response::new(ResponseStatusCode::Ok, request.rqi.clone());
        let response = match request.result_content() {
            ResultContent::Nothing => response,
            ResultContent::Attributes | ResultContent::ModifiedAttributes => {
                response.with_pc(target.wrapped())
            }
            ResultContent::HierarchicalAddress => {
                response.with_pc(json!({ "m2m:uri": target.srn() }))
            }
            ResultContent::HierarchicalAddressAttributes => {
                let mut wrapped = target.wrapped();
                if let Some(obj) = wrapped.as_object_mut() {
                    obj.insert("m2m:uri".to_string(), Value::from(target.srn()));
                }
                response.with_pc(wrapped)
            }
            ResultContent::AttributesChildResources => {
                let tree = self.subtree_value(target, true).await?;
                let mut outer = Map::new();
                outer.insert(target.tpe().to_string(), tree);
                response.with_pc(Value::Object(outer))
            }
            ResultContent::ChildResources => {
                let tree = self.subtree_value(target, false).await?;
                let mut outer = Map::new();
                outer.insert(target.tpe().to_string(), tree);
                response.with_pc(Value::Object(outer))
            }
            ResultContent::AttributesChildReferences => {
                let mut inner = target.attrs().clone();
                inner.insert("ch".to_string(), self.child_references(target).await?);
                let mut outer = Map::new();
                outer.insert(target.tpe().to_string(), Value::Object(inner));
                response.with_pc(Value::Object(outer))
            }
            ResultContent::ChildReferences => {
                response.with_pc(json!({
                    "m2m:rrl": { "rrf": self.child_references(target).await? }
                }))
            }
            ResultContent::OriginalResource => {
                let lnk = target.get_str("lnk").ok_or_else(|| {
                    CseError::bad_request("target is not an announced resource")
                })?;
                let original = self
                    .resolve_local(lnk.trim_start_matches(&format!(
                        "{}/",
                        self.inner.config.cse_id
                    )))
                    .await?
                    .ok_or_else(|| CseError::not_found("original resource is gone"))?;
                response.with_pc(original.wrapped())
            }
            ResultContent::SemanticContent
            | ResultContent::SemanticContentChildResources
            | ResultContent::Permissions => {
                return Err(CseError::not_implemented(
                    "semantic result content is not supported",
                ));
            }
        };
        Ok((response, events))
    }

    /// RETRIEVE of `la`/`ol` below a container.
    pub(crate) async fn op_retrieve_instance(
        &self,
        request: &Request,
        container: &Resource,
        latest: bool,
    ) -> Result<(Response, Vec<ResourceEvent>), CseError> {
        match self.edge_instance(container, latest).await? {
            Some(instance) => {
                let response = Response::new(ResponseStatusCode::Ok, request.rqi.clone())
                    .with_pc(instance.wrapped());
                Ok((response, Vec::new()))
            }
            None => {
                let events = vec![resource_event(
                    EventKind::BareRetrieve,
                    container,
                    Vec::new(),
                    &request.from,
                )];
                self.emit_events(events).await;
                Err(CseError::not_found("container holds no content instance"))
            }
        }
    }

    /// Execute a DISCOVERY: filter the subtree and return matching addresses.
    pub(crate) async fn op_discover(
        &self,
        request: &Request,
        target: &Resource,
    ) -> Result<Response, CseError> {
        let descendants = self.inner.storage.descendants_of(target.ri()).await?;
        let base_depth = depth(target.srn());

        let mut matched: Vec<Resource> = Vec::new();
        for resource in descendants {
            if let Some(lvl) = request.fc.lvl {
                if depth(resource.srn()).saturating_sub(base_depth) > lvl {
                    continue;
                }
            }
            if !matches_filter(&request.fc, &resource) {
                continue;
            }
            // Only resources the originator may discover are visible.
            if self
                .check_access(&request.from, Operation::Discovery, &resource)
                .await
                .is_err()
            {
                continue;
            }
            matched.push(resource);
        }

        if self.inner.config.sort_discovered_resources {
            matched.sort_by(|a, b| a.srn().cmp(b.srn()));
        }

        let offset = request.fc.ofst.unwrap_or(0);
        let limit = request.fc.lim.unwrap_or(usize::MAX);
        let unstructured = request.drt == Some(2);
        let uril: Vec<String> = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|resource| {
                let mut uri = if unstructured {
                    resource.ri().to_string()
                } else {
                    resource.srn().to_string()
                };
                if let Some(arp) = &request.fc.arp {
                    uri = format!("{uri}/{arp}");
                }
                uri
            })
            .collect();

        Ok(Response::new(ResponseStatusCode::Ok, request.rqi.clone())
            .with_pc(json!({ "m2m:uril": uril })))
    }

    /// Nested representation of a resource's subtree: child resources appear
    /// as arrays keyed by their wrapper names inside the parent object.
    fn subtree_value<'a>(
        &'a self,
        resource: &'a Resource,
        include_attrs: bool,
    ) -> Pin<Box<dyn Future<Output = Result<Value, CseError>> + Send + 'a>> {
        Box::pin(async move {
            let mut inner = if include_attrs {
                resource.attrs().clone()
            } else {
                Map::new()
            };
            let children = self.inner.storage.children_of(resource.ri()).await?;
            let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
            for child in &children {
                let value = self.subtree_value(child, true).await?;
                grouped.entry(child.tpe().to_string()).or_default().push(value);
            }
            for (tpe, values) in grouped {
                inner.insert(tpe, Value::Array(values));
            }
            Ok(Value::Object(inner))
        })
    }

    async fn child_references(&self, resource: &Resource) -> Result<Value, CseError> {
        let children = self.inner.storage.children_of(resource.ri()).await?;
        Ok(Value::Array(
            children
                .iter()
                .map(|child| {
                    json!({
                        "nm": child.rn(),
                        "typ": child.ty().code(),
                        "val": child.srn(),
                    })
                })
                .collect(),
        ))
    }
}

fn depth(srn: &str) -> usize {
    srn.matches('/').count()
}
