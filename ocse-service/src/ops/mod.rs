mod create;
mod delete;
mod notify;
mod retrieve;
mod update;

use ocse_core::{CseError, EventKind, ResourceEvent};
use ocse_model::{Resource, ResourceType};

use crate::Cse;

/// Build a post-commit event from a resource snapshot.
pub(crate) fn resource_event(
    kind: EventKind,
    resource: &Resource,
    changed: Vec<String>,
    originator: &str,
) -> ResourceEvent {
    ResourceEvent {
        kind,
        ri: resource.ri().to_string(),
        pi: resource.pi().to_string(),
        ty: resource.ty().code(),
        srn: resource.srn().to_string(),
        snapshot: resource.wrapped(),
        changed,
        originator: originator.to_string(),
    }
}

impl Cse {
    /// The newest (`la`) or oldest (`ol`) content instance of a container.
    pub(crate) async fn edge_instance(
        &self,
        container: &Resource,
        latest: bool,
    ) -> Result<Option<Resource>, CseError> {
        let children = self.inner.storage.children_of(container.ri()).await?;
        let mut instances: Vec<Resource> = children
            .into_iter()
            .filter(|c| c.ty() == ResourceType::Cin)
            .collect();
        Ok(if latest {
            instances.pop()
        } else {
            if instances.is_empty() {
                None
            } else {
                Some(instances.remove(0))
            }
        })
    }
}
