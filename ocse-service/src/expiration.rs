use std::sync::atomic::Ordering;

use ocse_core::{time, CseError, Operation, Request, ResponseStatusCode, ResultContent};
use ocse_model::ResourceType;

use crate::Cse;

impl Cse {
    /// One expiration sweep: delete every resource whose `et` is past.
    ///
    /// Deletion runs through the dispatcher under the admin originator so
    /// subscriptions fire and announcements are retracted; subtrees go with
    /// their root. `<request>` resources age out the same way, since they
    /// carry an `et` from creation.
    pub(crate) async fn sweep_expired(&self) -> Result<(), CseError> {
        let now = time::now_timestamp();
        let expired = self.inner.storage.expired_before(&now).await?;
        if expired.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = expired.len(), "expiration sweep");

        for resource in expired {
            if resource.ty() == ResourceType::CseBase {
                continue;
            }
            // An ancestor swept earlier in this pass takes its subtree along.
            if self
                .inner
                .storage
                .resource_by_ri(resource.ri())
                .await?
                .is_none()
            {
                continue;
            }
            let request = Request::builder(
                Operation::Delete,
                resource.ri(),
                self.inner.config.admin_originator.as_str(),
            )
            .rcn(ResultContent::Nothing)
            .build();
            let response = self.process(request).await;
            if response.is_success() {
                self.inner.stats.expired.fetch_add(1, Ordering::Relaxed);
                tracing::info!(ri = %resource.ri(), ty = resource.ty().code(), "resource expired");
            } else if response.rsc != ResponseStatusCode::NotFound {
                tracing::warn!(
                    ri = %resource.ri(),
                    rsc = response.rsc.code(),
                    "cannot delete expired resource"
                );
            }
        }
        Ok(())
    }
}
