use crate::event::ResourceEvent;
use crate::request::Request;

/// Seam for an embedded scripting / upper-tester runtime.
///
/// The core calls these at well-defined points and makes no assumption about
/// what an implementation does: `on_event` observes committed changes,
/// `on_request` may rewrite an incoming request before the pipeline runs.
pub trait CseHooks: Send + Sync {
    fn on_event(&self, _event: &ResourceEvent) {}

    /// Return `Some` to replace the request, `None` to pass it through.
    fn on_request(&self, _request: &Request) -> Option<Request> {
        None
    }
}

/// Default hook implementation: does nothing.
pub struct NoHooks;

impl CseHooks for NoHooks {}
