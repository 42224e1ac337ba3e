use async_trait::async_trait;

use crate::error::CseError;
use crate::request::{Request, Response};

/// Outbound half of a binding adapter.
///
/// The service core uses this to deliver notifications, forward primitives to
/// remote CSEs, and probe registrar liveness; the HTTP crate provides the
/// canonical implementation. `target` is a binding-level URL taken from a
/// `poa` entry or a notification target URI.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send(&self, target: &str, request: &Request) -> Result<Response, CseError>;
}
