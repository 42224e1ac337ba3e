//! Core primitives shared by every ocse crate.
//!
//! This crate carries no CSE logic of its own: it defines the canonical
//! request/response records every binding normalizes to, the oneM2M response
//! status code taxonomy, resource addressing, timestamp/duration handling,
//! identifier generation, the configuration surface, and the in-process
//! event bus the service workers consume from.

pub mod address;
pub mod config;
pub mod error;
pub mod event;
pub mod hooks;
pub mod id;
pub mod request;
pub mod rsc;
pub mod sender;
pub mod task;
pub mod time;

pub use address::{Address, VirtualKind};
pub use config::{CseConfig, CseType, Serialization};
pub use error::{CseError, Result};
pub use event::{EventBus, EventKind, ResourceEvent};
pub use hooks::{CseHooks, NoHooks};
pub use request::{
    FilterCriteria, FilterOperation, FilterUsage, Operation, Origin, ReleaseVersion, Request,
    RequestBuilder, Response, ResponseType, ResultContent,
};
pub use rsc::ResponseStatusCode;
pub use sender::RequestSender;
pub use task::Worker;
