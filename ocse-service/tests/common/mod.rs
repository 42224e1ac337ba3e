#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use ocse_core::{
    CseConfig, CseError, Operation, Request, RequestSender, Response, ResponseStatusCode,
};
use ocse_service::Cse;
use ocse_storage::MemoryStorage;

/// Outbound sender double: records every primitive and answers with a
/// configurable status code.
#[derive(Default)]
pub struct MockSender {
    sent: Mutex<Vec<(String, Request)>>,
    rsc: AtomicU16,
}

impl MockSender {
    pub fn new() -> Arc<Self> {
        let sender = Self::default();
        sender.rsc.store(2000, Ordering::SeqCst);
        Arc::new(sender)
    }

    pub fn respond_with(&self, rsc: ResponseStatusCode) {
        self.rsc.store(rsc.code(), Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, Request)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl RequestSender for MockSender {
    async fn send(&self, target: &str, request: &Request) -> Result<Response, CseError> {
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), request.clone()));
        let rsc = ResponseStatusCode::from_code(self.rsc.load(Ordering::SeqCst))
            .unwrap_or(ResponseStatusCode::Ok);
        if !rsc.is_success() {
            return Err(CseError::new(rsc, "mock refusal"));
        }
        let mut response = Response::new(rsc, request.rqi.clone());
        // Answer CREATEs like a remote CSE would: echo the wrapper with an
        // assigned resource identifier.
        if request.op == Operation::Create {
            if let Some(wrapper) = request
                .pc
                .as_ref()
                .and_then(Value::as_object)
                .and_then(|obj| obj.keys().next().cloned())
            {
                let assigned = format!("r{}", self.sent.lock().unwrap().len());
                let mut inner = serde_json::Map::new();
                inner.insert("ri".to_string(), Value::from(assigned));
                let mut outer = serde_json::Map::new();
                outer.insert(wrapper, Value::Object(inner));
                response = response.with_pc(Value::Object(outer));
            }
        }
        Ok(response)
    }
}

pub fn test_config() -> CseConfig {
    let mut config = CseConfig::default();
    config.check_expirations_interval = 1;
    config.notifications.flush_interval = 1;
    config.statistics.enable = false;
    config
}

pub async fn test_cse() -> (Cse, Arc<MockSender>) {
    test_cse_with(test_config()).await
}

pub async fn test_cse_with(config: CseConfig) -> (Cse, Arc<MockSender>) {
    let sender = MockSender::new();
    let cse = Cse::builder(config)
        .storage(Arc::new(MemoryStorage::new()))
        .sender(sender.clone())
        .start()
        .await
        .expect("cse start");
    (cse, sender)
}

pub const ADMIN: &str = "CAdmin";
pub const CSE_NAME: &str = "cse-in";

pub fn create(to: &str, from: &str, ty: u32, pc: Value) -> Request {
    Request::builder(Operation::Create, to, from)
        .ty(ty)
        .pc(pc)
        .build()
}

pub fn retrieve(to: &str, from: &str) -> Request {
    Request::builder(Operation::Retrieve, to, from).build()
}

pub fn update(to: &str, from: &str, pc: Value) -> Request {
    Request::builder(Operation::Update, to, from).pc(pc).build()
}

pub fn delete(to: &str, from: &str) -> Request {
    Request::builder(Operation::Delete, to, from).build()
}

/// Create a container under `parent` and return its ri.
pub async fn make_container(cse: &Cse, parent: &str, rn: &str, extra: Value) -> String {
    let mut body = serde_json::json!({ "rn": rn });
    if let (Some(body_map), Some(extra_map)) = (body.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_map {
            body_map.insert(k.clone(), v.clone());
        }
    }
    let response = cse
        .process(create(parent, ADMIN, 3, serde_json::json!({ "m2m:cnt": body })))
        .await;
    assert_eq!(response.rsc.code(), 2001, "container create failed: {:?}", response.pc);
    response.pc.unwrap()["m2m:cnt"]["ri"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Create a content instance and return its ri.
pub async fn make_instance(cse: &Cse, container: &str, content: &str) -> String {
    let response = cse
        .process(create(
            container,
            ADMIN,
            4,
            serde_json::json!({ "m2m:cin": { "con": content } }),
        ))
        .await;
    assert_eq!(response.rsc.code(), 2001, "instance create failed: {:?}", response.pc);
    response.pc.unwrap()["m2m:cin"]["ri"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Wait for spawned event handlers and sticky workers to drain.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
}
