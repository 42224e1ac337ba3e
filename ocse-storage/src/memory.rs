use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use ocse_model::Resource;

use crate::error::StorageError;
use crate::{Storage, StorageTx};

/// Volatile in-memory backend.
///
/// Tables live behind one `RwLock`; reads clone out under the read lock
/// (snapshot semantics), commits apply all staged writes under a single
/// write lock, so a transaction is observed entirely or not at all.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

#[derive(Default)]
struct Tables {
    resources: HashMap<String, Resource>,
    srn_index: HashMap<String, String>,
    /// pi -> child ri list in creation order.
    children: HashMap<String, Vec<String>>,
    batches: HashMap<String, Vec<Value>>,
    stats: Option<Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

enum StagedOp {
    Insert(Resource),
    Update(Resource),
    Delete(String),
}

struct MemoryTx {
    tables: Arc<RwLock<Tables>>,
    staged: Vec<StagedOp>,
}

#[async_trait]
impl StorageTx for MemoryTx {
    fn insert(&mut self, resource: Resource) {
        self.staged.push(StagedOp::Insert(resource));
    }

    fn update(&mut self, resource: Resource) {
        self.staged.push(StagedOp::Update(resource));
    }

    fn delete(&mut self, ri: &str) {
        self.staged.push(StagedOp::Delete(ri.to_string()));
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut tables = self.tables.write().expect("storage lock poisoned");

        // Validate first so a failing transaction leaves no trace.
        for op in &self.staged {
            match op {
                StagedOp::Insert(res) => {
                    if tables.resources.contains_key(res.ri()) {
                        return Err(StorageError::Conflict(format!(
                            "resource identifier exists: {}",
                            res.ri()
                        )));
                    }
                    if tables.srn_index.contains_key(res.srn()) {
                        return Err(StorageError::Conflict(format!(
                            "resource name exists under parent: {}",
                            res.srn()
                        )));
                    }
                }
                StagedOp::Update(res) => {
                    if !tables.resources.contains_key(res.ri()) {
                        return Err(StorageError::NotFound(res.ri().to_string()));
                    }
                }
                StagedOp::Delete(ri) => {
                    if !tables.resources.contains_key(ri) {
                        return Err(StorageError::NotFound(ri.clone()));
                    }
                }
            }
        }

        for op in self.staged {
            match op {
                StagedOp::Insert(res) => {
                    let ri = res.ri().to_string();
                    tables.srn_index.insert(res.srn().to_string(), ri.clone());
                    tables
                        .children
                        .entry(res.pi().to_string())
                        .or_default()
                        .push(ri.clone());
                    tables.resources.insert(ri, res);
                }
                StagedOp::Update(res) => {
                    tables.resources.insert(res.ri().to_string(), res);
                }
                StagedOp::Delete(ri) => {
                    if let Some(res) = tables.resources.remove(&ri) {
                        tables.srn_index.remove(res.srn());
                        let pi = res.pi().to_string();
                        if let Some(siblings) = tables.children.get_mut(&pi) {
                            siblings.retain(|c| c != &ri);
                        }
                        tables.children.remove(&ri);
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTx>, StorageError> {
        Ok(Box::new(MemoryTx {
            tables: self.tables.clone(),
            staged: Vec::new(),
        }))
    }

    async fn resource_by_ri(&self, ri: &str) -> Result<Option<Resource>, StorageError> {
        let tables = self.tables.read().expect("storage lock poisoned");
        Ok(tables.resources.get(ri).cloned())
    }

    async fn resource_by_srn(&self, srn: &str) -> Result<Option<Resource>, StorageError> {
        let tables = self.tables.read().expect("storage lock poisoned");
        Ok(tables
            .srn_index
            .get(srn)
            .and_then(|ri| tables.resources.get(ri))
            .cloned())
    }

    async fn children_of(&self, pi: &str) -> Result<Vec<Resource>, StorageError> {
        let tables = self.tables.read().expect("storage lock poisoned");
        Ok(tables
            .children
            .get(pi)
            .map(|ris| {
                ris.iter()
                    .filter_map(|ri| tables.resources.get(ri))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn descendants_of(&self, ri: &str) -> Result<Vec<Resource>, StorageError> {
        let tables = self.tables.read().expect("storage lock poisoned");
        let mut result = Vec::new();
        let mut queue: Vec<String> = tables.children.get(ri).cloned().unwrap_or_default();
        while let Some(current) = queue.first().cloned() {
            queue.remove(0);
            if let Some(res) = tables.resources.get(&current) {
                result.push(res.clone());
            }
            if let Some(grandchildren) = tables.children.get(&current) {
                queue.extend(grandchildren.iter().cloned());
            }
        }
        Ok(result)
    }

    async fn resources_of_type(&self, ty: u32) -> Result<Vec<Resource>, StorageError> {
        let tables = self.tables.read().expect("storage lock poisoned");
        Ok(tables
            .resources
            .values()
            .filter(|res| res.ty().code() == ty)
            .cloned()
            .collect())
    }

    async fn expired_before(&self, ts: &str) -> Result<Vec<Resource>, StorageError> {
        let tables = self.tables.read().expect("storage lock poisoned");
        Ok(tables
            .resources
            .values()
            .filter(|res| res.et().is_some_and(|et| et <= ts))
            .cloned()
            .collect())
    }

    async fn count_resources(&self) -> Result<u64, StorageError> {
        let tables = self.tables.read().expect("storage lock poisoned");
        Ok(tables.resources.len() as u64)
    }

    async fn batch_append(&self, sub_ri: &str, sgn: Value) -> Result<usize, StorageError> {
        let mut tables = self.tables.write().expect("storage lock poisoned");
        let queue = tables.batches.entry(sub_ri.to_string()).or_default();
        queue.push(sgn);
        Ok(queue.len())
    }

    async fn batch_take(&self, sub_ri: &str) -> Result<Vec<Value>, StorageError> {
        let mut tables = self.tables.write().expect("storage lock poisoned");
        Ok(tables.batches.remove(sub_ri).unwrap_or_default())
    }

    async fn batch_len(&self, sub_ri: &str) -> Result<usize, StorageError> {
        let tables = self.tables.read().expect("storage lock poisoned");
        Ok(tables.batches.get(sub_ri).map(Vec::len).unwrap_or(0))
    }

    async fn batch_drop_oldest(&self, sub_ri: &str, n: usize) -> Result<(), StorageError> {
        let mut tables = self.tables.write().expect("storage lock poisoned");
        if let Some(queue) = tables.batches.get_mut(sub_ri) {
            queue.drain(..n.min(queue.len()));
        }
        Ok(())
    }

    async fn stats_write(&self, stats: Value) -> Result<(), StorageError> {
        let mut tables = self.tables.write().expect("storage lock poisoned");
        tables.stats = Some(stats);
        Ok(())
    }

    async fn stats_read(&self) -> Result<Option<Value>, StorageError> {
        let tables = self.tables.read().expect("storage lock poisoned");
        Ok(tables.stats.clone())
    }
}
