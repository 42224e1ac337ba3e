use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use ocse_model::{Resource, ResourceType};

use crate::error::StorageError;
use crate::{Storage, StorageTx};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS resources (
        ri TEXT PRIMARY KEY,
        pi TEXT NOT NULL,
        ty INTEGER NOT NULL,
        srn TEXT NOT NULL UNIQUE,
        ct TEXT NOT NULL,
        et TEXT,
        tpe TEXT,
        attrs TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_resources_pi ON resources(pi)",
    "CREATE INDEX IF NOT EXISTS idx_resources_ty ON resources(ty)",
    "CREATE INDEX IF NOT EXISTS idx_resources_et ON resources(et)",
    "CREATE TABLE IF NOT EXISTS batch_notifications (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        sub_ri TEXT NOT NULL,
        sgn TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_batch_sub ON batch_notifications(sub_ri)",
    "CREATE TABLE IF NOT EXISTS statistics (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        data TEXT NOT NULL
    )",
];

/// Relational backend over SQLite.
///
/// Attributes are persisted as a JSON column; the identifier, children, and
/// type lookups the spec calls for are covered by indexed columns. A single
/// pooled connection serializes writers, which SQLite would do anyway.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(StorageError::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    fn row_to_resource(row: &SqliteRow) -> Result<Resource, StorageError> {
        let ty_code: i64 = row.try_get("ty")?;
        let ty = ResourceType::from_code(ty_code as u32).ok_or_else(|| {
            StorageError::Backend(format!("unknown resource type in storage: {ty_code}"))
        })?;
        let attrs_raw: String = row.try_get("attrs")?;
        let attrs: serde_json::Map<String, Value> = serde_json::from_str(&attrs_raw)
            .map_err(|e| StorageError::Backend(format!("corrupt attrs column: {e}")))?;
        let mut resource = Resource::from_parts(ty, attrs);
        let srn: String = row.try_get("srn")?;
        resource.set_srn(srn);
        let tpe: Option<String> = row.try_get("tpe")?;
        if let Some(tpe) = tpe {
            resource.set_tpe_override(tpe);
        }
        Ok(resource)
    }

    fn rows_to_resources(rows: &[SqliteRow]) -> Result<Vec<Resource>, StorageError> {
        rows.iter().map(Self::row_to_resource).collect()
    }
}

enum StagedOp {
    Insert(Resource),
    Update(Resource),
    Delete(String),
}

struct SqliteTx {
    pool: SqlitePool,
    staged: Vec<StagedOp>,
}

fn attrs_json(resource: &Resource) -> Result<String, StorageError> {
    serde_json::to_string(resource.attrs())
        .map_err(|e| StorageError::Backend(format!("cannot serialize attrs: {e}")))
}

#[async_trait]
impl StorageTx for SqliteTx {
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
        let mut tx = self.pool.begin().await?;
        for op in self.staged {
            match op {
                StagedOp::Insert(res) => {
                    sqlx::query(
                        "INSERT INTO resources (ri, pi, ty, srn, ct, et, tpe, attrs)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(res.ri().to_string())
                    .bind(res.pi().to_string())
                    .bind(res.ty().code() as i64)
                    .bind(res.srn().to_string())
                    .bind(res.ct().to_string())
                    .bind(res.et().map(str::to_string))
                    .bind(res.tpe_override().map(str::to_string))
                    .bind(attrs_json(&res)?)
                    .execute(&mut *tx)
                    .await?;
                }
                StagedOp::Update(res) => {
                    let result = sqlx::query(
                        "UPDATE resources SET et = ?, attrs = ? WHERE ri = ?",
                    )
                    .bind(res.et().map(str::to_string))
                    .bind(attrs_json(&res)?)
                    .bind(res.ri().to_string())
                    .execute(&mut *tx)
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(StorageError::NotFound(res.ri().to_string()));
                    }
                }
                StagedOp::Delete(ri) => {
                    let result = sqlx::query("DELETE FROM resources WHERE ri = ?")
                        .bind(ri.clone())
                        .execute(&mut *tx)
                        .await?;
                    if result.rows_affected() == 0 {
                        return Err(StorageError::NotFound(ri));
                    }
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTx>, StorageError> {
        Ok(Box::new(SqliteTx {
            pool: self.pool.clone(),
            staged: Vec::new(),
        }))
    }

    async fn resource_by_ri(&self, ri: &str) -> Result<Option<Resource>, StorageError> {
        let row = sqlx::query("SELECT * FROM resources WHERE ri = ?")
            .bind(ri)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_resource).transpose()
    }

    async fn resource_by_srn(&self, srn: &str) -> Result<Option<Resource>, StorageError> {
        let row = sqlx::query("SELECT * FROM resources WHERE srn = ?")
            .bind(srn)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_resource).transpose()
    }

    async fn children_of(&self, pi: &str) -> Result<Vec<Resource>, StorageError> {
        let rows = sqlx::query("SELECT * FROM resources WHERE pi = ? ORDER BY ct, ri")
            .bind(pi)
            .fetch_all(&self.pool)
            .await?;
        Self::rows_to_resources(&rows)
    }

    async fn descendants_of(&self, ri: &str) -> Result<Vec<Resource>, StorageError> {
        let rows = sqlx::query(
            "WITH RECURSIVE tree(ri) AS (
                 SELECT ri FROM resources WHERE pi = ?1
                 UNION ALL
                 SELECT r.ri FROM resources r JOIN tree t ON r.pi = t.ri
             )
             SELECT * FROM resources WHERE ri IN (SELECT ri FROM tree)
             ORDER BY (length(srn) - length(replace(srn, '/', ''))), ct",
        )
        .bind(ri)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_resources(&rows)
    }

    async fn resources_of_type(&self, ty: u32) -> Result<Vec<Resource>, StorageError> {
        let rows = sqlx::query("SELECT * FROM resources WHERE ty = ?")
            .bind(ty as i64)
            .fetch_all(&self.pool)
            .await?;
        Self::rows_to_resources(&rows)
    }

    async fn expired_before(&self, ts: &str) -> Result<Vec<Resource>, StorageError> {
        let rows = sqlx::query("SELECT * FROM resources WHERE et IS NOT NULL AND et <= ?")
            .bind(ts)
            .fetch_all(&self.pool)
            .await?;
        Self::rows_to_resources(&rows)
    }

    async fn count_resources(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM resources")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn batch_append(&self, sub_ri: &str, sgn: Value) -> Result<usize, StorageError> {
        let sgn = serde_json::to_string(&sgn)
            .map_err(|e| StorageError::Backend(format!("cannot serialize notification: {e}")))?;
        sqlx::query("INSERT INTO batch_notifications (sub_ri, sgn) VALUES (?, ?)")
            .bind(sub_ri)
            .bind(sgn)
            .execute(&self.pool)
            .await?;
        self.batch_len(sub_ri).await
    }

    async fn batch_take(&self, sub_ri: &str) -> Result<Vec<Value>, StorageError> {
        let rows = sqlx::query(
            "SELECT seq, sgn FROM batch_notifications WHERE sub_ri = ? ORDER BY seq",
        )
        .bind(sub_ri)
        .fetch_all(&self.pool)
        .await?;
        let mut taken = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw: String = row.try_get("sgn")?;
            taken.push(
                serde_json::from_str(&raw)
                    .map_err(|e| StorageError::Backend(format!("corrupt sgn column: {e}")))?,
            );
        }
        sqlx::query("DELETE FROM batch_notifications WHERE sub_ri = ?")
            .bind(sub_ri)
            .execute(&self.pool)
            .await?;
        Ok(taken)
    }

    async fn batch_len(&self, sub_ri: &str) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM batch_notifications WHERE sub_ri = ?")
            .bind(sub_ri)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }

    async fn batch_drop_oldest(&self, sub_ri: &str, n: usize) -> Result<(), StorageError> {
        sqlx::query(
            "DELETE FROM batch_notifications WHERE seq IN (
                 SELECT seq FROM batch_notifications WHERE sub_ri = ? ORDER BY seq LIMIT ?
             )",
        )
        .bind(sub_ri)
        .bind(n as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stats_write(&self, stats: Value) -> Result<(), StorageError> {
        let data = serde_json::to_string(&stats)
            .map_err(|e| StorageError::Backend(format!("cannot serialize statistics: {e}")))?;
        sqlx::query("INSERT OR REPLACE INTO statistics (id, data) VALUES (1, ?)")
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stats_read(&self) -> Result<Option<Value>, StorageError> {
        let row = sqlx::query("SELECT data FROM statistics WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("data")?;
                Ok(Some(serde_json::from_str(&raw).map_err(|e| {
                    StorageError::Backend(format!("corrupt statistics column: {e}"))
                })?))
            }
            None => Ok(None),
        }
    }
}
