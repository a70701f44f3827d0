//! Document store over named collections with secondary indexes

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use libsql::{params, Connection, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{Database, StoreResult};
use crate::error::StorageFault;

/// A secondary index over one top-level JSON field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub field: &'static str,
}

impl IndexSpec {
    /// Index named after the field it covers
    pub const fn on(field: &'static str) -> Self {
        Self { name: field, field }
    }
}

/// Declaration of a record collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: &'static str,
    pub indexes: &'static [IndexSpec],
}

impl CollectionSchema {
    fn index(&self, name: &str) -> StoreResult<&IndexSpec> {
        self.indexes
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| StorageFault::UnknownIndex {
                collection: self.name.to_string(),
                index: name.to_string(),
            })
    }
}

/// Optional limits enforced inside every write transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreQuota {
    /// Maximum number of records across all collections
    #[serde(default)]
    pub max_records: Option<u64>,
    /// Maximum total size of serialized records, in bytes
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

impl StoreQuota {
    const fn is_unlimited(&self) -> bool {
        self.max_records.is_none() && self.max_bytes.is_none()
    }
}

/// Value looked up in a secondary index
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    Text(String),
    Integer(i64),
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for IndexValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<IndexValue> for Value {
    fn from(value: IndexValue) -> Self {
        match value {
            IndexValue::Text(text) => Self::Text(text),
            IndexValue::Integer(number) => Self::Integer(number),
        }
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    Put {
        collection: String,
        key: String,
        body: serde_json::Value,
    },
    Delete {
        collection: String,
        key: String,
    },
}

/// An ordered set of writes committed atomically by [`LocalStore::apply`].
///
/// Records are serialized as they are added, so serialization faults surface
/// before anything touches the database.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(
        &mut self,
        collection: &str,
        key: impl Into<String>,
        record: &T,
    ) -> StoreResult<&mut Self> {
        let body = serde_json::to_value(record)?;
        self.ops.push(WriteOp::Put {
            collection: collection.to_string(),
            key: key.into(),
            body,
        });
        Ok(self)
    }

    pub fn delete(&mut self, collection: &str, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            collection: collection.to_string(),
            key: key.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A write resolved against the declared schemas, ready to execute
enum PreparedOp {
    Put {
        collection: &'static str,
        key: String,
        body: String,
        index_rows: Vec<(&'static str, Value)>,
    },
    Delete {
        collection: &'static str,
        key: String,
    },
}

/// Embedded document store
///
/// Cheap to clone; clones share one connection guarded by an async mutex.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    collections: Arc<HashMap<&'static str, CollectionSchema>>,
    quota: StoreQuota,
}

impl LocalStore {
    /// Wrap an opened database with the given collection declarations.
    pub fn new(db: Database, schemas: &[CollectionSchema], quota: StoreQuota) -> Self {
        let collections = schemas
            .iter()
            .map(|schema| (schema.name, schema.clone()))
            .collect();
        Self {
            db: Arc::new(Mutex::new(db)),
            collections: Arc::new(collections),
            quota,
        }
    }

    /// Open a file-backed store.
    pub async fn open(
        path: impl AsRef<Path>,
        schemas: &[CollectionSchema],
        quota: StoreQuota,
    ) -> StoreResult<Self> {
        let db = Database::open(path).await?;
        Ok(Self::new(db, schemas, quota))
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory(
        schemas: &[CollectionSchema],
        quota: StoreQuota,
    ) -> StoreResult<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::new(db, schemas, quota))
    }

    fn schema(&self, collection: &str) -> StoreResult<&CollectionSchema> {
        self.collections
            .get(collection)
            .ok_or_else(|| StorageFault::UnknownCollection(collection.to_string()))
    }

    /// Fetch one record by primary key.
    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let schema = self.schema(collection)?;
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT body FROM records WHERE collection = ? AND key = ?",
                params![schema.name, key.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(decode(&row.get::<String>(0)?)?)),
            None => Ok(None),
        }
    }

    /// Every record of a collection, ordered by primary key.
    pub async fn get_all<T: DeserializeOwned>(&self, collection: &str) -> StoreResult<Vec<T>> {
        let schema = self.schema(collection)?;
        let db = self.db.lock().await;
        let rows = db
            .connection()
            .query(
                "SELECT body FROM records WHERE collection = ? ORDER BY key",
                params![schema.name],
            )
            .await?;
        collect_bodies(rows).await
    }

    /// Records whose index value equals `value`, ordered by primary key.
    pub async fn get_by_index<T: DeserializeOwned>(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<IndexValue>,
    ) -> StoreResult<Vec<T>> {
        let schema = self.schema(collection)?;
        let index = schema.index(index)?;
        let db = self.db.lock().await;
        let rows = db
            .connection()
            .query(
                "SELECT r.body
                 FROM record_indexes i
                 JOIN records r ON r.collection = i.collection AND r.key = i.record_key
                 WHERE i.collection = ? AND i.index_name = ? AND i.value = ?
                 ORDER BY r.key",
                params![schema.name, index.name, Value::from(value.into())],
            )
            .await?;
        collect_bodies(rows).await
    }

    /// Every indexed record, ordered by index value then primary key.
    ///
    /// Records missing the indexed field are not returned.
    pub async fn scan_index<T: DeserializeOwned>(
        &self,
        collection: &str,
        index: &str,
    ) -> StoreResult<Vec<T>> {
        let schema = self.schema(collection)?;
        let index = schema.index(index)?;
        let db = self.db.lock().await;
        let rows = db
            .connection()
            .query(
                "SELECT r.body
                 FROM record_indexes i
                 JOIN records r ON r.collection = i.collection AND r.key = i.record_key
                 WHERE i.collection = ? AND i.index_name = ?
                 ORDER BY i.value, r.key",
                params![schema.name, index.name],
            )
            .await?;
        collect_bodies(rows).await
    }

    /// Number of records in a collection.
    pub async fn count(&self, collection: &str) -> StoreResult<u64> {
        let schema = self.schema(collection)?;
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT COUNT(*) FROM records WHERE collection = ?",
                params![schema.name],
            )
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Insert or replace one record.
    pub async fn put<T: Serialize>(
        &self,
        collection: &str,
        key: impl Into<String>,
        record: &T,
    ) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(collection, key, record)?;
        self.apply(batch).await
    }

    /// Delete one record; deleting a missing key is not an error.
    pub async fn delete(&self, collection: &str, key: impl Into<String>) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(collection, key);
        self.apply(batch).await
    }

    /// Insert or replace several records of one collection atomically.
    pub async fn put_many<'a, T, I>(&self, collection: &str, records: I) -> StoreResult<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = (String, &'a T)>,
    {
        let mut batch = WriteBatch::new();
        for (key, record) in records {
            batch.put(collection, key, record)?;
        }
        self.apply(batch).await
    }

    /// Delete several records of one collection atomically.
    pub async fn delete_many<I>(&self, collection: &str, keys: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = String>,
    {
        let mut batch = WriteBatch::new();
        for key in keys {
            batch.delete(collection, key);
        }
        self.apply(batch).await
    }

    /// Commit a batch in a single transaction: all writes or none.
    pub async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let prepared = batch
            .ops
            .into_iter()
            .map(|op| self.prepare(op))
            .collect::<StoreResult<Vec<_>>>()?;

        let db = self.db.lock().await;
        let conn = db.connection();

        conn.execute("BEGIN IMMEDIATE", ()).await?;

        if let Err(e) = self.write_all(conn, prepared).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e);
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        Ok(())
    }

    fn prepare(&self, op: WriteOp) -> StoreResult<PreparedOp> {
        match op {
            WriteOp::Put {
                collection,
                key,
                body,
            } => {
                let schema = self.schema(&collection)?;
                let index_rows = schema
                    .indexes
                    .iter()
                    .filter_map(|index| {
                        index_value(body.get(index.field)?).map(|value| (index.name, value))
                    })
                    .collect();
                Ok(PreparedOp::Put {
                    collection: schema.name,
                    key,
                    body: serde_json::to_string(&body)?,
                    index_rows,
                })
            }
            WriteOp::Delete { collection, key } => Ok(PreparedOp::Delete {
                collection: self.schema(&collection)?.name,
                key,
            }),
        }
    }

    async fn write_all(&self, conn: &Connection, ops: Vec<PreparedOp>) -> StoreResult<()> {
        for op in ops {
            match op {
                PreparedOp::Put {
                    collection,
                    key,
                    body,
                    index_rows,
                } => {
                    conn.execute(
                        "INSERT INTO records (collection, key, body) VALUES (?, ?, ?)
                         ON CONFLICT(collection, key) DO UPDATE SET body = excluded.body",
                        params![collection, key.clone(), body],
                    )
                    .await?;
                    conn.execute(
                        "DELETE FROM record_indexes WHERE collection = ? AND record_key = ?",
                        params![collection, key.clone()],
                    )
                    .await?;
                    for (index_name, value) in index_rows {
                        conn.execute(
                            "INSERT INTO record_indexes (collection, index_name, value, record_key)
                             VALUES (?, ?, ?, ?)",
                            params![collection, index_name, value, key.clone()],
                        )
                        .await?;
                    }
                }
                PreparedOp::Delete { collection, key } => {
                    conn.execute(
                        "DELETE FROM records WHERE collection = ? AND key = ?",
                        params![collection, key],
                    )
                    .await?;
                }
            }
        }

        self.check_quota(conn).await
    }

    async fn check_quota(&self, conn: &Connection) -> StoreResult<()> {
        if self.quota.is_unlimited() {
            return Ok(());
        }

        let mut rows = conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(body)), 0) FROM records",
                (),
            )
            .await?;
        let (records, bytes) = match rows.next().await? {
            Some(row) => (row.get::<i64>(0)?, row.get::<i64>(1)?),
            None => (0, 0),
        };
        let records = u64::try_from(records).unwrap_or_default();
        let bytes = u64::try_from(bytes).unwrap_or_default();

        if let Some(max) = self.quota.max_records {
            if records > max {
                return Err(StorageFault::QuotaExceeded(format!(
                    "{records} records exceeds limit of {max}"
                )));
            }
        }
        if let Some(max) = self.quota.max_bytes {
            if bytes > max {
                return Err(StorageFault::QuotaExceeded(format!(
                    "{bytes} bytes exceeds limit of {max}"
                )));
            }
        }
        Ok(())
    }
}

fn index_value(field: &serde_json::Value) -> Option<Value> {
    match field {
        serde_json::Value::String(text) => Some(Value::Text(text.clone())),
        serde_json::Value::Bool(flag) => Some(Value::Integer(i64::from(*flag))),
        serde_json::Value::Number(number) => number
            .as_i64()
            .map(Value::Integer)
            .or_else(|| number.as_f64().map(Value::Real)),
        _ => None,
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> StoreResult<T> {
    Ok(serde_json::from_str(body)?)
}

async fn collect_bodies<T: DeserializeOwned>(mut rows: libsql::Rows) -> StoreResult<Vec<T>> {
    let mut records = Vec::new();
    while let Some(row) = rows.next().await? {
        records.push(decode(&row.get::<String>(0)?)?);
    }
    Ok(records)
}
