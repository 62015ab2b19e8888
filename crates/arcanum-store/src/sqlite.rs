//! SQLite implementation of the Store trait.
//!
//! The primary storage backend. Uses rusqlite with bundled SQLite, wrapped
//! in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use arcanum_core::{now_millis, Envelope, Identifier, ObjectType};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{HeadSwap, InsertResult, Store};

/// SQLite-based store.
///
/// Thread-safe via an internal Mutex. Every operation runs on the blocking
/// pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path, creating and migrating it
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::Poisoned(format!("sqlite connection: {}", e)))
}

fn insert_row(conn: &Connection, envelope: &Envelope, now: i64) -> Result<InsertResult> {
    let canonical = envelope
        .body
        .canonical_bytes()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let json = envelope
        .to_json()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let changed = conn.execute(
        "INSERT OR IGNORE INTO objects (id, object_type, canonical, envelope, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            envelope.id.as_bytes().as_slice(),
            envelope.object_type().to_u8(),
            canonical,
            json,
            now,
        ],
    )?;
    Ok(if changed == 1 {
        InsertResult::Inserted
    } else {
        InsertResult::AlreadyExists
    })
}

fn decode_id(bytes: &[u8]) -> rusqlite::Result<Identifier> {
    Identifier::try_from(bytes).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(bytes.len(), rusqlite::types::Type::Blob, Box::new(e))
    })
}

fn decode_envelope(id: Identifier, json: &str) -> Result<Envelope> {
    let envelope = Envelope::from_json(json).map_err(|e| StoreError::InvalidData {
        id,
        reason: e.to_string(),
    })?;
    if envelope.id != id {
        return Err(StoreError::InvalidData {
            id,
            reason: format!("row holds envelope {}", envelope.id),
        });
    }
    Ok(envelope)
}

fn head(conn: &Connection, scope: &str) -> Result<Option<Identifier>> {
    conn.query_row(
        "SELECT keyring_id FROM keyring_heads WHERE scope = ?1",
        params![scope],
        |row| decode_id(&row.get::<_, Vec<u8>>(0)?),
    )
    .optional()
    .map_err(StoreError::from)
}

#[async_trait]
impl Store for SqliteStore {
    async fn put(&self, envelope: &Envelope) -> Result<InsertResult> {
        let envelope = envelope.clone();
        self.blocking(move |conn| insert_row(conn, &envelope, now_millis()))
            .await
    }

    async fn put_batch(&self, envelopes: &[Envelope]) -> Result<Vec<InsertResult>> {
        let envelopes = envelopes.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let now = now_millis();
            let results = envelopes
                .iter()
                .map(|env| insert_row(&tx, env, now))
                .collect::<Result<Vec<_>>>()?;
            tx.commit()?;
            Ok(results)
        })
        .await
    }

    async fn get(&self, id: &Identifier) -> Result<Option<Envelope>> {
        let id = *id;
        self.blocking(move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT envelope FROM objects WHERE id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            json.map(|json| decode_envelope(id, &json)).transpose()
        })
        .await
    }

    async fn contains(&self, id: &Identifier) -> Result<bool> {
        let id = *id;
        self.blocking(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM objects WHERE id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn list_by_type(&self, object_type: ObjectType) -> Result<Vec<Envelope>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, envelope FROM objects WHERE object_type = ?1 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map(params![object_type.to_u8()], |row| {
                    let id = decode_id(&row.get::<_, Vec<u8>>(0)?)?;
                    Ok((id, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.iter()
                .map(|(id, json)| decode_envelope(*id, json))
                .collect()
        })
        .await
    }

    async fn keyring_head(&self, scope: &str) -> Result<Option<Identifier>> {
        let scope = scope.to_string();
        self.blocking(move |conn| head(conn, &scope)).await
    }

    async fn swap_keyring_head(
        &self,
        scope: &str,
        expected: Option<Identifier>,
        new: Identifier,
        envelopes: &[Envelope],
    ) -> Result<HeadSwap> {
        let scope = scope.to_string();
        let envelopes = envelopes.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let actual = head(&tx, &scope)?;
            if actual != expected {
                return Ok(HeadSwap::Stale { actual });
            }
            let now = now_millis();
            for envelope in &envelopes {
                insert_row(&tx, envelope, now)?;
            }
            tx.execute(
                "INSERT INTO keyring_heads (scope, keyring_id, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(scope) DO UPDATE SET keyring_id = excluded.keyring_id,
                                                  updated_at = excluded.updated_at",
                params![scope, new.as_bytes().as_slice(), now],
            )?;
            tx.commit()?;
            tracing::debug!(scope = %scope, head = %new, written = envelopes.len(), "moved keyring head");
            Ok(HeadSwap::Swapped)
        })
        .await
    }
}
