use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;
use rollcall_core::{Embedding, EnrolledIdentity};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("embedding encryption failed")]
    EncryptionFailed,
    #[error("embedding decryption failed: key mismatch or corrupted data")]
    DecryptionFailed,
    #[error("invalid embedding blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("invalid embedding dimension: {got} (expected {expected})")]
    InvalidEmbeddingDim { got: usize, expected: usize },
    #[error("invalid embedding value (NaN/Inf)")]
    InvalidEmbeddingValue,
    #[error("display name must not be empty")]
    EmptyName,
    #[error("encryption key file has {0} bytes, expected 32")]
    BadKeyLength(usize),
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
}

/// SQLite-backed enrolled identity storage with AES-256-GCM encrypted
/// embeddings.
///
/// A per-installation 32-byte key is generated at first use and stored at
/// `{db_dir}/.key` (mode 0600).
#[derive(Clone)]
pub struct IdentityStore {
    conn: Connection,
    cipher: BlobCipher,
}

impl IdentityStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path, embedding_dim: usize) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let key = if db_path == Path::new(":memory:") {
            [0u8; 32]
        } else {
            let key_path = db_path
                .parent()
                .unwrap_or(Path::new("/var/lib/rollcall"))
                .join(".key");
            load_or_create_key(&key_path)?
        };

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS identities (
                     id TEXT PRIMARY KEY,
                     display_name TEXT NOT NULL,
                     embedding BLOB NOT NULL,
                     model_version TEXT NOT NULL,
                     quality_score REAL NOT NULL DEFAULT 0.0,
                     created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_identities_created ON identities(created_at);",
            )?;
            Ok(())
        })
        .await?;

        tracing::debug!(path = %db_path.display(), embedding_dim, "identity store opened");
        Ok(Self {
            conn,
            cipher: BlobCipher::new(&key, embedding_dim),
        })
    }

    /// Enroll a new identity. Returns the generated UUID.
    pub async fn insert(
        &self,
        display_name: &str,
        embedding: &Embedding,
        quality_score: f32,
    ) -> Result<String, StoreError> {
        let display_name = display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(StoreError::EmptyName);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let model_version = embedding
            .model_version
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let created_at = chrono::Utc::now().to_rfc3339();

        let blob = self.cipher.seal(&embedding.values)?;

        let id_clone = id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities (id, display_name, embedding, model_version, quality_score, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![id_clone, display_name, blob, model_version, quality_score, created_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(id)
    }

    /// Every enrolled identity in enrollment order: the matcher's snapshot.
    pub async fn get_all_identities(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        // Decrypt outside the connection thread.
        let rows: Vec<(String, String, Vec<u8>, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, display_name, embedding, model_version
                     FROM identities ORDER BY created_at, rowid",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut identities = Vec::with_capacity(rows.len());
        for (id, display_name, blob, model_version) in rows {
            let values = self.cipher.open(&blob)?;
            identities.push(EnrolledIdentity {
                id,
                display_name,
                embedding: Embedding {
                    values,
                    model_version: Some(model_version),
                },
            });
        }
        Ok(identities)
    }

    /// List enrolled identities (metadata only, no embeddings).
    pub async fn list(&self) -> Result<Vec<IdentityInfo>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, display_name, model_version, quality_score, created_at
                     FROM identities ORDER BY created_at, rowid",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(IdentityInfo {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        model_version: row.get(2)?,
                        quality_score: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Remove an identity by ID. Returns whether a row was deleted.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute("DELETE FROM identities WHERE id = ?1", [&id])?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Count enrolled identities.
    pub async fn count_all(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }
}

/// AES-256-GCM sealing of embedding vectors.
///
/// Blob layout: 12-byte random nonce, then the ciphertext of `dim`
/// little-endian f32 values with the 16-byte GCM tag appended.
#[derive(Clone)]
struct BlobCipher {
    aead: Aes256Gcm,
    dim: usize,
}

impl BlobCipher {
    fn new(key: &[u8; 32], dim: usize) -> Self {
        Self {
            aead: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            dim,
        }
    }

    fn seal(&self, values: &[f32]) -> Result<Vec<u8>, StoreError> {
        if values.len() != self.dim {
            return Err(StoreError::InvalidEmbeddingDim {
                got: values.len(),
                expected: self.dim,
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidEmbeddingValue);
        }
        let plaintext: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        let mut blob = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut blob);
        let ciphertext = self
            .aead
            .encrypt(Nonce::from_slice(&blob), plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn open(&self, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .aead
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;
        decode_values(&plaintext, self.dim)
    }
}

/// Exactly `dim` finite little-endian f32 values.
fn decode_values(bytes: &[u8], dim: usize) -> Result<Vec<f32>, StoreError> {
    if bytes.len() != dim * 4 {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }
    bytes
        .chunks_exact(4)
        .map(|c| {
            let v = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            if v.is_finite() {
                Ok(v)
            } else {
                Err(StoreError::InvalidEmbeddingValue)
            }
        })
        .collect()
}

/// Read the installation key, creating it (mode 0600) on first use.
fn load_or_create_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    match std::fs::read(key_path) {
        Ok(bytes) => {
            let key: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::BadKeyLength(bytes.len()))?;
            tracing::debug!(path = %key_path.display(), "loaded encryption key");
            Ok(key)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            let mut key = [0u8; 32];
            OsRng.fill_bytes(&mut key);
            let mut f = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(key_path)
                .map_err(StoreError::KeyIo)?;
            f.write_all(&key).map_err(StoreError::KeyIo)?;
            tracing::info!(path = %key_path.display(), "generated identity store key");
            Ok(key)
        }
        Err(e) => Err(StoreError::KeyIo(e)),
    }
}

/// Metadata about an enrolled identity (no embedding data).
#[derive(Debug, Clone, serde::Serialize)]
pub struct IdentityInfo {
    pub id: String,
    pub display_name: String,
    pub model_version: String,
    pub quality_score: f64,
    pub created_at: String,
}
