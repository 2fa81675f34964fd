// 🗂️ Blob Store - uploaded artifacts live outside the relational store
//
// The database keeps a `files` row per upload: the opaque blob reference,
// mime type, size and SHA-256 computed at upload time. Raw bytes never touch
// SQLite.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::db::{new_id, time_col, to_db_time};
use crate::error::{PipelineError, Result};

/// Opaque reference returned by a blob store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef(pub String);

impl BlobRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// External binary storage
pub trait BlobStore: Send + Sync {
    fn put(&self, bytes: &[u8], content_type: &str) -> Result<BlobRef>;
    fn get(&self, blob_ref: &BlobRef) -> Result<(Vec<u8>, String)>;
}

/// An upload as received from the caller
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub original_name: Option<String>,
}

impl Upload {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Upload {
            bytes: bytes.into(),
            content_type: content_type.into(),
            original_name: None,
        }
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    pub fn sha256(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// FILE ROWS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    pub blob_ref: BlobRef,
    pub original_name: Option<String>,
    pub mime_type: String,
    pub byte_size: i64,
    pub sha256: String,
    pub uploaded_by_child_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredFile {
    const COLUMNS: &'static str =
        "id, blob_ref, original_name, mime_type, byte_size, sha256, uploaded_by_child_id, created_at";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StoredFile {
            id: row.get(0)?,
            blob_ref: BlobRef(row.get(1)?),
            original_name: row.get(2)?,
            mime_type: row.get(3)?,
            byte_size: row.get(4)?,
            sha256: row.get(5)?,
            uploaded_by_child_id: row.get(6)?,
            created_at: time_col(row, 7)?,
        })
    }
}

/// Put the bytes into the blob store and record the reference + hash.
///
/// Call inside the transition's write transaction so the `files` row is
/// rolled back with everything else on failure. A blob written before a
/// rollback is left orphaned in the store.
pub fn persist_upload(
    conn: &Connection,
    blobs: &dyn BlobStore,
    upload: &Upload,
    uploaded_by_child_id: Option<&str>,
) -> Result<StoredFile> {
    if upload.bytes.is_empty() {
        return Err(PipelineError::validation("Uploaded file is empty"));
    }

    let sha256 = upload.sha256();
    let blob_ref = blobs.put(&upload.bytes, &upload.content_type).map_err(|e| {
        warn!(error = %e, "blob store put failed");
        e
    })?;

    let id = new_id();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO files (id, blob_ref, original_name, mime_type, byte_size, sha256, uploaded_by_child_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            blob_ref.as_str(),
            upload.original_name,
            upload.content_type,
            upload.bytes.len() as i64,
            sha256,
            uploaded_by_child_id,
            to_db_time(&now),
        ],
    )?;

    debug!(file_id = %id, sha256 = %sha256, bytes = upload.bytes.len(), "upload stored");

    Ok(StoredFile {
        id,
        blob_ref,
        original_name: upload.original_name.clone(),
        mime_type: upload.content_type.clone(),
        byte_size: upload.bytes.len() as i64,
        sha256,
        uploaded_by_child_id: uploaded_by_child_id.map(str::to_string),
        created_at: now,
    })
}

pub fn get_file(conn: &Connection, id: &str) -> Result<Option<StoredFile>> {
    let sql = format!("SELECT {} FROM files WHERE id = ?1", StoredFile::COLUMNS);
    Ok(conn.query_row(&sql, [id], StoredFile::from_row).optional()?)
}

/// Fetch an uploaded file's bytes, checking them against the recorded hash
pub fn read_file(conn: &Connection, blobs: &dyn BlobStore, id: &str) -> Result<(StoredFile, Vec<u8>)> {
    let file = get_file(conn, id)?.ok_or_else(|| PipelineError::not_found("File"))?;
    let (bytes, _) = blobs.get(&file.blob_ref)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let actual = format!("{:x}", hasher.finalize());
    if actual != file.sha256 {
        warn!(file_id = %file.id, "blob content does not match recorded hash");
        return Err(PipelineError::Collaborator("Blob integrity check failed".into()));
    }

    Ok((file, bytes))
}

// ============================================================================
// IMPLEMENTATIONS
// ============================================================================

/// Files under a directory: `<ref>` holds the bytes, `<ref>.type` the content type
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            PipelineError::Collaborator(format!("Cannot create uploads dir {}: {e}", root.display()))
        })?;
        Ok(FsBlobStore { root })
    }

    fn path_for(&self, blob_ref: &BlobRef) -> Result<PathBuf> {
        // Refs are generated uuids; anything else is not ours
        if uuid::Uuid::parse_str(blob_ref.as_str()).is_err() {
            return Err(PipelineError::not_found("Blob"));
        }
        Ok(self.root.join(blob_ref.as_str()))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, bytes: &[u8], content_type: &str) -> Result<BlobRef> {
        let blob_ref = BlobRef(new_id());
        let path = self.path_for(&blob_ref)?;
        let io_err = |e: std::io::Error| PipelineError::Collaborator(format!("Blob write failed: {e}"));
        fs::write(&path, bytes).map_err(io_err)?;
        fs::write(path.with_extension("type"), content_type).map_err(io_err)?;
        Ok(blob_ref)
    }

    fn get(&self, blob_ref: &BlobRef) -> Result<(Vec<u8>, String)> {
        let path = self.path_for(blob_ref)?;
        if !path.exists() {
            return Err(PipelineError::not_found("Blob"));
        }
        let io_err = |e: std::io::Error| PipelineError::Collaborator(format!("Blob read failed: {e}"));
        let bytes = fs::read(&path).map_err(io_err)?;
        let content_type = fs::read_to_string(path.with_extension("type")).map_err(io_err)?;
        Ok((bytes, content_type))
    }
}

/// In-process store for tests and tooling
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, bytes: &[u8], content_type: &str) -> Result<BlobRef> {
        let blob_ref = BlobRef(new_id());
        self.blobs
            .write()
            .map_err(|_| PipelineError::Collaborator("Blob store lock poisoned".into()))?
            .insert(blob_ref.0.clone(), (bytes.to_vec(), content_type.to_string()));
        Ok(blob_ref)
    }

    fn get(&self, blob_ref: &BlobRef) -> Result<(Vec<u8>, String)> {
        self.blobs
            .read()
            .map_err(|_| PipelineError::Collaborator("Blob store lock poisoned".into()))?
            .get(blob_ref.as_str())
            .cloned()
            .ok_or_else(|| PipelineError::not_found("Blob"))
    }
}
