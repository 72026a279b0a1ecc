//! Single-slot persistence of the last saved recording.
//!
//! The recording lives in a SQLite key-value table under one fixed key, as
//! a base64 `data:` URL, next to the time it was saved and a SHA-256 digest
//! of the decoded bytes.

use crate::recorder::{AssetOrigin, RecordingAsset};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

/// The one key the recording is stored under.
pub const RECORDING_KEY: &str = "recording";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("stored value is not a base64 data URL")]
    MalformedDataUrl,
    #[error("stored value is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("stored timestamp is invalid: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("stored recording is corrupt: digest {actual} does not match {expected}")]
    Corrupt { expected: String, actual: String },
}

/// A recording read back from the store.
#[derive(Debug, Clone)]
pub struct StoredRecording {
    pub asset: RecordingAsset,
    pub saved_at: DateTime<Utc>,
}

pub struct RecordingStore {
    conn: Connection,
}

impl RecordingStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened recording store");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key      TEXT PRIMARY KEY,
                value    TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                sha256   TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// Write `asset` to the slot, replacing whatever was there.
    pub fn save(&self, asset: &RecordingAsset) -> Result<DateTime<Utc>, StoreError> {
        let saved_at = Utc::now();
        let value = encode_data_url(&asset.mime, asset.bytes());
        self.conn.execute(
            "INSERT INTO kv (key, value, saved_at, sha256) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                saved_at = excluded.saved_at,
                sha256 = excluded.sha256",
            params![RECORDING_KEY, value, saved_at.to_rfc3339(), hex_digest(asset.bytes())],
        )?;
        tracing::info!(
            reference = %asset.reference,
            bytes = asset.len(),
            encoded = value.len(),
            "recording saved"
        );
        Ok(saved_at)
    }

    /// Read the slot, if anything has been saved.
    pub fn load(&self) -> Result<Option<StoredRecording>, StoreError> {
        let row: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT value, saved_at, sha256 FROM kv WHERE key = ?1",
                params![RECORDING_KEY],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((value, saved_at, expected)) = row else {
            return Ok(None);
        };

        let (mime, bytes) = decode_data_url(&value)?;
        let actual = hex_digest(&bytes);
        if actual != expected {
            return Err(StoreError::Corrupt { expected, actual });
        }

        Ok(Some(StoredRecording {
            asset: RecordingAsset::new(mime, bytes, None, AssetOrigin::Storage),
            saved_at: DateTime::parse_from_rfc3339(&saved_at)?.with_timezone(&Utc),
        }))
    }

    /// Remove the slot. Returns whether anything was stored.
    pub fn clear(&self) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM kv WHERE key = ?1", params![RECORDING_KEY])?;
        tracing::info!(removed, "recording store cleared");
        Ok(removed > 0)
    }
}

/// `data:<mime>;base64,<payload>`
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Split a base64 data URL back into its MIME type and bytes.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>), StoreError> {
    let rest = url.strip_prefix("data:").ok_or(StoreError::MalformedDataUrl)?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or(StoreError::MalformedDataUrl)?;
    Ok((mime.to_string(), STANDARD.decode(payload)?))
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
