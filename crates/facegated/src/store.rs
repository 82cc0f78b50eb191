use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use facegate_core::{ReferenceIdentity, TelemetryEvent};
use thiserror::Error;
use tokio_rusqlite::Connection;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::sinks::{
    AccountDirectory, CheckInOutcome, CheckInRequest, CheckInSink, EnrollmentSink, GallerySource,
    LoginCompletion, SinkError, TelemetrySink,
};

/// Default server-side window in which a repeat check-in is a duplicate.
pub const DEFAULT_CHECK_IN_COOLDOWN_SECS: i64 = 30 * 60;
/// Upper bound for the server-side window (100 years); keeps `now - window`
/// inside the representable date range.
pub const MAX_CHECK_IN_COOLDOWN_SECS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("descriptor encryption failed")]
    EncryptionFailed,
    #[error("descriptor decryption failed: key mismatch or corrupted data")]
    DecryptionFailed,
    #[error("invalid descriptor blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("descriptor is empty")]
    EmptyDescriptor,
    #[error("invalid descriptor value (NaN/Inf)")]
    InvalidDescriptorValue,
    #[error("identity '{0}' already exists")]
    DuplicateIdentity(String),
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
}

/// SQLite-backed identity, attendance and scan-event storage.
///
/// Descriptors are encrypted with AES-256-GCM before storage. A
/// per-installation 32-byte key is generated at first use and stored at
/// `{db_dir}/.key` (mode 0600).
#[derive(Clone)]
pub struct FacegateStore {
    conn: Connection,
    enc_key: [u8; 32],
    check_in_cooldown: chrono::Duration,
}

impl FacegateStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let enc_key = if db_path == Path::new(":memory:") {
            // In-memory DB (tests): use a fixed all-zeros key
            [0u8; 32]
        } else {
            let dir = db_path.parent().unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir).map_err(StoreError::KeyIo)?;
            load_or_generate_key(&dir.join(".key"))?
        };

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS identities (
                     id TEXT PRIMARY KEY,
                     email TEXT NOT NULL UNIQUE,
                     name TEXT NOT NULL,
                     surname TEXT NOT NULL,
                     descriptor BLOB,
                     created_at TEXT NOT NULL,
                     last_login_at TEXT
                 );
                 CREATE TABLE IF NOT EXISTS attendance_logs (
                     id TEXT PRIMARY KEY,
                     name TEXT NOT NULL,
                     surname TEXT NOT NULL,
                     status TEXT NOT NULL,
                     timestamp TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_logs_person ON attendance_logs(name, surname, timestamp);
                 CREATE TABLE IF NOT EXISTS scan_events (
                     id TEXT PRIMARY KEY,
                     kind TEXT NOT NULL,
                     reason TEXT,
                     message TEXT NOT NULL,
                     best_match TEXT,
                     source TEXT NOT NULL,
                     timestamp TEXT NOT NULL
                 );",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            enc_key,
            check_in_cooldown: chrono::Duration::seconds(DEFAULT_CHECK_IN_COOLDOWN_SECS),
        })
    }

    /// Override the server-side duplicate check-in window. Values above
    /// [`MAX_CHECK_IN_COOLDOWN_SECS`] are clamped.
    pub fn with_check_in_cooldown(mut self, secs: u64) -> Self {
        if secs > MAX_CHECK_IN_COOLDOWN_SECS {
            tracing::warn!(
                requested = secs,
                max = MAX_CHECK_IN_COOLDOWN_SECS,
                "check-in cooldown too large, clamping"
            );
        }
        let secs = secs.min(MAX_CHECK_IN_COOLDOWN_SECS) as i64;
        if let Some(window) = chrono::Duration::try_seconds(secs) {
            self.check_in_cooldown = window;
        }
        self
    }

    // ── Identities ────────────────────────────────────────────────────────────

    /// Insert a new identity, optionally with its descriptor. Returns the
    /// generated UUID.
    pub async fn register_identity(
        &self,
        email: &str,
        name: &str,
        surname: &str,
        descriptor: Option<&[f32]>,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = timestamp(Utc::now());

        // Encrypt before entering the SQLite closure
        let blob = descriptor.map(|d| self.encrypt_descriptor(d)).transpose()?;

        let id_clone = id.clone();
        let email = email.trim().to_lowercase();
        let email_clone = email.clone();
        let name = name.trim().to_string();
        let surname = surname.trim().to_string();

        let inserted = self
            .conn
            .call(move |conn| {
                let affected = conn.execute(
                    "INSERT OR IGNORE INTO identities (id, email, name, surname, descriptor, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![id_clone, email_clone, name, surname, blob, created_at],
                )?;
                Ok(affected > 0)
            })
            .await?;

        if !inserted {
            return Err(StoreError::DuplicateIdentity(email));
        }
        tracing::info!(email = %email, "identity registered");
        Ok(id)
    }

    /// Store (or replace) the descriptor for an account. Returns false when
    /// the account does not exist.
    pub async fn set_descriptor(&self, email: &str, descriptor: &[f32]) -> Result<bool, StoreError> {
        let blob = self.encrypt_descriptor(descriptor)?;
        let email = email.trim().to_lowercase();
        self.conn
            .call(move |conn| {
                let affected = conn.execute(
                    "UPDATE identities SET descriptor = ?1 WHERE email = ?2",
                    rusqlite::params![blob, email],
                )?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    /// All identities (metadata only, no descriptors).
    pub async fn list_identities(&self) -> Result<Vec<IdentityInfo>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT email, name, surname, descriptor IS NOT NULL, created_at, last_login_at
                     FROM identities ORDER BY created_at, email",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(IdentityInfo {
                        email: row.get(0)?,
                        name: row.get(1)?,
                        surname: row.get(2)?,
                        has_descriptor: row.get(3)?,
                        created_at: row.get(4)?,
                        last_login_at: row.get(5)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Every identity with a descriptor, labelled "name surname", in
    /// registration order.
    pub async fn gallery(&self) -> Result<Vec<ReferenceIdentity>, StoreError> {
        // Fetch raw rows from SQLite; decrypt outside the blocking closure
        let rows: Vec<(String, String, Vec<u8>)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, surname, descriptor FROM identities
                     WHERE descriptor IS NOT NULL ORDER BY created_at, email",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut gallery = Vec::with_capacity(rows.len());
        for (name, surname, blob) in rows {
            let label = format!("{name} {surname}").trim().to_string();
            gallery.push(ReferenceIdentity::new(label, self.decrypt_descriptor(&blob)?));
        }
        Ok(gallery)
    }

    /// The account's own descriptor, labelled by email. `None` when the
    /// account is missing; `Some(None)` when it has no descriptor yet.
    pub async fn account_descriptor(&self, email: &str) -> Result<Option<Option<Vec<f32>>>, StoreError> {
        let email = email.trim().to_lowercase();
        let row: Option<Option<Vec<u8>>> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT descriptor FROM identities WHERE email = ?1")?;
                let mut rows = stmt.query([&email])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row.get::<_, Option<Vec<u8>>>(0)?)),
                    None => Ok(None),
                }
            })
            .await?;

        row.map(|blob| blob.map(|b| self.decrypt_descriptor(&b)).transpose())
            .transpose()
    }

    pub async fn mark_login(&self, email: &str) -> Result<bool, StoreError> {
        let email = email.trim().to_lowercase();
        let now = timestamp(Utc::now());
        self.conn
            .call(move |conn| {
                let affected = conn.execute(
                    "UPDATE identities SET last_login_at = ?1 WHERE email = ?2",
                    [&now, &email],
                )?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Attendance ────────────────────────────────────────────────────────────

    /// Record a check-in at `now` unless the same person checked in within
    /// the server cooldown.
    pub async fn record_check_in_at(
        &self,
        request: &CheckInRequest,
        now: DateTime<Utc>,
    ) -> Result<CheckInOutcome, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let cutoff = timestamp(now - self.check_in_cooldown);
        let stamp = timestamp(now);
        let name = request.name.clone();
        let surname = request.surname.clone();
        let status = request.status.as_str();

        let recorded = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let recent: u64 = tx.query_row(
                    "SELECT COUNT(*) FROM attendance_logs
                     WHERE name = ?1 AND surname = ?2 AND timestamp > ?3",
                    [&name, &surname, &cutoff],
                    |row| row.get(0),
                )?;
                if recent > 0 {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO attendance_logs (id, name, surname, status, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![id, name, surname, status, stamp],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if recorded {
            tracing::info!(name = %request.name, surname = %request.surname, "check-in recorded");
            Ok(CheckInOutcome::Recorded)
        } else {
            tracing::info!(name = %request.name, surname = %request.surname, "duplicate check-in suppressed");
            Ok(CheckInOutcome::Duplicate)
        }
    }

    /// Most recent attendance entries first.
    pub async fn recent_logs(&self, limit: usize) -> Result<Vec<AttendanceLog>, StoreError> {
        let limit = limit as i64;
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, surname, status, timestamp FROM attendance_logs
                     ORDER BY timestamp DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], |row| {
                    Ok(AttendanceLog {
                        name: row.get(0)?,
                        surname: row.get(1)?,
                        status: row.get(2)?,
                        timestamp: row.get(3)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Scan events ───────────────────────────────────────────────────────────

    pub async fn record_event(&self, event: &TelemetryEvent) -> Result<(), StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let stamp = timestamp(Utc::now());
        let kind = event.kind.as_str();
        let reason = event.reason.map(|r| r.as_str());
        let message = event.message.clone();
        let best_match = event.best_match.clone();
        let source = event.source.as_str();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO scan_events (id, kind, reason, message, best_match, source, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![id, kind, reason, message, best_match, source, stamp],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn recent_events(&self, limit: usize) -> Result<Vec<ScanEventRecord>, StoreError> {
        let limit = limit as i64;
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT kind, reason, message, best_match, source, timestamp FROM scan_events
                     ORDER BY timestamp DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], |row| {
                    Ok(ScanEventRecord {
                        kind: row.get(0)?,
                        reason: row.get(1)?,
                        message: row.get(2)?,
                        best_match: row.get(3)?,
                        source: row.get(4)?,
                        timestamp: row.get(5)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Encryption helpers ────────────────────────────────────────────────────

    /// Encrypt descriptor values with AES-256-GCM.
    ///
    /// Output: 12-byte random nonce || ciphertext || 16-byte GCM tag.
    fn encrypt_descriptor(&self, values: &[f32]) -> Result<Vec<u8>, StoreError> {
        validate_descriptor_values(values)?;
        let plaintext = descriptor_to_bytes(values);

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(12 + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt_descriptor(&self, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
        const NONCE_LEN: usize = 12;

        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;

        bytes_to_descriptor_strict(&plaintext)
    }
}

// ── Boundary implementations ──────────────────────────────────────────────────

#[async_trait]
impl GallerySource for FacegateStore {
    async fn load_gallery(&self) -> Result<Vec<ReferenceIdentity>, SinkError> {
        Ok(self.gallery().await?)
    }
}

#[async_trait]
impl AccountDirectory for FacegateStore {
    async fn account_reference(&self, account: &str) -> Result<ReferenceIdentity, SinkError> {
        match self.account_descriptor(account).await? {
            Some(Some(descriptor)) => Ok(ReferenceIdentity::new(account.trim().to_lowercase(), descriptor)),
            Some(None) => Err(SinkError::NoDescriptor(account.to_string())),
            None => Err(SinkError::UnknownAccount(account.to_string())),
        }
    }
}

#[async_trait]
impl CheckInSink for FacegateStore {
    async fn record_check_in(&self, request: CheckInRequest) -> Result<CheckInOutcome, SinkError> {
        Ok(self.record_check_in_at(&request, Utc::now()).await?)
    }
}

#[async_trait]
impl LoginCompletion for FacegateStore {
    async fn complete_login(&self, account: &str) -> Result<(), SinkError> {
        if self.mark_login(account).await? {
            Ok(())
        } else {
            Err(SinkError::UnknownAccount(account.to_string()))
        }
    }
}

#[async_trait]
impl EnrollmentSink for FacegateStore {
    async fn save_descriptor(&self, account: &str, descriptor: &[f32]) -> Result<(), SinkError> {
        if self.set_descriptor(account, descriptor).await? {
            tracing::info!(account, dimension = descriptor.len(), "descriptor enrolled");
            Ok(())
        } else {
            Err(SinkError::UnknownAccount(account.to_string()))
        }
    }
}

#[async_trait]
impl TelemetrySink for FacegateStore {
    async fn record(&self, event: TelemetryEvent) -> Result<(), SinkError> {
        Ok(self.record_event(&event).await?)
    }
}

// ── Key management ────────────────────────────────────────────────────────────

/// Load the encryption key from disk, or generate and persist a new one.
/// Written with mode 0600 (owner-readable only).
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    if key_path.exists() {
        let bytes = std::fs::read(key_path).map_err(StoreError::KeyIo)?;
        if bytes.len() != 32 {
            return Err(StoreError::KeyIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "encryption key file has wrong length ({} bytes, expected 32)",
                    bytes.len()
                ),
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        tracing::debug!(path = %key_path.display(), "loaded encryption key");
        Ok(key)
    } else {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(key_path)
            .map_err(StoreError::KeyIo)?;
        f.write_all(&key).map_err(StoreError::KeyIo)?;

        tracing::info!(path = %key_path.display(), "generated new AES-256 encryption key");
        Ok(key)
    }
}

// ── Serialization helpers ─────────────────────────────────────────────────────

fn timestamp(t: DateTime<Utc>) -> String {
    // Fixed-width UTC so lexical order matches time order.
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn descriptor_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn bytes_to_descriptor_strict(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }

    let mut values = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk
            .try_into()
            .map_err(|_| StoreError::InvalidBlob(bytes.len()))?;
        let v = f32::from_le_bytes(arr);
        if !v.is_finite() {
            return Err(StoreError::InvalidDescriptorValue);
        }
        values.push(v);
    }
    Ok(values)
}

fn validate_descriptor_values(values: &[f32]) -> Result<(), StoreError> {
    if values.is_empty() {
        return Err(StoreError::EmptyDescriptor);
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidDescriptorValue);
    }
    Ok(())
}

// ── Public types ──────────────────────────────────────────────────────────────

/// Identity metadata (no descriptor data).
#[derive(Debug, Clone, serde::Serialize)]
pub struct IdentityInfo {
    pub email: String,
    pub name: String,
    pub surname: String,
    pub has_descriptor: bool,
    pub created_at: String,
    pub last_login_at: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AttendanceLog {
    pub name: String,
    pub surname: String,
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanEventRecord {
    pub kind: String,
    pub reason: Option<String>,
    pub message: String,
    pub best_match: Option<String>,
    pub source: String,
    pub timestamp: String,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::CheckInStatus;
    use facegate_core::{FailureReason, FlowKind};

    async fn memory_store() -> FacegateStore {
        FacegateStore::open(Path::new(":memory:")).await.unwrap()
    }

    fn descriptor(seed: f32) -> Vec<f32> {
        (0..128).map(|i| seed + i as f32 / 128.0).collect()
    }

    fn alice_check_in() -> CheckInRequest {
        CheckInRequest {
            name: "Alice".into(),
            surname: "Smith".into(),
            status: CheckInStatus::CheckIn,
        }
    }

    #[tokio::test]
    async fn test_gallery_roundtrip() {
        let store = memory_store().await;
        let d = descriptor(0.0);
        store
            .register_identity("alice@example.com", "Alice", "Smith", Some(&d))
            .await
            .unwrap();
        store
            .register_identity("bob@example.com", "Bob", "Jones", None)
            .await
            .unwrap();

        let gallery = store.gallery().await.unwrap();
        assert_eq!(gallery.len(), 1, "identities without descriptors are skipped");
        assert_eq!(gallery[0].label, "Alice Smith");
        for (orig, rec) in d.iter().zip(gallery[0].descriptor.iter()) {
            assert_eq!(orig.to_bits(), rec.to_bits());
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = memory_store().await;
        store
            .register_identity("alice@example.com", "Alice", "Smith", None)
            .await
            .unwrap();
        let err = store
            .register_identity("Alice@Example.com", "Alice", "Smith", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentity(_)));
    }

    #[tokio::test]
    async fn test_account_reference() {
        let store = memory_store().await;
        store
            .register_identity("bob@example.com", "Bob", "Jones", None)
            .await
            .unwrap();

        let err = store.account_reference("bob@example.com").await.unwrap_err();
        assert!(matches!(err, SinkError::NoDescriptor(_)));
        let err = store.account_reference("eve@example.com").await.unwrap_err();
        assert!(matches!(err, SinkError::UnknownAccount(_)));

        store
            .save_descriptor("bob@example.com", &descriptor(1.0))
            .await
            .unwrap();
        let reference = store.account_reference("bob@example.com").await.unwrap();
        assert_eq!(reference.label, "bob@example.com");
        assert_eq!(reference.descriptor.len(), 128);
    }

    #[tokio::test]
    async fn test_enroll_unknown_account_fails() {
        let store = memory_store().await;
        let err = store
            .save_descriptor("nobody@example.com", &descriptor(0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::UnknownAccount(_)));
    }

    #[tokio::test]
    async fn test_server_cooldown_suppresses_duplicates() {
        let store = memory_store().await;
        let t0 = Utc::now();

        let first = store.record_check_in_at(&alice_check_in(), t0).await.unwrap();
        assert_eq!(first, CheckInOutcome::Recorded);

        let again = store
            .record_check_in_at(&alice_check_in(), t0 + chrono::Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(again, CheckInOutcome::Duplicate);

        let later = store
            .record_check_in_at(&alice_check_in(), t0 + chrono::Duration::minutes(31))
            .await
            .unwrap();
        assert_eq!(later, CheckInOutcome::Recorded);

        let logs = store.recent_logs(10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, "CHECK_IN");
    }

    #[tokio::test]
    async fn test_oversized_cooldown_is_clamped() {
        let store = memory_store().await.with_check_in_cooldown(u64::MAX);
        assert_eq!(
            store.check_in_cooldown,
            chrono::Duration::seconds(MAX_CHECK_IN_COOLDOWN_SECS as i64)
        );

        let t0 = Utc::now();
        let first = store.record_check_in_at(&alice_check_in(), t0).await.unwrap();
        assert_eq!(first, CheckInOutcome::Recorded);
        let next_year = store
            .record_check_in_at(&alice_check_in(), t0 + chrono::Duration::days(365))
            .await
            .unwrap();
        assert_eq!(next_year, CheckInOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_cooldown_is_per_person() {
        let store = memory_store().await.with_check_in_cooldown(60);
        let t0 = Utc::now();
        store.record_check_in_at(&alice_check_in(), t0).await.unwrap();
        let bob = CheckInRequest {
            name: "Bob".into(),
            surname: "Jones".into(),
            status: CheckInStatus::CheckIn,
        };
        assert_eq!(
            store.record_check_in_at(&bob, t0).await.unwrap(),
            CheckInOutcome::Recorded
        );
    }

    #[tokio::test]
    async fn test_scan_events_persisted() {
        let store = memory_store().await;
        let event = TelemetryEvent::failure(
            FailureReason::UnknownFace,
            Some("Alice Smith".into()),
            FlowKind::CheckIn,
        );
        store.record(event).await.unwrap();

        let events = store.recent_events(5).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "SCAN_FAIL");
        assert_eq!(events[0].reason.as_deref(), Some("UNKNOWN_FACE"));
        assert_eq!(events[0].source, "checkin");
    }

    #[tokio::test]
    async fn test_login_marks_account() {
        let store = memory_store().await;
        store
            .register_identity("alice@example.com", "Alice", "Smith", None)
            .await
            .unwrap();
        store.complete_login("alice@example.com").await.unwrap();
        let ids = store.list_identities().await.unwrap();
        assert!(ids[0].last_login_at.is_some());
    }

    #[test]
    fn test_strict_rejects_nan() {
        let mut values = vec![0.5f32; 16];
        values[3] = f32::NAN;
        let bytes = descriptor_to_bytes(&values);
        let err = bytes_to_descriptor_strict(&bytes).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDescriptorValue));
    }

    #[test]
    fn test_strict_rejects_ragged_length() {
        let err = bytes_to_descriptor_strict(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidBlob(10)));
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        // Encrypted under one key, unreadable under another
        let store1 = FacegateStore {
            enc_key: [1u8; 32],
            ..memory_store().await
        };
        let store2 = FacegateStore {
            enc_key: [2u8; 32],
            ..store1.clone()
        };

        let blob = store1.encrypt_descriptor(&descriptor(0.0)).unwrap();
        assert!(store2.decrypt_descriptor(&blob).is_err());
        assert_eq!(store1.decrypt_descriptor(&blob).unwrap(), descriptor(0.0));
    }
}
