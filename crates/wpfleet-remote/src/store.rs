//! One compose document on one host.
//!
//! Every operation goes through the host's [`Connection`]; nothing is
//! cached, so each `read` reflects the file as it is right now.
//!
//! # Layout on the host
//!
//! ```text
//! /opt/wordpress/docker-compose.yml                        live document
//! /opt/wordpress/docker-compose.yml.bak.20261019101500123  backup (UTC, ms)
//! /opt/wordpress/docker-compose.yml.wpfleet-tmp            staging file
//! ```
//!
//! Writes and restores land in the staging file first and are renamed over
//! the live document, so a concurrent reader sees either the old or the new
//! content, never a partial file.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde_yaml::Value;
use tracing::{debug, info};

use crate::document::ConfigDocument;
use crate::error::{StoreError, StoreResult, TransportError};
use crate::transport::{Connection, quote};

/// Heredoc delimiter used when streaming a document to the host.
pub(crate) const HEREDOC_EOF: &str = "WPFLEET_EOF";
const BACKUP_INFIX: &str = ".bak.";
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// A timestamped copy of the document, created before a mutation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BackupRecord {
    pub path: String,
    pub timestamp: DateTime<Utc>,
}

/// Read/write access to the compose document of one workload.
pub struct RemoteConfigStore<'c> {
    conn: &'c dyn Connection,
    path: String,
}

impl<'c> RemoteConfigStore<'c> {
    pub fn new(conn: &'c dyn Connection, path: impl Into<String>) -> Self {
        Self {
            conn,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn host(&self) -> &str {
        self.conn.host()
    }

    /// Fetch and parse the live document.
    pub async fn read(&self) -> StoreResult<ConfigDocument> {
        let output = self
            .conn
            .execute(&format!("cat -- {}", quote(&self.path)))
            .await
            .map_err(|source| StoreError::Read {
                path: self.path.clone(),
                source,
            })?;
        ConfigDocument::parse(&output.stdout).map_err(|e| StoreError::from_document(&self.path, e))
    }

    /// Serialize `doc` and replace the live document with it.
    pub async fn write(&self, doc: &ConfigDocument) -> StoreResult<()> {
        let write_err = |reason: String| StoreError::Write {
            path: self.path.clone(),
            reason,
        };

        let mut content = doc
            .to_yaml()
            .map_err(|e| StoreError::from_document(&self.path, e))?;
        if content.lines().any(|line| line == HEREDOC_EOF) {
            return Err(write_err(format!(
                "document contains the reserved line {HEREDOC_EOF}"
            )));
        }
        if !content.ends_with('\n') {
            content.push('\n');
        }

        let staging = self.staging_path();
        let command = format!(
            "cat > {staging} <<'{HEREDOC_EOF}' && mv -f -- {staging} {live}\n{content}{HEREDOC_EOF}\n",
            staging = quote(&staging),
            live = quote(&self.path),
        );
        self.conn
            .execute(&command)
            .await
            .map_err(|e| write_err(e.to_string()))?;

        debug!(host = %self.host(), path = %self.path, bytes = content.len(), "document written");
        Ok(())
    }

    /// Copy the live document to a timestamped sibling.
    pub async fn backup(&self) -> StoreResult<BackupRecord> {
        self.backup_at(Utc::now()).await
    }

    async fn backup_at(&self, timestamp: DateTime<Utc>) -> StoreResult<BackupRecord> {
        let backup_err = |reason: String| StoreError::Backup {
            path: self.path.clone(),
            reason,
        };

        self.conn
            .execute(&format!("test -f {}", quote(&self.path)))
            .await
            .map_err(|e| match e {
                TransportError::CommandFailed { .. } => backup_err("source does not exist".into()),
                other => backup_err(other.to_string()),
            })?;

        let record = BackupRecord {
            path: self.backup_path(timestamp),
            timestamp: truncate_to_millis(timestamp),
        };
        self.conn
            .execute(&format!(
                "cp -p -- {} {}",
                quote(&self.path),
                quote(&record.path)
            ))
            .await
            .map_err(|e| backup_err(e.to_string()))?;

        info!(host = %self.host(), backup = %record.path, "backup created");
        Ok(record)
    }

    /// Replace the live document with the content of `backup_path`.
    pub async fn restore(&self, backup_path: &str) -> StoreResult<()> {
        let restore_err = |reason: String| StoreError::Restore {
            path: backup_path.to_string(),
            reason,
        };

        self.conn
            .execute(&format!("test -r {}", quote(backup_path)))
            .await
            .map_err(|e| match e {
                TransportError::CommandFailed { .. } => {
                    restore_err("backup does not exist or is unreadable".into())
                }
                other => restore_err(other.to_string()),
            })?;

        let staging = quote(&self.staging_path());
        self.conn
            .execute(&format!(
                "cp -p -- {} {staging} && mv -f -- {staging} {}",
                quote(backup_path),
                quote(&self.path)
            ))
            .await
            .map_err(|e| restore_err(e.to_string()))?;

        info!(host = %self.host(), backup = %backup_path, path = %self.path, "document restored");
        Ok(())
    }

    /// Backups of this document, oldest first.
    pub async fn list_backups(&self) -> StoreResult<Vec<BackupRecord>> {
        let (dir, file) = split_path(&self.path);
        let output = self
            .conn
            .execute(&format!("ls -1 -- {}", quote(dir)))
            .await
            .map_err(|source| StoreError::Read {
                path: dir.to_string(),
                source,
            })?;

        let prefix = format!("{file}{BACKUP_INFIX}");
        let mut records: Vec<BackupRecord> = output
            .stdout
            .lines()
            .filter_map(|name| {
                let stamp = name.trim().strip_prefix(&prefix)?;
                Some(BackupRecord {
                    path: join_path(dir, name.trim()),
                    timestamp: parse_stamp(stamp)?,
                })
            })
            .collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));
        Ok(records)
    }

    /// The newest backup, if any.
    pub async fn latest_backup(&self) -> StoreResult<Option<BackupRecord>> {
        Ok(self.list_backups().await?.pop())
    }

    pub async fn get_value(&self, section: &str, key: &str) -> StoreResult<Value> {
        let doc = self.read().await?;
        doc.get(section, key)
            .map_err(|e| StoreError::from_document(&self.path, e))
    }

    pub async fn set_value(&self, section: &str, key: &str, value: Value) -> StoreResult<()> {
        let mut doc = self.read().await?;
        doc.set(section, key, value)
            .map_err(|e| StoreError::from_document(&self.path, e))?;
        self.write(&doc).await
    }

    pub async fn delete_key(&self, section: &str, key: &str) -> StoreResult<()> {
        let mut doc = self.read().await?;
        doc.delete_key(section, key)
            .map_err(|e| StoreError::from_document(&self.path, e))?;
        self.write(&doc).await
    }

    pub async fn delete_section(&self, section: &str) -> StoreResult<()> {
        let mut doc = self.read().await?;
        doc.delete_section(section)
            .map_err(|e| StoreError::from_document(&self.path, e))?;
        self.write(&doc).await
    }

    fn staging_path(&self) -> String {
        format!("{}.wpfleet-tmp", self.path)
    }

    fn backup_path(&self, timestamp: DateTime<Utc>) -> String {
        format!(
            "{}{BACKUP_INFIX}{}{:03}",
            self.path,
            timestamp.format(STAMP_FORMAT),
            timestamp.timestamp_subsec_millis()
        )
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", file)) => ("/", file),
        Some((dir, file)) => (dir, file),
        None => (".", path),
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Parse `YYYYmmddHHMMSSmmm`.
fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    if stamp.len() != 17 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs = NaiveDateTime::parse_from_str(&stamp[..14], STAMP_FORMAT).ok()?;
    let millis: i64 = stamp[14..].parse().ok()?;
    Some(secs.and_utc() + TimeDelta::milliseconds(millis))
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let extra = ts.timestamp_subsec_nanos() % 1_000_000;
    ts - TimeDelta::nanoseconds(i64::from(extra))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::memory::{MemoryHost, Response};

    const PATH: &str = "/opt/wordpress/docker-compose.yml";
    const COMPOSE: &str = "services:\n  wordpress:\n    image: wordpress:6.4\n    environment:\n      WORDPRESS_DEBUG: '0'\n";

    fn host() -> MemoryHost {
        MemoryHost::new("wp01").with_file(PATH, COMPOSE)
    }

    fn at(secs: u32, millis: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 10, 15, secs).unwrap()
            + TimeDelta::milliseconds(i64::from(millis))
    }

    #[tokio::test]
    async fn read_parses_live_document() {
        let h = host();
        let store = RemoteConfigStore::new(&h, PATH);
        let doc = store.read().await.unwrap();
        assert_eq!(
            doc.get("services.wordpress", "image").unwrap(),
            Value::String("wordpress:6.4".into())
        );
    }

    #[tokio::test]
    async fn read_missing_file_is_read_error() {
        let h = MemoryHost::new("wp01");
        let store = RemoteConfigStore::new(&h, PATH);
        assert!(matches!(store.read().await, Err(StoreError::Read { .. })));
    }

    #[tokio::test]
    async fn read_malformed_file_is_parse_error() {
        let h = MemoryHost::new("wp01").with_file(PATH, "services: [oops\n");
        let store = RemoteConfigStore::new(&h, PATH);
        assert!(matches!(store.read().await, Err(StoreError::Parse { .. })));
    }

    #[tokio::test]
    async fn write_replaces_document_via_staging_file() {
        let h = host();
        let store = RemoteConfigStore::new(&h, PATH);
        let mut doc = store.read().await.unwrap();
        doc.set("services.wordpress", "image", Value::String("wordpress:6.5".into()))
            .unwrap();
        store.write(&doc).await.unwrap();

        assert_eq!(store.read().await.unwrap(), doc);
        assert!(h.file(&format!("{PATH}.wpfleet-tmp")).is_none());
    }

    #[tokio::test]
    async fn failed_write_leaves_document_untouched() {
        let h = host();
        h.on("cat > ", Response::fail(1, "No space left on device"));
        let store = RemoteConfigStore::new(&h, PATH);
        let mut doc = store.read().await.unwrap();
        doc.delete_section("services").unwrap();

        assert!(matches!(store.write(&doc).await, Err(StoreError::Write { .. })));
        assert_eq!(h.file(PATH).as_deref(), Some(COMPOSE));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let h = host();
        let store = RemoteConfigStore::new(&h, PATH);
        store
            .set_value("services.wordpress", "environment.WORDPRESS_DEBUG", Value::Bool(true))
            .await
            .unwrap();
        assert_eq!(
            store
                .get_value("services.wordpress", "environment.WORDPRESS_DEBUG")
                .await
                .unwrap(),
            Value::Bool(true)
        );
    }

    #[tokio::test]
    async fn delete_key_then_get_is_not_found() {
        let h = host();
        let store = RemoteConfigStore::new(&h, PATH);
        store.delete_key("services.wordpress", "image").await.unwrap();
        assert!(matches!(
            store.get_value("services.wordpress", "image").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_missing_section_is_not_found() {
        let h = host();
        let store = RemoteConfigStore::new(&h, PATH);
        assert!(matches!(
            store.delete_section("services.redis").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get_value("services.redis", "image").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn backup_then_restore_recovers_original() {
        let h = host();
        let store = RemoteConfigStore::new(&h, PATH);
        let backup = store.backup().await.unwrap();
        assert!(backup.path.starts_with(&format!("{PATH}.bak.")));
        assert_eq!(h.file(&backup.path).as_deref(), Some(COMPOSE));

        store.delete_section("services").await.unwrap();
        assert_ne!(h.file(PATH).as_deref(), Some(COMPOSE));

        store.restore(&backup.path).await.unwrap();
        assert_eq!(h.file(PATH).as_deref(), Some(COMPOSE));
        // The backup itself survives the restore.
        assert!(h.file(&backup.path).is_some());
    }

    #[tokio::test]
    async fn backup_without_source_fails() {
        let h = MemoryHost::new("wp01");
        let store = RemoteConfigStore::new(&h, PATH);
        assert!(matches!(store.backup().await, Err(StoreError::Backup { .. })));
    }

    #[tokio::test]
    async fn restore_from_missing_backup_fails() {
        let h = host();
        let store = RemoteConfigStore::new(&h, PATH);
        assert!(matches!(
            store.restore(&format!("{PATH}.bak.20260101000000000")).await,
            Err(StoreError::Restore { .. })
        ));
        assert_eq!(h.file(PATH).as_deref(), Some(COMPOSE));
    }

    #[tokio::test]
    async fn list_backups_is_sorted_and_filtered() {
        let h = host()
            .with_file("/opt/wordpress/uploads.ini", "upload_max_filesize = 64M\n")
            .with_file(&format!("{PATH}.bak.garbage"), "x");
        let store = RemoteConfigStore::new(&h, PATH);
        assert!(store.list_backups().await.unwrap().is_empty());

        let late = store.backup_at(at(30, 5)).await.unwrap();
        let early = store.backup_at(at(10, 999)).await.unwrap();
        let middle = store.backup_at(at(10, 999) + TimeDelta::milliseconds(1)).await.unwrap();

        let listed = store.list_backups().await.unwrap();
        assert_eq!(listed, vec![early, middle, late.clone()]);
        assert_eq!(store.latest_backup().await.unwrap(), Some(late));
    }

    #[test]
    fn stamp_round_trip() {
        let ts = at(42, 7);
        let h = MemoryHost::new("wp01");
        let store = RemoteConfigStore::new(&h, PATH);
        let path = store.backup_path(ts);
        assert!(path.ends_with(".bak.20261019101542007"));
        let stamp = path.rsplit('.').next().unwrap();
        assert_eq!(parse_stamp(stamp), Some(ts));
        assert_eq!(parse_stamp("2026101910154200"), None);
        assert_eq!(parse_stamp("2026101910154200x"), None);
    }

    #[test]
    fn split_path_cases() {
        assert_eq!(split_path("/opt/wp/compose.yml"), ("/opt/wp", "compose.yml"));
        assert_eq!(split_path("/compose.yml"), ("/", "compose.yml"));
        assert_eq!(split_path("compose.yml"), (".", "compose.yml"));
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/opt", "a"), "/opt/a");
    }
}
