//! Fetch-and-persist pipeline
//!
//! A save fetches the binary, writes it under the storage root and only then
//! commits the metadata row, so the index never points at a missing or
//! truncated file.

use crate::classifier::classify;
use crate::database::MediaStore;
use crate::error::{FetchError, SaveError};
use crate::models::{MediaDescriptor, MediaKind, Operator, SaveRecord, StoredLocation};
use crate::naming;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use teloxide::types::Message;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Resolves a content id to the bytes of the blob it names
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, content_id: &str) -> Result<Vec<u8>, FetchError>;
}

/// Source of the current time, injectable for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct SavePipeline {
    store: MediaStore,
    fetcher: Arc<dyn ContentFetcher>,
    clock: Arc<dyn Clock>,
    storage_root: PathBuf,
}

impl SavePipeline {
    pub fn new(
        store: MediaStore,
        fetcher: Arc<dyn ContentFetcher>,
        clock: Arc<dyn Clock>,
        storage_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
            storage_root: storage_root.into(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Create the storage root and every kind subdirectory
    pub async fn prepare_layout(&self) -> Result<(), SaveError> {
        for kind in MediaKind::ALL {
            let dir = self.storage_root.join(kind.directory());
            fs::create_dir_all(&dir)
                .await
                .map_err(|source| SaveError::WriteFailed { path: dir, source })?;
        }

        info!("Storage layout ready under {}", self.storage_root.display());
        Ok(())
    }

    /// Classify the replied-to `message` and archive its media
    pub async fn archive(
        &self,
        message: &Message,
        operator: &Operator,
    ) -> Result<(MediaDescriptor, StoredLocation), SaveError> {
        let descriptor = classify(message).ok_or(SaveError::NoMediaFound)?;
        let location = self.save(&descriptor, operator).await?;
        Ok((descriptor, location))
    }

    /// Fetch, write, then index one descriptor.
    ///
    /// Saving a content id that is already indexed overwrites its metadata
    /// row and removes the file the old row pointed at. Nothing is committed
    /// to the store unless the file write completed.
    pub async fn save(
        &self,
        descriptor: &MediaDescriptor,
        operator: &Operator,
    ) -> Result<StoredLocation, SaveError> {
        let content_id = &descriptor.content_id;

        let bytes = self.fetcher.fetch(content_id).await.map_err(|source| {
            warn!("Fetching {} failed: {}", content_id, source);
            SaveError::FetchFailed {
                content_id: content_id.clone(),
                source,
            }
        })?;

        let derived = naming::derive(descriptor, self.clock.now());
        let dir = self.storage_root.join(derived.relative_dir);
        let path = dir.join(&derived.filename);

        fs::create_dir_all(&dir)
            .await
            .map_err(|source| SaveError::WriteFailed {
                path: dir.clone(),
                source,
            })?;

        write_atomically(&path, &bytes).await.map_err(|source| {
            warn!("Writing {} failed: {}", path.display(), source);
            SaveError::WriteFailed {
                path: path.clone(),
                source,
            }
        })?;

        let location = StoredLocation {
            kind: descriptor.kind(),
            relative_dir: derived.relative_dir,
            filename: derived.filename,
            path,
            bytes_written: bytes.len() as u64,
        };

        let record = SaveRecord::new(descriptor, &location, operator, self.clock.now());
        let committed = async {
            let previous = self.store.storage_path(content_id).await?;
            self.store.upsert(&record).await?;
            Ok::<_, DatabaseError>(previous)
        }
        .await;

        let previous = match committed {
            Ok(previous) => previous,
            Err(source) => {
                error!(
                    "Index inconsistency: {} is on disk but its metadata for {} was not committed: {}",
                    location.path.display(),
                    content_id,
                    source
                );
                return Err(SaveError::StoreFailed {
                    path: location.path,
                    source,
                });
            }
        };

        if let Some(replaced) = previous.map(PathBuf::from) {
            if replaced != location.path {
                remove_replaced(&replaced).await;
            }
        }

        info!(
            "Saved {} {} to {} ({} bytes)",
            location.kind,
            content_id,
            location.path.display(),
            location.bytes_written
        );
        Ok(location)
    }
}

/// Drop the file an index row pointed at before a re-save moved it
async fn remove_replaced(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => info!("Removed replaced file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove replaced file {}: {}", path.display(), e),
    }
}

/// Write `bytes` to a temporary sibling of `path`, then rename it into
/// place. The temporary file is removed if any step fails.
async fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        ".{}.{}.part",
        file_name,
        Uuid::new_v4().simple()
    ));

    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if result.is_err() {
        if let Err(e) = fs::remove_file(&temp_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove partial file {}: {}", temp_path.display(), e);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::test_store;
    use crate::models::{KindStats, MediaAttachment, Sender};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[derive(Default)]
    struct MemoryFetcher {
        blobs: HashMap<String, Vec<u8>>,
    }

    impl MemoryFetcher {
        fn with(mut self, content_id: &str, bytes: &[u8]) -> Self {
            self.blobs.insert(content_id.to_string(), bytes.to_vec());
            self
        }
    }

    #[async_trait]
    impl ContentFetcher for MemoryFetcher {
        async fn fetch(&self, content_id: &str) -> Result<Vec<u8>, FetchError> {
            self.blobs
                .get(content_id)
                .cloned()
                .ok_or_else(|| FetchError::MissingPath(content_id.to_string()))
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap()
    }

    fn operator() -> Operator {
        Operator {
            user_id: 99,
            username: Some("admin".to_string()),
            display_name: "Admin".to_string(),
        }
    }

    fn photo(content_id: &str, size: i64, sender: &str) -> MediaDescriptor {
        MediaDescriptor {
            content_id: content_id.to_string(),
            attachment: MediaAttachment::Photo {
                width: 1280,
                height: 960,
            },
            size_bytes: Some(size),
            caption: None,
            sender: Sender {
                id: Some(7),
                username: None,
                display_name: Some(sender.to_string()),
            },
            chat_id: -100,
            source_message_id: 12,
        }
    }

    async fn pipeline(fetcher: MemoryFetcher) -> (TempDir, TempDir, MediaStore, SavePipeline) {
        let (db_dir, store) = test_store().await;
        let root = tempfile::tempdir().expect("storage root");
        let pipeline = SavePipeline::new(
            store.clone(),
            Arc::new(fetcher),
            Arc::new(FixedClock(fixed_now())),
            root.path(),
        );
        pipeline.prepare_layout().await.expect("layout");
        (db_dir, root, store, pipeline)
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_prepare_layout_creates_every_kind_directory() {
        let (_db, root, _store, pipeline) = pipeline(MemoryFetcher::default()).await;
        pipeline.prepare_layout().await.expect("second call is idempotent");

        assert_eq!(
            dir_entries(root.path()),
            vec!["animation", "audio", "document", "photo", "video", "video_note", "voice"]
        );
    }

    #[tokio::test]
    async fn test_save_photo_end_to_end() {
        let fetcher = MemoryFetcher::default().with("ABC123XYZ", &[7u8; 2048]);
        let (_db, root, store, pipeline) = pipeline(fetcher).await;

        let location = pipeline
            .save(&photo("ABC123XYZ", 2048, "Alice"), &operator())
            .await
            .expect("save should succeed");

        assert_eq!(location.relative_dir, "photo");
        assert_eq!(location.filename, "20240301_101530_ABC123XY.jpg");
        assert_eq!(location.path, root.path().join("photo").join("20240301_101530_ABC123XY.jpg"));
        assert_eq!(std::fs::read(&location.path).unwrap().len(), 2048);

        let recent = store.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].saved_filename, "20240301_101530_ABC123XY.jpg");
        assert_eq!(recent[0].sender_display_name.as_deref(), Some("Alice"));

        let stats = store.stats_by_kind().await.unwrap();
        assert!(stats.contains(&KindStats {
            kind: MediaKind::Photo,
            count: 1,
            total_size: 2048
        }));

        let record = store.get("ABC123XYZ").await.unwrap().expect("record");
        assert_eq!(record.saved_by_user_id, 99);
        assert_eq!(record.saved_by_username.as_deref(), Some("admin"));
        assert_eq!(record.saved_at, fixed_now());
        assert_eq!(record.width, Some(1280));
        assert_eq!(record.storage_path, location.path.to_string_lossy());
    }

    #[tokio::test]
    async fn test_resave_same_content_replaces_metadata() {
        let fetcher = MemoryFetcher::default().with("ABC123XYZ", b"v2");
        let (_db, root, store, pipeline) = pipeline(fetcher).await;

        pipeline
            .save(&photo("ABC123XYZ", 2, "Alice"), &operator())
            .await
            .expect("first save");
        pipeline
            .save(&photo("ABC123XYZ", 2, "Bob"), &operator())
            .await
            .expect("second save");

        assert_eq!(store.count().await.unwrap(), 1);
        let record = store.get("ABC123XYZ").await.unwrap().expect("record");
        assert_eq!(record.sender_display_name.as_deref(), Some("Bob"));
        assert_eq!(
            dir_entries(&root.path().join("photo")),
            vec!["20240301_101530_ABC123XY.jpg"]
        );
    }

    #[tokio::test]
    async fn test_resave_in_later_second_removes_replaced_file() {
        let fetcher = Arc::new(MemoryFetcher::default().with("ABC123XYZ", b"v1"));
        let (_db, root, store, _) = pipeline(MemoryFetcher::default()).await;
        let first = SavePipeline::new(
            store.clone(),
            fetcher.clone(),
            Arc::new(FixedClock(fixed_now())),
            root.path(),
        );
        let second = SavePipeline::new(
            store.clone(),
            fetcher,
            Arc::new(FixedClock(fixed_now() + chrono::Duration::seconds(1))),
            root.path(),
        );

        let old = first.save(&photo("ABC123XYZ", 2, "Alice"), &operator()).await.unwrap();
        let new = second.save(&photo("ABC123XYZ", 2, "Alice"), &operator()).await.unwrap();

        assert_ne!(old.path, new.path);
        assert!(!old.path.exists());
        assert_eq!(
            dir_entries(&root.path().join("photo")),
            vec!["20240301_101531_ABC123XY.jpg"]
        );
        let record = store.get("ABC123XYZ").await.unwrap().expect("record");
        assert_eq!(record.storage_path, new.path.to_string_lossy());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_no_state() {
        let (_db, root, store, pipeline) = pipeline(MemoryFetcher::default()).await;

        let err = pipeline
            .save(&photo("MISSING1", 10, "Alice"), &operator())
            .await
            .expect_err("fetch should fail");

        assert!(matches!(err, SaveError::FetchFailed { ref content_id, .. } if content_id == "MISSING1"));
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(dir_entries(&root.path().join("photo")).is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_never_reaches_store() {
        let fetcher = MemoryFetcher::default().with("ABC123XYZ", b"bytes");
        let (_db, root, store, pipeline) = pipeline(fetcher).await;

        // A directory squatting on the target name makes the final rename fail.
        let blocker = root.path().join("photo").join("20240301_101530_ABC123XY.jpg");
        std::fs::create_dir(&blocker).unwrap();

        let err = pipeline
            .save(&photo("ABC123XYZ", 5, "Alice"), &operator())
            .await
            .expect_err("write should fail");

        assert!(matches!(err, SaveError::WriteFailed { .. }));
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(
            dir_entries(&root.path().join("photo")),
            vec!["20240301_101530_ABC123XY.jpg"]
        );
        assert!(blocker.is_dir());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_file_and_reports_it() {
        let dir = tempfile::tempdir().unwrap();
        let pool = common::database::init_pool(&common::database::DatabaseConfig::new(
            dir.path().join("no_schema.db"),
        ))
        .await
        .unwrap();
        let root = tempfile::tempdir().unwrap();
        let pipeline = SavePipeline::new(
            MediaStore::new(pool),
            Arc::new(MemoryFetcher::default().with("ABC123XYZ", b"bytes")),
            Arc::new(FixedClock(fixed_now())),
            root.path(),
        );

        let err = pipeline
            .save(&photo("ABC123XYZ", 5, "Alice"), &operator())
            .await
            .expect_err("upsert should fail without a table");

        match err {
            SaveError::StoreFailed { path, .. } => assert!(path.is_file()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_saves_of_different_content() {
        let fetcher = MemoryFetcher::default()
            .with("FIRSTFILE1", b"one")
            .with("SECONDFILE", b"two");
        let (_db, root, store, pipeline) = pipeline(fetcher).await;

        let first = photo("FIRSTFILE1", 3, "Alice");
        let second = photo("SECONDFILE", 3, "Bob");
        let operator = operator();
        let (a, b) = tokio::join!(
            pipeline.save(&first, &operator),
            pipeline.save(&second, &operator)
        );

        assert_ne!(a.unwrap().path, b.unwrap().path);
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(
            dir_entries(&root.path().join("photo")),
            vec!["20240301_101530_FIRSTFIL.jpg", "20240301_101530_SECONDFI.jpg"]
        );
    }

    #[tokio::test]
    async fn test_archive_without_media_is_no_media_found() {
        let (_db, _root, store, pipeline) = pipeline(MemoryFetcher::default()).await;
        let message: Message = serde_json::from_value(serde_json::json!({
            "message_id": 1,
            "date": 1709288130,
            "chat": {"id": -100, "type": "supergroup", "title": "Log"},
            "text": "no attachment here"
        }))
        .unwrap();

        let err = pipeline.archive(&message, &operator()).await.unwrap_err();
        assert!(matches!(err, SaveError::NoMediaFound));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
