//! src/services/local_backend.rs
//!
//! LocalBackend: an on-host object store with SQLite for metadata and local
//! disk for payloads sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//! Listing follows ListObjectsV2 rules (lexical order, opaque continuation
//! tokens) so the gateway paginates it exactly like a remote S3 endpoint.

use crate::{
    models::{
        bucket::Bucket,
        listing::{ListPage, ListPageRequest, MAX_KEYS_PER_PAGE, ObjectBody},
        object::Object,
    },
    services::store::{ObjectStoreBackend, StoreError, StoreResult},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use sqlx::{
    QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const SUPPORTED_REGIONS: [&str; 16] = [
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-southeast-1",
    "ap-northeast-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-2",
    "ap-northeast-3",
    "me-south-1",
];

#[derive(Clone)]
pub struct LocalBackend {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalBackend {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Connect to `database_url` (creating the file if needed), ensure the
    /// storage directory exists and apply the schema.
    pub async fn open(database_url: &str, base_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let backend = Self::new(Arc::new(db), base_path);
        backend.migrate().await?;
        Ok(backend)
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::debug!("Running {} migration statements...", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StoreError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StoreError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| StoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.trim() != name {
            return Err(invalid("cannot begin or end with whitespace"));
        }
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len()) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid(
                "must start and end with a lowercase letter or digit",
            ));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }
        Ok(())
    }

    fn ensure_region_valid(&self, region: &str) -> StoreResult<()> {
        if SUPPORTED_REGIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(region))
        {
            Ok(())
        } else {
            Err(StoreError::UnsupportedRegion(region.to_string()))
        }
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard directories from MD5(bucket/key), to keep directory
    /// fan-out low.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<Sqlite, Bucket>(
            "SELECT id, name, region, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::BucketNotFound(bucket.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StoreResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, filename, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::object_not_found(&bucket.name, key),
            other => StoreError::Sqlx(other),
        })
    }

    /// Write the payload to a temp file, fsync, then rename into place.
    /// The temp file is removed on any failure.
    /// Write `body` to a synced temp file next to `file_path` and return the
    /// temp path. The payload is only visible after `commit_payload`.
    async fn stage_payload(&self, file_path: &Path, body: &[u8]) -> StoreResult<PathBuf> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok(tmp_path)
    }

    async fn commit_payload(tmp_path: &Path, file_path: &Path) -> io::Result<()> {
        match fs::rename(tmp_path, file_path).await {
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                fs::remove_file(file_path).await?;
                fs::rename(tmp_path, file_path).await
            }
            other => other,
        }
    }

    async fn delete_object(&self, bucket: &Bucket, key: &str) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let result = sqlx::query("DELETE FROM objects WHERE key = ? AND bucket_id = ?")
            .bind(key)
            .bind(bucket.id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            debug!("delete of missing key {} in {} ignored", key, bucket.name);
            return Ok(());
        }

        let file_path = self.object_path(&bucket.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    /// Remove empty directories from `start` up to, not including, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStoreBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn list_buckets(&self) -> StoreResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM buckets ORDER BY name")
            .fetch_all(&*self.db)
            .await?;
        Ok(names)
    }

    async fn create_bucket(&self, name: &str, region: &str) -> StoreResult<()> {
        self.ensure_bucket_name_safe(name)?;
        let normalized_region = region.to_lowercase();
        self.ensure_region_valid(&normalized_region)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        match sqlx::query(
            "INSERT INTO buckets (id, name, region, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(&normalized_region)
        .bind(Utc::now())
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn list_page(&self, bucket: &str, request: &ListPageRequest) -> StoreResult<ListPage> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = request.max_keys.clamp(1, MAX_KEYS_PER_PAGE);
        let fetch_limit = max_keys + 1;

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT key FROM objects WHERE bucket_id = ");
        builder.push_bind(bucket_rec.id);

        // substr instead of LIKE: keys routinely contain `_` and LIKE is
        // case-insensitive for ASCII.
        if let Some(prefix) = request.prefix.as_deref().filter(|p| !p.is_empty()) {
            builder.push(" AND substr(key, 1, ");
            builder.push_bind(prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(prefix.to_string());
        }

        let resume_after = request
            .continuation_token
            .as_deref()
            .map(decode_continuation_token)
            .or_else(|| request.start_after.clone());
        if let Some(after) = resume_after {
            builder.push(" AND key > ");
            builder.push_bind(after);
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut keys: Vec<String> = builder
            .build_query_scalar()
            .fetch_all(&*self.db)
            .await?;

        let is_truncated = keys.len() == fetch_limit;
        if is_truncated {
            keys.pop();
        }
        let next_continuation_token = if is_truncated {
            keys.last().map(|last| encode_continuation_token(last))
        } else {
            None
        };

        Ok(ListPage {
            keys,
            is_truncated,
            next_continuation_token,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::object_not_found(bucket, key)
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok(ObjectBody {
            content_type: object.content_type,
            content_length: u64::try_from(object.size_bytes).ok(),
            stream: ReaderStream::new(file).boxed(),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let tmp_path = self.stage_payload(&file_path, &body).await?;

        let filename = key.rsplit('/').next().unwrap_or(key).to_string();
        let etag = format!("{:x}", md5::compute(&body));

        // The row is written first and committed only once the payload is in
        // place, so a failure at either step leaves the previous object intact.
        let committed = async {
            let mut tx = self.db.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO objects (
                    id, bucket_id, key, filename, content_type, size_bytes, etag, last_modified
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(bucket_id, key) DO UPDATE SET
                    filename = excluded.filename,
                    content_type = excluded.content_type,
                    size_bytes = excluded.size_bytes,
                    etag = excluded.etag,
                    last_modified = excluded.last_modified
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(bucket_rec.id)
            .bind(key)
            .bind(&filename)
            .bind(content_type)
            .bind(body.len() as i64)
            .bind(&etag)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            Self::commit_payload(&tmp_path, &file_path).await?;
            tx.commit().await?;
            Ok::<_, StoreError>(())
        }
        .await;

        if committed.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        committed
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<()> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        for key in keys {
            self.delete_object(&bucket_rec, key).await?;
        }
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn encode_continuation_token(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

/// Tokens that fail to decode are treated as raw keys.
fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}

/// Rejects names formatted like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> (LocalBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let backend = LocalBackend::new(Arc::new(db), dir.path().join("objects"));
        backend.migrate().await.expect("schema");
        backend
            .create_bucket("photos", "us-east-2")
            .await
            .expect("create bucket");
        (backend, dir)
    }

    #[tokio::test]
    async fn failed_metadata_write_keeps_previous_payload() {
        let (backend, _dir) = backend().await;
        backend
            .put_object(
                "photos",
                "a.png",
                Bytes::from_static(b"first"),
                Some("image/png"),
            )
            .await
            .unwrap();
        sqlx::query(
            "CREATE TRIGGER objects_frozen BEFORE UPDATE ON objects \
             BEGIN SELECT RAISE(ABORT, 'objects are frozen'); END",
        )
        .execute(&*backend.db)
        .await
        .unwrap();

        let err = backend
            .put_object("photos", "a.png", Bytes::from_static(b"second"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlx(_)));

        let body = backend.get_object("photos", "a.png").await.unwrap();
        assert_eq!(body.content_type.as_deref(), Some("image/png"));
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn put_then_get_returns_payload_and_content_type() {
        let (backend, _dir) = backend().await;
        backend
            .put_object(
                "photos",
                "2024/beach.jpg",
                Bytes::from_static(b"jpeg-bytes"),
                Some("image/jpeg"),
            )
            .await
            .unwrap();

        let body = backend
            .get_object("photos", "2024/beach.jpg")
            .await
            .unwrap();
        assert_eq!(body.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(
            body.collect().await.unwrap(),
            Bytes::from_static(b"jpeg-bytes")
        );
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let (backend, _dir) = backend().await;
        let err = backend.get_object("photos", "nope.png").await.unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let (backend, _dir) = backend().await;
        for body in [&b"first"[..], &b"second"[..]] {
            backend
                .put_object("photos", "a.png", Bytes::copy_from_slice(body), None)
                .await
                .unwrap();
        }
        let body = backend.get_object("photos", "a.png").await.unwrap();
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"second"));

        let page = backend
            .list_page(
                "photos",
                &ListPageRequest {
                    max_keys: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.keys, vec!["a.png".to_string()]);
    }

    #[tokio::test]
    async fn list_page_truncates_and_resumes_from_token() {
        let (backend, _dir) = backend().await;
        for n in 0..5 {
            backend
                .put_object("photos", &format!("k{n}"), Bytes::from_static(b"x"), None)
                .await
                .unwrap();
        }

        let first = backend
            .list_page(
                "photos",
                &ListPageRequest {
                    max_keys: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.keys, vec!["k0", "k1"]);
        assert!(first.is_truncated);

        let second = backend
            .list_page(
                "photos",
                &ListPageRequest {
                    max_keys: 10,
                    continuation_token: first.next_continuation_token.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["k2", "k3", "k4"]);
        assert!(!second.is_truncated);
        assert!(second.next_continuation_token.is_none());
    }

    #[tokio::test]
    async fn prefix_filter_treats_underscore_literally() {
        let (backend, _dir) = backend().await;
        for key in ["a_b.jpg", "axb.jpg", "A_b.jpg"] {
            backend
                .put_object("photos", key, Bytes::from_static(b"x"), None)
                .await
                .unwrap();
        }
        let page = backend
            .list_page(
                "photos",
                &ListPageRequest {
                    prefix: Some("a_".into()),
                    max_keys: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.keys, vec!["a_b.jpg"]);
    }

    #[tokio::test]
    async fn delete_objects_removes_rows_and_ignores_missing() {
        let (backend, _dir) = backend().await;
        backend
            .put_object("photos", "x/y.png", Bytes::from_static(b"x"), None)
            .await
            .unwrap();
        backend
            .delete_objects("photos", &["x/y.png".into(), "never.png".into()])
            .await
            .unwrap();
        assert!(
            backend
                .get_object("photos", "x/y.png")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn create_bucket_twice_reports_conflict() {
        let (backend, _dir) = backend().await;
        let err = backend.create_bucket("photos", "local").await.unwrap_err();
        assert!(matches!(err, StoreError::BucketAlreadyExists(_)));
        assert_eq!(backend.list_buckets().await.unwrap(), vec!["photos"]);
    }

    #[tokio::test]
    async fn rejects_invalid_names_and_keys() {
        let (backend, _dir) = backend().await;
        assert!(matches!(
            backend.create_bucket("Bad_Name", "local").await,
            Err(StoreError::InvalidBucketName { .. })
        ));
        assert!(matches!(
            backend.create_bucket("192.168.0.1", "local").await,
            Err(StoreError::InvalidBucketName { .. })
        ));
        assert!(matches!(
            backend.create_bucket("fine-name", "mars-north-1").await,
            Err(StoreError::UnsupportedRegion(_))
        ));
        assert!(matches!(
            backend
                .put_object("photos", "../escape", Bytes::new(), None)
                .await,
            Err(StoreError::InvalidObjectKey)
        ));
    }

    #[test]
    fn continuation_tokens_round_trip_and_tolerate_raw_keys() {
        let token = encode_continuation_token("dir/file_cache.jpg");
        assert_eq!(decode_continuation_token(&token), "dir/file_cache.jpg");
        assert_eq!(decode_continuation_token("not base64!"), "not base64!");
    }
}
