use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

const BACKUP_MARKER: &str = ".backup.";
const TEMP_SUFFIX: &str = ".tmp";

/// Default number of backups retained per record.
pub const DEFAULT_BACKUP_KEEP: usize = 3;

/// Errors that can occur during record storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error while reading or copying a record.
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// Writing the replacement record failed; the previous content is intact.
    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    /// The data could not be serialized; the previous content is intact.
    #[error("Failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// The record exists but is not valid YAML for the requested shape.
    #[error("Invalid YAML in {path}: {source}")]
    Format {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Result type for record storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// YAML record files with atomic replacement and rotating backups.
#[derive(Debug, Clone)]
pub struct DataStore {
    backup_keep: usize,
}

impl Default for DataStore {
    fn default() -> Self {
        Self {
            backup_keep: DEFAULT_BACKUP_KEEP,
        }
    }
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backups kept by [`DataStore::backup_default`].
    pub fn with_backup_keep(mut self, keep: usize) -> Self {
        self.backup_keep = keep;
        self
    }

    pub fn backup_keep(&self) -> usize {
        self.backup_keep
    }

    /// Replace `path` with `data` serialized as YAML.
    ///
    /// The data is written to a temporary file in the same directory and
    /// renamed over the target. Any failure before the rename removes the
    /// temporary file and leaves the target untouched.
    pub fn atomic_write<T: Serialize + ?Sized>(&self, path: &Path, data: &T) -> StoreResult<()> {
        let write_error = |source: io::Error| StoreError::Write {
            path: path.to_path_buf(),
            source,
        };

        let parent = parent_dir(path);
        fs::create_dir_all(&parent).map_err(write_error)?;

        let prefix = format!(".{}.", file_name(path));
        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&parent)
            .map_err(write_error)?;

        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_yaml::to_writer(&mut writer, data).map_err(|source| StoreError::Serialize {
                path: path.to_path_buf(),
                source,
            })?;
            writer.flush().map_err(write_error)?;
        }
        temp.as_file().sync_all().map_err(write_error)?;

        temp.persist(path).map_err(|err| write_error(err.error))?;
        debug!(path = %path.display(), "Record written");
        Ok(())
    }

    /// Read a YAML record.
    ///
    /// A missing or empty file yields `T::default()`.
    pub fn read<T: DeserializeOwned + Default>(&self, path: &Path) -> StoreResult<T> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(T::default());
        }

        serde_yaml::from_str(&content).map_err(|source| StoreError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    /// [`DataStore::backup`] with the configured retention.
    pub fn backup_default(&self, path: &Path) -> StoreResult<bool> {
        self.backup(path, self.backup_keep)
    }

    /// Copy `path` to `<name>.backup.<secs>.<micros>` and keep only the
    /// `keep_count` newest backups. Returns `false` when `path` is absent.
    pub fn backup(&self, path: &Path, keep_count: usize) -> StoreResult<bool> {
        if !path.exists() {
            return Ok(false);
        }

        let parent = parent_dir(path);
        let name = file_name(path);
        let mut stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut backup_path = parent.join(backup_name(&name, stamp));
        while backup_path.exists() {
            stamp += Duration::from_micros(1);
            backup_path = parent.join(backup_name(&name, stamp));
        }

        fs::copy(path, &backup_path).map_err(|source| StoreError::Io {
            path: backup_path.clone(),
            source,
        })?;
        debug!(backup = %backup_path.display(), "Backup created");

        for stale in self.list_backups(path)?.into_iter().skip(keep_count) {
            match fs::remove_file(&stale) {
                Ok(()) => debug!(backup = %stale.display(), "Old backup removed"),
                Err(err) => warn!(backup = %stale.display(), "Failed to remove old backup: {}", err),
            }
        }

        Ok(true)
    }

    /// Backups of `path`, newest first by modification time.
    ///
    /// Files whose timestamps tie are ordered by the stamp embedded in their
    /// name.
    pub fn list_backups(&self, path: &Path) -> StoreResult<Vec<PathBuf>> {
        let parent = parent_dir(path);
        let prefix = format!("{}{}", file_name(path), BACKUP_MARKER);

        let entries = match fs::read_dir(&parent) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: parent, source }),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: parent.clone(),
                source,
            })?;
            let entry_name = entry.file_name().to_string_lossy().into_owned();
            let Some(embedded) = entry_name
                .strip_prefix(&prefix)
                .and_then(parse_backup_stamp)
            else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(UNIX_EPOCH);
            backups.push((modified, embedded, entry.path()));
        }

        backups.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        Ok(backups.into_iter().map(|(_, _, path)| path).collect())
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn backup_name(name: &str, stamp: Duration) -> String {
    format!(
        "{}{}{}.{:06}",
        name,
        BACKUP_MARKER,
        stamp.as_secs(),
        stamp.subsec_micros()
    )
}

fn parse_backup_stamp(stamp: &str) -> Option<(u64, u32)> {
    let (secs, micros) = stamp.split_once('.')?;
    Some((secs.parse().ok()?, micros.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde::{Deserialize, Serializer};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        version: String,
        #[serde(default)]
        items: Vec<u32>,
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("refusing to serialize"))
        }
    }

    fn stray_temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(TEMP_SUFFIX))
            .collect()
    }

    #[test]
    fn test_atomic_write_then_read() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("nested/status.yaml");
        let store = DataStore::new();
        let data = Sample {
            version: "1.0".to_string(),
            items: vec![1, 2, 3],
        };

        store.atomic_write(&path, &data).expect("write");

        let read: Sample = store.read(&path).expect("read");
        assert_eq!(read, data);
        assert!(stray_temp_files(path.parent().expect("parent")).is_empty());
    }

    #[test]
    fn test_failed_serialization_keeps_previous_content() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("status.yaml");
        let store = DataStore::new();
        let original = Sample {
            version: "1.0".to_string(),
            items: Vec::new(),
        };
        store.atomic_write(&path, &original).expect("write");

        let err = store
            .atomic_write(&path, &Unserializable)
            .expect_err("serialization must fail");
        assert!(matches!(err, StoreError::Serialize { .. }));

        let read: Sample = store.read(&path).expect("read");
        assert_eq!(read, original);
        assert!(stray_temp_files(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_failed_rename_keeps_target_and_cleans_up() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("status.yaml");
        fs::create_dir_all(path.join("keep")).expect("mkdir");
        let store = DataStore::new();

        let err = store
            .atomic_write(
                &path,
                &Sample {
                    version: "1.0".to_string(),
                    items: Vec::new(),
                },
            )
            .expect_err("rename over a directory must fail");
        assert!(matches!(err, StoreError::Write { .. }));

        assert!(path.is_dir());
        assert!(path.join("keep").is_dir());
        assert!(stray_temp_files(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_read_missing_and_empty_files() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = DataStore::new();
        let missing = temp_dir.path().join("missing.yaml");
        let read: BTreeMap<String, String> = store.read(&missing).expect("read");
        assert!(read.is_empty());

        let empty = temp_dir.path().join("empty.yaml");
        fs::write(&empty, "  \n").expect("write");
        let read: Sample = store.read(&empty).expect("read");
        assert_eq!(read, Sample::default());
    }

    #[test]
    fn test_read_malformed_file_is_format_error() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("status.yaml");
        fs::write(&path, "version: [unclosed\n").expect("write");

        let err = DataStore::new().read::<Sample>(&path).expect_err("format");
        assert!(matches!(err, StoreError::Format { .. }));
    }

    #[test]
    fn test_backup_missing_file_is_noop() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("status.yaml");
        let store = DataStore::new();
        assert!(!store.backup(&path, 3).expect("backup"));
        assert!(store.list_backups(&path).expect("list").is_empty());
    }

    #[test]
    fn test_backup_rotation_keeps_newest() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("status.yaml");
        let store = DataStore::new();

        for generation in 0..5 {
            fs::write(&path, format!("version: '{generation}'\n")).expect("write");
            assert!(store.backup(&path, 3).expect("backup"));
        }

        let backups = store.list_backups(&path).expect("list");
        assert_eq!(backups.len(), 3);
        let versions: Vec<String> = backups
            .iter()
            .map(|backup| store.read::<Sample>(backup).expect("read").version)
            .collect();
        assert_eq!(versions, vec!["4", "3", "2"]);
    }

    #[test]
    fn test_backup_names_embed_timestamp() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("status.yaml");
        fs::write(&path, "version: '1'\n").expect("write");
        let store = DataStore::new();
        store.backup(&path, 3).expect("backup");

        let backups = store.list_backups(&path).expect("list");
        let name = backups[0]
            .file_name()
            .expect("name")
            .to_string_lossy()
            .into_owned();
        let stamp = name.strip_prefix("status.yaml.backup.").expect("prefix");
        let (_, micros) = stamp.split_once('.').expect("separator");
        assert_eq!(micros.len(), 6);
        assert!(parse_backup_stamp(stamp).is_some());
    }

    #[test]
    fn test_list_backups_orders_by_mtime() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("status.yaml");
        let older_name = temp_dir.path().join("status.yaml.backup.200.000000");
        let newer_name = temp_dir.path().join("status.yaml.backup.100.000000");
        fs::write(&older_name, "version: old\n").expect("write");
        fs::write(&newer_name, "version: new\n").expect("write");
        fs::write(temp_dir.path().join("status.yaml.backup.bogus"), "x").expect("write");

        let now = SystemTime::now();
        fs::File::options()
            .write(true)
            .open(&older_name)
            .expect("open")
            .set_modified(now - Duration::from_secs(60))
            .expect("mtime");
        fs::File::options()
            .write(true)
            .open(&newer_name)
            .expect("open")
            .set_modified(now)
            .expect("mtime");

        let backups = DataStore::new().list_backups(&path).expect("list");
        assert_eq!(backups, vec![newer_name, older_name]);
    }
}
