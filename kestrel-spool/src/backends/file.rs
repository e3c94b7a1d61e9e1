use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use kestrel_common::{internal, message::safe_filename};
use serde::Deserialize;
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    Result, SpoolError, ValidationError, record::PendingRecord, store::PendingStore,
};

const RECORD_SUFFIX: &str = ".pending";
const BODY_SUFFIX: &str = ".body";
const TEMP_PREFIX: &str = ".tmp_";
const DELETED_SUFFIX: &str = ".deleted";

/// Directory backed pending store.
///
/// For a message id `<id@host>` two files are kept, named after
/// [`safe_filename`]:
/// - `id@host.pending`: the two-line record
/// - `id@host.body`: the retained body
///
/// # Atomicity
/// Both files are written under a `.tmp_` prefix, synced, then renamed into
/// place; the body first, so a visible record always has its body. Deletion
/// renames both to a `.deleted` suffix before removing them. Leftovers of
/// either kind are removed by [`FilePendingStore::init`].
#[derive(Debug, Clone)]
pub struct FilePendingStore {
    path: PathBuf,
}

impl Default for FilePendingStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/kestrel/pending"),
        }
    }
}

impl<'de> Deserialize<'de> for FilePendingStore {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            path: PathBuf,
        }

        let helper = Helper::deserialize(deserializer)?;
        Self::new(helper.path).map_err(serde::de::Error::custom)
    }
}

impl FilePendingStore {
    /// # Errors
    /// If `path` fails [`Self::validate_path`].
    pub fn new(path: impl Into<PathBuf>) -> std::result::Result<Self, ValidationError> {
        let path = path.into();
        Self::validate_path(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reject `..` components, relative paths and system directories.
    ///
    /// # Errors
    /// The first rule `path` breaks.
    pub fn validate_path(path: &Path) -> std::result::Result<(), ValidationError> {
        let display = || path.display().to_string();

        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(ValidationError::ParentDirectory(display()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(display()));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];
        if let Some(prefix) = sensitive_prefixes
            .into_iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix,
                path: display(),
            });
        }

        Ok(())
    }

    /// Create the directory if needed and clear out leftovers of interrupted
    /// writes and deletes.
    ///
    /// # Errors
    /// If the directory cannot be created or is not a directory.
    pub fn init(&self) -> Result<()> {
        internal!("Initialising pending store at {}", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        let mut cleaned = 0;
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if name.starts_with(TEMP_PREFIX) || name.ends_with(DELETED_SUFFIX) {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned files from pending store"
            );
        }

        Ok(())
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{key}{RECORD_SUFFIX}"))
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{key}{BODY_SUFFIX}"))
    }

    async fn write_durably(&self, target: &Path, contents: &[u8]) -> Result<()> {
        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = self.path.join(format!("{TEMP_PREFIX}{name}"));

        let mut file = fs::File::create(&temp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp, target).await?;
        Ok(())
    }
}

#[async_trait]
impl PendingStore for FilePendingStore {
    async fn save(&self, message_id: &str, mic: &str, body: &[u8]) -> Result<PendingRecord> {
        let key = safe_filename(message_id);
        let record_path = self.record_path(&key);
        let body_path = self.body_path(&key);

        if fs::try_exists(&record_path).await? {
            return Err(SpoolError::AlreadyExists(message_id.to_string()));
        }

        self.write_durably(&body_path, body).await?;

        let record = PendingRecord::new(mic, body_path.display().to_string());
        if let Err(err) = self.write_durably(&record_path, &record.encode()).await {
            let _ = fs::remove_file(&body_path).await;
            return Err(err);
        }

        internal!(
            level = DEBUG,
            "Saved pending record for {message_id} to {}",
            record_path.display()
        );

        Ok(record)
    }

    async fn load(&self, message_id: &str) -> Result<Option<PendingRecord>> {
        let record_path = self.record_path(&safe_filename(message_id));

        match fs::read(&record_path).await {
            Ok(raw) => PendingRecord::decode(&raw, &record_path.display().to_string()).map(Some),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn read_body(&self, record: &PendingRecord) -> Result<Vec<u8>> {
        Ok(fs::read(&record.body).await?)
    }

    async fn delete(&self, message_id: &str) -> Result<()> {
        let key = safe_filename(message_id);
        let record_path = self.record_path(&key);
        let body_path = self.body_path(&key);

        let deleted_record = self.path.join(format!("{key}{RECORD_SUFFIX}{DELETED_SUFFIX}"));
        let deleted_body = self.path.join(format!("{key}{BODY_SUFFIX}{DELETED_SUFFIX}"));

        match fs::rename(&record_path, &deleted_record).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SpoolError::NotFound(message_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        let body_present = match fs::rename(&body_path, &deleted_body).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };

        fs::remove_file(&deleted_record).await?;
        if body_present {
            fs::remove_file(&deleted_body).await?;
        }

        internal!(level = DEBUG, "Deleted pending record for {message_id}");

        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut keys = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if !name.starts_with(TEMP_PREFIX)
                && let Some(key) = name.strip_suffix(RECORD_SUFFIX)
            {
                keys.push(key.to_string());
            }
        }

        keys.sort();
        Ok(keys)
    }
}
