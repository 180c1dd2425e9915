//! JSON files under the cache and data roots.
//!
//! Files live at `<root>/<group>/<name>.json`. Writes go through a temporary
//! sibling and a rename, so a reader never observes a half-written file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::{Category, SystemPaths};
use crate::error::PersistenceError;

const EXTENSION: &str = ".json";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    pub category: Category,
    pub group: Option<String>,
    pub name: String,
}

impl Destination {
    pub fn new(category: Category, group: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            category,
            group: group.map(str::to_string),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct JsonPersistence {
    paths: SystemPaths,
}

impl JsonPersistence {
    pub fn new(paths: SystemPaths) -> Self {
        Self { paths }
    }

    fn dir(&self, category: Category, group: Option<&str>) -> PathBuf {
        let root = self.paths.get(category);
        match group {
            Some(group) => root.join(group),
            None => root.to_path_buf(),
        }
    }

    pub fn path(&self, destination: &Destination) -> PathBuf {
        self.dir(destination.category, destination.group.as_deref())
            .join(format!("{}{EXTENSION}", destination.name))
    }

    /// Write already-encoded JSON text.
    pub async fn write_raw(
        &self,
        destination: &Destination,
        data: &str,
    ) -> Result<(), PersistenceError> {
        let dir = self.dir(destination.category, destination.group.as_deref());
        fs::create_dir_all(&dir).await?;

        let path = self.path(destination);
        let temp = dir.join(format!(".{}{EXTENSION}.tmp", destination.name));
        fs::write(&temp, data).await?;
        fs::rename(&temp, &path).await?;
        Ok(())
    }

    pub async fn write<T: Serialize>(
        &self,
        destination: &Destination,
        data: &T,
    ) -> Result<(), PersistenceError> {
        let text = serde_json::to_string(data)?;
        self.write_raw(destination, &text).await
    }

    /// `Ok(None)` when the file does not exist.
    pub async fn read<T: DeserializeOwned>(
        &self,
        destination: &Destination,
    ) -> Result<Option<T>, PersistenceError> {
        read_path(&self.path(destination)).await
    }

    /// Deleting a missing file is not an error.
    pub async fn delete(&self, destination: &Destination) -> Result<(), PersistenceError> {
        delete_path(&self.path(destination)).await
    }

    /// Delete every file in `group` whose name starts with `name_prefix` and
    /// whose decoded contents satisfy `is_stale`. Files that fail to decode or
    /// to delete are left alone and the sweep moves on. Returns the number of
    /// files actually deleted.
    pub async fn delete_stale<T, F>(
        &self,
        category: Category,
        group: Option<&str>,
        name_prefix: Option<&str>,
        is_stale: F,
    ) -> Result<usize, PersistenceError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let dir = self.dir(category, group);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(0),
            Err(error) => return Err(error.into()),
        };

        let mut deleted = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    warn!(dir = %dir.display(), %error, "stopped listing stale files");
                    break;
                }
            };
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !file_name.ends_with(EXTENSION) {
                continue;
            }
            if name_prefix.is_some_and(|prefix| !file_name.starts_with(prefix)) {
                continue;
            }

            let path = entry.path();
            match read_path::<T>(&path).await {
                Ok(Some(data)) if is_stale(&data) => match delete_path(&path).await {
                    Ok(()) => {
                        debug!(path = %path.display(), "deleted stale file");
                        deleted += 1;
                    }
                    Err(error) => {
                        warn!(path = %path.display(), %error, "failed to delete stale file");
                    }
                },
                Ok(_) => {}
                Err(error) => debug!(path = %path.display(), %error, "skipping unreadable file"),
            }
        }
        Ok(deleted)
    }
}

async fn read_path<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    Ok(Some(serde_json::from_str(&text)?))
}

async fn delete_path(path: &Path) -> Result<(), PersistenceError> {
    match fs::remove_file(path).await {
        Err(error) if error.kind() != ErrorKind::NotFound => Err(error.into()),
        _ => Ok(()),
    }
}
