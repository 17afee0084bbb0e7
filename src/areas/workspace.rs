//! Working tree access
//!
//! All paths handed in and out are relative to the work tree root. The
//! repository directory itself is never listed.

use crate::artifacts::checkout::migration::{ActionType, Migration};
use crate::artifacts::index::entry_mode::{EntryMode, FileMode};
use crate::artifacts::index::index_entry::EntryMetadata;
use crate::artifacts::objects::blob::Blob;
use anyhow::Context;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const REPOSITORY_DIR_NAME: &str = ".knot";

#[derive(Debug)]
pub struct Workspace {
    path: Box<Path>,
}

impl Workspace {
    pub fn new(path: Box<Path>) -> Self {
        Workspace { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parse_blob(&self, path: &Path) -> anyhow::Result<Blob> {
        Ok(Blob::new(self.read_file(path)?))
    }

    /// Immediate children of a directory, with their stat data
    pub fn list_dir(&self, dir_path: Option<&Path>) -> anyhow::Result<BTreeMap<PathBuf, EntryMetadata>> {
        let relative_dir = dir_path.unwrap_or(Path::new(""));
        let absolute_dir = self.path.join(relative_dir);

        let mut stats = BTreeMap::new();
        for entry in std::fs::read_dir(&absolute_dir)
            .with_context(|| format!("Unable to list directory {absolute_dir:?}"))?
        {
            let entry = entry?;
            if Self::is_ignored(Path::new(&entry.file_name())) {
                continue;
            }

            let relative = relative_dir.join(entry.file_name());
            stats.insert(relative.clone(), self.stat_file(&relative)?);
        }

        Ok(stats)
    }

    /// Every file at or below `root_file_path`, or the whole work tree
    pub fn list_files(&self, root_file_path: Option<&Path>) -> anyhow::Result<Vec<PathBuf>> {
        let root = match root_file_path {
            Some(path) if path != Path::new(".") => self.path.join(path),
            _ => self.path.to_path_buf(),
        };

        if std::fs::symlink_metadata(&root).is_err() {
            anyhow::bail!(
                "pathspec '{}' did not match any files",
                root_file_path.unwrap_or(Path::new(".")).display()
            );
        }

        let files = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !Self::is_ignored(Path::new(entry.file_name())))
            .filter_map(Result::ok)
            .filter(|entry| !entry.file_type().is_dir())
            .filter_map(|entry| entry.path().strip_prefix(&self.path).ok().map(Path::to_path_buf))
            .collect();

        Ok(files)
    }

    fn is_ignored(name: &Path) -> bool {
        name.as_os_str() == REPOSITORY_DIR_NAME
    }

    /// File content; for a symlink, the link target
    pub fn read_file(&self, file_path: &Path) -> anyhow::Result<Bytes> {
        let path = self.path.join(file_path);
        let metadata = std::fs::symlink_metadata(&path)
            .with_context(|| format!("Unable to read file {file_path:?}"))?;

        if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(&path)?;
            return Ok(Bytes::copy_from_slice(target.as_os_str().as_bytes()));
        }

        let content = std::fs::read(&path).with_context(|| format!("Unable to read file {file_path:?}"))?;
        Ok(Bytes::from(content))
    }

    pub fn stat_file(&self, file_path: &Path) -> anyhow::Result<EntryMetadata> {
        let path = self.path.join(file_path);
        let metadata = std::fs::symlink_metadata(&path)?;

        (path.as_path(), metadata).try_into()
    }

    /// Write `content` at `file_path`, replacing whatever is there
    pub fn write_file(&self, file_path: &Path, content: &[u8], mode: EntryMode) -> anyhow::Result<()> {
        let path = self.path.join(file_path);
        self.clear_path(file_path)?;
        if let Some(parent) = file_path.parent() {
            self.make_directory(parent)?;
        }

        match mode {
            EntryMode::File(FileMode::Symlink) => {
                let target = std::ffi::OsStr::from_bytes(content);
                std::os::unix::fs::symlink(target, &path)
                    .with_context(|| format!("Failed to create symlink: {file_path:?}"))?;
            }
            _ => {
                let mut file = std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .with_context(|| format!("Failed to open file: {file_path:?}"))?;
                file.write_all(content)
                    .with_context(|| format!("Failed to write to file: {file_path:?}"))?;

                use std::os::unix::fs::PermissionsExt;
                let permissions = std::fs::Permissions::from_mode(match mode {
                    EntryMode::File(FileMode::Executable) => 0o755,
                    _ => 0o644,
                });
                std::fs::set_permissions(&path, permissions)
                    .with_context(|| format!("Failed to set permissions for file: {file_path:?}"))?;
            }
        }

        Ok(())
    }

    /// Delete a file and any directories it leaves empty
    pub fn remove_file(&self, file_path: &Path) -> anyhow::Result<()> {
        self.clear_path(file_path)?;

        for parent in file_path.ancestors().skip(1) {
            if parent.as_os_str().is_empty() {
                break;
            }
            let absolute = self.path.join(parent);
            match std::fs::remove_dir(&absolute) {
                Ok(()) => {}
                // not empty, or already gone
                Err(_) => break,
            }
        }

        Ok(())
    }

    fn clear_path(&self, file_path: &Path) -> anyhow::Result<()> {
        let path = self.path.join(file_path);
        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_dir() => std::fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove existing directory: {file_path:?}")),
            Ok(_) => std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove file: {file_path:?}")),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Create `dir_path` and its parents, replacing files that are in the way
    fn make_directory(&self, dir_path: &Path) -> anyhow::Result<()> {
        let mut current = PathBuf::new();
        for component in dir_path.components() {
            current.push(component);
            let absolute = self.path.join(&current);
            match std::fs::symlink_metadata(&absolute) {
                Ok(metadata) if metadata.is_dir() => continue,
                Ok(_) => {
                    std::fs::remove_file(&absolute)?;
                    std::fs::create_dir(&absolute)?;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => std::fs::create_dir(&absolute)?,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }

    /// Deletions first so that a directory can give way to a file and back
    pub fn apply_migration(&self, migration: &Migration) -> anyhow::Result<()> {
        for (file_path, _) in migration.actions_of(ActionType::Delete) {
            self.remove_file(file_path)?;
        }

        for action in [ActionType::Modify, ActionType::Add] {
            for (file_path, entry) in migration.actions_of(action) {
                let Some(entry) = entry else {
                    anyhow::bail!("Missing target entry for {file_path:?}");
                };
                let data = migration.load_blob_data(&entry.oid)?;
                self.write_file(file_path, &data, entry.mode)?;
            }
        }

        Ok(())
    }
}
