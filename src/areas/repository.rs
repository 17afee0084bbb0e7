//! A repository on disk
//!
//! A working repository keeps its data in `<work tree>/.knot`; a bare one
//! is the data directory itself, with no working tree or index. Both are
//! recognised by their `HEAD` file and `objects` directory.

use crate::areas::config::Config;
use crate::areas::database::Database;
use crate::areas::index::Index;
use crate::areas::refs::Refs;
use crate::areas::workspace::{REPOSITORY_DIR_NAME, Workspace};
use crate::artifacts::history::History;
use crate::artifacts::status::status_info::Status;
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

pub const INDEX_FILE_NAME: &str = "index";
pub const OBJECTS_DIR_NAME: &str = "objects";

type Writer = Box<dyn Write + Send>;

pub struct Repository {
    /// Work tree, or the data directory of a bare repository
    path: Box<Path>,
    knot_dir: Box<Path>,
    bare: bool,
    writer: Mutex<Writer>,
    index: Arc<tokio::sync::Mutex<Index>>,
    database: Database,
    workspace: Workspace,
    refs: Refs,
    config: RwLock<Config>,
}

impl Repository {
    fn assemble(path: PathBuf, knot_dir: PathBuf, bare: bool, writer: Writer) -> anyhow::Result<Self> {
        let config = Config::load(&knot_dir)?;

        Ok(Repository {
            index: Arc::new(tokio::sync::Mutex::new(Index::new(
                knot_dir.join(INDEX_FILE_NAME).into_boxed_path(),
            ))),
            database: Database::new(knot_dir.join(OBJECTS_DIR_NAME).into_boxed_path()),
            workspace: Workspace::new(path.clone().into_boxed_path()),
            refs: Refs::new(knot_dir.clone().into_boxed_path()),
            config: RwLock::new(config),
            writer: Mutex::new(writer),
            path: path.into_boxed_path(),
            knot_dir: knot_dir.into_boxed_path(),
            bare,
        })
    }

    /// A working repository rooted at `path`, which is created if missing
    pub fn new(path: impl AsRef<Path>, writer: Writer) -> anyhow::Result<Self> {
        let path = Self::prepare_dir(path.as_ref())?;
        let knot_dir = path.join(REPOSITORY_DIR_NAME);
        Self::assemble(path, knot_dir, false, writer)
    }

    /// A bare repository whose data lives directly in `path`
    pub fn new_bare(path: impl AsRef<Path>, writer: Writer) -> anyhow::Result<Self> {
        let path = Self::prepare_dir(path.as_ref())?;
        Self::assemble(path.clone(), path, true, writer)
    }

    fn prepare_dir(path: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(path).with_context(|| format!("failed to create directory {path:?}"))?;
        path.canonicalize()
            .with_context(|| format!("failed to resolve path {path:?}"))
    }

    /// Open the existing repository at exactly `path`
    pub fn open(path: impl AsRef<Path>, writer: Writer) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let Some((knot_dir, bare)) = Self::locate(path) else {
            anyhow::bail!("not a knot repository: {}", path.display());
        };

        let path = path.canonicalize()?;
        let knot_dir = knot_dir.canonicalize()?;
        Self::assemble(path, knot_dir, bare, writer)
    }

    /// Open the repository containing `start`, looking in parent directories
    pub fn discover(start: impl AsRef<Path>, writer: Writer) -> anyhow::Result<Self> {
        let start = start.as_ref().canonicalize()?;
        match start.ancestors().find(|dir| Self::locate(dir).is_some()) {
            Some(root) => Self::open(root, writer),
            None => anyhow::bail!(
                "not a knot repository (or any of the parent directories): {}",
                start.display()
            ),
        }
    }

    /// Data directory and bareness of the repository at `path`, if any
    pub fn locate(path: &Path) -> Option<(PathBuf, bool)> {
        let nested = path.join(REPOSITORY_DIR_NAME);
        if Self::is_data_dir(&nested) {
            return Some((nested, false));
        }
        if Self::is_data_dir(path) {
            return Some((path.to_path_buf(), true));
        }
        None
    }

    pub fn is_repository(path: &Path) -> bool {
        Self::locate(path).is_some()
    }

    fn is_data_dir(path: &Path) -> bool {
        path.join("HEAD").is_file() && path.join(OBJECTS_DIR_NAME).is_dir()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn knot_dir(&self) -> &Path {
        &self.knot_dir
    }

    pub fn is_bare(&self) -> bool {
        self.bare
    }

    pub fn writer(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn index(&self) -> Arc<tokio::sync::Mutex<Index>> {
        self.index.clone()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn refs(&self) -> &Refs {
        &self.refs
    }

    pub fn config(&self) -> RwLockReadGuard<'_, Config> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the configuration and save it
    pub fn update_config<T>(&self, change: impl FnOnce(&mut Config) -> anyhow::Result<T>) -> anyhow::Result<T> {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = config.clone();
        let result = change(&mut updated)?;

        updated.save(&self.knot_dir)?;
        *config = updated;
        Ok(result)
    }

    /// Commit graph queries honouring the shallow boundary
    pub fn history(&self) -> anyhow::Result<History<'_>> {
        Ok(History::new(&self.database, self.refs.read_shallow()?))
    }

    pub fn inspect_status(&self) -> Status<'_> {
        Status::new(self)
    }

    /// Fail for commands that need a working tree
    pub fn require_work_tree(&self, command: &str) -> anyhow::Result<()> {
        if self.bare {
            anyhow::bail!("this operation must be run in a work tree: {command}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use pretty_assertions::assert_eq;

    #[test]
    fn bare_and_working_layouts_are_told_apart() {
        let dir = TempDir::new().unwrap();
        let working = dir.path().join("work");
        let bare = dir.path().join("bare.knot");
        for data_dir in [working.join(REPOSITORY_DIR_NAME), bare.clone()] {
            std::fs::create_dir_all(data_dir.join(OBJECTS_DIR_NAME)).unwrap();
            std::fs::write(data_dir.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        }

        assert_eq!(Repository::locate(&working), Some((working.join(REPOSITORY_DIR_NAME), false)));
        assert_eq!(Repository::locate(&bare), Some((bare.clone(), true)));
        assert_eq!(Repository::locate(dir.path()), None);
    }

    #[test]
    fn discover_walks_up_from_subdirectories() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join(REPOSITORY_DIR_NAME);
        std::fs::create_dir_all(data_dir.join(OBJECTS_DIR_NAME)).unwrap();
        std::fs::write(data_dir.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let repository = Repository::discover(&nested, Box::new(std::io::sink())).unwrap();

        assert_eq!(repository.path(), dir.path().canonicalize().unwrap());
        assert!(!repository.is_bare());
    }

    #[test]
    fn opening_a_plain_directory_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Repository::open(dir.path(), Box::new(std::io::sink())).is_err());
    }

    #[test]
    fn config_updates_are_persisted() {
        let dir = TempDir::new().unwrap();
        let repository = Repository::new(dir.path(), Box::new(std::io::sink())).unwrap();
        std::fs::create_dir_all(repository.knot_dir()).unwrap();

        repository
            .update_config(|config| {
                config.core.default_branch = "trunk".to_string();
                Ok(())
            })
            .unwrap();

        assert_eq!(Config::load(repository.knot_dir()).unwrap().core.default_branch, "trunk");
        assert_eq!(repository.config().core.default_branch, "trunk");
    }
}
