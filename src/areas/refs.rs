//! Reference store
//!
//! References are human-readable names bound to object IDs. A reference is
//! either direct (its file holds a 40-character object ID) or symbolic (its
//! file holds `ref: <name>`), which is how `HEAD` tracks the current branch.
//!
//! ## Update discipline
//!
//! Every mutation is a compare-and-swap: the caller states the value it
//! expects the reference to hold (`None` for "must not exist"), and the
//! update fails with [`RepositoryError::ReferenceConflict`] when the stored
//! value differs. The compare and the write happen under an exclusive lock
//! on `<knot-dir>/locks/<name>.lock`, and new values are written to a temp
//! file and renamed into place, so readers never see a torn write.

use crate::artifacts::branch::branch_name::RefName;
use crate::artifacts::core::lockfile::LockFile;
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::RepositoryError;
use anyhow::Context;
use derive_new::new;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

/// Regex pattern for parsing symbolic references
const SYMREF_REGEX: &str = r"^ref: (.+)$";

static SYMREF: LazyLock<Result<regex::Regex, regex::Error>> =
    LazyLock::new(|| regex::Regex::new(SYMREF_REGEX));

/// Longest symbolic chain that still resolves
pub const MAX_SYMREF_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefValue {
    Symbolic(RefName),
    Direct(ObjectId),
}

impl RefValue {
    fn parse(content: &str) -> anyhow::Result<Option<RefValue>> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        let symref = SYMREF
            .as_ref()
            .map_err(Clone::clone)
            .with_context(|| format!("invalid symref regex: {SYMREF_REGEX}"))?;

        match symref.captures(content) {
            Some(captures) => Ok(Some(RefValue::Symbolic(RefName::try_parse(&captures[1])?))),
            None => Ok(Some(RefValue::Direct(ObjectId::try_parse(content.to_string())?))),
        }
    }

    fn serialize(&self) -> String {
        match self {
            RefValue::Symbolic(target) => format!("ref: {target}\n"),
            RefValue::Direct(oid) => format!("{oid}\n"),
        }
    }
}

#[derive(Debug, new)]
pub struct Refs {
    /// The repository directory holding `HEAD` and `refs/`
    path: Box<Path>,
}

impl Refs {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn refs_path(&self) -> PathBuf {
        self.path.join("refs")
    }

    pub fn heads_path(&self) -> PathBuf {
        self.refs_path().join("heads")
    }

    pub fn tags_path(&self) -> PathBuf {
        self.refs_path().join("tags")
    }

    fn ref_path(&self, name: &RefName) -> PathBuf {
        self.path.join(name.as_ref_path())
    }

    fn lock_path(&self, name: &RefName) -> PathBuf {
        self.path
            .join("locks")
            .join(format!("{}.lock", name.as_ref_path()))
    }

    /// Raw value stored under `name`, without following symbolic refs
    pub fn read_value(&self, name: &RefName) -> anyhow::Result<Option<RefValue>> {
        match std::fs::read_to_string(self.ref_path(name)) {
            Ok(content) => RefValue::parse(&content)
                .with_context(|| format!("reference {name} is unreadable")),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) if err.kind() == ErrorKind::IsADirectory => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read reference {name}")),
        }
    }

    /// Immediate target of a symbolic reference
    pub fn read_symbolic(&self, name: &RefName) -> anyhow::Result<Option<RefName>> {
        match self.read_value(name)? {
            Some(RefValue::Symbolic(target)) => Ok(Some(target)),
            _ => Ok(None),
        }
    }

    /// Last name in the symbolic chain starting at `name`, whether or not it
    /// exists yet (an unborn branch)
    pub fn terminal_name(&self, name: &RefName) -> anyhow::Result<RefName> {
        let mut current = name.clone();

        for _ in 0..=MAX_SYMREF_DEPTH {
            match self.read_value(&current)? {
                Some(RefValue::Symbolic(target)) => current = target,
                _ => return Ok(current),
            }
        }

        Err(RepositoryError::UnknownReference(name.to_string()).into())
    }

    /// Object ID at the end of the chain, `None` if the chain ends at a
    /// reference that does not exist
    pub fn read_oid(&self, name: &RefName) -> anyhow::Result<Option<ObjectId>> {
        let terminal = self.terminal_name(name)?;
        match self.read_value(&terminal)? {
            Some(RefValue::Direct(oid)) => Ok(Some(oid)),
            _ => Ok(None),
        }
    }

    /// Object ID at the end of the chain
    pub fn resolve(&self, name: &RefName) -> anyhow::Result<ObjectId> {
        self.read_oid(name)?
            .ok_or_else(|| RepositoryError::UnknownReference(name.to_string()).into())
    }

    pub fn exists(&self, name: &RefName) -> anyhow::Result<bool> {
        Ok(self.read_value(name)?.is_some())
    }

    /// Compare-and-swap the direct value at the end of `name`'s chain
    ///
    /// `expected_old == None` requires the reference to be absent and
    /// `new == None` deletes it.
    pub fn update(
        &self,
        name: &RefName,
        expected_old: Option<&ObjectId>,
        new: Option<&ObjectId>,
    ) -> anyhow::Result<()> {
        let terminal = self.terminal_name(name)?;
        let _lock = LockFile::acquire(&self.lock_path(&terminal))?;

        self.compare_and_write(&terminal, expected_old, new)
    }

    fn compare_and_write(
        &self,
        terminal: &RefName,
        expected_old: Option<&ObjectId>,
        new: Option<&ObjectId>,
    ) -> anyhow::Result<()> {
        let actual = match self.read_value(terminal)? {
            Some(RefValue::Direct(oid)) => Some(oid),
            _ => None,
        };

        if actual.as_ref() != expected_old {
            tracing::debug!(
                reference = %terminal,
                expected = ?expected_old,
                actual = ?actual,
                "reference update lost the race"
            );
            return Err(RepositoryError::ReferenceConflict {
                name: terminal.to_string(),
                expected: expected_old.cloned(),
                actual,
            }
            .into());
        }

        match new {
            Some(oid) => self.write_value(terminal, &RefValue::Direct(oid.clone()))?,
            None => self.remove_value(terminal)?,
        }

        tracing::debug!(reference = %terminal, old = ?actual, new = ?new, "reference updated");
        Ok(())
    }

    pub fn create(&self, name: &RefName, oid: &ObjectId) -> anyhow::Result<()> {
        self.update(name, None, Some(oid))
    }

    pub fn delete(&self, name: &RefName, expected_old: &ObjectId) -> anyhow::Result<()> {
        self.update(name, Some(expected_old), None)
    }

    /// Read the current value, compute the desired one, and swap; a lost
    /// race re-reads and recomputes, up to `attempts` times
    ///
    /// `compute` returning `None` deletes the reference. Returns the value
    /// that was written.
    pub fn update_with_retry<F>(
        &self,
        name: &RefName,
        attempts: usize,
        mut compute: F,
    ) -> anyhow::Result<Option<ObjectId>>
    where
        F: FnMut(Option<&ObjectId>) -> anyhow::Result<Option<ObjectId>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let current = self.read_oid(name)?;
            let desired = compute(current.as_ref())?;
            if desired == current {
                return Ok(desired);
            }

            match self.update(name, current.as_ref(), desired.as_ref()) {
                Ok(()) => return Ok(desired),
                Err(err)
                    if attempt < attempts.max(1)
                        && matches!(
                            err.downcast_ref::<RepositoryError>(),
                            Some(RepositoryError::ReferenceConflict { .. })
                        ) =>
                {
                    tracing::info!(reference = %name, attempt, "retrying reference update");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Move `old` to `new`; `new` must not exist yet
    ///
    /// Both names are locked for the duration. `HEAD` follows the rename
    /// when it pointed at `old`.
    pub fn rename(&self, old: &RefName, new: &RefName) -> anyhow::Result<ObjectId> {
        let _locks = LockFile::acquire_all(&[self.lock_path(old), self.lock_path(new)])?;

        let oid = match self.read_value(old)? {
            Some(RefValue::Direct(oid)) => oid,
            _ => return Err(RepositoryError::UnknownReference(old.to_string()).into()),
        };

        if let Some(existing) = self.read_value(new)? {
            let actual = match existing {
                RefValue::Direct(oid) => Some(oid),
                RefValue::Symbolic(_) => None,
            };
            return Err(RepositoryError::ReferenceConflict {
                name: new.to_string(),
                expected: None,
                actual,
            }
            .into());
        }

        self.write_value(new, &RefValue::Direct(oid.clone()))?;
        self.remove_value(old)?;

        if self.read_symbolic(&RefName::head())?.as_ref() == Some(old) {
            self.set_symbolic(&RefName::head(), new)?;
        }

        tracing::debug!(old = %old, new = %new, "reference renamed");
        Ok(oid)
    }

    /// Point `name` at another reference
    pub fn set_symbolic(&self, name: &RefName, target: &RefName) -> anyhow::Result<()> {
        let _lock = LockFile::acquire(&self.lock_path(name))?;
        self.write_value(name, &RefValue::Symbolic(target.clone()))
    }

    /// Detach `name` (normally `HEAD`) onto an object ID, whatever it held before
    pub fn set_detached(&self, name: &RefName, oid: &ObjectId) -> anyhow::Result<()> {
        let _lock = LockFile::acquire(&self.lock_path(name))?;
        self.write_value(name, &RefValue::Direct(oid.clone()))
    }

    /// Remove `name` itself without following symbolic refs
    pub fn remove(&self, name: &RefName) -> anyhow::Result<()> {
        let _lock = LockFile::acquire(&self.lock_path(name))?;
        self.remove_value(name)
    }

    /// Every direct reference whose name starts with `prefix`, sorted by name
    ///
    /// Symbolic references under `refs/` (such as `refs/remotes/origin/HEAD`)
    /// are listed with the object ID they resolve to, and skipped when they
    /// dangle.
    pub fn list(&self, prefix: &str) -> anyhow::Result<Vec<(RefName, ObjectId)>> {
        let mut names = BTreeSet::new();

        for entry in WalkDir::new(self.refs_path())
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
        {
            let Ok(relative) = entry.path().strip_prefix(&self.path) else {
                continue;
            };
            let Ok(name) = RefName::try_parse(relative.to_string_lossy().replace('\\', "/")) else {
                continue;
            };

            if name.as_ref().starts_with(prefix) {
                names.insert(name);
            }
        }

        let mut refs = Vec::with_capacity(names.len());
        for name in names {
            if let Some(oid) = self.read_oid(&name)? {
                refs.push((name, oid));
            }
        }

        Ok(refs)
    }

    /// Branch `HEAD` points at, `None` when detached
    pub fn current_branch(&self) -> anyhow::Result<Option<RefName>> {
        let terminal = self.terminal_name(&RefName::head())?;
        Ok(terminal.is_branch().then_some(terminal))
    }

    pub fn read_head(&self) -> anyhow::Result<Option<ObjectId>> {
        self.read_oid(&RefName::head())
    }

    /// Commits recorded as the shallow boundary
    pub fn read_shallow(&self) -> anyhow::Result<BTreeSet<ObjectId>> {
        match std::fs::read_to_string(self.path.join("shallow")) {
            Ok(content) => content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| ObjectId::try_parse(line.trim().to_string()))
                .collect(),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(err) => Err(err).context("failed to read shallow file"),
        }
    }

    pub fn write_shallow(&self, shallow: &BTreeSet<ObjectId>) -> anyhow::Result<()> {
        let path = self.path.join("shallow");
        if shallow.is_empty() {
            return match std::fs::remove_file(&path) {
                Err(err) if err.kind() != ErrorKind::NotFound => {
                    Err(err).context("failed to remove shallow file")
                }
                _ => Ok(()),
            };
        }

        let content = shallow
            .iter()
            .map(|oid| format!("{oid}\n"))
            .collect::<String>();
        write_atomically(&path, content.as_bytes())
    }

    fn write_value(&self, name: &RefName, value: &RefValue) -> anyhow::Result<()> {
        let path = self.ref_path(name);
        write_atomically(&path, value.serialize().as_bytes())
            .with_context(|| format!("failed to write reference {name}"))
    }

    fn remove_value(&self, name: &RefName) -> anyhow::Result<()> {
        let path = self.ref_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => self.prune_empty_parent_dirs(&path),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete reference {name}")),
        }
    }

    fn prune_empty_parent_dirs(&self, path: &Path) -> anyhow::Result<()> {
        let stop = [self.heads_path(), self.tags_path(), self.refs_path().join("remotes")];

        if let Some(parent) = path.parent()
            && parent.starts_with(self.refs_path())
            && parent != self.refs_path()
            && !stop.iter().any(|stop| stop == parent)
            && parent.read_dir()?.next().is_none()
        {
            std::fs::remove_dir(parent)
                .with_context(|| format!("failed to remove empty ref directory at {parent:?}"))?;
            self.prune_empty_parent_dirs(parent)?;
        }

        Ok(())
    }
}

/// Write to a sibling temp file and rename it over `path`
pub fn write_atomically(path: &Path, content: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{path:?} has no parent directory"))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directories for {path:?}"))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", fake::rand::random::<u32>()));

    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temp file {temp_path:?}"))?;
    std::fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp_path);
    })?;

    Ok(())
}
