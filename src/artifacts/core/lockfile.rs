//! Exclusive locks on repository files
//!
//! A [`LockFile`] serializes writers of one logical resource (a ref, the
//! config file) across processes with an advisory `file_guard` lock, and
//! across threads of this process with a lock table. Advisory locks are
//! owned by the process, so the lock table is what keeps two tasks of the
//! same server from interleaving a compare-and-swap.

use anyhow::Context;
use file_guard::{FileGuard, Lock};
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, LazyLock, Mutex, PoisonError};

static HELD: LazyLock<(Mutex<HashSet<PathBuf>>, Condvar)> =
    LazyLock::new(|| (Mutex::new(HashSet::new()), Condvar::new()));

/// Held until dropped
pub struct LockFile {
    path: PathBuf,
    /// Taken on drop, so the file is unlocked before other threads may claim it
    guard: Option<FileGuard<Box<File>>>,
}

impl LockFile {
    /// Block until the lock at `path` is ours
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create lock directory {parent:?}"))?;
        }

        Self::claim_in_process(path);

        let guard = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map(Box::new)
            .and_then(|file| file_guard::lock(file, Lock::Exclusive, 0, 1))
            .with_context(|| format!("failed to lock {path:?}"));

        match guard {
            Ok(guard) => Ok(LockFile {
                path: path.to_path_buf(),
                guard: Some(guard),
            }),
            Err(err) => {
                Self::release_in_process(path);
                Err(err)
            }
        }
    }

    /// Lock several resources in a fixed order so that two callers locking
    /// overlapping sets cannot deadlock
    pub fn acquire_all(paths: &[PathBuf]) -> anyhow::Result<Vec<Self>> {
        let mut sorted = paths.to_vec();
        sorted.sort();
        sorted.dedup();

        sorted.iter().map(|path| Self::acquire(path)).collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn claim_in_process(path: &Path) {
        let (held, released) = &*HELD;
        let mut held = held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(path) {
            held = released.wait(held).unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(path.to_path_buf());
    }

    fn release_in_process(path: &Path) {
        let (held, released) = &*HELD;
        held.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        released.notify_all();
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        drop(self.guard.take());
        Self::release_in_process(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn threads_take_turns() {
        let dir = TempDir::new().unwrap();
        let path = Arc::new(dir.path().join("locks").join("refs").join("heads").join("main.lock"));
        let inside = Arc::new(AtomicUsize::new(0));

        let handles = (0..8)
            .map(|_| {
                let path = path.clone();
                let inside = inside.clone();
                std::thread::spawn(move || {
                    let _lock = LockFile::acquire(&path).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn waiting_thread_takes_over_a_dropped_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("HEAD.lock");
        let first = LockFile::acquire(&path).unwrap();

        let waiter = {
            let path = path.clone();
            std::thread::spawn(move || {
                let lock = LockFile::acquire(&path).unwrap();
                lock.guard.is_some()
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());

        drop(first);
        assert!(waiter.join().unwrap());
        assert!(!HELD.0.lock().unwrap().contains(&path));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.lock");

        drop(LockFile::acquire(&path).unwrap());
        let again = LockFile::acquire(&path).unwrap();

        assert_eq!(again.path(), path.as_path());
    }
}
