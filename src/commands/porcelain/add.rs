use crate::areas::index::Index;
use crate::areas::repository::Repository;
use crate::artifacts::index::index_entry::IndexEntry;
use std::path::{Path, PathBuf};

impl Repository {
    /// Stage files, directories and deletions; paths are relative to the work tree
    pub async fn add(&self, paths: &[PathBuf]) -> anyhow::Result<()> {
        self.require_work_tree("add")?;

        let index = self.index();
        let mut index = index.lock().await;
        index.rehydrate()?;

        for path in paths {
            self.stage_path(&mut index, path)?;
        }

        index.write_updates()?;
        Ok(())
    }

    fn stage_path(&self, index: &mut Index, path: &Path) -> anyhow::Result<()> {
        let tracked = index.entries_under_path(path);
        let exists = std::fs::symlink_metadata(self.workspace().path().join(path)).is_ok();

        if exists {
            for file in self.workspace().list_files(Some(path))? {
                self.stage_file(index, file)?;
            }
        } else if tracked.is_empty() {
            anyhow::bail!("pathspec '{}' did not match any files", path.display());
        }

        for file in tracked {
            if std::fs::symlink_metadata(self.workspace().path().join(&file)).is_err() {
                tracing::debug!(path = %file.display(), "staging deletion");
                index.remove(&file);
            }
        }

        Ok(())
    }

    fn stage_file(&self, index: &mut Index, file: PathBuf) -> anyhow::Result<()> {
        let blob = self.workspace().parse_blob(&file)?;
        let stat = self.workspace().stat_file(&file)?;
        let oid = self.database().store(&blob)?;

        index.add(IndexEntry::new(file, oid, stat));
        Ok(())
    }
}
