use crate::areas::repository::Repository;
use crate::artifacts::index::index_entry::{EntryMetadata, IndexEntry};
use std::io::Write;
use std::path::{Path, PathBuf};

impl Repository {
    /// Undo `add` for paths: each index entry goes back to its version in
    /// HEAD, or out of the index when HEAD does not have it
    pub async fn unstage(&self, paths: &[PathBuf]) -> anyhow::Result<()> {
        self.require_work_tree("reset")?;

        let head = self.refs().read_head()?;
        let committed = self.database().flatten_tree(head.as_ref())?;

        let index = self.index();
        let mut index = index.lock().await;
        index.rehydrate()?;

        for path in paths {
            let staged = index.entries_under_path(path);
            let in_head = committed
                .iter()
                .filter(|(file, _)| path == Path::new(".") || file.starts_with(path))
                .collect::<Vec<_>>();
            if staged.is_empty() && in_head.is_empty() {
                anyhow::bail!("pathspec '{}' did not match any files", path.display());
            }

            for file in &staged {
                if !committed.contains_key(file) {
                    index.remove(file);
                    writeln!(self.writer(), "unstaged '{}'", file.display())?;
                }
            }

            for (file, entry) in in_head {
                let unchanged = index
                    .entry_by_path(file)
                    .is_some_and(|staged| staged.oid == entry.oid && staged.mode() == entry.mode);
                if unchanged {
                    continue;
                }

                // no stat data, so the next status rehashes the working file
                let metadata = EntryMetadata { mode: entry.mode, ..Default::default() };
                index.add(IndexEntry::new(file.clone(), entry.oid.clone(), metadata));
                writeln!(self.writer(), "unstaged '{}'", file.display())?;
            }
        }

        index.write_updates()?;
        Ok(())
    }
}
