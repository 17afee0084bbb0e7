use crate::areas::repository::Repository;
use std::io::Write;
use std::path::PathBuf;

impl Repository {
    /// Stop tracking paths; unless `cached`, delete them from the working
    /// tree as well
    pub async fn remove(&self, paths: &[PathBuf], cached: bool) -> anyhow::Result<()> {
        self.require_work_tree("rm")?;

        let index = self.index();
        let mut index = index.lock().await;
        index.rehydrate()?;

        let mut removed = Vec::new();
        for path in paths {
            let tracked = index.entries_under_path(path);
            if tracked.is_empty() {
                anyhow::bail!("pathspec '{}' did not match any files", path.display());
            }
            removed.push((path, tracked));
        }

        for (path, tracked) in removed {
            index.remove(path);
            for file in tracked {
                if !cached {
                    self.workspace().remove_file(&file)?;
                }
                writeln!(self.writer(), "rm '{}'", file.display())?;
            }
        }

        index.write_updates()?;
        Ok(())
    }
}
