use crate::areas::repository::Repository;
use crate::artifacts::diff::tree_diff::ChangeSet;
use std::io::Write;

impl Repository {
    /// Paths changed between two trees (or commits); `old` defaults to the
    /// first parent of `new`
    pub async fn diff_tree(&self, old: Option<&str>, new: &str) -> anyhow::Result<ChangeSet> {
        let new = self.resolve_object_name(new)?;
        let old = match old {
            Some(old) => Some(self.resolve_object_name(old)?),
            None => self
                .database()
                .parse_object_as_commit(&new)?
                .and_then(|commit| commit.parent().cloned()),
        };

        let changes = self.history()?.diff(old.as_ref(), Some(&new))?;

        let mut writer = self.writer();
        for (path, change) in &changes {
            writeln!(writer, "{}\t{}", change.status_char(), path.display())?;
        }
        Ok(changes)
    }
}
