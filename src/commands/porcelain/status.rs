use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::RefName;
use crate::artifacts::status::file_change::FileChangeType;
use crate::artifacts::status::status_info::{ChangeSet, StatusInfo};
use colored::Colorize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFormat {
    #[default]
    Long,
    /// Two status letters per path, stable for scripts
    Porcelain,
}

impl Repository {
    pub async fn status(&self, format: StatusFormat) -> anyhow::Result<StatusInfo> {
        self.require_work_tree("status")?;

        let index = self.index();
        let mut index = index.lock().await;
        index.rehydrate()?;

        let info = self.inspect_status().initialize(&mut index)?;
        index.write_updates()?;

        match format {
            StatusFormat::Long => self.print_long_status(&info)?,
            StatusFormat::Porcelain => self.print_porcelain_status(&info)?,
        }

        Ok(info)
    }

    fn print_porcelain_status(&self, info: &StatusInfo) -> anyhow::Result<()> {
        let mut tracked = BTreeMap::<&PathBuf, String>::new();
        for (path, change) in &info.changed_files {
            tracked.insert(path, change.to_string());
        }
        for (path, kind) in &info.unmerged_files {
            tracked.insert(path, kind.short_code().to_string());
        }

        let mut writer = self.writer();
        for (path, code) in tracked {
            writeln!(writer, "{code} {}", path.display())?;
        }
        for path in &info.untracked_files {
            writeln!(writer, "?? {}", path.display())?;
        }
        Ok(())
    }

    fn print_long_status(&self, info: &StatusInfo) -> anyhow::Result<()> {
        let branch = self.refs().current_branch()?;
        let head = self.refs().read_head()?;
        let merging = self.refs().exists(&RefName::merge_head())?;

        let mut writer = self.writer();
        match (&branch, &head) {
            (Some(branch), _) => writeln!(writer, "On branch {}", branch.short_name())?,
            (None, Some(head)) => writeln!(writer, "{} {}", "HEAD detached at".red(), head.to_short_oid())?,
            (None, None) => writeln!(writer, "Not currently on any branch.")?,
        }
        if head.is_none() {
            writeln!(writer, "\nNo commits yet")?;
        }
        if merging {
            if info.unmerged_files.is_empty() {
                writeln!(writer, "\nAll conflicts fixed but you are still merging.")?;
                writeln!(writer, "  (use \"knot commit\" to conclude merge)")?;
            } else {
                writeln!(writer, "\nYou have unmerged paths.")?;
                writeln!(writer, "  (fix conflicts and run \"knot commit\")")?;
            }
        }

        write_changeset(&mut *writer, "Changes to be committed:", &info.index_changeset())?;

        if !info.unmerged_files.is_empty() {
            writeln!(writer, "\nUnmerged paths:")?;
            writeln!(writer, "  (use \"knot add <file>...\" to mark resolution)")?;
            for (path, kind) in &info.unmerged_files {
                writeln!(writer, "{kind}{}", path.display().to_string().red())?;
            }
        }

        write_changeset(&mut *writer, "Changes not staged for commit:", &info.workspace_changeset())?;

        if !info.untracked_files.is_empty() {
            writeln!(writer, "\nUntracked files:")?;
            writeln!(writer, "  (use \"knot add <file>...\" to include in what will be committed)")?;
            for path in &info.untracked_files {
                writeln!(writer, "\t{}", path.display().to_string().red())?;
            }
        }

        writeln!(writer)?;
        if info.has_staged_changes() {
            return Ok(());
        }
        if !info.workspace_changeset().is_empty() {
            writeln!(writer, "no changes added to commit (use \"knot add\")")?;
        } else if !info.untracked_files.is_empty() {
            writeln!(writer, "nothing added to commit but untracked files present (use \"knot add\" to track)")?;
        } else if head.is_none() {
            writeln!(writer, "nothing to commit (create/copy files and use \"knot add\" to track)")?;
        } else if info.unmerged_files.is_empty() {
            writeln!(writer, "nothing to commit, working tree clean")?;
        }
        Ok(())
    }
}

fn write_changeset(writer: &mut dyn Write, title: &str, changes: &ChangeSet) -> anyhow::Result<()> {
    if changes.is_empty() {
        return Ok(());
    }

    writeln!(writer, "\n{title}")?;
    for (path, change) in changes {
        let path = match change {
            FileChangeType::Index(_) => path.display().to_string().green(),
            FileChangeType::Workspace(_) => path.display().to_string().red(),
        };
        writeln!(writer, "{change}{path}")?;
    }
    Ok(())
}
