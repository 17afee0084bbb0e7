use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::RefName;
use crate::artifacts::merge::MERGE_MSG_FILE;
use crate::artifacts::objects::object_id::ObjectId;
use std::io::{ErrorKind, Write};

impl Repository {
    /// Commit the index; a pending merge supplies the second parent and,
    /// without `message`, the message
    pub async fn commit(&self, message: Option<&str>) -> anyhow::Result<ObjectId> {
        self.require_work_tree("commit")?;

        let index = self.index();
        let mut index = index.lock().await;
        index.rehydrate()?;

        let tree_oid = self.write_tree(&index)?;
        let head = self.refs().read_head()?;
        let merge_head = self.refs().read_oid(&RefName::merge_head())?;

        if merge_head.is_none()
            && let Some(head) = &head
            && self.database().peel_to_tree(head)? == tree_oid
        {
            anyhow::bail!("nothing to commit, working tree clean");
        }

        let message = match message {
            Some(message) => message.trim().to_string(),
            None if merge_head.is_some() => self.read_merge_message()?,
            None => String::new(),
        };
        if message.is_empty() {
            anyhow::bail!("aborting commit due to empty commit message");
        }

        let parents = head.iter().chain(merge_head.iter()).cloned().collect::<Vec<_>>();
        let commit_oid = self.write_commit(parents, tree_oid, message.clone(), head.as_ref())?;

        if merge_head.is_some() {
            self.clear_merge_state()?;
        }

        let branch = match self.refs().current_branch()? {
            Some(branch) => branch.short_name().to_string(),
            None => "detached HEAD".to_string(),
        };
        let root = if head.is_none() { " (root-commit)" } else { "" };
        let summary = message.lines().next().unwrap_or_default();
        writeln!(
            self.writer(),
            "[{branch}{root} {}] {summary}",
            commit_oid.to_short_oid()
        )?;

        Ok(commit_oid)
    }

    fn read_merge_message(&self) -> anyhow::Result<String> {
        match std::fs::read_to_string(self.knot_dir().join(MERGE_MSG_FILE)) {
            Ok(message) => Ok(message
                .lines()
                .filter(|line| !line.starts_with('#'))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn clear_merge_state(&self) -> anyhow::Result<()> {
        self.refs().remove(&RefName::merge_head())?;
        match std::fs::remove_file(self.knot_dir().join(MERGE_MSG_FILE)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}
