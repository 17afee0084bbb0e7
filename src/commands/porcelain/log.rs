use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::RefName;
use crate::artifacts::branch::revision::Revision;
use crate::artifacts::history::rev_list::RevList;
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::objects::object_id::ObjectId;
use colored::Colorize;
use std::collections::HashMap;
use std::io::Write;

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub oneline: bool,
    pub max_count: Option<usize>,
    pub decorate: bool,
}

type Decorations = HashMap<ObjectId, Vec<RefName>>;

impl Repository {
    /// Walk history from `revisions` (`HEAD` when empty), newest first;
    /// a `^rev` argument excludes everything reachable from `rev`
    pub async fn log(&self, revisions: &[String], options: &LogOptions) -> anyhow::Result<()> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for revision in revisions {
            match revision.strip_prefix('^') {
                Some(excluded) => exclude.push(Revision::try_parse(excluded)?.resolve(self)?),
                None => include.push(Revision::try_parse(revision)?.resolve(self)?),
            }
        }
        if include.is_empty() {
            match self.refs().read_head()? {
                Some(head) => include.push(head),
                None => {
                    let branch = self.refs().current_branch()?;
                    let name = branch.as_ref().map_or("HEAD", |branch| branch.short_name());
                    anyhow::bail!("your current branch '{name}' does not have any commits yet");
                }
            }
        }

        let history = self.history()?;
        let walk = RevList::new(&history, include).excluding(exclude).walk()?;
        let decorations = if options.decorate { self.decorations()? } else { Decorations::new() };
        let limit = options.max_count.unwrap_or(usize::MAX);

        for (position, oid) in walk.commits.iter().take(limit).enumerate() {
            let commit = self.database().load_commit(oid)?;
            let decoration = self.decoration(oid, &decorations)?;

            if options.oneline {
                writeln!(
                    self.writer(),
                    "{}{decoration} {}",
                    oid.to_short_oid().yellow(),
                    commit.short_message()
                )?;
            } else {
                if position > 0 {
                    writeln!(self.writer())?;
                }
                self.show_commit_medium(oid, &commit, &decoration)?;
            }
        }

        Ok(())
    }

    fn show_commit_medium(&self, oid: &ObjectId, commit: &Commit, decoration: &str) -> anyhow::Result<()> {
        let mut writer = self.writer();

        writeln!(writer, "{}{decoration}", format!("commit {oid}").yellow())?;
        if commit.is_merge() {
            let parents = commit
                .parents()
                .iter()
                .map(|parent| parent.to_short_oid())
                .collect::<Vec<_>>();
            writeln!(writer, "Merge: {}", parents.join(" "))?;
        }
        writeln!(writer, "Author: {}", commit.author().display_name())?;
        writeln!(writer, "Date:   {}", commit.author().readable_timestamp())?;
        writeln!(writer)?;
        for line in commit.message().lines() {
            writeln!(writer, "    {line}")?;
        }

        Ok(())
    }

    fn decorations(&self) -> anyhow::Result<Decorations> {
        let mut decorations = Decorations::new();
        for (name, oid) in self.refs().list("refs/")? {
            let oid = self.database().peel_to_commit(&oid).unwrap_or(oid);
            decorations.entry(oid).or_default().push(name);
        }
        Ok(decorations)
    }

    fn decoration(&self, oid: &ObjectId, decorations: &Decorations) -> anyhow::Result<String> {
        let head = self.refs().read_head()?;
        let current = self.refs().current_branch()?;
        let names = decorations.get(oid).map(Vec::as_slice).unwrap_or_default();

        let mut labels = Vec::new();
        if head.as_ref() == Some(oid) && current.is_none() {
            labels.push("HEAD".cyan().bold().to_string());
        }
        for name in names {
            let label = if name.is_tag() {
                format!("tag: {}", name.short_name()).yellow()
            } else if name.is_branch() {
                name.short_name().green()
            } else {
                name.short_name().red()
            };

            if current.as_ref() == Some(name) {
                labels.insert(0, format!("{} {label}", "HEAD ->".cyan().bold()));
            } else {
                labels.push(label.to_string());
            }
        }

        if labels.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(" ({})", labels.join(", ")))
    }
}
