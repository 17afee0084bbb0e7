use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::{BranchName, RefName};
use crate::artifacts::branch::{ANCESTOR_REGEX, PARENT_REGEX, REF_ALIASES};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::errors::RepositoryError;
use anyhow::Context;

/// A revision expression naming a commit
///
/// Supported forms:
/// - Reference names, full (`refs/heads/main`) or short (`main`, `v1.0`,
///   `origin/main`), and `HEAD` or its alias `@`
/// - Full or abbreviated (4+ hex digits) object IDs, tried when no
///   reference matches
/// - `<revision>^` for the first parent, `<revision>~<n>` for the n-th
///   first-parent ancestor
///
/// Short names are tried in order as given, under `refs/`, `refs/tags/`,
/// `refs/heads/`, `refs/remotes/`, and as `refs/remotes/<name>/HEAD`.
/// Annotated tags are peeled to the commit they point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
    Ref(String),
    Ancestor(Box<Revision>, usize),
    Parent(Box<Revision>),
}

impl Revision {
    pub fn resolve(&self, repository: &Repository) -> anyhow::Result<ObjectId> {
        match self {
            Revision::Ref(name) => {
                if let Some(oid) = Self::resolve_ref(name, repository)? {
                    return repository.database().peel_to_commit(&oid);
                }

                if Self::looks_like_oid(name) {
                    Self::resolve_oid(name, repository)
                } else {
                    Err(RepositoryError::UnknownReference(name.clone()))
                        .with_context(|| format!("unknown revision {name}"))
                }
            }
            Revision::Parent(base_revision) => {
                let oid = base_revision.resolve(repository)?;
                Self::resolve_commit_parent(&oid, repository)
            }
            Revision::Ancestor(base_revision, generations) => {
                let mut oid = base_revision.resolve(repository)?;
                for _ in 0..*generations {
                    oid = Self::resolve_commit_parent(&oid, repository)?;
                }

                Ok(oid)
            }
        }
    }

    /// Candidate full names for a possibly-short reference name
    pub fn expand_ref_name(name: &str) -> Vec<RefName> {
        [
            name.to_string(),
            format!("refs/{name}"),
            format!("refs/tags/{name}"),
            format!("refs/heads/{name}"),
            format!("refs/remotes/{name}"),
            format!("refs/remotes/{name}/HEAD"),
        ]
        .into_iter()
        .filter_map(|candidate| RefName::try_parse(candidate).ok())
        .collect()
    }

    fn resolve_ref(name: &str, repository: &Repository) -> anyhow::Result<Option<ObjectId>> {
        for candidate in Self::expand_ref_name(name) {
            if let Some(oid) = repository.refs().read_oid(&candidate)? {
                return Ok(Some(oid));
            }
        }

        Ok(None)
    }

    fn resolve_commit_parent(oid: &ObjectId, repository: &Repository) -> anyhow::Result<ObjectId> {
        let commit = repository.database().load_commit(oid)?;
        commit
            .parent()
            .cloned()
            .with_context(|| format!("commit {} has no parent", oid.to_short_oid()))
    }

    fn resolve_oid(oid_str: &str, repository: &Repository) -> anyhow::Result<ObjectId> {
        let matches = repository.database().find_objects_by_prefix(oid_str)?;

        let commit_matches = matches
            .iter()
            .filter(|oid| {
                repository
                    .database()
                    .get_object_type(oid)
                    .is_ok_and(|object_type| object_type == ObjectType::Commit)
            })
            .collect::<Vec<_>>();

        match commit_matches.as_slice() {
            [] if matches.is_empty() => anyhow::bail!(
                "ambiguous argument '{}': unknown revision or path not in the working tree",
                oid_str
            ),
            [] => anyhow::bail!("object {} is not a commit", oid_str),
            [oid] => Ok((*oid).clone()),
            candidates => {
                let mut error_msg = format!("short SHA1 {} is ambiguous\nhint: The candidates are:", oid_str);
                for oid in candidates {
                    error_msg.push_str(&format!("\nhint:   {} commit", oid.to_short_oid()));
                }
                anyhow::bail!(error_msg)
            }
        }
    }

    pub fn try_parse(revision: &str) -> anyhow::Result<Revision> {
        let parent = regex::Regex::new(PARENT_REGEX)
            .with_context(|| format!("invalid parent regex: {PARENT_REGEX}"))?;
        let ancestor = regex::Regex::new(ANCESTOR_REGEX)
            .with_context(|| format!("invalid ancestor regex: {ANCESTOR_REGEX}"))?;

        if let Some(caps) = parent.captures(revision) {
            Ok(Revision::Parent(Box::new(Self::try_parse(&caps[1])?)))
        } else if let Some(caps) = ancestor.captures(revision) {
            let generations: usize = caps[2]
                .parse()
                .with_context(|| format!("failed to parse generations in revision: {revision}"))?;
            Ok(Revision::Ancestor(Box::new(Self::try_parse(&caps[1])?), generations))
        } else {
            let resolved_name = *REF_ALIASES.get(revision).unwrap_or(&revision);
            if RefName::try_parse(resolved_name).is_err() {
                BranchName::try_parse(resolved_name)?;
            }
            Ok(Revision::Ref(resolved_name.to_string()))
        }
    }

    fn looks_like_oid(s: &str) -> bool {
        s.len() >= 4 && s.len() <= 40 && s.chars().all(|c| c.is_ascii_hexdigit())
    }
}
