//! Commit object
//!
//! Commits are the nodes of the history graph. They contain:
//! - A tree object ID (directory snapshot)
//! - Parent commit ID(s), in order (none for a root commit, several for a merge)
//! - Author and committer information
//! - Commit message
//!
//! ## Format
//!
//! ```text
//! tree <tree-sha>
//! parent <parent-sha>
//! author <name> <email> <timestamp> <timezone>
//! committer <name> <email> <timestamp> <timezone>
//!
//! <commit message>
//! ```
//!
//! The message is kept byte for byte, so a parsed commit re-serializes to the
//! exact bytes it was read from.

use crate::artifacts::objects::object::Unpackable;
use crate::artifacts::objects::object::{Object, Packable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::errors::RepositoryError;
use anyhow::Context;
use bytes::Bytes;
use std::io::BufRead;

const AUTHOR_NAME_VAR: &str = "KNOT_AUTHOR_NAME";
const AUTHOR_EMAIL_VAR: &str = "KNOT_AUTHOR_EMAIL";
const AUTHOR_DATE_VAR: &str = "KNOT_AUTHOR_DATE";

type Timestamp = chrono::DateTime<chrono::FixedOffset>;

/// Who made a commit or tag, and when, in the offset they were in
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Author {
    name: String,
    email: String,
    timestamp: Timestamp,
}

impl Author {
    /// Identity stamped with the local clock
    pub fn new(name: String, email: String) -> Self {
        Self::new_with_timestamp(name, email, chrono::Local::now().fixed_offset())
    }

    pub fn new_with_timestamp(name: String, email: String, timestamp: Timestamp) -> Self {
        Author { name, email, timestamp }
    }

    /// Identity for new commits and tags
    ///
    /// `KNOT_AUTHOR_NAME` and `KNOT_AUTHOR_EMAIL` win over the configured
    /// values. `KNOT_AUTHOR_DATE` pins the timestamp; it accepts RFC 2822 or
    /// `%Y-%m-%d %H:%M:%S %z` and is ignored when it parses as neither.
    pub fn resolve(configured_name: Option<&str>, configured_email: Option<&str>) -> anyhow::Result<Self> {
        let from_env_or = |var: &str, configured: Option<&str>| {
            std::env::var(var).ok().or_else(|| configured.map(str::to_string))
        };

        let name = from_env_or(AUTHOR_NAME_VAR, configured_name)
            .with_context(|| format!("author name not configured: set [user] name or {AUTHOR_NAME_VAR}"))?;
        let email = from_env_or(AUTHOR_EMAIL_VAR, configured_email)
            .with_context(|| format!("author email not configured: set [user] email or {AUTHOR_EMAIL_VAR}"))?;

        let pinned = std::env::var(AUTHOR_DATE_VAR).ok().and_then(|date| parse_date(&date));
        Ok(match pinned {
            Some(timestamp) => Author::new_with_timestamp(name, email, timestamp),
            None => Author::new(name, email),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// `Name <email>`
    pub fn display_name(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }

    /// `Name <email> <unix seconds> <+hhmm>`, as stored in objects
    pub fn display(&self) -> String {
        format!(
            "{} {} {}",
            self.display_name(),
            self.timestamp.timestamp(),
            self.timestamp.format("%z")
        )
    }

    /// e.g. `Sun Jan 1 12:00:00 2023 +0000`
    pub fn readable_timestamp(&self) -> String {
        self.timestamp.format("%a %b %-d %H:%M:%S %Y %z").to_string()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

fn parse_date(date: &str) -> Option<Timestamp> {
    chrono::DateTime::parse_from_rfc2822(date)
        .or_else(|_| chrono::DateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S %z"))
        .ok()
}

/// `+hhmm` or `-hhmm`
fn parse_offset(offset: &str) -> Option<chrono::FixedOffset> {
    let (sign, digits) = match offset.split_at_checked(1)? {
        ("+", digits) => (1, digits),
        ("-", digits) => (-1, digits),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    chrono::FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

impl TryFrom<&str> for Author {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let invalid = || RepositoryError::InvalidObject(format!("malformed identity line '{value}'"));

        let (identity, offset) = value.rsplit_once(' ').ok_or_else(invalid)?;
        let (identity, seconds) = identity.rsplit_once(' ').ok_or_else(invalid)?;
        let (name, email) = identity
            .strip_suffix('>')
            .and_then(|identity| identity.split_once('<'))
            .ok_or_else(invalid)?;

        let offset = parse_offset(offset).ok_or_else(invalid)?;
        let timestamp = seconds
            .parse::<i64>()
            .ok()
            .and_then(|seconds| chrono::DateTime::from_timestamp(seconds, 0))
            .ok_or_else(invalid)?
            .with_timezone(&offset);

        Ok(Author::new_with_timestamp(
            name.trim_end().to_string(),
            email.to_string(),
            timestamp,
        ))
    }
}

/// Slim representation of a commit for graph walks
///
/// Ordered by timestamp so walks can pop the newest commit first.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SlimCommit {
    pub oid: ObjectId,
    pub parents: Vec<ObjectId>,
    pub timestamp: Timestamp,
}

impl PartialOrd for SlimCommit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SlimCommit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.oid.cmp(&other.oid))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Commit {
    /// Parent commit IDs (empty for a root commit, several for a merge commit)
    parents: Vec<ObjectId>,
    tree_oid: ObjectId,
    author: Author,
    committer: Author,
    message: String,
}

impl Commit {
    /// Create a new commit; the author is also recorded as committer
    pub fn new(parents: Vec<ObjectId>, tree_oid: ObjectId, author: Author, message: String) -> Self {
        Commit {
            parents,
            tree_oid,
            author: author.clone(),
            committer: author,
            message,
        }
    }

    /// First line of the message
    pub fn short_message(&self) -> String {
        self.message.lines().next().unwrap_or("").to_string()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn tree_oid(&self) -> &ObjectId {
        &self.tree_oid
    }

    pub fn parents(&self) -> &[ObjectId] {
        &self.parents
    }

    pub fn parent(&self) -> Option<&ObjectId> {
        self.parents.first()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub fn committer(&self) -> &Author {
        &self.committer
    }

    pub fn timestamp(&self) -> Timestamp {
        self.committer.timestamp()
    }

    pub fn to_slim(&self, oid: ObjectId) -> SlimCommit {
        SlimCommit {
            oid,
            parents: self.parents.clone(),
            timestamp: self.timestamp(),
        }
    }
}

impl Packable for Commit {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        Ok(Bytes::from(self.display()))
    }
}

impl Unpackable for Commit {
    fn deserialize(mut reader: impl BufRead) -> anyhow::Result<Self> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;

        let (headers, message) = content
            .split_once("\n\n")
            .context("Invalid commit object: missing message separator")?;

        let mut tree_oid = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        for line in headers.lines() {
            let (key, value) = line
                .split_once(' ')
                .context("Invalid commit object: malformed header")?;
            match key {
                "tree" => tree_oid = Some(ObjectId::try_parse(value.to_string())?),
                "parent" => parents.push(ObjectId::try_parse(value.to_string())?),
                "author" => author = Some(Author::try_from(value)?),
                "committer" => committer = Some(Author::try_from(value)?),
                _ => {}
            }
        }

        let missing = |field: &str| RepositoryError::InvalidObject(format!("commit missing {field}"));

        Ok(Commit {
            parents,
            tree_oid: tree_oid.ok_or_else(|| missing("tree"))?,
            author: author.ok_or_else(|| missing("author"))?,
            committer: committer.ok_or_else(|| missing("committer"))?,
            message: message.to_string(),
        })
    }
}

impl Object for Commit {
    fn object_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn display(&self) -> String {
        let parents = self
            .parents
            .iter()
            .map(|parent| format!("parent {parent}\n"))
            .collect::<String>();

        format!(
            "tree {}\n{parents}author {}\ncommitter {}\n\n{}",
            self.tree_oid,
            self.author.display(),
            self.committer.display(),
            self.message
        )
    }
}
