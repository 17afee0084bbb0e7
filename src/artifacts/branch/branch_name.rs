use crate::artifacts::branch::{
    HEADS_PREFIX, INVALID_BRANCH_NAME_REGEX, PSEUDO_REFS, REMOTES_PREFIX, TAGS_PREFIX,
};
use anyhow::Context;
use std::sync::LazyLock;

static INVALID_NAME: LazyLock<Result<regex::Regex, regex::Error>> =
    LazyLock::new(|| regex::Regex::new(INVALID_BRANCH_NAME_REGEX));

fn is_valid_component_path(name: &str) -> anyhow::Result<bool> {
    let re = INVALID_NAME
        .as_ref()
        .map_err(Clone::clone)
        .with_context(|| format!("invalid branch name regex: {INVALID_BRANCH_NAME_REGEX}"))?;
    Ok(!name.is_empty() && !re.is_match(name))
}

/// Full reference name: `HEAD`, another pseudo ref, or a path under `refs/`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefName(String);

impl RefName {
    pub fn try_parse(name: impl Into<String>) -> anyhow::Result<Self> {
        let name = name.into();

        if PSEUDO_REFS.contains(name.as_str()) {
            return Ok(Self(name));
        }

        match name.strip_prefix("refs/") {
            Some(rest) if is_valid_component_path(rest)? => Ok(Self(name)),
            _ => anyhow::bail!("invalid reference name: {name:?}"),
        }
    }

    pub fn head() -> Self {
        Self("HEAD".to_string())
    }

    pub fn merge_head() -> Self {
        Self("MERGE_HEAD".to_string())
    }

    pub fn orig_head() -> Self {
        Self("ORIG_HEAD".to_string())
    }

    pub fn tag(name: &str) -> anyhow::Result<Self> {
        Self::try_parse(format!("{TAGS_PREFIX}{name}"))
    }

    pub fn remote_tracking(remote: &str, branch: &str) -> anyhow::Result<Self> {
        Self::try_parse(format!("{REMOTES_PREFIX}{remote}/{branch}"))
    }

    pub fn is_head(&self) -> bool {
        self.0 == "HEAD"
    }

    pub fn is_branch(&self) -> bool {
        self.0.starts_with(HEADS_PREFIX)
    }

    pub fn is_tag(&self) -> bool {
        self.0.starts_with(TAGS_PREFIX)
    }

    /// Name with the `refs/heads/`, `refs/tags/` or `refs/remotes/` prefix removed
    pub fn short_name(&self) -> &str {
        [HEADS_PREFIX, TAGS_PREFIX, REMOTES_PREFIX]
            .iter()
            .find_map(|prefix| self.0.strip_prefix(prefix))
            .unwrap_or(&self.0)
    }

    pub fn as_ref_path(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RefName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<BranchName> for RefName {
    fn from(branch: BranchName) -> Self {
        Self(format!("{HEADS_PREFIX}{}", branch.0))
    }
}

/// Short branch name as typed by users (`main`, `feature/login`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BranchName(String);

impl BranchName {
    pub fn try_parse(name: impl Into<String>) -> anyhow::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            anyhow::bail!("branch name cannot be empty");
        }

        if !is_valid_component_path(&name)? || name == "HEAD" {
            anyhow::bail!("invalid branch name: {}", name);
        }

        Ok(Self(name))
    }

    pub fn try_from_ref_name(ref_name: &RefName) -> anyhow::Result<Self> {
        let name = ref_name
            .as_ref()
            .strip_prefix(HEADS_PREFIX)
            .with_context(|| format!("{ref_name} is not a branch"))?;
        Self::try_parse(name)
    }

    pub fn to_ref_name(&self) -> RefName {
        RefName::from(self.clone())
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::proptest;
    use rstest::rstest;

    proptest! {
        #[test]
        fn plain_and_nested_names_are_valid(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            assert!(BranchName::try_parse(prefix.clone()).is_ok());
            assert!(BranchName::try_parse(format!("{prefix}/{suffix}")).is_ok());
        }

        #[test]
        fn leading_dot_is_invalid(suffix in "[a-zA-Z0-9_-]+") {
            assert!(BranchName::try_parse(format!(".{suffix}")).is_err());
        }

        #[test]
        fn lock_suffix_is_invalid(prefix in "[a-zA-Z0-9_-]+") {
            assert!(BranchName::try_parse(format!("{prefix}.lock")).is_err());
        }

        #[test]
        fn consecutive_dots_are_invalid(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            assert!(BranchName::try_parse(format!("{prefix}..{suffix}")).is_err());
        }

        #[test]
        fn special_characters_are_invalid(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+",
            special_char in r"[\*:\?\[\\^~ ]"
        ) {
            assert!(BranchName::try_parse(format!("{prefix}{special_char}{suffix}")).is_err());
        }
    }

    #[rstest]
    #[case("")]
    #[case("/main")]
    #[case("main/")]
    #[case("a@{b}")]
    #[case("a\x00b")]
    #[case("HEAD")]
    fn rejects_invalid_branch_names(#[case] name: &str) {
        assert!(BranchName::try_parse(name).is_err());
    }

    #[rstest]
    #[case("HEAD", true)]
    #[case("MERGE_HEAD", true)]
    #[case("refs/heads/main", true)]
    #[case("refs/remotes/origin/feature/x", true)]
    #[case("refs/tags/v1.0", true)]
    #[case("heads/main", false)]
    #[case("refs/", false)]
    #[case("refs/heads/../main", false)]
    #[case("refs/heads/main.lock", false)]
    fn validates_full_ref_names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(RefName::try_parse(name).is_ok(), valid);
    }

    #[test]
    fn short_names_strip_the_namespace() {
        let branch = BranchName::try_parse("feature/login").unwrap().to_ref_name();
        assert_eq!(branch.as_ref(), "refs/heads/feature/login");
        assert_eq!(branch.short_name(), "feature/login");
        assert_eq!(RefName::remote_tracking("origin", "main").unwrap().short_name(), "origin/main");
        assert_eq!(RefName::head().short_name(), "HEAD");
    }
}
