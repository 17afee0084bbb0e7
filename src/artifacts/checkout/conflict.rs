//! Reasons a checkout or merge refuses to touch a working-tree path

use std::path::PathBuf;

/// Ordered so that reports list stale files first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConflictType {
    /// Tracked path whose index or working copy differs from the old tree
    StaleFile,
    /// Directory in the way that holds untracked files
    StaleDirectory,
    /// Untracked file where the new tree wants to write
    UntrackedOverwritten,
    /// Untracked file where the new tree wants nothing
    UntrackedRemoved,
}

impl ConflictType {
    /// Pick the reason for a path the migration cannot update safely
    pub fn classify(tracked: bool, directory_in_workspace: bool, has_new_entry: bool) -> Self {
        match (tracked, directory_in_workspace, has_new_entry) {
            (true, _, _) => ConflictType::StaleFile,
            (false, true, _) => ConflictType::StaleDirectory,
            (false, false, true) => ConflictType::UntrackedOverwritten,
            (false, false, false) => ConflictType::UntrackedRemoved,
        }
    }

    fn header(self) -> &'static str {
        match self {
            ConflictType::StaleFile => "Your local changes to the following files would be overwritten:",
            ConflictType::StaleDirectory => "Updating the following directories would lose untracked files in them:",
            ConflictType::UntrackedOverwritten => "The following untracked working tree files would be overwritten:",
            ConflictType::UntrackedRemoved => "The following untracked working tree files would be removed:",
        }
    }

    fn advice(self) -> Option<&'static str> {
        match self {
            ConflictType::StaleFile => Some("Please commit your changes before you switch branches or merge."),
            ConflictType::StaleDirectory => None,
            ConflictType::UntrackedOverwritten | ConflictType::UntrackedRemoved => {
                Some("Please move or remove them before you switch branches or merge.")
            }
        }
    }

    /// One report block: header, a tab-indented line per path, then advice
    pub fn report(self, paths: &[PathBuf]) -> String {
        let mut lines = vec![self.header().to_string()];
        lines.extend(paths.iter().map(|path| format!("\t{}", path.display())));
        lines.extend(self.advice().map(str::to_string));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(true, true, true, ConflictType::StaleFile)]
    #[case(true, false, false, ConflictType::StaleFile)]
    #[case(false, true, true, ConflictType::StaleDirectory)]
    #[case(false, false, true, ConflictType::UntrackedOverwritten)]
    #[case(false, false, false, ConflictType::UntrackedRemoved)]
    fn tracked_paths_take_precedence(
        #[case] tracked: bool,
        #[case] directory: bool,
        #[case] replaced: bool,
        #[case] expected: ConflictType,
    ) {
        assert_eq!(ConflictType::classify(tracked, directory, replaced), expected);
    }

    #[test]
    fn report_lists_paths_between_header_and_advice() {
        let report = ConflictType::StaleFile.report(&[PathBuf::from("a.txt"), PathBuf::from("b/c.txt")]);

        assert_eq!(
            report,
            "Your local changes to the following files would be overwritten:\n\
             \ta.txt\n\
             \tb/c.txt\n\
             Please commit your changes before you switch branches or merge."
        );
    }

    #[test]
    fn directory_report_has_no_advice() {
        let report = ConflictType::StaleDirectory.report(&[PathBuf::from("dir")]);

        assert!(report.ends_with("\tdir"));
    }
}
