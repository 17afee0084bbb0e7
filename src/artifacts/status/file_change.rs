use crate::artifacts::index::index_entry::Stage;
use colored::Colorize;

const LABEL_WIDTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum WorkspaceChangeType {
    #[default]
    None,
    Untracked,
    Modified,
    Deleted,
}

impl From<&WorkspaceChangeType> for &str {
    fn from(change: &WorkspaceChangeType) -> Self {
        match change {
            WorkspaceChangeType::None => " ",
            WorkspaceChangeType::Untracked => "??",
            WorkspaceChangeType::Modified => "M",
            WorkspaceChangeType::Deleted => "D",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum IndexChangeType {
    #[default]
    None,
    Added,
    Modified,
    Deleted,
}

impl From<&IndexChangeType> for &str {
    fn from(change: &IndexChangeType) -> Self {
        match change {
            IndexChangeType::None => " ",
            IndexChangeType::Added => "A",
            IndexChangeType::Modified => "M",
            IndexChangeType::Deleted => "D",
        }
    }
}

/// How a path ended up unmerged, read off the stages present in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnmergedType {
    BothDeleted,
    AddedByUs,
    DeletedByThem,
    AddedByThem,
    DeletedByUs,
    BothAdded,
    BothModified,
}

impl UnmergedType {
    /// `stages` must be sorted
    pub fn from_stages(stages: &[Stage]) -> Option<Self> {
        use Stage::{Base, Ours, Theirs};

        match stages {
            [Base, Ours, Theirs] => Some(UnmergedType::BothModified),
            [Base, Ours] => Some(UnmergedType::DeletedByThem),
            [Base, Theirs] => Some(UnmergedType::DeletedByUs),
            [Ours, Theirs] => Some(UnmergedType::BothAdded),
            [Ours] => Some(UnmergedType::AddedByUs),
            [Theirs] => Some(UnmergedType::AddedByThem),
            [Base] => Some(UnmergedType::BothDeleted),
            _ => None,
        }
    }

    pub fn short_code(&self) -> &'static str {
        match self {
            UnmergedType::BothDeleted => "DD",
            UnmergedType::AddedByUs => "AU",
            UnmergedType::DeletedByThem => "UD",
            UnmergedType::AddedByThem => "UA",
            UnmergedType::DeletedByUs => "DU",
            UnmergedType::BothAdded => "AA",
            UnmergedType::BothModified => "UU",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UnmergedType::BothDeleted => "both deleted:",
            UnmergedType::AddedByUs => "added by us:",
            UnmergedType::DeletedByThem => "deleted by them:",
            UnmergedType::AddedByThem => "added by them:",
            UnmergedType::DeletedByUs => "deleted by us:",
            UnmergedType::BothAdded => "both added:",
            UnmergedType::BothModified => "both modified:",
        }
    }
}

impl std::fmt::Display for UnmergedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:>width$}{:<17}",
            "",
            self.label().red(),
            width = LABEL_WIDTH
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileChangeType {
    Workspace(WorkspaceChangeType),
    Index(IndexChangeType),
}

impl std::fmt::Display for FileChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let colored_str = match self {
            FileChangeType::Workspace(workspace_change) => match workspace_change {
                WorkspaceChangeType::None | WorkspaceChangeType::Untracked => "".normal(),
                WorkspaceChangeType::Modified => "modified:   ".red(),
                WorkspaceChangeType::Deleted => "deleted:    ".red(),
            },
            FileChangeType::Index(index_change) => match index_change {
                IndexChangeType::None => "".normal(),
                IndexChangeType::Added => "new file:   ".green(),
                IndexChangeType::Modified => "modified:   ".green(),
                IndexChangeType::Deleted => "deleted:    ".green(),
            },
        };
        write!(f, "{:>width$}{}", "", colored_str, width = LABEL_WIDTH)
    }
}

/// Index-side and workspace-side change for one tracked path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FileChange {
    pub index_change: IndexChangeType,
    pub workspace_change: WorkspaceChangeType,
}

impl From<&FileChange> for String {
    fn from(change: &FileChange) -> Self {
        let index_str: &str = (&change.index_change).into();
        let workspace_str: &str = (&change.workspace_change).into();
        format!("{}{}", index_str, workspace_str)
    }
}

impl std::fmt::Display for FileChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let change_str: String = self.into();
        write!(f, "{}", change_str)
    }
}
