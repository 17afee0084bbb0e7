use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use derive_new::new;
use std::fmt;

/// An object reference as it appears inside a tree: digest plus mode
#[derive(Debug, Clone, PartialEq, Eq, Hash, new)]
pub struct DatabaseEntry {
    pub oid: ObjectId,
    pub mode: EntryMode,
}

impl DatabaseEntry {
    pub fn is_tree(&self) -> bool {
        self.mode.is_tree()
    }

    /// Kind of object the digest names, implied by the mode
    pub fn object_type(&self) -> ObjectType {
        if self.is_tree() {
            ObjectType::Tree
        } else {
            ObjectType::Blob
        }
    }
}

/// `<mode> <type> <oid>`, the prefix of a tree listing line
impl fmt::Display for DatabaseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0>6} {} {}", self.mode.as_str(), self.object_type(), self.oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::index::entry_mode::FileMode;
    use pretty_assertions::assert_eq;

    #[test]
    fn directories_list_as_trees_with_padded_mode() {
        let oid = ObjectId::digest(b"tree");
        let entry = DatabaseEntry::new(oid.clone(), EntryMode::Directory);

        assert_eq!(entry.object_type(), ObjectType::Tree);
        assert_eq!(entry.to_string(), format!("040000 tree {oid}"));
    }

    #[test]
    fn executables_list_as_blobs() {
        let oid = ObjectId::digest(b"script");
        let entry = DatabaseEntry::new(oid.clone(), EntryMode::File(FileMode::Executable));

        assert_eq!(entry.to_string(), format!("100755 blob {oid}"));
    }
}
