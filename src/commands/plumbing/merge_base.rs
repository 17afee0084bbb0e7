use crate::areas::repository::Repository;
use crate::artifacts::branch::revision::Revision;
use crate::artifacts::objects::object_id::ObjectId;
use std::io::Write;

impl Repository {
    /// Best common ancestors of two revisions; only the first unless `all`
    pub async fn merge_base(&self, a: &str, b: &str, all: bool) -> anyhow::Result<Vec<ObjectId>> {
        let a = Revision::try_parse(a)?.resolve(self)?;
        let b = Revision::try_parse(b)?.resolve(self)?;

        let mut bases = self.history()?.merge_bases(&a, &b)?;
        if !all {
            bases.truncate(1);
        }

        let mut writer = self.writer();
        for base in &bases {
            writeln!(writer, "{base}")?;
        }
        Ok(bases)
    }

    /// Whether `ancestor` is reachable from `descendant`; a commit counts
    /// as its own ancestor
    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> anyhow::Result<bool> {
        let ancestor = Revision::try_parse(ancestor)?.resolve(self)?;
        let descendant = Revision::try_parse(descendant)?.resolve(self)?;

        self.history()?.is_fast_forward(&ancestor, &descendant)
    }
}
