use crate::areas::repository::Repository;
use crate::artifacts::branch::TAGS_PREFIX;
use crate::artifacts::branch::branch_name::RefName;
use crate::artifacts::branch::revision::Revision;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tag::Tag;
use std::io::Write;

impl Repository {
    /// Tag `target` (or `HEAD`); a message makes an annotated tag object
    pub async fn create_tag(
        &self,
        name: &str,
        target: Option<&str>,
        message: Option<&str>,
        force: bool,
    ) -> anyhow::Result<ObjectId> {
        let ref_name = RefName::tag(name)?;
        let target_oid = Revision::try_parse(target.unwrap_or("HEAD"))?.resolve(self)?;

        let tag_oid = match message {
            Some(message) => {
                let tag = Tag::new(
                    target_oid.clone(),
                    self.database().get_object_type(&target_oid)?,
                    name.to_string(),
                    self.author()?,
                    message.trim().to_string(),
                );
                self.database().store(&tag)?
            }
            None => target_oid,
        };

        let existing = self.refs().read_oid(&ref_name)?;
        if existing.is_some() && !force {
            anyhow::bail!("tag '{name}' already exists");
        }
        self.refs().update(&ref_name, existing.as_ref(), Some(&tag_oid))?;

        tracing::info!(tag = name, oid = %tag_oid, annotated = message.is_some(), "tag created");
        Ok(tag_oid)
    }

    pub async fn delete_tag(&self, name: &str) -> anyhow::Result<()> {
        let ref_name = RefName::tag(name)?;
        let oid = self
            .refs()
            .read_oid(&ref_name)?
            .ok_or_else(|| anyhow::anyhow!("tag '{name}' not found."))?;

        self.refs().delete(&ref_name, &oid)?;
        writeln!(self.writer(), "Deleted tag '{name}' (was {})", oid.to_short_oid())?;
        Ok(())
    }

    pub async fn list_tags(&self) -> anyhow::Result<Vec<String>> {
        let names = self
            .refs()
            .list(TAGS_PREFIX)?
            .into_iter()
            .map(|(name, _)| name.short_name().to_string())
            .collect::<Vec<_>>();

        let mut writer = self.writer();
        for name in &names {
            writeln!(writer, "{name}")?;
        }
        Ok(names)
    }
}
