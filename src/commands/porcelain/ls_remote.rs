use crate::areas::repository::Repository;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::transfer::advertisement::{Advertisement, Service};
use crate::artifacts::transfer::transport::transport_for;
use crate::artifacts::transfer::with_retries;
use std::io::Write;

impl Repository {
    /// List the references a remote (or URL) advertises
    pub async fn ls_remote(&self, remote: &str) -> anyhow::Result<Vec<(String, ObjectId)>> {
        let url = match self.config().remotes.get(remote) {
            Some(remote) => remote.url.clone(),
            None => remote.to_string(),
        };
        let retries = self.config().transfer.retries;

        let advertisement = with_retries(retries, async || {
            let transport = transport_for(&url)?;
            let mut connection = transport.connect(Service::UploadPack).await?;
            let advertisement = Advertisement::read(&mut connection.reader).await?;
            // no wants: end the session
            connection.writer.flush().await?;
            Ok(advertisement)
        })
        .await?;

        let mut writer = self.writer();
        for (name, oid) in &advertisement.refs {
            writeln!(writer, "{oid}\t{name}")?;
            if let Some(peeled) = advertisement.peeled.get(name) {
                writeln!(writer, "{peeled}\t{name}^{{}}")?;
            }
        }

        Ok(advertisement.refs)
    }
}
