use crate::areas::repository::Repository;
use crate::artifacts::transfer::advertisement::Service;
use crate::artifacts::transfer::server::{Locator, serve_connection};
use crate::artifacts::transfer::transport::{Connection, Transport};
use async_trait::async_trait;
use std::path::PathBuf;

const DUPLEX_BUFFER: usize = 64 * 1024;

/// Serves a repository on this machine from a task in the current runtime
#[derive(Debug, Clone)]
pub struct LocalTransport {
    url: String,
    path: PathBuf,
}

impl LocalTransport {
    pub fn new(url: String, path: PathBuf) -> Self {
        Self { url, path }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self, service: Service) -> anyhow::Result<Connection> {
        if !Repository::is_repository(&self.path) {
            anyhow::bail!("repository '{}' does not exist", self.path.display());
        }

        let (client, server) = tokio::io::duplex(DUPLEX_BUFFER);
        let locator = Locator::Fixed(self.path.clone());
        tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(server);
            if let Err(error) = serve_connection(reader, writer, &locator).await {
                tracing::warn!(%error, "local transfer session failed");
            }
        });

        let (reader, writer) = tokio::io::split(client);
        Connection::open(Box::pin(reader), Box::pin(writer), service, &self.path.to_string_lossy()).await
    }
}
