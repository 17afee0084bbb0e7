use crate::artifacts::transfer::advertisement::Service;
use crate::artifacts::transfer::transport::{Connection, Transport};
use crate::errors::RepositoryError;
use async_trait::async_trait;
use tokio::net::TcpStream;

/// Talks to a `knot daemon` over TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    url: String,
    address: String,
    path: String,
}

impl TcpTransport {
    pub fn new(url: String, address: String, path: String) -> Self {
        Self { url, address, path }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self, service: Service) -> anyhow::Result<Connection> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|error| RepositoryError::transport(format!("cannot reach {}: {error}", self.address)))?;
        stream.set_nodelay(true).map_err(RepositoryError::transport)?;
        tracing::debug!(address = %self.address, service = service.as_str(), "connected");

        let (reader, writer) = stream.into_split();
        Connection::open(Box::pin(reader), Box::pin(writer), service, &self.path).await
    }
}
