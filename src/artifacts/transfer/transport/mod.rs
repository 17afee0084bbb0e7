//! Byte streams between a client and a serving repository
//!
//! A transport only opens a connection and sends the request line; the
//! exchange on top of it is the same whether the peer is a task in this
//! process or a daemon across the network.
//!
//! ```text
//! C: <service> <repository path>
//! C: 0000
//! ```

use crate::artifacts::transfer::advertisement::Service;
use crate::artifacts::transfer::pkt_line::{PktReader, PktWriter};
use async_trait::async_trait;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod local;
pub mod tcp;

pub use local::LocalTransport;
pub use tcp::TcpTransport;

pub const URL_SCHEME: &str = "knot://";
const FILE_SCHEME: &str = "file://";
pub const DEFAULT_PORT: u16 = 9418;

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// An open session with a serving repository
pub struct Connection {
    pub reader: PktReader<BoxedReader>,
    pub writer: PktWriter<BoxedWriter>,
}

impl Connection {
    /// Send the request line over a freshly opened stream
    pub async fn open(
        reader: BoxedReader,
        writer: BoxedWriter,
        service: Service,
        path: &str,
    ) -> anyhow::Result<Self> {
        let mut connection = Connection {
            reader: PktReader::new(reader),
            writer: PktWriter::new(writer),
        };
        connection
            .writer
            .write_line(&format!("{} {path}", service.as_str()))
            .await?;
        connection.writer.flush().await?;
        Ok(connection)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn url(&self) -> &str;

    async fn connect(&self, service: Service) -> anyhow::Result<Connection>;
}

/// Pick a transport from the shape of `url`
///
/// `knot://host[:port]/path` goes over TCP to a daemon; `file://path` and
/// plain paths are served in-process.
pub fn transport_for(url: &str) -> anyhow::Result<Box<dyn Transport>> {
    if let Some(rest) = url.strip_prefix(URL_SCHEME) {
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        if authority.is_empty() {
            anyhow::bail!("missing host in '{url}'");
        }
        let address = if authority.contains(':') {
            authority.to_string()
        } else {
            format!("{authority}:{DEFAULT_PORT}")
        };
        return Ok(Box::new(TcpTransport::new(url.to_string(), address, format!("/{path}"))));
    }

    let path = url.strip_prefix(FILE_SCHEME).unwrap_or(url);
    if path.is_empty() {
        anyhow::bail!("empty repository url");
    }
    Ok(Box::new(LocalTransport::new(url.to_string(), PathBuf::from(path))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("knot://example.com/project", "knot://example.com/project")]
    #[case("/srv/project", "/srv/project")]
    #[case("file:///srv/project", "file:///srv/project")]
    fn transports_keep_their_url(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(transport_for(url).unwrap().url(), expected);
    }

    #[rstest]
    #[case("knot:///project")]
    #[case("")]
    fn malformed_urls_are_refused(#[case] url: &str) {
        assert!(transport_for(url).is_err());
    }
}
