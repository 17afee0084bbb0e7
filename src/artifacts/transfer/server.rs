//! Serving repositories to transfer clients
//!
//! [`serve_connection`] runs one session on any pair of streams: it reads the
//! request line, opens the named repository and hands the streams to
//! upload-pack or receive-pack. [`Daemon`] accepts TCP connections and runs
//! each session on its own task.

use crate::areas::repository::Repository;
use crate::artifacts::transfer::advertisement::Service;
use crate::artifacts::transfer::pkt_line::{PktReader, PktWriter};
use crate::artifacts::transfer::receive_pack::ReceivePack;
use crate::artifacts::transfer::upload_pack::UploadPack;
use crate::errors::RepositoryError;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};

/// Where requested repository paths are looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Always this repository, whatever was requested
    Fixed(PathBuf),
    /// Requested paths relative to a base directory
    Under(PathBuf),
}

impl Locator {
    pub fn locate(&self, requested: &str) -> anyhow::Result<PathBuf> {
        match self {
            Locator::Fixed(path) => Ok(path.clone()),
            Locator::Under(base) => {
                let relative = Path::new(requested.trim_start_matches('/'));
                if relative
                    .components()
                    .any(|component| !matches!(component, Component::Normal(_)))
                {
                    anyhow::bail!("access denied to '{requested}'");
                }
                Ok(base.join(relative))
            }
        }
    }
}

pub async fn serve_connection<R, W>(reader: R, writer: W, locator: &Locator) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut reader = PktReader::new(reader);
    let mut writer = PktWriter::new(writer);

    let request = reader.read_section().await?;
    let Some(line) = request.first() else {
        return Err(RepositoryError::transport("empty request").into());
    };
    let (service, requested) = line
        .split_once(' ')
        .ok_or_else(|| RepositoryError::transport(format!("malformed request {line:?}")))?;

    let opened = Service::parse(service).and_then(|service| {
        let path = locator.locate(requested)?;
        let repository = Repository::open(&path, Box::new(std::io::sink()))?;
        Ok((service, repository))
    });
    let (service, repository) = match opened {
        Ok(opened) => opened,
        Err(error) => {
            writer.write_line(&format!("ERR {error}")).await?;
            writer.flush().await?;
            return Err(error);
        }
    };

    tracing::info!(service = service.as_str(), repository = %repository.knot_dir().display(), "serving");
    match service {
        Service::UploadPack => {
            UploadPack::new(&repository).serve(&mut reader, &mut writer).await?;
        }
        Service::ReceivePack => {
            ReceivePack::new(&repository).serve(&mut reader, &mut writer).await?;
        }
    }
    writer.shutdown().await
}

/// Serves every repository below a base directory over TCP
pub struct Daemon {
    listener: TcpListener,
    base: PathBuf,
}

impl Daemon {
    pub async fn bind(address: impl ToSocketAddrs, base: PathBuf) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener, base })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(address = %self.local_addr()?, base = %self.base.display(), "daemon listening");
        let locator = Locator::Under(self.base);

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let locator = locator.clone();
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                match serve_connection(reader, writer, &locator).await {
                    Ok(()) => tracing::debug!(%peer, "session finished"),
                    Err(error) => tracing::warn!(%peer, %error, "session failed"),
                }
            });
        }
    }
}
