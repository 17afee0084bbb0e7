//! pkt-line framing
//!
//! Every protocol message is a packet: four lowercase hex digits giving the
//! total length (header included) followed by the payload. `0000` is a
//! flush packet and carries no payload; it ends a section of the exchange.
//!
//! ```text
//! 000dwant abc\n   data packet, 9 payload bytes
//! 0000             flush
//! ```

use crate::errors::RepositoryError;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = 65516;
pub const FLUSH_PKT: &[u8; 4] = b"0000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Data(Bytes),
    Flush,
}

/// Frame one payload
pub fn encode(payload: &[u8]) -> anyhow::Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        anyhow::bail!(
            "pkt-line payload of {} bytes exceeds {MAX_PAYLOAD_LEN}",
            payload.len()
        );
    }

    let mut framed = format!("{:04x}", payload.len() + HEADER_LEN).into_bytes();
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Payload length announced by a header, `None` for a flush
pub fn decode_header(header: &[u8; HEADER_LEN]) -> anyhow::Result<Option<usize>> {
    if header == FLUSH_PKT {
        return Ok(None);
    }

    let text = std::str::from_utf8(header)
        .map_err(|_| RepositoryError::transport("pkt-line header is not ASCII"))?;
    let length = usize::from_str_radix(text, 16)
        .map_err(|_| RepositoryError::transport(format!("invalid pkt-line header {text:?}")))?;

    if length < HEADER_LEN || length - HEADER_LEN > MAX_PAYLOAD_LEN {
        return Err(RepositoryError::transport(format!("invalid pkt-line length {length}")).into());
    }
    Ok(Some(length - HEADER_LEN))
}

pub struct PktReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin + Send> PktReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub async fn read_packet(&mut self) -> anyhow::Result<Packet> {
        let mut header = [0u8; HEADER_LEN];
        self.reader
            .read_exact(&mut header)
            .await
            .map_err(RepositoryError::transport)?;

        let Some(length) = decode_header(&header)? else {
            return Ok(Packet::Flush);
        };

        let mut payload = vec![0u8; length];
        self.reader
            .read_exact(&mut payload)
            .await
            .map_err(RepositoryError::transport)?;
        Ok(Packet::Data(Bytes::from(payload)))
    }

    /// Next text line without its trailing newline, `None` at a flush
    ///
    /// A line starting with `ERR ` is the peer giving up; it is raised as
    /// [`RepositoryError::RemoteError`] carrying the peer's message.
    pub async fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        match self.read_packet().await? {
            Packet::Flush => Ok(None),
            Packet::Data(payload) => {
                let line = String::from_utf8_lossy(&payload);
                let line = line.strip_suffix('\n').unwrap_or(&line).to_string();
                if let Some(message) = line.strip_prefix("ERR ") {
                    return Err(RepositoryError::RemoteError(message.to_string()).into());
                }
                Ok(Some(line))
            }
        }
    }

    /// Every line up to the next flush
    pub async fn read_section(&mut self) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.read_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }

    /// Concatenated payloads up to the next flush
    ///
    /// An `ERR ` line in place of the first payload is raised like in
    /// [`PktReader::read_line`].
    pub async fn read_data(&mut self) -> anyhow::Result<Bytes> {
        let mut data = Vec::new();
        while let Packet::Data(payload) = self.read_packet().await? {
            if data.is_empty()
                && let Some(message) = payload.strip_prefix(b"ERR ")
            {
                let message = String::from_utf8_lossy(message);
                let message = message.strip_suffix('\n').unwrap_or(&message);
                return Err(RepositoryError::RemoteError(message.to_string()).into());
            }
            data.extend_from_slice(&payload);
        }
        Ok(Bytes::from(data))
    }
}

pub struct PktWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> PktWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
        let mut payload = line.as_bytes().to_vec();
        payload.push(b'\n');
        self.write_packet(&payload).await
    }

    pub async fn write_packet(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        let framed = encode(payload)?;
        self.writer
            .write_all(&framed)
            .await
            .map_err(RepositoryError::transport)?;
        Ok(())
    }

    /// Binary data split into as many packets as needed, then a flush
    pub async fn write_data(&mut self, data: &[u8]) -> anyhow::Result<()> {
        for chunk in data.chunks(MAX_PAYLOAD_LEN) {
            self.write_packet(chunk).await?;
        }
        self.flush().await
    }

    /// Send a flush packet and push buffered bytes to the peer
    pub async fn flush(&mut self) -> anyhow::Result<()> {
        self.writer
            .write_all(FLUSH_PKT)
            .await
            .map_err(RepositoryError::transport)?;
        self.writer.flush().await.map_err(RepositoryError::transport)?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.writer
            .shutdown()
            .await
            .map_err(RepositoryError::transport)?;
        Ok(())
    }
}
