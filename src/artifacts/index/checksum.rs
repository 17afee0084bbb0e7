//! SHA-1 trailer over everything read from or written to the index file

use crate::artifacts::index::CHECKSUM_SIZE;
use anyhow::Context;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::io::{Read, Write};

/// A stream that digests every byte passing through it
pub struct Checksum<S> {
    stream: S,
    digest: Sha1,
}

impl<S> Checksum<S> {
    pub(crate) fn new(stream: S) -> Self {
        Checksum {
            stream,
            digest: Sha1::new(),
        }
    }
}

impl<S: Read> Checksum<S> {
    pub(crate) fn read(&mut self, size: usize) -> anyhow::Result<Bytes> {
        let mut buffer = vec![0; size];
        self.stream
            .read_exact(&mut buffer)
            .context("index file ends unexpectedly")?;

        self.digest.update(&buffer);
        Ok(Bytes::from(buffer))
    }

    /// Compare the stored trailer with the digest of what was read
    pub(crate) fn verify(&mut self) -> anyhow::Result<()> {
        let mut stored = [0u8; CHECKSUM_SIZE];
        self.stream
            .read_exact(&mut stored)
            .context("index file is missing its checksum")?;

        if stored != self.digest.clone().finalize().as_slice() {
            anyhow::bail!("index file is corrupt: checksum mismatch");
        }
        Ok(())
    }
}

impl<S: Write> Checksum<S> {
    pub(crate) fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.stream.write_all(data)?;
        self.digest.update(data);
        Ok(())
    }

    pub(crate) fn write_checksum(&mut self) -> anyhow::Result<()> {
        let checksum = self.digest.clone().finalize();
        self.stream
            .write_all(checksum.as_slice())
            .context("failed to write index checksum")?;
        self.stream.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn written(data: &[u8]) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut writer = Checksum::new(&mut buffer);
        writer.write(data).unwrap();
        writer.write_checksum().unwrap();
        buffer
    }

    #[test]
    fn trailer_is_the_digest_of_the_content() {
        let bytes = written(b"abc");

        assert_eq!(bytes.len(), 3 + CHECKSUM_SIZE);
        assert_eq!(&bytes[3..], Sha1::digest(b"abc").as_slice());

        let mut reader = Checksum::new(Cursor::new(bytes));
        assert_eq!(reader.read(3).unwrap().as_ref(), b"abc");
        reader.verify().unwrap();
    }

    #[test]
    fn flipped_byte_fails_verification() {
        let mut bytes = written(b"abc");
        bytes[1] ^= 0xff;

        let mut reader = Checksum::new(Cursor::new(bytes));
        reader.read(3).unwrap();
        assert!(reader.verify().unwrap_err().to_string().contains("checksum mismatch"));
    }

    #[test]
    fn truncated_file_is_reported() {
        let mut reader = Checksum::new(Cursor::new(b"ab".to_vec()));
        assert!(reader.read(3).is_err());
    }
}
