//! Fetching a pack from upload-pack
//!
//! The client half of the exchange described in `upload_pack`: send wants,
//! run the [`Negotiator`] until it is done, then read the pack. The caller
//! decides what to do with the pack and the shallow updates; nothing here
//! touches the object store or references.

use crate::artifacts::history::History;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::pack::packfile::Packfile;
use crate::artifacts::transfer::capabilities::{AGENT, Capabilities, SHALLOW, agent};
use crate::artifacts::transfer::negotiator::{Negotiator, Step};
use crate::artifacts::transfer::pkt_line::{PktReader, PktWriter};
use crate::artifacts::transfer::upload_pack::UploadRequest;
use crate::errors::RepositoryError;
use std::collections::BTreeSet;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Clone, Copy)]
pub struct NegotiationLimits {
    pub max_rounds: usize,
    pub haves_per_round: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub wants: Vec<ObjectId>,
    /// Local commits offered as haves, with their history
    pub local_tips: Vec<ObjectId>,
    /// Our current shallow boundary
    pub shallow: BTreeSet<ObjectId>,
    pub depth: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedPack {
    pub packfile: Option<Packfile>,
    /// New shallow boundary commits announced by the server
    pub shallow: BTreeSet<ObjectId>,
    /// Previously shallow commits whose parents are now included
    pub unshallow: BTreeSet<ObjectId>,
    pub common: BTreeSet<ObjectId>,
}

pub struct FetchPack<'h, 'r> {
    history: &'h History<'r>,
    limits: NegotiationLimits,
}

impl<'h, 'r> FetchPack<'h, 'r> {
    pub fn new(history: &'h History<'r>, limits: NegotiationLimits) -> Self {
        Self { history, limits }
    }

    /// With no wants the session is closed right after the advertisement
    pub async fn fetch<R, W>(
        &self,
        reader: &mut PktReader<R>,
        writer: &mut PktWriter<W>,
        request: FetchRequest,
        server_capabilities: &Capabilities,
    ) -> anyhow::Result<FetchedPack>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let FetchRequest {
            wants,
            local_tips,
            shallow,
            depth,
        } = request;
        if wants.is_empty() {
            writer.flush().await?;
            return Ok(FetchedPack::default());
        }
        if depth.is_some() && !server_capabilities.has(SHALLOW) {
            anyhow::bail!("the remote does not support shallow fetches");
        }

        let request = UploadRequest {
            wants,
            capabilities: Capabilities::default()
                .with(AGENT, Some(agent()))
                .with(SHALLOW, None)
                .common_with(server_capabilities),
            shallow,
            depth,
        };
        for line in request.to_lines() {
            writer.write_line(&line).await?;
        }
        writer.flush().await?;

        let mut fetched = FetchedPack::default();
        if depth.is_some() {
            self.read_shallow_update(reader, &mut fetched).await?;
        }

        let mut negotiator = Negotiator::new(
            self.history,
            local_tips,
            self.limits.max_rounds,
            self.limits.haves_per_round,
        )?;

        while let Step::Send(round) = negotiator.step()? {
            for have in &round.haves {
                writer.write_line(&format!("have {have}")).await?;
            }
            writer.flush().await?;

            let mut acks = Vec::new();
            for line in reader.read_section().await? {
                if line == "NAK" {
                    continue;
                }
                let oid = line
                    .strip_prefix("ACK ")
                    .and_then(|rest| rest.strip_suffix(" common"))
                    .ok_or_else(|| RepositoryError::transport(format!("unexpected negotiation reply {line:?}")))?;
                acks.push(ObjectId::try_parse(oid.to_string())?);
            }
            negotiator.receive(&round, &acks)?;
        }

        writer.write_line("done").await?;
        writer.flush().await?;

        // final ACK or NAK
        reader.read_section().await?;

        let data = reader.read_data().await?;
        let packfile = Packfile::from_bytes(data);
        tracing::debug!(
            rounds = negotiator.rounds(),
            common = negotiator.acknowledged().len(),
            objects = packfile.object_count(),
            bytes = packfile.len(),
            "received pack"
        );

        fetched.common = negotiator.acknowledged().clone();
        fetched.packfile = Some(packfile);
        Ok(fetched)
    }

    async fn read_shallow_update<R>(&self, reader: &mut PktReader<R>, fetched: &mut FetchedPack) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        for line in reader.read_section().await? {
            let (kind, oid) = line
                .split_once(' ')
                .ok_or_else(|| RepositoryError::transport(format!("unexpected shallow line {line:?}")))?;
            let oid = ObjectId::try_parse(oid.to_string())?;
            match kind {
                "shallow" => fetched.shallow.insert(oid),
                "unshallow" => fetched.unshallow.insert(oid),
                _ => return Err(RepositoryError::transport(format!("unexpected shallow line {line:?}")).into()),
            };
        }
        Ok(())
    }
}
