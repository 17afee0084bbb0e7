use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::RefName;
use crate::artifacts::history::History;
use crate::artifacts::history::rev_list::RevList;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::transfer::advertisement::{Advertisement, Service};
use crate::artifacts::transfer::fetch_pack::{FetchPack, FetchRequest, NegotiationLimits};
use crate::artifacts::transfer::refspec::Refspec;
use crate::artifacts::transfer::transport::transport_for;
use crate::artifacts::transfer::{RefStatus, RefUpdate, ensure_accepted, with_retries};
use std::collections::{BTreeSet, HashSet};
use std::io::Write;

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub updates: Vec<RefUpdate>,
    /// Branch the remote's `HEAD` points at, as a remote ref name
    pub head_target: Option<String>,
    /// Everything the remote advertised
    pub advertised: Vec<(String, ObjectId)>,
}

/// An advertised reference matched by a refspec
struct MappedRef {
    source: String,
    destination: RefName,
    oid: ObjectId,
    force: bool,
}

impl Repository {
    /// Fetch from a configured remote through its fetch refspecs, plus tags
    pub async fn fetch(&self, remote: &str, depth: Option<usize>) -> anyhow::Result<FetchOutcome> {
        let (url, refspecs) = {
            let config = self.config();
            let remote_config = config.remote(remote)?;
            let refspecs = remote_config
                .fetch
                .iter()
                .map(|refspec| refspec.parse::<Refspec>())
                .collect::<anyhow::Result<Vec<_>>>()?;
            (remote_config.url.clone(), refspecs)
        };

        let outcome = self.fetch_url(remote, &url, refspecs, depth).await?;

        let changed = outcome
            .updates
            .iter()
            .filter(|update| update.status != RefStatus::UpToDate)
            .collect::<Vec<_>>();
        if !changed.is_empty() {
            let mut writer = self.writer();
            writeln!(writer, "From {url}")?;
            for update in changed {
                writeln!(writer, "{update}")?;
            }
        }

        ensure_accepted(&outcome.updates)?;
        Ok(outcome)
    }

    /// Fetch from `url`, retrying the whole exchange after transport failures
    pub(crate) async fn fetch_url(
        &self,
        remote: &str,
        url: &str,
        mut refspecs: Vec<Refspec>,
        depth: Option<usize>,
    ) -> anyhow::Result<FetchOutcome> {
        refspecs.push(Refspec::tags());
        let retries = self.config().transfer.retries;

        let outcome = with_retries(retries, async || self.fetch_once(url, &refspecs, depth).await).await?;

        if let Some(target) = &outcome.head_target
            && let Some(tracking) = refspecs.iter().find_map(|refspec| refspec.map(target))
            && tracking.starts_with(&format!("refs/remotes/{remote}/"))
        {
            self.refs().set_symbolic(
                &RefName::remote_tracking(remote, "HEAD")?,
                &RefName::try_parse(tracking)?,
            )?;
        }

        tracing::info!(
            remote,
            url,
            refs = outcome.advertised.len(),
            updated = outcome.updates.iter().filter(|update| update.status == RefStatus::Ok).count(),
            "fetch finished"
        );
        Ok(outcome)
    }

    async fn fetch_once(&self, url: &str, refspecs: &[Refspec], depth: Option<usize>) -> anyhow::Result<FetchOutcome> {
        let transport = transport_for(url)?;
        let mut connection = transport.connect(Service::UploadPack).await?;
        let advertisement = Advertisement::read(&mut connection.reader).await?;

        let mapped = map_advertised_refs(&advertisement, refspecs)?;

        let local_tips = self
            .refs()
            .list("refs/")?
            .into_iter()
            .map(|(_, oid)| oid)
            .chain(self.refs().read_head()?)
            .collect::<BTreeSet<_>>();
        let database = self.database();
        let wants = mapped
            .iter()
            .map(|mapped| mapped.oid.clone())
            .filter(|oid| depth.is_some() || !database.contains(oid))
            .collect::<BTreeSet<_>>();

        let shallow = self.refs().read_shallow()?;
        let history = History::new(database, shallow.clone());
        let limits = {
            let config = self.config();
            NegotiationLimits {
                max_rounds: config.transfer.max_negotiation_rounds,
                haves_per_round: config.transfer.haves_per_round,
            }
        };
        let request = FetchRequest {
            wants: wants.iter().cloned().collect(),
            local_tips: local_tips.iter().cloned().collect(),
            shallow: shallow.clone(),
            depth,
        };
        let fetched = FetchPack::new(&history, limits)
            .fetch(&mut connection.reader, &mut connection.writer, request, &advertisement.capabilities)
            .await?;

        if let Some(packfile) = &fetched.packfile {
            let unpack_limit = self.config().transfer.unpack_limit;
            let stored = database.unpack(packfile, unpack_limit)?;
            tracing::debug!(objects = stored.len(), "fetched objects stored");
        }

        let mut new_shallow = shallow.union(&fetched.shallow).cloned().collect::<BTreeSet<_>>();
        new_shallow.retain(|oid| !fetched.unshallow.contains(oid));
        if new_shallow != shallow {
            self.refs().write_shallow(&new_shallow)?;
        }

        let history = History::new(database, new_shallow);
        let known = local_tips.into_iter().collect::<HashSet<_>>();
        RevList::new(&history, wants).check_connectivity(&known)?;

        let attempts = self.config().transfer.ref_update_retries;
        let mut updates = Vec::with_capacity(mapped.len());
        for mapped in mapped {
            updates.push(self.update_fetched_ref(&history, &mapped, attempts)?);
        }

        Ok(FetchOutcome {
            updates,
            head_target: advertisement.head_target().map(str::to_string),
            advertised: advertisement.refs.clone(),
        })
    }

    /// Move a local ref to a fetched value: created, fast-forwarded or
    /// forced, otherwise left alone and reported as rejected
    fn update_fetched_ref(&self, history: &History<'_>, mapped: &MappedRef, attempts: usize) -> anyhow::Result<RefUpdate> {
        let mut update = RefUpdate {
            source: mapped.source.clone(),
            destination: mapped.destination.to_string(),
            old: None,
            new: Some(mapped.oid.clone()),
            forced: false,
            status: RefStatus::Ok,
        };

        self.refs().update_with_retry(&mapped.destination, attempts, |current| {
            update.old = current.cloned();
            update.forced = false;
            update.status = RefStatus::Ok;

            let Some(current) = current else {
                return Ok(Some(mapped.oid.clone()));
            };
            if current == &mapped.oid {
                update.status = RefStatus::UpToDate;
                return Ok(Some(current.clone()));
            }

            let fast_forward = !mapped.destination.is_tag() && history.is_fast_forward(current, &mapped.oid)?;
            if fast_forward {
                Ok(Some(mapped.oid.clone()))
            } else if mapped.force {
                update.forced = true;
                Ok(Some(mapped.oid.clone()))
            } else {
                let reason = if mapped.destination.is_tag() {
                    "would clobber existing tag"
                } else {
                    "non-fast-forward"
                };
                update.status = RefStatus::Rejected(reason.to_string());
                Ok(Some(current.clone()))
            }
        })?;

        Ok(update)
    }
}

fn map_advertised_refs(advertisement: &Advertisement, refspecs: &[Refspec]) -> anyhow::Result<Vec<MappedRef>> {
    let mut mapped = Vec::new();
    let mut destinations = BTreeSet::new();

    for (name, oid) in advertisement.named_refs() {
        let Some((refspec, destination)) = refspecs
            .iter()
            .find_map(|refspec| refspec.map(name).map(|destination| (refspec, destination)))
        else {
            continue;
        };
        if !destinations.insert(destination.clone()) {
            continue;
        }

        mapped.push(MappedRef {
            source: name.to_string(),
            destination: RefName::try_parse(destination)?,
            oid: oid.clone(),
            force: refspec.force,
        });
    }

    Ok(mapped)
}
