//! Read-only summaries of a closed round.
//!
//! Results are counts only. No response ever pairs a voter with their choice.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rocket::{
    futures::{future::join_all, StreamExt},
    request::{self, FromRequest, Request},
    tokio::time::{timeout, timeout_at, Instant},
};

use super::{current_phase, eligibility::EligibilityRules, ledger::BallotBox, managed, Phase};
use crate::collaborators::{MemberFilter, MembershipDirectory};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    common::{voter::VoterAttribute, RoundIndex},
    db::{ballot::Ballot, campaign::Campaign},
    mongodb::{Coll, Id},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateCount {
    pub candidate: Id,
    pub votes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turnout {
    pub voted: u64,
    pub eligible_not_voted: u64,
    /// False if enumeration of the voter roll did not finish in time.
    pub complete: bool,
}

/// Ballot counts for one value of the grouping attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCount {
    pub group: String,
    pub ballots: u64,
    pub candidates: Vec<CandidateCount>,
}

/// A round's ballots grouped by a voter attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakdown {
    /// Groups in attribute order.
    pub groups: Vec<GroupCount>,
    /// Ballots whose voter could not be looked up in time.
    pub excluded: u64,
    /// Total ballots in the round.
    pub total: u64,
    /// False if the deadline passed before every ballot was looked up.
    pub complete: bool,
}

/// Voter lookups are made this many ballots at a time.
const LOOKUP_BATCH: usize = 100;

/// Order counts by the round's candidate list, zero-filling candidates
/// without votes. Votes for anyone else follow in ID order.
fn ordered_counts(candidates: &[Id], mut counts: HashMap<Id, u64>) -> Vec<CandidateCount> {
    let mut ordered: Vec<_> = candidates
        .iter()
        .map(|&candidate| CandidateCount {
            candidate,
            votes: counts.remove(&candidate).unwrap_or(0),
        })
        .collect();
    let mut extra: Vec<_> = counts
        .into_iter()
        .map(|(candidate, votes)| CandidateCount { candidate, votes })
        .collect();
    extra.sort_by_key(|count| count.candidate);
    ordered.extend(extra);
    ordered
}

pub struct StatisticsAggregator<B = Coll<Ballot>> {
    ballots: B,
    directory: Arc<dyn MembershipDirectory>,
    rules: EligibilityRules,
    lookup_timeout: Duration,
    enumeration_timeout: Duration,
}

impl<B> StatisticsAggregator<B>
where
    B: BallotBox,
{
    pub fn new(
        ballots: B,
        directory: Arc<dyn MembershipDirectory>,
        rules: EligibilityRules,
        lookup_timeout: Duration,
        enumeration_timeout: Duration,
    ) -> Self {
        Self {
            ballots,
            directory,
            rules,
            lookup_timeout,
            enumeration_timeout,
        }
    }

    /// Statistics are only available once a round has closed.
    fn ensure_closed(campaign: &Campaign, round: RoundIndex, now: DateTime<Utc>) -> Result<()> {
        campaign.round(round)?;
        let actual = current_phase(campaign, now);
        if actual.is_after_round(round) {
            Ok(())
        } else {
            Err(Error::PhaseMismatch {
                expected: format!("after {}", Phase::Voting { round }),
                actual,
            })
        }
    }

    pub async fn overall_tally(
        &self,
        campaign: &Campaign,
        round: RoundIndex,
        now: DateTime<Utc>,
    ) -> Result<Vec<CandidateCount>> {
        Self::ensure_closed(campaign, round, now)?;
        let counts = self.ballots.tally(campaign.id, round).await?;
        Ok(ordered_counts(&campaign.round(round)?.candidates, counts))
    }

    /// Compare the ledger against the eligible voter roll.
    ///
    /// Enumeration stops at the configured deadline, in which case the
    /// partial count is returned with `complete: false`.
    pub async fn turnout(
        &self,
        campaign: &Campaign,
        round: RoundIndex,
        now: DateTime<Utc>,
    ) -> Result<Turnout> {
        Self::ensure_closed(campaign, round, now)?;
        let round_spec = campaign.round(round)?;
        let voters = self.ballots.voters(campaign.id, round).await?;

        let filter = MemberFilter {
            registered_by: Some(round_spec.voter_list_finalisation),
            enrolled_until: Some(campaign.voter_cutoff_end_date),
        };
        let deadline = Instant::now() + self.enumeration_timeout;
        let mut eligible_not_voted = 0;
        let mut complete = true;

        match timeout_at(deadline, self.directory.verified_members(filter)).await {
            Ok(Ok(mut members)) => loop {
                match timeout_at(deadline, members.next()).await {
                    Ok(Some(Ok(member))) => {
                        if !voters.contains(&member.id)
                            && self.rules.is_eligible(&member, campaign, round_spec)
                        {
                            eligible_not_voted += 1;
                        }
                    }
                    Ok(Some(Err(e))) => {
                        warn!("Voter roll enumeration failed part way: {e}");
                        complete = false;
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!("Voter roll enumeration timed out");
                        complete = false;
                        break;
                    }
                }
            },
            Ok(Err(e)) => {
                warn!("Voter roll unavailable: {e}");
                complete = false;
            }
            Err(_) => {
                warn!("Voter roll enumeration timed out");
                complete = false;
            }
        }

        Ok(Turnout {
            voted: voters.len() as u64,
            eligible_not_voted,
            complete,
        })
    }

    /// Group every ballot of a round by a voter attribute.
    ///
    /// Ballots whose voter cannot be looked up are excluded from the groups
    /// and counted in `excluded`; they still count towards the overall tally.
    /// Lookups stop at the configured deadline, and any ballots not reached
    /// by then are excluded too.
    pub async fn breakdown(
        &self,
        campaign: &Campaign,
        round: RoundIndex,
        attribute: VoterAttribute,
        now: DateTime<Utc>,
    ) -> Result<Breakdown> {
        Self::ensure_closed(campaign, round, now)?;
        let round_spec = campaign.round(round)?;
        let total: u64 = self.ballots.tally(campaign.id, round).await?.values().sum();

        let deadline = Instant::now() + self.enumeration_timeout;
        let mut batches = self.ballots.ballots(campaign.id, round).await?.chunks(LOOKUP_BATCH);
        let mut groups: BTreeMap<String, HashMap<Id, u64>> = BTreeMap::new();
        let mut complete = true;

        loop {
            let batch = match timeout_at(deadline, batches.next()).await {
                Ok(Some(batch)) => batch.into_iter().collect::<Result<Vec<Ballot>>>()?,
                Ok(None) => break,
                Err(_) => {
                    complete = false;
                    break;
                }
            };
            let lookups = batch.iter().map(|ballot| async move {
                match timeout(self.lookup_timeout, self.directory.voter_snapshot(ballot.voter_id)).await {
                    Ok(Ok(Some(voter))) => Some(voter.attribute(attribute).to_string()),
                    Ok(Ok(None)) => None,
                    Ok(Err(e)) => {
                        debug!("Excluding ballot from breakdown: {e}");
                        None
                    }
                    Err(_) => {
                        debug!("Excluding ballot from breakdown: lookup timed out");
                        None
                    }
                }
            });
            let Ok(groups_by_ballot) = timeout_at(deadline, join_all(lookups)).await else {
                complete = false;
                break;
            };
            for (ballot, group) in batch.iter().zip(groups_by_ballot) {
                if let Some(group) = group {
                    *groups
                        .entry(group)
                        .or_default()
                        .entry(ballot.candidate_id)
                        .or_default() += 1;
                }
            }
        }
        if !complete {
            warn!("Breakdown by {attribute:?} timed out");
        }

        let groups: Vec<_> = groups
            .into_iter()
            .map(|(group, counts)| GroupCount {
                group,
                ballots: counts.values().sum(),
                candidates: ordered_counts(&round_spec.candidates, counts),
            })
            .collect();
        let grouped: u64 = groups.iter().map(|g| g.ballots).sum();
        let excluded = total.saturating_sub(grouped);
        if excluded > 0 {
            warn!("Excluded {excluded} ballot(s) from breakdown by {attribute:?}");
        }

        Ok(Breakdown {
            groups,
            excluded,
            total,
            complete,
        })
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for StatisticsAggregator {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let config = req.guard::<&rocket::State<Config>>().await.unwrap();
        let ballots = req.guard::<Coll<Ballot>>().await.unwrap();
        request::Outcome::Success(StatisticsAggregator::new(
            ballots,
            managed(req).await,
            EligibilityRules::from(config.inner()),
            config.directory_timeout(),
            config.statistics_timeout(),
        ))
    }
}
