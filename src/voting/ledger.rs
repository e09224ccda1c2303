//! The per-round record of ballots.
//!
//! One-vote-per-voter-per-round is enforced by the backing store: a ballot is
//! inserted only if no ballot exists for its `(campaign, round, voter)` key.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Bson, Document};
use rocket::{
    futures::{stream::BoxStream, StreamExt, TryStreamExt},
    request::{self, FromRequest, Request},
    serde::json::json,
    tokio::time::timeout,
};

use super::{assert_phase, elapsed_from, eligibility::EligibilityRules, managed, Phase};
use crate::collaborators::{notify_in_background, MembershipDirectory, Notifier, TemplateKind};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    common::{voter::VoterSnapshot, RoundIndex},
    db::{ballot::Ballot, campaign::Campaign},
    mongodb::{is_duplicate_key_error, Coll, Id},
};

/// Storage for ballots.
#[rocket::async_trait]
pub trait BallotBox: Send + Sync {
    /// Atomically insert the ballot unless its voter has already voted in its round.
    /// Returns whether the ballot was inserted.
    async fn insert_if_absent(&self, ballot: &Ballot) -> Result<bool>;

    async fn has_voted(&self, campaign: Id, round: RoundIndex, voter: Id) -> Result<bool>;

    /// Number of ballots per candidate.
    async fn tally(&self, campaign: Id, round: RoundIndex) -> Result<HashMap<Id, u64>>;

    /// Every voter who has cast a ballot.
    async fn voters(&self, campaign: Id, round: RoundIndex) -> Result<HashSet<Id>>;

    /// Every ballot cast in a round, in no particular order.
    async fn ballots(&self, campaign: Id, round: RoundIndex) -> Result<BoxStream<'static, Result<Ballot>>>;
}

fn round_filter(campaign: Id, round: RoundIndex) -> Document {
    doc! {
        "campaign_id": campaign,
        "round": round,
    }
}

#[rocket::async_trait]
impl BallotBox for Coll<Ballot> {
    async fn insert_if_absent(&self, ballot: &Ballot) -> Result<bool> {
        match self.insert_one(ballot, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key_error(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn has_voted(&self, campaign: Id, round: RoundIndex, voter: Id) -> Result<bool> {
        let mut filter = round_filter(campaign, round);
        filter.insert("voter_id", voter);
        let count = self.count_documents(filter, None).await?;
        Ok(count > 0)
    }

    async fn tally(&self, campaign: Id, round: RoundIndex) -> Result<HashMap<Id, u64>> {
        let pipeline = [
            doc! { "$match": round_filter(campaign, round) },
            doc! { "$group": { "_id": "$candidate_id", "votes": { "$sum": 1 } } },
        ];
        let groups: Vec<Document> = self.aggregate(pipeline, None).await?.try_collect().await?;

        let mut tally = HashMap::with_capacity(groups.len());
        for group in groups {
            let (Some(Bson::ObjectId(candidate)), Some(votes)) = (group.get("_id"), group.get("votes")) else {
                warn!("Skipping malformed tally group {group}");
                continue;
            };
            let votes = match votes {
                Bson::Int32(n) => *n as u64,
                Bson::Int64(n) => *n as u64,
                other => {
                    warn!("Unexpected vote count {other}");
                    continue;
                }
            };
            tally.insert(Id::from(*candidate), votes);
        }
        Ok(tally)
    }

    async fn voters(&self, campaign: Id, round: RoundIndex) -> Result<HashSet<Id>> {
        let voters = self
            .distinct("voter_id", round_filter(campaign, round), None)
            .await?
            .into_iter()
            .filter_map(|voter| voter.as_object_id().map(Id::from))
            .collect();
        Ok(voters)
    }

    async fn ballots(&self, campaign: Id, round: RoundIndex) -> Result<BoxStream<'static, Result<Ballot>>> {
        let cursor = self.find(round_filter(campaign, round), None).await?;
        Ok(cursor.map_err(Error::from).boxed())
    }
}

/// Records and queries ballots, enforcing phase and eligibility.
pub struct VoteLedger<B = Coll<Ballot>> {
    ballots: B,
    directory: Arc<dyn MembershipDirectory>,
    notifier: Arc<dyn Notifier>,
    rules: EligibilityRules,
    lookup_timeout: Duration,
}

impl<B> VoteLedger<B>
where
    B: BallotBox,
{
    pub fn new(
        ballots: B,
        directory: Arc<dyn MembershipDirectory>,
        notifier: Arc<dyn Notifier>,
        rules: EligibilityRules,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            ballots,
            directory,
            notifier,
            rules,
            lookup_timeout,
        }
    }

    /// Load the voter's current membership attributes.
    async fn fresh_snapshot(&self, voter: Id) -> Result<Option<VoterSnapshot>> {
        match timeout(self.lookup_timeout, self.directory.voter_snapshot(voter)).await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                error!("Membership lookup for {voter} timed out");
                Err(Error::Dependency("Membership lookup timed out".to_string()))
            }
        }
    }

    /// Is the voter eligible to vote in the given round?
    /// Members without a usable profile are not.
    pub async fn eligibility(&self, campaign: &Campaign, round: RoundIndex, voter: Id) -> Result<bool> {
        let round = campaign.round(round)?;
        let eligible = self
            .fresh_snapshot(voter)
            .await?
            .map_or(false, |snapshot| self.rules.is_eligible(&snapshot, campaign, round));
        Ok(eligible)
    }

    /// Record a ballot for `candidate` from `voter`.
    pub async fn cast_vote(
        &self,
        campaign: &Campaign,
        round: RoundIndex,
        voter: Id,
        candidate: Id,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let started = Instant::now();
        let round_spec = campaign.round(round)?;
        assert_phase(campaign, now, Phase::Voting { round })?;

        let snapshot = self
            .fresh_snapshot(voter)
            .await?
            .ok_or_else(|| Error::Forbidden("No membership record".to_string()))?;
        self.rules
            .check(&snapshot, campaign, round_spec)
            .map_err(|reason| Error::Forbidden(format!("Not eligible to vote: {reason}")))?;

        if !round_spec.has_candidate(candidate) {
            return Err(Error::not_found("Candidate in this round", candidate));
        }

        // The lookup may have outlasted the round.
        let cast_at = elapsed_from(now, started);
        assert_phase(campaign, cast_at, Phase::Voting { round })?;

        let ballot = Ballot::new(campaign.id, round, voter, candidate, cast_at);
        if !self.ballots.insert_if_absent(&ballot).await? {
            return Err(Error::Conflict(format!(
                "Already voted in round {round} of campaign {}",
                campaign.id
            )));
        }
        info!("Ballot cast in campaign {} round {round}", campaign.id);

        notify_in_background(
            self.notifier.clone(),
            vec![voter],
            TemplateKind::VoteRecorded,
            json!({
                "campaign_id": campaign.id.to_string(),
                "campaign_name": &campaign.name,
                "round": round,
            }),
        );
        Ok(())
    }

    pub async fn has_voted(&self, campaign: &Campaign, round: RoundIndex, voter: Id) -> Result<bool> {
        campaign.round(round)?;
        self.ballots.has_voted(campaign.id, round, voter).await
    }

    #[cfg(test)]
    pub fn into_ballots(self) -> B {
        self.ballots
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for VoteLedger {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let config = req.guard::<&rocket::State<Config>>().await.unwrap();
        let ballots = req.guard::<Coll<Ballot>>().await.unwrap();
        request::Outcome::Success(VoteLedger::new(
            ballots,
            managed(req).await,
            managed(req).await,
            EligibilityRules::from(config.inner()),
            config.directory_timeout(),
        ))
    }
}

/// An in-memory ballot box.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryBallotBox {
    ballots: std::sync::Mutex<Vec<Ballot>>,
}

#[cfg(test)]
impl MemoryBallotBox {
    fn round_ballots(&self, campaign: Id, round: RoundIndex) -> Vec<Ballot> {
        self.ballots
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.campaign_id == campaign && b.round == round)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[rocket::async_trait]
impl BallotBox for MemoryBallotBox {
    async fn insert_if_absent(&self, ballot: &Ballot) -> Result<bool> {
        let mut ballots = self.ballots.lock().unwrap();
        let exists = ballots.iter().any(|b| {
            b.campaign_id == ballot.campaign_id && b.round == ballot.round && b.voter_id == ballot.voter_id
        });
        if !exists {
            ballots.push(ballot.clone());
        }
        Ok(!exists)
    }

    async fn has_voted(&self, campaign: Id, round: RoundIndex, voter: Id) -> Result<bool> {
        Ok(self
            .round_ballots(campaign, round)
            .iter()
            .any(|b| b.voter_id == voter))
    }

    async fn tally(&self, campaign: Id, round: RoundIndex) -> Result<HashMap<Id, u64>> {
        let mut tally = HashMap::new();
        for ballot in self.round_ballots(campaign, round) {
            *tally.entry(ballot.candidate_id).or_default() += 1;
        }
        Ok(tally)
    }

    async fn voters(&self, campaign: Id, round: RoundIndex) -> Result<HashSet<Id>> {
        Ok(self
            .round_ballots(campaign, round)
            .into_iter()
            .map(|b| b.voter_id)
            .collect())
    }

    async fn ballots(&self, campaign: Id, round: RoundIndex) -> Result<BoxStream<'static, Result<Ballot>>> {
        let ballots = self.round_ballots(campaign, round);
        Ok(rocket::futures::stream::iter(ballots.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use log4rs_test_utils::test_logging::init_logging_once_for;

    use super::*;
    use crate::collaborators::fakes::{MemoryDirectory, RecordingNotifier};
    use crate::model::db::campaign::examples::jan;

    struct Fixture {
        campaign: Campaign,
        voter: VoterSnapshot,
        candidates: [Id; 2],
    }

    fn fixture() -> Fixture {
        let mut campaign = Campaign::example();
        let candidates = [Id::new(), Id::new()];
        campaign.rounds[0].candidates = candidates.to_vec();
        let voter = VoterSnapshot::example();
        Fixture {
            campaign,
            voter,
            candidates,
        }
    }

    fn ledger(
        directory: MemoryDirectory,
        notifier: Arc<RecordingNotifier>,
    ) -> VoteLedger<MemoryBallotBox> {
        VoteLedger::new(
            MemoryBallotBox::default(),
            Arc::new(directory),
            notifier,
            EligibilityRules::default(),
            Duration::from_millis(100),
        )
    }

    #[rocket::async_test]
    async fn vote_outside_round_rejected() {
        init_logging_once_for(["campaign_backend"], None, None);
        let f = fixture();
        let ledger = ledger(
            MemoryDirectory::new([f.voter.clone()]),
            Arc::new(RecordingNotifier::default()),
        );
        let result = ledger
            .cast_vote(&f.campaign, 0, f.voter.id, f.candidates[0], jan(14))
            .await;
        assert!(matches!(result, Err(Error::PhaseMismatch { .. })));
        let result = ledger
            .cast_vote(&f.campaign, 0, f.voter.id, f.candidates[0], jan(20))
            .await;
        assert!(matches!(result, Err(Error::PhaseMismatch { .. })));
        assert!(!ledger.has_voted(&f.campaign, 0, f.voter.id).await.unwrap());
    }

    #[rocket::async_test]
    async fn vote_then_duplicate() {
        let f = fixture();
        let notifier = Arc::new(RecordingNotifier::default());
        let ledger = ledger(MemoryDirectory::new([f.voter.clone()]), notifier.clone());

        ledger
            .cast_vote(&f.campaign, 0, f.voter.id, f.candidates[0], jan(16))
            .await
            .unwrap();
        assert!(ledger.has_voted(&f.campaign, 0, f.voter.id).await.unwrap());

        // A different candidate is still a second vote.
        let result = ledger
            .cast_vote(&f.campaign, 0, f.voter.id, f.candidates[1], jan(17))
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        let tally = ledger.ballots.tally(f.campaign.id, 0).await.unwrap();
        assert_eq!(Some(&1), tally.get(&f.candidates[0]));
        assert_eq!(None, tally.get(&f.candidates[1]));

        // The notification is sent in the background.
        for _ in 0..100 {
            if !notifier.sent().is_empty() {
                break;
            }
            rocket::tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let sent = notifier.sent();
        assert_eq!(1, sent.len());
        assert_eq!(vec![f.voter.id], sent[0].0);
        assert_eq!(TemplateKind::VoteRecorded, sent[0].1);
    }

    #[rocket::async_test]
    async fn concurrent_votes_recorded_once() {
        const ATTEMPTS: usize = 32;

        let f = fixture();
        let ledger = Arc::new(ledger(
            MemoryDirectory::new([f.voter.clone()]),
            Arc::new(RecordingNotifier::default()),
        ));
        let campaign = Arc::new(f.campaign);

        let handles: Vec<_> = (0..ATTEMPTS)
            .map(|_| {
                let ledger = ledger.clone();
                let campaign = campaign.clone();
                let (voter, candidate) = (f.voter.id, f.candidates[0]);
                rocket::tokio::spawn(async move {
                    ledger.cast_vote(&campaign, 0, voter, candidate, jan(16)).await
                })
            })
            .collect();

        let mut successes = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(Error::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(1, successes);
        assert_eq!(ATTEMPTS - 1, conflicts);
        assert_eq!(1, ledger.ballots.voters(campaign.id, 0).await.unwrap().len());
    }

    #[rocket::async_test]
    async fn ineligible_voter_forbidden() {
        let f = fixture();
        let unverified = VoterSnapshot {
            verified: false,
            ..VoterSnapshot::example()
        };
        let stranger = Id::new();
        let ledger = ledger(
            MemoryDirectory::new([unverified.clone()]),
            Arc::new(RecordingNotifier::default()),
        );

        let result = ledger
            .cast_vote(&f.campaign, 0, unverified.id, f.candidates[0], jan(16))
            .await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
        let result = ledger
            .cast_vote(&f.campaign, 0, stranger, f.candidates[0], jan(16))
            .await;
        assert!(matches!(result, Err(Error::Forbidden(_))));

        assert!(!ledger.eligibility(&f.campaign, 0, unverified.id).await.unwrap());
        assert!(!ledger.eligibility(&f.campaign, 0, stranger).await.unwrap());
    }

    #[rocket::async_test]
    async fn unselected_candidate_not_found() {
        let f = fixture();
        let ledger = ledger(
            MemoryDirectory::new([f.voter.clone()]),
            Arc::new(RecordingNotifier::default()),
        );
        let result = ledger
            .cast_vote(&f.campaign, 0, f.voter.id, Id::new(), jan(16))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(!ledger.has_voted(&f.campaign, 0, f.voter.id).await.unwrap());
    }

    #[rocket::async_test]
    async fn invalid_round() {
        let f = fixture();
        let ledger = ledger(
            MemoryDirectory::new([f.voter.clone()]),
            Arc::new(RecordingNotifier::default()),
        );
        let result = ledger
            .cast_vote(&f.campaign, 3, f.voter.id, f.candidates[0], jan(16))
            .await;
        assert!(matches!(result, Err(Error::InvalidRound(3))));
        assert!(matches!(
            ledger.has_voted(&f.campaign, 3, f.voter.id).await,
            Err(Error::InvalidRound(3))
        ));
    }

    #[rocket::async_test]
    async fn directory_failures() {
        let f = fixture();
        let offline = ledger(
            MemoryDirectory::new([f.voter.clone()]).failing_for(f.voter.id),
            Arc::new(RecordingNotifier::default()),
        );
        let result = offline
            .cast_vote(&f.campaign, 0, f.voter.id, f.candidates[0], jan(16))
            .await;
        assert!(matches!(result, Err(Error::Dependency(_))));

        let slow = ledger(
            MemoryDirectory::new([f.voter.clone()]).hanging_for(f.voter.id),
            Arc::new(RecordingNotifier::default()),
        );
        let result = slow
            .cast_vote(&f.campaign, 0, f.voter.id, f.candidates[0], jan(16))
            .await;
        assert!(matches!(result, Err(Error::Dependency(_))));
        assert!(!slow.has_voted(&f.campaign, 0, f.voter.id).await.unwrap());
    }

    #[rocket::async_test]
    async fn notifier_failure_keeps_vote() {
        let f = fixture();
        let ledger = ledger(
            MemoryDirectory::new([f.voter.clone()]),
            Arc::new(RecordingNotifier::failing()),
        );
        ledger
            .cast_vote(&f.campaign, 0, f.voter.id, f.candidates[0], jan(16))
            .await
            .unwrap();
        rocket::tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ledger.has_voted(&f.campaign, 0, f.voter.id).await.unwrap());
    }

    #[rocket::async_test]
    async fn round_closing_during_lookup() {
        let f = fixture();
        let ledger = ledger(
            MemoryDirectory::new([f.voter.clone()]).delayed_by(Duration::from_millis(50)),
            Arc::new(RecordingNotifier::default()),
        );
        let just_before_close = jan(20) - chrono::Duration::milliseconds(10);
        let result = ledger
            .cast_vote(&f.campaign, 0, f.voter.id, f.candidates[0], just_before_close)
            .await;
        assert!(matches!(
            result,
            Err(Error::PhaseMismatch {
                actual: Phase::Archived,
                ..
            })
        ));
        assert!(!ledger.has_voted(&f.campaign, 0, f.voter.id).await.unwrap());
    }
}
