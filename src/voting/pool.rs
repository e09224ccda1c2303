//! The candidate pool: self-nominations and per-round candidate selection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc, Bson};
use rocket::{
    request::{self, FromRequest, Request},
    serde::json::json,
};

use super::{assert_phase, current_phase, elapsed_from, managed, Phase};
use crate::collaborators::{
    notify_in_background,
    storage::{release_all, store_all},
    DocumentMetadata, DocumentStorage, Notifier, TemplateKind,
};
use crate::error::{Error, Result};
use crate::model::{
    api::upload::Upload,
    common::RoundIndex,
    db::{
        campaign::{Campaign, Candidate, CandidateDocuments, Round, Statement},
        document::{DocumentKind, DocumentRef},
    },
    mongodb::{Coll, Id},
};

/// A new nomination.
#[derive(Debug)]
pub struct NominationSubmission {
    pub statement: Statement,
    pub video_link: Option<String>,
    pub documents: Vec<(DocumentKind, Upload)>,
}

/// Changes to an existing nomination. Absent fields are left unchanged.
#[derive(Debug, Default)]
pub struct NominationPatch {
    pub mission: Option<String>,
    pub vision: Option<String>,
    pub video_link: Option<String>,
    pub documents: Vec<(DocumentKind, Upload)>,
}

/// Check that `caller` may nominate `voter` at this instant.
pub fn check_nomination(
    campaign: &Campaign,
    caller: Id,
    voter: Id,
    now: DateTime<Utc>,
) -> Result<()> {
    if caller != voter {
        return Err(Error::Forbidden("Members may only nominate themselves".to_string()));
    }
    assert_phase(campaign, now, Phase::Nominating)?;
    if campaign.candidate(voter).is_some() {
        return Err(Error::Conflict(format!(
            "Member {voter} is already nominated in campaign {}",
            campaign.id
        )));
    }
    Ok(())
}

/// Check that a round's candidate set may be replaced with `candidates` at this instant.
///
/// Selection opens once nominations close and ends when the round starts.
pub fn check_selection(
    campaign: &Campaign,
    round: RoundIndex,
    candidates: &[Id],
    now: DateTime<Utc>,
) -> Result<()> {
    campaign.round(round)?;

    let mut seen = HashSet::with_capacity(candidates.len());
    for &candidate in candidates {
        if !seen.insert(candidate) {
            return Err(Error::Validation(format!("Candidate {candidate} selected twice")));
        }
        if campaign.candidate(candidate).is_none() {
            return Err(Error::not_found("Candidate in pool", candidate));
        }
    }

    let actual = current_phase(campaign, now);
    if actual < Phase::Gap || actual >= (Phase::Voting { round }) {
        return Err(Error::PhaseMismatch {
            expected: format!("{} up to {}", Phase::Gap, Phase::Voting { round }),
            actual,
        });
    }
    Ok(())
}

/// Writes to campaigns' candidate pools.
///
/// Each write is conditional on the campaign's dates at `now`, so a write
/// that arrives after its window has closed matches nothing and returns false.
#[rocket::async_trait]
pub trait PoolStore: Send + Sync {
    /// Append a candidate unless their member is already pooled or nominations have closed.
    async fn push_candidate(&self, campaign: Id, candidate: &Candidate, now: DateTime<Utc>) -> Result<bool>;

    /// Replace a pooled candidate's entry while nominations are open.
    async fn replace_candidate(&self, campaign: Id, candidate: &Candidate, now: DateTime<Utc>) -> Result<bool>;

    /// Set the candidates of a round that has not opened yet.
    async fn set_round_candidates(
        &self,
        campaign: Id,
        round: RoundIndex,
        candidates: &[Id],
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

#[rocket::async_trait]
impl PoolStore for Coll<Campaign> {
    async fn push_candidate(&self, campaign: Id, candidate: &Candidate, now: DateTime<Utc>) -> Result<bool> {
        // Only push if the member is not already in the pool, so concurrent
        // nominations by the same member cannot both land.
        let filter = doc! {
            "_id": campaign,
            "candidates.member_id": { "$ne": candidate.member_id },
            "nomination.end": { "$gt": bson::DateTime::from_chrono(now) },
        };
        let update = doc! {
            "$push": { "candidates": Bson::from(candidate) },
        };
        let result = self.update_one(filter, update, None).await?;
        Ok(result.matched_count == 1)
    }

    async fn replace_candidate(&self, campaign: Id, candidate: &Candidate, now: DateTime<Utc>) -> Result<bool> {
        let filter = doc! {
            "_id": campaign,
            "candidates.member_id": candidate.member_id,
            "nomination.end": { "$gt": bson::DateTime::from_chrono(now) },
        };
        let update = doc! {
            "$set": { "candidates.$": Bson::from(candidate) },
        };
        let result = self.update_one(filter, update, None).await?;
        Ok(result.matched_count == 1)
    }

    async fn set_round_candidates(
        &self,
        campaign: Id,
        round: RoundIndex,
        candidates: &[Id],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let start = format!("rounds.{round}.voting.start");
        let field = format!("rounds.{round}.candidates");
        let filter = doc! {
            "_id": campaign,
            start: { "$gt": bson::DateTime::from_chrono(now) },
        };
        let update = doc! {
            "$set": { field: candidates.iter().copied().map(Bson::from).collect::<Vec<_>>() },
        };
        let result = self.update_one(filter, update, None).await?;
        Ok(result.matched_count == 1)
    }
}

/// Manages nominations into a campaign's candidate pool.
pub struct CandidatePool<S = Coll<Campaign>> {
    campaigns: S,
    storage: Arc<dyn DocumentStorage>,
    notifier: Arc<dyn Notifier>,
}

impl<S> CandidatePool<S>
where
    S: PoolStore,
{
    pub fn new(
        campaigns: S,
        storage: Arc<dyn DocumentStorage>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            campaigns,
            storage,
            notifier,
        }
    }

    /// Store uploads, releasing everything already stored if any upload fails.
    async fn store_uploads(&self, uploads: Vec<(DocumentKind, Upload)>) -> Result<Vec<DocumentRef>> {
        let documents = uploads
            .into_iter()
            .map(|(kind, upload)| {
                let metadata = DocumentMetadata {
                    kind,
                    filename: upload.filename,
                    content_type: upload.content_type,
                };
                (upload.bytes, metadata)
            })
            .collect();
        store_all(self.storage.as_ref(), documents).await
    }

    /// Add `voter` to the campaign's candidate pool.
    pub async fn nominate(
        &self,
        campaign: &Campaign,
        caller: Id,
        voter: Id,
        submission: NominationSubmission,
        now: DateTime<Utc>,
    ) -> Result<Candidate> {
        let started = Instant::now();
        check_nomination(campaign, caller, voter, now)?;

        let stored = self.store_uploads(submission.documents).await?;
        // Uploads may have outlasted the nomination window.
        let written_at = elapsed_from(now, started);
        let mut documents = CandidateDocuments::default();
        for document in &stored {
            if let Some(slot) = documents.slot_mut(document.kind) {
                *slot = Some(document.clone());
            }
        }
        let candidate = Candidate {
            member_id: voter,
            statement: submission.statement,
            video_link: submission.video_link,
            documents,
            nominated_at: written_at,
        };

        let pushed = self
            .campaigns
            .push_candidate(campaign.id, &candidate, written_at)
            .await;
        if !matches!(pushed, Ok(true)) {
            release_all(self.storage.as_ref(), &stored).await;
            pushed?;
            assert_phase(campaign, written_at, Phase::Nominating)?;
            return Err(Error::Conflict(format!(
                "Member {voter} is already nominated in campaign {}",
                campaign.id
            )));
        }
        info!("Member {voter} nominated in campaign {}", campaign.id);

        notify_in_background(
            self.notifier.clone(),
            vec![voter],
            TemplateKind::NominationReceived,
            json!({
                "campaign_id": campaign.id.to_string(),
                "campaign_name": &campaign.name,
            }),
        );
        Ok(candidate)
    }

    /// Update `voter`'s own nomination while nominations are open.
    /// Replaced documents are released from storage.
    pub async fn update_nomination(
        &self,
        campaign: &Campaign,
        caller: Id,
        voter: Id,
        patch: NominationPatch,
        now: DateTime<Utc>,
    ) -> Result<Candidate> {
        if caller != voter {
            return Err(Error::Forbidden(
                "Only the nominee may update a nomination".to_string(),
            ));
        }
        let started = Instant::now();
        assert_phase(campaign, now, Phase::Nominating)?;
        let mut candidate = campaign
            .candidate(voter)
            .cloned()
            .ok_or_else(|| Error::not_found("Nomination for member", voter))?;

        if let Some(mission) = patch.mission {
            candidate.statement.mission = mission;
        }
        if let Some(vision) = patch.vision {
            candidate.statement.vision = vision;
        }
        if let Some(video_link) = patch.video_link {
            candidate.video_link = Some(video_link).filter(|link| !link.is_empty());
        }

        let stored = self.store_uploads(patch.documents).await?;
        let mut replaced = Vec::new();
        for document in &stored {
            if let Some(slot) = candidate.documents.slot_mut(document.kind) {
                if let Some(old) = slot.replace(document.clone()) {
                    replaced.push(old);
                }
            }
        }

        let written_at = elapsed_from(now, started);
        let replaced_entry = self
            .campaigns
            .replace_candidate(campaign.id, &candidate, written_at)
            .await;
        if !matches!(replaced_entry, Ok(true)) {
            release_all(self.storage.as_ref(), &stored).await;
            replaced_entry?;
            assert_phase(campaign, written_at, Phase::Nominating)?;
            return Err(Error::not_found("Nomination for member", voter));
        }
        release_all(self.storage.as_ref(), &replaced).await;
        debug!("Member {voter} updated their nomination in campaign {}", campaign.id);

        notify_in_background(
            self.notifier.clone(),
            vec![voter],
            TemplateKind::NominationUpdated,
            json!({
                "campaign_id": campaign.id.to_string(),
                "campaign_name": &campaign.name,
            }),
        );
        Ok(candidate)
    }

    /// Replace the set of candidates competing in a round.
    pub async fn select_for_round(
        &self,
        campaign: &Campaign,
        round: RoundIndex,
        candidates: Vec<Id>,
        now: DateTime<Utc>,
    ) -> Result<Round> {
        let started = Instant::now();
        check_selection(campaign, round, &candidates, now)?;

        let written_at = elapsed_from(now, started);
        if !self
            .campaigns
            .set_round_candidates(campaign.id, round, &candidates, written_at)
            .await?
        {
            check_selection(campaign, round, &candidates, written_at)?;
            return Err(Error::not_found("Campaign", campaign.id));
        }
        info!(
            "Selected {} candidate(s) for round {round} of campaign {}",
            candidates.len(),
            campaign.id
        );

        let mut updated = campaign.round(round)?.clone();
        updated.candidates = candidates;
        Ok(updated)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CandidatePool {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let campaigns = req.guard::<Coll<Campaign>>().await.unwrap();
        request::Outcome::Success(CandidatePool::new(
            campaigns,
            managed(req).await,
            managed(req).await,
        ))
    }
}

/// Campaigns held in memory.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryPoolStore {
    campaigns: std::sync::Mutex<std::collections::HashMap<Id, Campaign>>,
}

#[cfg(test)]
impl MemoryPoolStore {
    pub fn with(campaign: Campaign) -> Self {
        let store = Self::default();
        store.campaigns.lock().unwrap().insert(campaign.id, campaign);
        store
    }

    pub fn campaign(&self, id: Id) -> Campaign {
        self.campaigns.lock().unwrap()[&id].clone()
    }
}

#[cfg(test)]
#[rocket::async_trait]
impl PoolStore for MemoryPoolStore {
    async fn push_candidate(&self, campaign: Id, candidate: &Candidate, now: DateTime<Utc>) -> Result<bool> {
        let mut campaigns = self.campaigns.lock().unwrap();
        let Some(stored) = campaigns.get_mut(&campaign) else {
            return Ok(false);
        };
        if now >= stored.nomination.end || stored.candidate(candidate.member_id).is_some() {
            return Ok(false);
        }
        stored.candidates.push(candidate.clone());
        Ok(true)
    }

    async fn replace_candidate(&self, campaign: Id, candidate: &Candidate, now: DateTime<Utc>) -> Result<bool> {
        let mut campaigns = self.campaigns.lock().unwrap();
        let Some(stored) = campaigns.get_mut(&campaign) else {
            return Ok(false);
        };
        if now >= stored.nomination.end {
            return Ok(false);
        }
        match stored
            .candidates
            .iter_mut()
            .find(|c| c.member_id == candidate.member_id)
        {
            Some(entry) => {
                *entry = candidate.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_round_candidates(
        &self,
        campaign: Id,
        round: RoundIndex,
        candidates: &[Id],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut campaigns = self.campaigns.lock().unwrap();
        let Some(round) = campaigns
            .get_mut(&campaign)
            .and_then(|stored| stored.rounds.get_mut(round as usize))
        else {
            return Ok(false);
        };
        if now >= round.voting.start {
            return Ok(false);
        }
        round.candidates = candidates.to_vec();
        Ok(true)
    }
}
