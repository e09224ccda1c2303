use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::RoundIndex,
    db::document::{DocumentKind, DocumentRef},
    mongodb::{optional_bson_datetime, Id},
};

/// A half-open time window `[start, end)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Is the given instant within the window?
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// One voting window within a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// When ballots may be cast.
    pub voting: Window,
    /// Members registering after this instant are not on this round's roll.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub voter_list_finalisation: DateTime<Utc>,
    /// Whether voters need a verified institutional email address.
    #[serde(default)]
    pub require_institutional_email: bool,
    /// Member IDs of the pooled candidates competing in this round.
    #[serde(default)]
    pub candidates: Vec<Id>,
}

impl Round {
    /// Is the given member one of this round's selected candidates?
    pub fn has_candidate(&self, candidate: Id) -> bool {
        self.candidates.contains(&candidate)
    }
}

/// A candidate's written statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub mission: String,
    pub vision: String,
}

/// Optional supporting documents attached to a nomination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDocuments {
    pub cv: Option<DocumentRef>,
    pub organisation_exp: Option<DocumentRef>,
    pub not_in_office_statement: Option<DocumentRef>,
    pub motivation_essay: Option<DocumentRef>,
}

impl CandidateDocuments {
    /// The slot holding documents of the given kind, if candidates can have one.
    pub fn slot(&self, kind: DocumentKind) -> Option<&Option<DocumentRef>> {
        match kind {
            DocumentKind::Cv => Some(&self.cv),
            DocumentKind::OrganisationExp => Some(&self.organisation_exp),
            DocumentKind::NotInOfficeStatement => Some(&self.not_in_office_statement),
            DocumentKind::MotivationEssay => Some(&self.motivation_essay),
            DocumentKind::Banner => None,
        }
    }

    pub fn slot_mut(&mut self, kind: DocumentKind) -> Option<&mut Option<DocumentRef>> {
        match kind {
            DocumentKind::Cv => Some(&mut self.cv),
            DocumentKind::OrganisationExp => Some(&mut self.organisation_exp),
            DocumentKind::NotInOfficeStatement => Some(&mut self.not_in_office_statement),
            DocumentKind::MotivationEssay => Some(&mut self.motivation_essay),
            DocumentKind::Banner => None,
        }
    }

    pub fn get(&self, kind: DocumentKind) -> Option<&DocumentRef> {
        self.slot(kind).and_then(Option::as_ref)
    }

    /// All attached documents.
    pub fn iter(&self) -> impl Iterator<Item = &DocumentRef> {
        [
            &self.cv,
            &self.organisation_exp,
            &self.not_in_office_statement,
            &self.motivation_essay,
        ]
        .into_iter()
        .flatten()
    }
}

/// A self-nominated member in a campaign's candidate pool.
/// The owning member's ID doubles as the candidate ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub member_id: Id,
    pub statement: Statement,
    pub video_link: Option<String>,
    #[serde(default)]
    pub documents: CandidateDocuments,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub nominated_at: DateTime<Utc>,
}

impl From<&Round> for Bson {
    fn from(round: &Round) -> Self {
        to_bson(round).expect("Serialisation is infallible")
    }
}

impl From<&Candidate> for Bson {
    fn from(candidate: &Candidate) -> Self {
        to_bson(candidate).expect("Serialisation is infallible")
    }
}

/// Core campaign data, as stored in the database.
///
/// Note there is no stored phase: it is always derived from the dates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCore {
    pub name: String,
    pub description: String,
    /// Draft campaigns are only visible to organisers.
    pub public: bool,
    /// List the campaign as active regardless of its dates.
    #[serde(default)]
    pub active_override: bool,
    pub banner: Option<DocumentRef>,
    pub nomination: Window,
    /// Voters' programmes must not end before this date.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub voter_cutoff_end_date: DateTime<Utc>,
    /// Short standalone master's programmes must start on or after this date.
    #[serde(default, with = "optional_bson_datetime")]
    pub voter_masters_cutoff_start_date: Option<DateTime<Utc>>,
    pub rounds: Vec<Round>,
    /// The candidate pool.
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl CampaignCore {
    /// Check the campaign's date invariants.
    ///
    /// The nomination window must close at least `grace` before the first
    /// round opens, and rounds must be chronologically ordered without overlap.
    pub fn validate(&self, grace: Duration) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("Campaign name must not be empty".to_string()));
        }
        if self.nomination.start >= self.nomination.end {
            return Err(Error::Validation(
                "Nomination window must end after it starts".to_string(),
            ));
        }

        let mut previous_end: Option<DateTime<Utc>> = None;
        for (index, round) in self.rounds.iter().enumerate() {
            if round.voting.start >= round.voting.end {
                return Err(Error::Validation(format!(
                    "Round {index} must end after it starts"
                )));
            }
            if round.voter_list_finalisation > round.voting.end {
                return Err(Error::Validation(format!(
                    "Round {index} voter list must be finalised before the round ends"
                )));
            }
            match previous_end {
                None => {
                    if self.nomination.end + grace >= round.voting.start {
                        return Err(Error::Validation(format!(
                            "The first round must start more than {} minutes after nominations close",
                            grace.num_minutes()
                        )));
                    }
                }
                Some(previous_end) => {
                    if round.voting.start <= previous_end {
                        return Err(Error::Validation(format!(
                            "Round {index} must start after round {} ends",
                            index - 1
                        )));
                    }
                }
            }
            previous_end = Some(round.voting.end);
        }

        Ok(())
    }

    /// Get a round by index.
    pub fn round(&self, index: RoundIndex) -> Result<&Round> {
        self.rounds
            .get(index as usize)
            .ok_or(Error::InvalidRound(index))
    }

    /// Find a member's entry in the candidate pool.
    pub fn candidate(&self, member: Id) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.member_id == member)
    }

    /// Every document this campaign references.
    pub fn documents(&self) -> impl Iterator<Item = &DocumentRef> {
        self.banner
            .iter()
            .chain(self.candidates.iter().flat_map(|c| c.documents.iter()))
    }
}

/// A campaign without an ID.
pub type NewCampaign = CampaignCore;

/// A campaign from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub campaign: CampaignCore,
}

impl Deref for Campaign {
    type Target = CampaignCore;

    fn deref(&self) -> &Self::Target {
        &self.campaign
    }
}

impl DerefMut for Campaign {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.campaign
    }
}


#[cfg(test)]
mod tests {
    use super::examples::jan;
    use super::*;

    fn grace() -> Duration {
        Duration::minutes(60)
    }

    #[test]
    fn valid_examples() {
        CampaignCore::example().validate(grace()).unwrap();
        CampaignCore::two_round_example().validate(grace()).unwrap();
    }

    #[test]
    fn overlapping_rounds_rejected() {
        let mut campaign = CampaignCore::two_round_example();
        campaign.rounds[1].voting.start = jan(19);
        assert!(matches!(
            campaign.validate(grace()),
            Err(Error::Validation(_))
        ));

        // Touching windows are not allowed either.
        campaign.rounds[1].voting.start = jan(20);
        assert!(matches!(
            campaign.validate(grace()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn out_of_order_rounds_rejected() {
        let mut campaign = CampaignCore::two_round_example();
        campaign.rounds.swap(0, 1);
        assert!(matches!(
            campaign.validate(grace()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn grace_period_enforced() {
        let mut campaign = CampaignCore::example();
        campaign.rounds[0].voting.start = jan(10) + Duration::minutes(30);
        campaign.rounds[0].voter_list_finalisation = campaign.rounds[0].voting.start;
        assert!(matches!(
            campaign.validate(grace()),
            Err(Error::Validation(_))
        ));
        campaign.validate(Duration::minutes(15)).unwrap();
    }

    #[test]
    fn empty_windows_rejected() {
        let mut campaign = CampaignCore::example();
        campaign.nomination.end = campaign.nomination.start;
        assert!(campaign.validate(grace()).is_err());

        let mut campaign = CampaignCore::example();
        campaign.rounds[0].voting.end = campaign.rounds[0].voting.start;
        assert!(campaign.validate(grace()).is_err());
    }

    #[test]
    fn late_finalisation_rejected() {
        let mut campaign = CampaignCore::example();
        campaign.rounds[0].voter_list_finalisation = jan(21);
        assert!(campaign.validate(grace()).is_err());
    }

    #[test]
    fn round_lookup() {
        let campaign = CampaignCore::example();
        assert!(campaign.round(0).is_ok());
        assert!(matches!(campaign.round(1), Err(Error::InvalidRound(1))));
    }
}
