use chrono::{DateTime, Utc};
use rocket::FromFormField;
use serde::{Deserialize, Serialize};

use crate::model::{
    api::{id::ApiId, nomination::CandidateDescription},
    db::campaign::{Campaign, CampaignCore, Round, Window},
};
use crate::voting::{current_phase, Phase};

/// A campaign definition, as submitted by an organiser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSpec {
    /// Campaign name.
    pub name: String,
    pub description: String,
    /// Visible to members, rather than a draft.
    #[serde(default)]
    pub public: bool,
    /// List the campaign as active regardless of its dates.
    #[serde(default)]
    pub active_override: bool,
    pub nomination_start: DateTime<Utc>,
    pub nomination_end: DateTime<Utc>,
    /// Voters' programmes must not end before this date.
    pub voter_cutoff_end_date: DateTime<Utc>,
    /// Short master's programmes must have started on or after this date.
    #[serde(default)]
    pub voter_masters_cutoff_start_date: Option<DateTime<Utc>>,
    /// Voting rounds, in chronological order.
    #[serde(default)]
    pub rounds: Vec<RoundSpec>,
}

impl CampaignSpec {
    /// Convert this spec into a campaign with an empty candidate pool.
    pub fn into_campaign(self) -> CampaignCore {
        CampaignCore {
            name: self.name,
            description: self.description,
            public: self.public,
            active_override: self.active_override,
            banner: None,
            nomination: Window::new(self.nomination_start, self.nomination_end),
            voter_cutoff_end_date: self.voter_cutoff_end_date,
            voter_masters_cutoff_start_date: self.voter_masters_cutoff_start_date,
            rounds: self.rounds.into_iter().map(Round::from).collect(),
            candidates: Vec::new(),
        }
    }
}

/// A voting round definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSpec {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Members registering after this are not on the round's voter roll.
    pub voter_list_finalisation: DateTime<Utc>,
    #[serde(default)]
    pub require_institutional_email: bool,
}

impl From<RoundSpec> for Round {
    fn from(spec: RoundSpec) -> Self {
        Self {
            voting: Window::new(spec.start, spec.end),
            voter_list_finalisation: spec.voter_list_finalisation,
            require_institutional_email: spec.require_institutional_email,
            candidates: Vec::new(),
        }
    }
}

/// Display metadata and flags that may be changed at any time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignMetadataPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub public: Option<bool>,
    pub active_override: Option<bool>,
}

/// Campaign listing filter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromFormField)]
pub enum CampaignStatus {
    #[field(value = "all")]
    All,
    /// Nominating through the last round, or manually marked active.
    #[field(value = "active")]
    Active,
    #[field(value = "nominating")]
    Nominating,
    #[field(value = "voting")]
    Voting,
    #[field(value = "archived")]
    Archived,
}

impl CampaignStatus {
    pub fn matches(&self, campaign: &CampaignCore, now: DateTime<Utc>) -> bool {
        let phase = current_phase(campaign, now);
        match self {
            Self::All => true,
            Self::Active => {
                campaign.active_override
                    || (phase >= Phase::Nominating && phase < Phase::Archived)
            }
            Self::Nominating => phase == Phase::Nominating,
            Self::Voting => matches!(phase, Phase::Voting { .. }),
            Self::Archived => phase == Phase::Archived,
        }
    }
}

/// A round, as shown to API consumers.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoundDescription {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub voter_list_finalisation: DateTime<Utc>,
    pub require_institutional_email: bool,
    /// Member IDs of the candidates competing in this round.
    pub candidates: Vec<ApiId>,
}

impl From<&Round> for RoundDescription {
    fn from(round: &Round) -> Self {
        Self {
            start: round.voting.start,
            end: round.voting.end,
            voter_list_finalisation: round.voter_list_finalisation,
            require_institutional_email: round.require_institutional_email,
            candidates: round.candidates.iter().copied().map(ApiId::from).collect(),
        }
    }
}

/// A campaign, as shown to API consumers. Never includes ballots.
#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignDescription {
    pub id: ApiId,
    pub name: String,
    pub description: String,
    pub public: bool,
    pub active_override: bool,
    pub has_banner: bool,
    pub nomination_start: DateTime<Utc>,
    pub nomination_end: DateTime<Utc>,
    pub voter_cutoff_end_date: DateTime<Utc>,
    pub voter_masters_cutoff_start_date: Option<DateTime<Utc>>,
    pub rounds: Vec<RoundDescription>,
    pub candidates: Vec<CandidateDescription>,
    /// The phase derived at the time of the request.
    pub phase: PhaseDescription,
}

/// A serialisable snapshot of a campaign's phase.
#[derive(Debug, Serialize, Deserialize)]
pub struct PhaseDescription {
    pub name: String,
    pub round: Option<u32>,
}

impl From<Phase> for PhaseDescription {
    fn from(phase: Phase) -> Self {
        let round = match phase {
            Phase::Voting { round } => Some(round),
            Phase::BetweenRounds { after } => Some(after),
            _ => None,
        };
        let name = match phase {
            Phase::Upcoming => "upcoming",
            Phase::Nominating => "nominating",
            Phase::Gap => "gap",
            Phase::Voting { .. } => "voting",
            Phase::BetweenRounds { .. } => "between_rounds",
            Phase::Archived => "archived",
        };
        Self {
            name: name.to_string(),
            round,
        }
    }
}

impl CampaignDescription {
    pub fn new(campaign: &Campaign, now: DateTime<Utc>) -> Self {
        Self {
            id: campaign.id.into(),
            name: campaign.name.clone(),
            description: campaign.description.clone(),
            public: campaign.public,
            active_override: campaign.active_override,
            has_banner: campaign.banner.is_some(),
            nomination_start: campaign.nomination.start,
            nomination_end: campaign.nomination.end,
            voter_cutoff_end_date: campaign.voter_cutoff_end_date,
            voter_masters_cutoff_start_date: campaign.voter_masters_cutoff_start_date,
            rounds: campaign.rounds.iter().map(RoundDescription::from).collect(),
            candidates: campaign
                .candidates
                .iter()
                .map(CandidateDescription::from)
                .collect(),
            phase: current_phase(campaign, now).into(),
        }
    }
}
