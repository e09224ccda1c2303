//! Per-voter eligibility for a campaign round.
//!
//! The same predicate decides both single "am I eligible" checks and bulk
//! enumeration of a round's voter roll.

use chrono::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::model::{
    common::voter::{AcademicLevel, VoterSnapshot},
    db::campaign::{CampaignCore, Round},
};

/// Why a voter is not eligible to vote in a round.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum Ineligibility {
    #[error("membership is not verified")]
    Unverified,
    #[error("registered after the voter list was finalised")]
    RegisteredTooLate,
    #[error("programme ends before the voter cutoff date")]
    ProgrammeEndsTooEarly,
    #[error("programme is shorter than the minimum enrollment length")]
    ProgrammeTooShort,
    #[error("short master's programme started before the cutoff date")]
    MastersStartedTooEarly,
    #[error("no verified institutional email address on file")]
    NoInstitutionalEmail,
}

/// Configurable thresholds for the eligibility rules.
#[derive(Debug, Copy, Clone)]
pub struct EligibilityRules {
    /// Minimum total programme length.
    pub min_enrollment: Duration,
    /// Master's programmes up to this length count as short.
    pub short_masters_max: Duration,
}

impl Default for EligibilityRules {
    fn default() -> Self {
        Self {
            min_enrollment: Duration::days(180),
            short_masters_max: Duration::days(365),
        }
    }
}

impl From<&Config> for EligibilityRules {
    fn from(config: &Config) -> Self {
        Self {
            min_enrollment: config.min_enrollment(),
            short_masters_max: config.short_masters_max(),
        }
    }
}

impl EligibilityRules {
    /// Check every rule, reporting the first one the voter fails.
    pub fn check(
        &self,
        voter: &VoterSnapshot,
        campaign: &CampaignCore,
        round: &Round,
    ) -> Result<(), Ineligibility> {
        if !voter.verified {
            return Err(Ineligibility::Unverified);
        }
        if voter.registered_at > round.voter_list_finalisation {
            return Err(Ineligibility::RegisteredTooLate);
        }
        if voter.enrollment_end < campaign.voter_cutoff_end_date {
            return Err(Ineligibility::ProgrammeEndsTooEarly);
        }

        let length = voter.enrollment_length();
        if length < self.min_enrollment {
            return Err(Ineligibility::ProgrammeTooShort);
        }

        if voter.academic_level == AcademicLevel::Masters && length <= self.short_masters_max {
            if let Some(cutoff) = campaign.voter_masters_cutoff_start_date {
                if voter.enrollment_start < cutoff {
                    return Err(Ineligibility::MastersStartedTooEarly);
                }
            }
        }

        if round.require_institutional_email && !voter.has_institutional_email {
            return Err(Ineligibility::NoInstitutionalEmail);
        }

        Ok(())
    }

    pub fn is_eligible(&self, voter: &VoterSnapshot, campaign: &CampaignCore, round: &Round) -> bool {
        self.check(voter, campaign, round).is_ok()
    }
}
