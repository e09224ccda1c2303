use chrono::{DateTime, Duration, Utc};
use rocket::FromFormField;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Level of study a member is enrolled on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcademicLevel {
    Undergraduate,
    /// A standalone master's programme.
    Masters,
    /// An undergraduate programme that runs straight into a master's year.
    IntegratedMasters,
    Doctorate,
    Other,
}

impl AcademicLevel {
    /// Interpret the free-text degree level held on member profiles,
    /// which uses the `S1`/`S2`/`S3` convention (bachelor's/master's/doctorate).
    pub fn from_degree_level(level: &str) -> Self {
        let level = level.to_ascii_uppercase();
        let s1 = level.contains("S1");
        let s2 = level.contains("S2");
        if level.contains("S3") {
            Self::Doctorate
        } else if s1 && s2 {
            Self::IntegratedMasters
        } else if s2 {
            Self::Masters
        } else if s1 {
            Self::Undergraduate
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undergraduate => "undergraduate",
            Self::Masters => "masters",
            Self::IntegratedMasters => "integrated_masters",
            Self::Doctorate => "doctorate",
            Self::Other => "other",
        }
    }
}

/// Point-in-time view of the membership attributes that decide eligibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterSnapshot {
    pub id: Id,
    /// Does the member hold verified membership status?
    pub verified: bool,
    pub enrollment_start: DateTime<Utc>,
    pub enrollment_end: DateTime<Utc>,
    pub academic_level: AcademicLevel,
    pub branch: String,
    /// Is a verified institutional (not personal) email address on file?
    pub has_institutional_email: bool,
    /// When the member registered with the organisation.
    pub registered_at: DateTime<Utc>,
}

impl VoterSnapshot {
    /// Total length of the member's programme.
    pub fn enrollment_length(&self) -> Duration {
        self.enrollment_end - self.enrollment_start
    }

    /// The value of the given grouping attribute for this voter.
    pub fn attribute(&self, attribute: VoterAttribute) -> &str {
        match attribute {
            VoterAttribute::Branch => &self.branch,
            VoterAttribute::AcademicLevel => self.academic_level.as_str(),
        }
    }
}

/// Voter attributes that ballots may be grouped by in statistics.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "snake_case")]
pub enum VoterAttribute {
    #[field(value = "branch")]
    Branch,
    #[field(value = "academic_level")]
    AcademicLevel,
}
