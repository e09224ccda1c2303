use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    api::{id::ApiId, upload::Upload},
    db::{
        campaign::{Candidate, Statement},
        document::DocumentKind,
    },
    mongodb::Id,
};
use crate::voting::pool::{NominationPatch, NominationSubmission};

/// Collect the uploaded documents of a nomination form.
fn documents(
    cv: Option<Upload>,
    organisation_exp: Option<Upload>,
    not_in_office_statement: Option<Upload>,
    motivation_essay: Option<Upload>,
) -> Vec<(DocumentKind, Upload)> {
    [
        (DocumentKind::Cv, cv),
        (DocumentKind::OrganisationExp, organisation_exp),
        (DocumentKind::NotInOfficeStatement, not_in_office_statement),
        (DocumentKind::MotivationEssay, motivation_essay),
    ]
    .into_iter()
    .filter_map(|(kind, upload)| Some((kind, upload?)))
    .collect()
}

/// A self-nomination, submitted as a multipart form.
#[derive(Debug, FromForm)]
pub struct NominationForm {
    /// Must be the submitting member's own ID.
    pub candidate_id: Id,
    #[field(validate = len(1..))]
    pub mission_statement: String,
    #[field(validate = len(1..))]
    pub vision_statement: String,
    pub video_link: Option<String>,
    pub cv: Option<Upload>,
    pub organisation_exp: Option<Upload>,
    pub not_in_office_statement: Option<Upload>,
    pub motivation_essay: Option<Upload>,
}

impl NominationForm {
    /// Split into the nominee and their submission.
    pub fn into_submission(self) -> (Id, NominationSubmission) {
        let submission = NominationSubmission {
            statement: Statement {
                mission: self.mission_statement,
                vision: self.vision_statement,
            },
            video_link: self.video_link.filter(|link| !link.is_empty()),
            documents: documents(
                self.cv,
                self.organisation_exp,
                self.not_in_office_statement,
                self.motivation_essay,
            ),
        };
        (self.candidate_id, submission)
    }
}

/// Changes to a nomination, submitted as a multipart form.
#[derive(Debug, FromForm)]
pub struct NominationPatchForm {
    /// Empty statements are ignored.
    pub mission_statement: Option<String>,
    pub vision_statement: Option<String>,
    /// An empty link removes the current one.
    pub video_link: Option<String>,
    pub cv: Option<Upload>,
    pub organisation_exp: Option<Upload>,
    pub not_in_office_statement: Option<Upload>,
    pub motivation_essay: Option<Upload>,
}

impl From<NominationPatchForm> for NominationPatch {
    fn from(form: NominationPatchForm) -> Self {
        Self {
            mission: form.mission_statement.filter(|s| !s.is_empty()),
            vision: form.vision_statement.filter(|s| !s.is_empty()),
            video_link: form.video_link,
            documents: documents(
                form.cv,
                form.organisation_exp,
                form.not_in_office_statement,
                form.motivation_essay,
            ),
        }
    }
}

/// A nomination, as shown to API consumers.
#[derive(Debug, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub member_id: ApiId,
    pub mission_statement: String,
    pub vision_statement: String,
    pub video_link: Option<String>,
    /// The kinds of supporting document available for download.
    pub documents: Vec<DocumentKind>,
    pub nominated_at: DateTime<Utc>,
}

impl From<&Candidate> for CandidateDescription {
    fn from(candidate: &Candidate) -> Self {
        Self {
            member_id: candidate.member_id.into(),
            mission_statement: candidate.statement.mission.clone(),
            vision_statement: candidate.statement.vision.clone(),
            video_link: candidate.video_link.clone(),
            documents: candidate.documents.iter().map(|d| d.kind).collect(),
            nominated_at: candidate.nominated_at,
        }
    }
}

/// The candidates competing in a round.
#[derive(Debug, Serialize, Deserialize)]
pub struct CandidateSelection {
    pub candidates: Vec<ApiId>,
}

impl CandidateSelection {
    pub fn into_ids(self) -> Vec<Id> {
        self.candidates.into_iter().map(Id::from).collect()
    }
}
