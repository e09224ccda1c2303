use mongodb::bson::{to_bson, Bson};
use rocket::request::FromParam;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// The kinds of binary document a campaign can reference.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Banner,
    Cv,
    OrganisationExp,
    NotInOfficeStatement,
    MotivationEssay,
}

impl DocumentKind {
    /// The document kinds a candidate may attach to a nomination.
    pub const CANDIDATE_KINDS: [DocumentKind; 4] = [
        DocumentKind::Cv,
        DocumentKind::OrganisationExp,
        DocumentKind::NotInOfficeStatement,
        DocumentKind::MotivationEssay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Banner => "banner",
            Self::Cv => "cv",
            Self::OrganisationExp => "organisation_exp",
            Self::NotInOfficeStatement => "not_in_office_statement",
            Self::MotivationEssay => "motivation_essay",
        }
    }
}

impl<'a> FromParam<'a> for DocumentKind {
    type Error = &'a str;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        [Self::Banner]
            .into_iter()
            .chain(Self::CANDIDATE_KINDS)
            .find(|kind| kind.as_str() == param)
            .ok_or(param)
    }
}

/// A reference to a document held by the external document storage.
/// The document itself is never copied into campaign records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Opaque storage handle.
    pub handle: Id,
    pub kind: DocumentKind,
    pub filename: String,
    pub content_type: String,
}

impl From<&DocumentRef> for Bson {
    fn from(document: &DocumentRef) -> Self {
        to_bson(document).expect("Serialisation is infallible")
    }
}
