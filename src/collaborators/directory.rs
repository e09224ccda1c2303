use chrono::{DateTime, Utc};
use mongodb::{bson::doc, error::Error as DbError, Database};
use rocket::futures::{
    future,
    stream::{BoxStream, StreamExt, TryStreamExt},
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::voter::{AcademicLevel, VoterSnapshot},
    mongodb::{optional_bson_datetime, Coll, Id},
};

/// Profile role marking a member whose membership has been verified.
pub const VERIFIED_ROLE: &str = "verified";

/// Read-only source of per-voter membership attributes.
#[rocket::async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Load a fresh snapshot of the given member, or `None` if they have no usable profile.
    async fn voter_snapshot(&self, voter: Id) -> Result<Option<VoterSnapshot>>;

    /// Stream every verified member matching the filter.
    async fn verified_members(
        &self,
        filter: MemberFilter,
    ) -> Result<BoxStream<'static, Result<VoterSnapshot>>>;
}

/// Coarse pre-filter for member enumeration. Members passing the filter may
/// still fail the full eligibility rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemberFilter {
    /// Only members registered on or before this instant.
    pub registered_by: Option<DateTime<Utc>>,
    /// Only members whose programme ends on or after this instant.
    pub enrolled_until: Option<DateTime<Utc>>,
}

impl MemberFilter {
    pub fn matches(&self, voter: &VoterSnapshot) -> bool {
        self.registered_by.map_or(true, |by| voter.registered_at <= by)
            && self
                .enrolled_until
                .map_or(true, |until| voter.enrollment_end >= until)
    }
}

/// A member profile, as stored by the wider membership system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub degree_level: String,
    #[serde(default, with = "optional_bson_datetime")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, with = "optional_bson_datetime")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Institutional email address.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, with = "optional_bson_datetime")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ProfileRecord {
    /// Convert into a voter snapshot.
    /// Profiles without enrollment dates cannot be evaluated and yield `None`.
    pub fn into_snapshot(self) -> Option<VoterSnapshot> {
        let registered_at = self
            .created_at
            .unwrap_or_else(|| self.id.timestamp().to_chrono());
        let has_institutional_email =
            self.email_verified && self.email.as_deref().map_or(false, |e| !e.trim().is_empty());
        Some(VoterSnapshot {
            id: self.id,
            verified: self.roles.iter().any(|role| role == VERIFIED_ROLE),
            enrollment_start: self.start_date?,
            enrollment_end: self.end_date?,
            academic_level: AcademicLevel::from_degree_level(&self.degree_level),
            branch: self.branch,
            has_institutional_email,
            registered_at,
        })
    }
}

fn unavailable(err: DbError) -> Error {
    error!("Membership directory unavailable: {err}");
    Error::Dependency(format!("Membership directory: {err}"))
}

/// Membership directory backed by the shared profiles collection.
pub struct MongoDirectory {
    profiles: Coll<ProfileRecord>,
}

impl MongoDirectory {
    pub fn new(db: &Database) -> Self {
        Self {
            profiles: Coll::from_db(db),
        }
    }
}

#[rocket::async_trait]
impl MembershipDirectory for MongoDirectory {
    async fn voter_snapshot(&self, voter: Id) -> Result<Option<VoterSnapshot>> {
        let profile = self
            .profiles
            .find_one(voter.as_doc(), None)
            .await
            .map_err(unavailable)?;
        Ok(profile.and_then(ProfileRecord::into_snapshot))
    }

    async fn verified_members(
        &self,
        filter: MemberFilter,
    ) -> Result<BoxStream<'static, Result<VoterSnapshot>>> {
        let mut query = doc! { "roles": VERIFIED_ROLE };
        if let Some(until) = filter.enrolled_until {
            query.insert("endDate", doc! { "$gte": mongodb::bson::DateTime::from_chrono(until) });
        }
        let cursor = self
            .profiles
            .find(query, None)
            .await
            .map_err(unavailable)?;

        let members = cursor
            .map_err(unavailable)
            .try_filter_map(move |profile| {
                let snapshot = profile
                    .into_snapshot()
                    .filter(|snapshot| filter.matches(snapshot));
                future::ready(Ok(snapshot))
            })
            .boxed();
        Ok(members)
    }
}
