use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::collaborators::directory::ProfileRecord;
use crate::model::db::{ballot::Ballot, campaign::Campaign, campaign::NewCampaign};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// Campaign collections
const CAMPAIGNS: &str = "campaigns";
impl MongoCollection for Campaign {
    const NAME: &'static str = CAMPAIGNS;
}
impl MongoCollection for NewCampaign {
    const NAME: &'static str = CAMPAIGNS;
}

// Ballot collection: one document per ledger entry.
const BALLOTS: &str = "ballots";
impl MongoCollection for Ballot {
    const NAME: &'static str = BALLOTS;
}

// Member profiles, owned by the wider membership system; read-only here.
const PROFILES: &str = "profiles";
impl MongoCollection for ProfileRecord {
    const NAME: &'static str = PROFILES;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Ballot collection: at most one ballot per voter per round.
    let ballot_index = IndexModel::builder()
        .keys(doc! {"campaign_id": 1, "round": 1, "voter_id": 1})
        .options(unique)
        .build();
    Coll::<Ballot>::from_db(db)
        .create_index(ballot_index, None)
        .await?;

    // Statistics scan ballots per round in insertion order.
    let ballot_scan_index = IndexModel::builder()
        .keys(doc! {"campaign_id": 1, "round": 1, "_id": 1})
        .build();
    Coll::<Ballot>::from_db(db)
        .create_index(ballot_scan_index, None)
        .await?;

    Ok(())
}
