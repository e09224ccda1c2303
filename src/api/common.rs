use mongodb::bson::doc;
use rocket::{futures::TryStreamExt, http::ContentType};

use crate::collaborators::DocumentStorage;
use crate::error::{Error, Result};
use crate::model::{
    db::{campaign::Campaign, document::DocumentRef},
    mongodb::{Coll, Id},
};

/// Get a campaign by ID.
pub async fn find_campaign(campaigns: &Coll<Campaign>, campaign_id: Id) -> Result<Campaign> {
    campaigns
        .find_one(campaign_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found("Campaign", campaign_id))
}

/// Get a campaign by ID, treating drafts as missing.
pub async fn find_public_campaign(campaigns: &Coll<Campaign>, campaign_id: Id) -> Result<Campaign> {
    let filter = doc! {
        "_id": campaign_id,
        "public": true,
    };
    campaigns
        .find_one(filter, None)
        .await?
        .ok_or_else(|| Error::not_found("Campaign", campaign_id))
}

/// Get a campaign by ID. Only organisers may see drafts.
pub async fn find_visible_campaign(
    campaigns: &Coll<Campaign>,
    campaign_id: Id,
    organiser: bool,
) -> Result<Campaign> {
    if organiser {
        find_campaign(campaigns, campaign_id).await
    } else {
        find_public_campaign(campaigns, campaign_id).await
    }
}

/// Read a whole document out of storage.
pub async fn download(
    storage: &dyn DocumentStorage,
    document: &DocumentRef,
) -> Result<(ContentType, Vec<u8>)> {
    let bytes = storage.fetch(document).await?.try_concat().await?;
    let content_type =
        ContentType::parse_flexible(&document.content_type).unwrap_or(ContentType::Binary);
    Ok((content_type, bytes))
}
