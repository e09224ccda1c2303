use std::sync::Arc;

use chrono::Utc;
use mongodb::{
    bson::{self, doc, Bson, Document},
    Client,
};
use rocket::{
    form::Form, futures::TryStreamExt, http::ContentType, serde::json::Json, Route, State,
};

use super::common::{download, find_campaign, find_public_campaign, find_visible_campaign};
use crate::collaborators::{storage::release_all, DocumentMetadata, DocumentStorage};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::{AuthToken, Organiser},
        campaign::{
            CampaignDescription, CampaignMetadataPatch, CampaignSpec, CampaignStatus, RoundSpec,
        },
        upload::Upload,
    },
    db::{
        ballot::Ballot,
        campaign::{Campaign, NewCampaign, Round},
        document::DocumentKind,
    },
    mongodb::{Coll, Id},
};
use crate::voting::{current_phase, Phase};

pub fn routes() -> Vec<Route> {
    routes![
        create_campaign,
        modify_campaign,
        patch_campaign,
        delete_campaign,
        upload_banner,
        get_banner,
        append_round,
        list_campaigns,
        list_public_campaigns,
        get_campaign,
        get_public_campaign,
    ]
}

#[post("/campaigns", data = "<spec>", format = "json")]
async fn create_campaign(
    _token: AuthToken<Organiser>,
    spec: Json<CampaignSpec>,
    new_campaigns: Coll<NewCampaign>,
    campaigns: Coll<Campaign>,
    config: &State<Config>,
) -> Result<Json<CampaignDescription>> {
    let campaign = spec.0.into_campaign();
    campaign.validate(config.nomination_grace())?;

    let new_id: Id = new_campaigns
        .insert_one(&campaign, None)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Valid because the ID comes directly from the DB
        .into();
    info!("Created campaign {new_id}");

    let campaign = find_campaign(&campaigns, new_id).await?;
    Ok(Json(CampaignDescription::new(&campaign, Utc::now())))
}

#[put("/campaigns/<campaign_id>", data = "<spec>", format = "json")]
async fn modify_campaign(
    _token: AuthToken<Organiser>,
    campaign_id: Id,
    spec: Json<CampaignSpec>,
    new_campaigns: Coll<NewCampaign>,
    campaigns: Coll<Campaign>,
    config: &State<Config>,
) -> Result<Json<CampaignDescription>> {
    // Get the existing campaign and check we are allowed to modify it.
    let existing = find_campaign(&campaigns, campaign_id).await?;
    let now = Utc::now();
    let actual = current_phase(&existing, now);
    if actual != Phase::Upcoming {
        return Err(Error::PhaseMismatch {
            expected: Phase::Upcoming.to_string(),
            actual,
        });
    }

    let mut campaign = spec.0.into_campaign();
    campaign.banner = existing.campaign.banner;
    campaign.validate(config.nomination_grace())?;

    // Replace, provided nominations have still not opened.
    let filter = doc! {
        "_id": campaign_id,
        "nomination.start": { "$gt": bson::DateTime::from_chrono(now) },
    };
    let result = new_campaigns.replace_one(filter, &campaign, None).await?;
    if result.matched_count != 1 {
        return Err(Error::Conflict(format!(
            "Campaign {campaign_id} opened for nominations during the update"
        )));
    }

    let campaign = find_campaign(&campaigns, campaign_id).await?;
    Ok(Json(CampaignDescription::new(&campaign, Utc::now())))
}

#[patch("/campaigns/<campaign_id>", data = "<patch>", format = "json")]
async fn patch_campaign(
    _token: AuthToken<Organiser>,
    campaign_id: Id,
    patch: Json<CampaignMetadataPatch>,
    campaigns: Coll<Campaign>,
) -> Result<Json<CampaignDescription>> {
    let patch = patch.0;
    let mut changes = Document::new();
    if let Some(name) = patch.name {
        if name.trim().is_empty() {
            return Err(Error::Validation("Campaign name must not be empty".to_string()));
        }
        changes.insert("name", name);
    }
    if let Some(description) = patch.description {
        changes.insert("description", description);
    }
    if let Some(public) = patch.public {
        changes.insert("public", public);
    }
    if let Some(active_override) = patch.active_override {
        changes.insert("active_override", active_override);
    }

    if !changes.is_empty() {
        let result = campaigns
            .update_one(campaign_id.as_doc(), doc! { "$set": changes }, None)
            .await?;
        if result.matched_count != 1 {
            return Err(Error::not_found("Campaign", campaign_id));
        }
    }

    let campaign = find_campaign(&campaigns, campaign_id).await?;
    Ok(Json(CampaignDescription::new(&campaign, Utc::now())))
}

#[delete("/campaigns/<campaign_id>")]
async fn delete_campaign(
    _token: AuthToken<Organiser>,
    campaign_id: Id,
    campaigns: Coll<Campaign>,
    ballots: Coll<Ballot>,
    storage: &State<Arc<dyn DocumentStorage>>,
    db_client: &State<Client>,
) -> Result<()> {
    // Check that the campaign is in a deletable state.
    let campaign = find_campaign(&campaigns, campaign_id).await?;
    let actual = current_phase(&campaign, Utc::now());
    if !matches!(actual, Phase::Upcoming | Phase::Archived) {
        return Err(Error::PhaseMismatch {
            expected: format!("{} or {}", Phase::Upcoming, Phase::Archived),
            actual,
        });
    }

    // Atomically delete the campaign and its ballots.
    {
        let mut session = db_client.start_session(None).await?;
        session.start_transaction(None).await?;

        let result = campaigns
            .delete_one_with_session(campaign_id.as_doc(), None, &mut session)
            .await?;
        if result.deleted_count != 1 {
            return Err(Error::not_found("Campaign", campaign_id));
        }
        ballots
            .delete_many_with_session(doc! { "campaign_id": campaign_id }, None, &mut session)
            .await?;

        session.commit_transaction().await?;
    }
    info!("Deleted campaign {campaign_id}");

    // Nothing references the documents any more.
    release_all(storage.inner().as_ref(), campaign.documents()).await;
    Ok(())
}

#[derive(FromForm)]
struct BannerForm {
    banner: Upload,
}

#[post("/campaigns/<campaign_id>/banner", data = "<form>")]
async fn upload_banner(
    _token: AuthToken<Organiser>,
    campaign_id: Id,
    form: Form<BannerForm>,
    campaigns: Coll<Campaign>,
    storage: &State<Arc<dyn DocumentStorage>>,
) -> Result<()> {
    let campaign = find_campaign(&campaigns, campaign_id).await?;

    let upload = form.into_inner().banner;
    let metadata = DocumentMetadata {
        kind: DocumentKind::Banner,
        filename: upload.filename,
        content_type: upload.content_type,
    };
    let banner = storage.store(upload.bytes, metadata).await?;

    let update = doc! {
        "$set": { "banner": Bson::from(&banner) },
    };
    match campaigns.update_one(campaign_id.as_doc(), update, None).await {
        Ok(result) if result.matched_count == 1 => {}
        Ok(_) => {
            release_all(storage.inner().as_ref(), [&banner]).await;
            return Err(Error::not_found("Campaign", campaign_id));
        }
        Err(e) => {
            release_all(storage.inner().as_ref(), [&banner]).await;
            return Err(e.into());
        }
    }

    // Release the banner this one replaced.
    release_all(storage.inner().as_ref(), campaign.banner.iter()).await;
    Ok(())
}

#[get("/campaigns/<campaign_id>/banner")]
async fn get_banner(
    token: Option<AuthToken<Organiser>>,
    campaign_id: Id,
    campaigns: Coll<Campaign>,
    storage: &State<Arc<dyn DocumentStorage>>,
) -> Result<(ContentType, Vec<u8>)> {
    let campaign = find_visible_campaign(&campaigns, campaign_id, token.is_some()).await?;
    let banner = campaign
        .banner
        .as_ref()
        .ok_or_else(|| Error::not_found("Banner for campaign", campaign_id))?;
    download(storage.inner().as_ref(), banner).await
}

#[post("/campaigns/<campaign_id>/rounds", data = "<spec>", format = "json")]
async fn append_round(
    _token: AuthToken<Organiser>,
    campaign_id: Id,
    spec: Json<RoundSpec>,
    campaigns: Coll<Campaign>,
    config: &State<Config>,
) -> Result<Json<CampaignDescription>> {
    let mut campaign = find_campaign(&campaigns, campaign_id).await?;
    let now = Utc::now();

    let actual = current_phase(&campaign, now);
    if actual == Phase::Archived {
        return Err(Error::PhaseMismatch {
            expected: format!("before {}", Phase::Archived),
            actual,
        });
    }
    let round = Round::from(spec.0);
    if round.voting.start <= now {
        return Err(Error::Validation("New rounds must start in the future".to_string()));
    }

    // Validate the campaign as it would be with the new round.
    let existing_rounds = campaign.rounds.len();
    campaign.rounds.push(round);
    campaign.validate(config.nomination_grace())?;
    let round = &campaign.rounds[existing_rounds];

    // Only append if no other round was appended in the meantime.
    let filter = doc! {
        "_id": campaign_id,
        "rounds": { "$size": existing_rounds as i64 },
    };
    let update = doc! {
        "$push": { "rounds": Bson::from(round) },
    };
    let result = campaigns.update_one(filter, update, None).await?;
    if result.matched_count != 1 {
        return Err(Error::Conflict(format!(
            "Rounds of campaign {campaign_id} changed during the update"
        )));
    }
    info!("Appended round {existing_rounds} to campaign {campaign_id}");

    let campaign = find_campaign(&campaigns, campaign_id).await?;
    Ok(Json(CampaignDescription::new(&campaign, Utc::now())))
}

#[get("/campaigns?<status>", rank = 1)]
async fn list_campaigns(
    _token: AuthToken<Organiser>,
    status: Option<CampaignStatus>,
    campaigns: Coll<Campaign>,
) -> Result<Json<Vec<CampaignDescription>>> {
    list(&campaigns, doc! {}, status).await
}

#[get("/campaigns?<status>", rank = 2)]
async fn list_public_campaigns(
    status: Option<CampaignStatus>,
    campaigns: Coll<Campaign>,
) -> Result<Json<Vec<CampaignDescription>>> {
    list(&campaigns, doc! { "public": true }, status).await
}

/// List campaigns matching the filter whose derived phase matches the status.
async fn list(
    campaigns: &Coll<Campaign>,
    filter: Document,
    status: Option<CampaignStatus>,
) -> Result<Json<Vec<CampaignDescription>>> {
    let status = status.unwrap_or(CampaignStatus::All);
    let now = Utc::now();
    let listed: Vec<Campaign> = campaigns.find(filter, None).await?.try_collect().await?;
    let descriptions = listed
        .iter()
        .filter(|campaign| status.matches(campaign, now))
        .map(|campaign| CampaignDescription::new(campaign, now))
        .collect();
    Ok(Json(descriptions))
}

#[get("/campaigns/<campaign_id>", rank = 1)]
async fn get_campaign(
    _token: AuthToken<Organiser>,
    campaign_id: Id,
    campaigns: Coll<Campaign>,
) -> Result<Json<CampaignDescription>> {
    let campaign = find_campaign(&campaigns, campaign_id).await?;
    Ok(Json(CampaignDescription::new(&campaign, Utc::now())))
}

#[get("/campaigns/<campaign_id>", rank = 2)]
async fn get_public_campaign(
    campaign_id: Id,
    campaigns: Coll<Campaign>,
) -> Result<Json<CampaignDescription>> {
    let campaign = find_public_campaign(&campaigns, campaign_id).await?;
    Ok(Json(CampaignDescription::new(&campaign, Utc::now())))
}

#[cfg(test)]
mod tests {
    use mongodb::Database;
    use rocket::{
        http::{ContentType, Header, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
    };

    use super::*;
    use crate::model::api::auth::examples;
    use crate::model::db::campaign::CampaignCore;

    fn organiser(client: &Client) -> Header<'static> {
        examples::organiser(client.rocket().state::<Config>().unwrap())
    }

    async fn create(client: &Client, spec: &CampaignSpec) -> CampaignDescription {
        let response = client
            .post(uri!(create_campaign))
            .header(ContentType::JSON)
            .header(organiser(client))
            .body(serde_json::to_string(spec).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    #[backend_test]
    async fn create_and_view(client: Client, campaigns: Coll<Campaign>) {
        let created = create(&client, &CampaignSpec::starting_in(1)).await;
        assert_eq!("upcoming", created.phase.name);
        assert!(created.candidates.is_empty());

        let stored = campaigns.find_one(created.id.as_doc(), None).await.unwrap().unwrap();
        assert_eq!(CampaignSpec::starting_in(1).name, stored.name);

        // Public campaigns are visible without a token.
        let response = client
            .get(uri!(get_public_campaign(*created.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test]
    async fn create_requires_organiser(client: Client, db: Database) {
        let config = client.rocket().state::<Config>().unwrap();
        let response = client
            .post(uri!(create_campaign))
            .header(ContentType::JSON)
            .header(examples::bearer(Id::new(), &[], config))
            .body(serde_json::to_string(&CampaignSpec::starting_in(1)).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
        let count = Coll::<Campaign>::from_db(&db)
            .count_documents(None, None)
            .await
            .unwrap();
        assert_eq!(0, count);
    }

    #[backend_test]
    async fn invalid_round_order_rejected(client: Client) {
        let mut spec = CampaignSpec::starting_in(1);
        spec.rounds.push(RoundSpec::days_from_now(8, 12));
        let response = client
            .post(uri!(create_campaign))
            .header(ContentType::JSON)
            .header(organiser(&client))
            .body(serde_json::to_string(&spec).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::UnprocessableEntity, response.status());
    }

    #[backend_test]
    async fn drafts_hidden_from_public(client: Client) {
        let draft = create(&client, &CampaignSpec::draft_example()).await;
        create(&client, &CampaignSpec::starting_in(-2)).await;

        let response = client
            .get(uri!(get_public_campaign(*draft.id)))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        let response = client.get("/campaigns?status=all").dispatch().await;
        let listed: Vec<CampaignDescription> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(1, listed.len());

        let response = client
            .get("/campaigns")
            .header(organiser(&client))
            .dispatch()
            .await;
        let listed: Vec<CampaignDescription> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(2, listed.len());
    }

    #[backend_test]
    async fn listing_by_phase(client: Client, new_campaigns: Coll<NewCampaign>) {
        for days in [1, -2, -8, -10] {
            new_campaigns
                .insert_one(CampaignSpec::starting_in(days).into_campaign(), None)
                .await
                .unwrap();
        }

        for (status, expected) in [
            ("all", 4),
            ("active", 2),
            ("nominating", 1),
            ("voting", 1),
            ("archived", 1),
        ] {
            let response = client
                .get(format!("/campaigns?status={status}"))
                .dispatch()
                .await;
            assert_eq!(Status::Ok, response.status());
            let listed: Vec<CampaignDescription> =
                serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
            assert_eq!(expected, listed.len(), "{status}");
        }
    }

    #[backend_test]
    async fn modify_only_while_upcoming(client: Client, new_campaigns: Coll<NewCampaign>) {
        let upcoming = create(&client, &CampaignSpec::starting_in(1)).await;
        let mut spec = CampaignSpec::starting_in(2);
        spec.name = "Renamed".to_string();
        let response = client
            .put(uri!(modify_campaign(*upcoming.id)))
            .header(ContentType::JSON)
            .header(organiser(&client))
            .body(serde_json::to_string(&spec).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let nominating: Id = new_campaigns
            .insert_one(CampaignSpec::starting_in(-2).into_campaign(), None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();
        let response = client
            .put(uri!(modify_campaign(nominating)))
            .header(ContentType::JSON)
            .header(organiser(&client))
            .body(serde_json::to_string(&spec).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Locked, response.status());
    }

    #[backend_test]
    async fn patch_metadata(client: Client, campaigns: Coll<Campaign>) {
        let created = create(&client, &CampaignSpec::starting_in(1)).await;
        let patch = CampaignMetadataPatch {
            active_override: Some(true),
            ..Default::default()
        };
        let response = client
            .patch(uri!(patch_campaign(*created.id)))
            .header(ContentType::JSON)
            .header(organiser(&client))
            .body(serde_json::to_string(&patch).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let stored = campaigns.find_one(created.id.as_doc(), None).await.unwrap().unwrap();
        assert!(stored.active_override);
        assert_eq!(created.name, stored.name);
    }

    #[backend_test]
    async fn append_rounds(client: Client, campaigns: Coll<Campaign>) {
        let created = create(&client, &CampaignSpec::starting_in(1)).await;

        // Overlaps round 0.
        let response = client
            .post(uri!(append_round(*created.id)))
            .header(ContentType::JSON)
            .header(organiser(&client))
            .body(serde_json::to_string(&RoundSpec::days_from_now(9, 12)).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::UnprocessableEntity, response.status());

        let response = client
            .post(uri!(append_round(*created.id)))
            .header(ContentType::JSON)
            .header(organiser(&client))
            .body(serde_json::to_string(&RoundSpec::days_from_now(12, 14)).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let stored = campaigns.find_one(created.id.as_doc(), None).await.unwrap().unwrap();
        assert_eq!(2, stored.rounds.len());
        assert!(stored.rounds[1].require_institutional_email);
    }

    #[backend_test]
    async fn delete_rules(client: Client, new_campaigns: Coll<NewCampaign>, ballots: Coll<Ballot>) {
        let voting: Id = new_campaigns
            .insert_one(CampaignSpec::starting_in(-8).into_campaign(), None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();
        let response = client
            .delete(uri!(delete_campaign(voting)))
            .header(organiser(&client))
            .dispatch()
            .await;
        assert_eq!(Status::Locked, response.status());

        let archived: CampaignCore = CampaignSpec::starting_in(-10).into_campaign();
        let archived: Id = new_campaigns
            .insert_one(archived, None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();
        ballots
            .insert_one(
                Ballot::new(archived, 0, Id::new(), Id::new(), Utc::now()),
                None,
            )
            .await
            .unwrap();
        let response = client
            .delete(uri!(delete_campaign(archived)))
            .header(organiser(&client))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let remaining = ballots
            .count_documents(doc! { "campaign_id": archived }, None)
            .await
            .unwrap();
        assert_eq!(0, remaining);
    }
}
