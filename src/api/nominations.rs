use std::sync::Arc;

use chrono::Utc;
use rocket::{form::Form, http::ContentType, serde::json::Json, Route, State};

use super::common::{download, find_campaign, find_public_campaign, find_visible_campaign};
use crate::collaborators::DocumentStorage;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::{AuthToken, Member, Organiser},
        campaign::RoundDescription,
        nomination::{
            CandidateDescription, CandidateSelection, NominationForm, NominationPatchForm,
        },
    },
    common::RoundIndex,
    db::{campaign::Campaign, document::DocumentKind},
    mongodb::{Coll, Id},
};
use crate::voting::CandidatePool;

pub fn routes() -> Vec<Route> {
    routes![
        nominate,
        update_own_nomination,
        get_own_nomination,
        get_candidate,
        get_candidate_document,
        select_candidates,
    ]
}

#[post("/campaigns/<campaign_id>/candidates", data = "<form>")]
async fn nominate(
    token: AuthToken<Member>,
    campaign_id: Id,
    form: Form<NominationForm>,
    campaigns: Coll<Campaign>,
    pool: CandidatePool,
) -> Result<Json<CandidateDescription>> {
    let campaign = find_public_campaign(&campaigns, campaign_id).await?;
    let (candidate_id, submission) = form.into_inner().into_submission();
    let candidate = pool
        .nominate(&campaign, token.id(), candidate_id, submission, Utc::now())
        .await?;
    Ok(Json(CandidateDescription::from(&candidate)))
}

#[patch("/campaigns/<campaign_id>/candidates/self", data = "<form>")]
async fn update_own_nomination(
    token: AuthToken<Member>,
    campaign_id: Id,
    form: Form<NominationPatchForm>,
    campaigns: Coll<Campaign>,
    pool: CandidatePool,
) -> Result<Json<CandidateDescription>> {
    let campaign = find_public_campaign(&campaigns, campaign_id).await?;
    let candidate = pool
        .update_nomination(
            &campaign,
            token.id(),
            token.id(),
            form.into_inner().into(),
            Utc::now(),
        )
        .await?;
    Ok(Json(CandidateDescription::from(&candidate)))
}

#[get("/campaigns/<campaign_id>/candidates/self", rank = 1)]
async fn get_own_nomination(
    token: AuthToken<Member>,
    campaign_id: Id,
    campaigns: Coll<Campaign>,
) -> Result<Json<CandidateDescription>> {
    let campaign = find_public_campaign(&campaigns, campaign_id).await?;
    let candidate = campaign
        .candidate(token.id())
        .ok_or_else(|| Error::not_found("Nomination for member", token.id()))?;
    Ok(Json(candidate.into()))
}

#[get("/campaigns/<campaign_id>/candidates/<member_id>", rank = 2)]
async fn get_candidate(
    token: Option<AuthToken<Organiser>>,
    campaign_id: Id,
    member_id: Id,
    campaigns: Coll<Campaign>,
) -> Result<Json<CandidateDescription>> {
    let campaign = find_visible_campaign(&campaigns, campaign_id, token.is_some()).await?;
    let candidate = campaign
        .candidate(member_id)
        .ok_or_else(|| Error::not_found("Nomination for member", member_id))?;
    Ok(Json(candidate.into()))
}

#[get("/campaigns/<campaign_id>/candidates/<member_id>/documents/<kind>")]
async fn get_candidate_document(
    token: Option<AuthToken<Organiser>>,
    campaign_id: Id,
    member_id: Id,
    kind: DocumentKind,
    campaigns: Coll<Campaign>,
    storage: &State<Arc<dyn DocumentStorage>>,
) -> Result<(ContentType, Vec<u8>)> {
    let campaign = find_visible_campaign(&campaigns, campaign_id, token.is_some()).await?;
    let document = campaign
        .candidate(member_id)
        .ok_or_else(|| Error::not_found("Nomination for member", member_id))?
        .documents
        .get(kind)
        .ok_or_else(|| Error::NotFound(format!("No {} for member '{member_id}'", kind.as_str())))?;
    download(storage.inner().as_ref(), document).await
}

#[post(
    "/campaigns/<campaign_id>/rounds/<round>/candidates",
    data = "<selection>",
    format = "json"
)]
async fn select_candidates(
    _token: AuthToken<Organiser>,
    campaign_id: Id,
    round: RoundIndex,
    selection: Json<CandidateSelection>,
    campaigns: Coll<Campaign>,
    pool: CandidatePool,
) -> Result<Json<RoundDescription>> {
    let campaign = find_campaign(&campaigns, campaign_id).await?;
    let round = pool
        .select_for_round(&campaign, round, selection.0.into_ids(), Utc::now())
        .await?;
    Ok(Json(RoundDescription::from(&round)))
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;
    use rocket::{
        http::{ContentType, Header, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
    };

    use super::*;
    use crate::config::Config;
    use crate::model::{
        api::{auth::examples, campaign::CampaignSpec, id::ApiId},
        db::campaign::{Candidate, NewCampaign},
    };

    fn member(client: &Client, id: Id) -> Header<'static> {
        examples::bearer(id, &[], client.rocket().state::<Config>().unwrap())
    }

    async fn insert(new_campaigns: &Coll<NewCampaign>, spec: CampaignSpec) -> Id {
        new_campaigns
            .insert_one(spec.into_campaign(), None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into()
    }

    fn selection(members: &[Id]) -> CandidateSelection {
        CandidateSelection {
            candidates: members.iter().copied().map(ApiId::from).collect(),
        }
    }

    fn nomination_body(candidate_id: Id) -> String {
        format!("candidate_id={candidate_id}&mission_statement=Listen&vision_statement=Deliver")
    }

    #[backend_test]
    async fn nominate_once(
        client: Client,
        new_campaigns: Coll<NewCampaign>,
        campaigns: Coll<Campaign>,
    ) {
        let campaign_id = insert(&new_campaigns, CampaignSpec::starting_in(-2)).await;
        let voter = Id::new();

        let response = client
            .post(uri!(nominate(campaign_id)))
            .header(ContentType::Form)
            .header(member(&client, voter))
            .body(nomination_body(voter))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let description: CandidateDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(voter, *description.member_id);
        assert!(description.documents.is_empty());

        let response = client
            .post(uri!(nominate(campaign_id)))
            .header(ContentType::Form)
            .header(member(&client, voter))
            .body(nomination_body(voter))
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        let stored = campaigns.find_one(campaign_id.as_doc(), None).await.unwrap().unwrap();
        assert_eq!(1, stored.candidates.len());
    }

    #[backend_test]
    async fn nominate_only_self(client: Client, new_campaigns: Coll<NewCampaign>) {
        let campaign_id = insert(&new_campaigns, CampaignSpec::starting_in(-2)).await;
        let response = client
            .post(uri!(nominate(campaign_id)))
            .header(ContentType::Form)
            .header(member(&client, Id::new()))
            .body(nomination_body(Id::new()))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
    }

    #[backend_test]
    async fn nominate_outside_window(client: Client, new_campaigns: Coll<NewCampaign>) {
        let campaign_id = insert(&new_campaigns, CampaignSpec::starting_in(-6)).await;
        let voter = Id::new();
        let response = client
            .post(uri!(nominate(campaign_id)))
            .header(ContentType::Form)
            .header(member(&client, voter))
            .body(nomination_body(voter))
            .dispatch()
            .await;
        assert_eq!(Status::Locked, response.status());
    }

    #[backend_test]
    async fn update_and_view_own(client: Client, new_campaigns: Coll<NewCampaign>) {
        let campaign_id = insert(&new_campaigns, CampaignSpec::starting_in(-2)).await;
        let voter = Id::new();
        client
            .post(uri!(nominate(campaign_id)))
            .header(ContentType::Form)
            .header(member(&client, voter))
            .body(nomination_body(voter))
            .dispatch()
            .await;

        let response = client
            .patch(uri!(update_own_nomination(campaign_id)))
            .header(ContentType::Form)
            .header(member(&client, voter))
            .body("mission_statement=Represent&video_link=https://example.com/v")
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .get(uri!(get_own_nomination(campaign_id)))
            .header(member(&client, voter))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let description: CandidateDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!("Represent", description.mission_statement);
        assert_eq!("Deliver", description.vision_statement);
        assert_eq!(Some("https://example.com/v".to_string()), description.video_link);

        let response = client
            .get(uri!(get_candidate(campaign_id, voter)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test]
    async fn select_after_nominations(
        client: Client,
        new_campaigns: Coll<NewCampaign>,
        campaigns: Coll<Campaign>,
    ) {
        let campaign_id = insert(&new_campaigns, CampaignSpec::starting_in(-6)).await;
        let members = [Id::new(), Id::new()];
        for member_id in members {
            campaigns
                .update_one(
                    campaign_id.as_doc(),
                    doc! { "$push": { "candidates": mongodb::bson::Bson::from(&Candidate::example(member_id)) } },
                    None,
                )
                .await
                .unwrap();
        }
        let config = client.rocket().state::<Config>().unwrap();

        // Not in the pool.
        let response = client
            .post(uri!(select_candidates(campaign_id, 0)))
            .header(ContentType::JSON)
            .header(examples::organiser(config))
            .body(serde_json::to_string(&selection(&[Id::new()])).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        let response = client
            .post(uri!(select_candidates(campaign_id, 0)))
            .header(ContentType::JSON)
            .header(examples::organiser(config))
            .body(serde_json::to_string(&selection(&members)).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let stored = campaigns.find_one(campaign_id.as_doc(), None).await.unwrap().unwrap();
        assert_eq!(members.to_vec(), stored.rounds[0].candidates);

        let response = client
            .post(uri!(select_candidates(campaign_id, 1)))
            .header(ContentType::JSON)
            .header(examples::organiser(config))
            .body(serde_json::to_string(&selection(&members)).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }
}
