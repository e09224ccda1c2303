use chrono::Utc;
use rocket::{serde::json::Json, Route};

use super::common::find_public_campaign;
use crate::error::Result;
use crate::model::{
    api::auth::{AuthToken, Member},
    common::RoundIndex,
    db::campaign::Campaign,
    mongodb::{Coll, Id},
};
use crate::voting::VoteLedger;

pub fn routes() -> Vec<Route> {
    routes![eligibility, cast_vote, has_voted]
}

#[get("/campaigns/<campaign_id>/rounds/<round>/eligibility")]
async fn eligibility(
    token: AuthToken<Member>,
    campaign_id: Id,
    round: RoundIndex,
    campaigns: Coll<Campaign>,
    ledger: VoteLedger,
) -> Result<Json<bool>> {
    let campaign = find_public_campaign(&campaigns, campaign_id).await?;
    let eligible = ledger.eligibility(&campaign, round, token.id()).await?;
    Ok(Json(eligible))
}

#[post("/campaigns/<campaign_id>/rounds/<round>/votes/<candidate_id>")]
async fn cast_vote(
    token: AuthToken<Member>,
    campaign_id: Id,
    round: RoundIndex,
    candidate_id: Id,
    campaigns: Coll<Campaign>,
    ledger: VoteLedger,
) -> Result<()> {
    let campaign = find_public_campaign(&campaigns, campaign_id).await?;
    ledger
        .cast_vote(&campaign, round, token.id(), candidate_id, Utc::now())
        .await
}

#[get("/campaigns/<campaign_id>/rounds/<round>/has-voted")]
async fn has_voted(
    token: AuthToken<Member>,
    campaign_id: Id,
    round: RoundIndex,
    campaigns: Coll<Campaign>,
    ledger: VoteLedger,
) -> Result<Json<bool>> {
    let campaign = find_public_campaign(&campaigns, campaign_id).await?;
    let voted = ledger.has_voted(&campaign, round, token.id()).await?;
    Ok(Json(voted))
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;
    use rocket::{
        http::{Header, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
    };

    use super::*;
    use crate::collaborators::directory::ProfileRecord;
    use crate::config::Config;
    use crate::model::{
        api::{auth::examples, campaign::CampaignSpec},
        db::{
            ballot::Ballot,
            campaign::{Candidate, NewCampaign},
        },
    };

    fn member(client: &Client, id: Id) -> Header<'static> {
        examples::bearer(id, &[], client.rocket().state::<Config>().unwrap())
    }

    /// Insert a campaign `days` in with two candidates selected for round 0.
    async fn campaign_with_candidates(new_campaigns: &Coll<NewCampaign>, days: i64) -> (Id, [Id; 2]) {
        let candidates = [Id::new(), Id::new()];
        let mut campaign = CampaignSpec::starting_in(days).into_campaign();
        campaign.candidates = candidates.iter().copied().map(Candidate::example).collect();
        campaign.rounds[0].candidates = candidates.to_vec();
        let id = new_campaigns
            .insert_one(campaign, None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();
        (id, candidates)
    }

    async fn get_bool(client: &Client, uri: rocket::http::uri::Origin<'_>, voter: Id) -> bool {
        let response = client
            .get(uri)
            .header(member(client, voter))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    #[backend_test]
    async fn vote_once(
        client: Client,
        new_campaigns: Coll<NewCampaign>,
        profiles: Coll<ProfileRecord>,
        ballots: Coll<Ballot>,
    ) {
        let (campaign_id, [first, second]) = campaign_with_candidates(&new_campaigns, -8).await;
        let profile = ProfileRecord::example();
        let voter = profile.id;
        profiles.insert_one(profile, None).await.unwrap();

        assert!(get_bool(&client, uri!(eligibility(campaign_id, 0)), voter).await);
        assert!(!get_bool(&client, uri!(has_voted(campaign_id, 0)), voter).await);

        let response = client
            .post(uri!(cast_vote(campaign_id, 0, first)))
            .header(member(&client, voter))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert!(get_bool(&client, uri!(has_voted(campaign_id, 0)), voter).await);

        let response = client
            .post(uri!(cast_vote(campaign_id, 0, second)))
            .header(member(&client, voter))
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        let stored = ballots
            .count_documents(doc! { "campaign_id": campaign_id, "round": 0 }, None)
            .await
            .unwrap();
        assert_eq!(1, stored);
    }

    #[backend_test]
    async fn vote_outside_round(
        client: Client,
        new_campaigns: Coll<NewCampaign>,
        profiles: Coll<ProfileRecord>,
    ) {
        let (campaign_id, [first, _]) = campaign_with_candidates(&new_campaigns, -6).await;
        let profile = ProfileRecord::example();
        let voter = profile.id;
        profiles.insert_one(profile, None).await.unwrap();

        let response = client
            .post(uri!(cast_vote(campaign_id, 0, first)))
            .header(member(&client, voter))
            .dispatch()
            .await;
        assert_eq!(Status::Locked, response.status());

        let response = client
            .post(uri!(cast_vote(campaign_id, 1, first)))
            .header(member(&client, voter))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn unverified_member_cannot_vote(
        client: Client,
        new_campaigns: Coll<NewCampaign>,
        profiles: Coll<ProfileRecord>,
    ) {
        let (campaign_id, [first, _]) = campaign_with_candidates(&new_campaigns, -8).await;
        let profile = ProfileRecord {
            roles: vec![],
            ..ProfileRecord::example()
        };
        let voter = profile.id;
        profiles.insert_one(profile, None).await.unwrap();

        assert!(!get_bool(&client, uri!(eligibility(campaign_id, 0)), voter).await);
        let response = client
            .post(uri!(cast_vote(campaign_id, 0, first)))
            .header(member(&client, voter))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());

        // Members without a profile are simply ineligible.
        assert!(!get_bool(&client, uri!(eligibility(campaign_id, 0)), Id::new()).await);
    }

    #[backend_test]
    async fn vote_requires_token(client: Client, new_campaigns: Coll<NewCampaign>) {
        let (campaign_id, [first, _]) = campaign_with_candidates(&new_campaigns, -8).await;
        let response = client
            .post(uri!(cast_vote(campaign_id, 0, first)))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }
}
