use chrono::Utc;
use rocket::{serde::json::Json, Route};

use super::common::find_campaign;
use crate::error::Result;
use crate::model::{
    api::{
        auth::{AuthToken, Organiser},
        statistics::{BreakdownPage, RoundStatistics},
    },
    common::{voter::VoterAttribute, RoundIndex},
    db::campaign::Campaign,
    mongodb::{Coll, Id},
    pagination::Pagination,
};
use crate::voting::StatisticsAggregator;

pub fn routes() -> Vec<Route> {
    routes![round_statistics, round_breakdown]
}

#[get("/campaigns/<campaign_id>/rounds/<round>/statistics")]
async fn round_statistics(
    _token: AuthToken<Organiser>,
    campaign_id: Id,
    round: RoundIndex,
    campaigns: Coll<Campaign>,
    statistics: StatisticsAggregator,
) -> Result<Json<RoundStatistics>> {
    let campaign = find_campaign(&campaigns, campaign_id).await?;
    let now = Utc::now();
    let tally = statistics.overall_tally(&campaign, round, now).await?;
    let turnout = statistics.turnout(&campaign, round, now).await?;
    Ok(Json(RoundStatistics {
        tally: tally.into_iter().map(Into::into).collect(),
        turnout: turnout.into(),
    }))
}

#[get("/campaigns/<campaign_id>/rounds/<round>/statistics/breakdown?<attribute>")]
async fn round_breakdown(
    _token: AuthToken<Organiser>,
    campaign_id: Id,
    round: RoundIndex,
    attribute: VoterAttribute,
    pagination: Pagination,
    campaigns: Coll<Campaign>,
    statistics: StatisticsAggregator,
) -> Result<Json<BreakdownPage>> {
    let campaign = find_campaign(&campaigns, campaign_id).await?;
    let breakdown = statistics
        .breakdown(&campaign, round, attribute, Utc::now())
        .await?;
    Ok(Json(BreakdownPage::new(breakdown, pagination)))
}
