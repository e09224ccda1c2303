use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{common::RoundIndex, mongodb::Id};

/// One ledger entry: a single voter's choice in a single round.
///
/// Ballots are immutable once written; `(campaign_id, round, voter_id)` is
/// unique at the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub campaign_id: Id,
    pub round: RoundIndex,
    pub voter_id: Id,
    pub candidate_id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

impl Ballot {
    pub fn new(
        campaign_id: Id,
        round: RoundIndex,
        voter_id: Id,
        candidate_id: Id,
        cast_at: DateTime<Utc>,
    ) -> Self {
        Self {
            campaign_id,
            round,
            voter_id,
            candidate_id,
            cast_at,
        }
    }
}
