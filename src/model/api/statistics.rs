use serde::{Deserialize, Serialize};

use crate::model::{
    api::id::ApiId,
    pagination::{Pagination, PaginationResult},
};
use crate::voting::statistics::{Breakdown, CandidateCount, GroupCount, Turnout};

#[derive(Debug, Serialize, Deserialize)]
pub struct CandidateVotes {
    pub candidate: ApiId,
    pub votes: u64,
}

impl From<CandidateCount> for CandidateVotes {
    fn from(count: CandidateCount) -> Self {
        Self {
            candidate: count.candidate.into(),
            votes: count.votes,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TurnoutDescription {
    pub voted: u64,
    pub eligible_not_voted: u64,
    /// False if the voter roll could not be fully enumerated in time.
    pub complete: bool,
}

impl From<Turnout> for TurnoutDescription {
    fn from(turnout: Turnout) -> Self {
        Self {
            voted: turnout.voted,
            eligible_not_voted: turnout.eligible_not_voted,
            complete: turnout.complete,
        }
    }
}

/// Results of a closed round.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoundStatistics {
    /// Votes per candidate, in the round's candidate order.
    pub tally: Vec<CandidateVotes>,
    pub turnout: TurnoutDescription,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupVotes {
    pub group: String,
    pub ballots: u64,
    pub candidates: Vec<CandidateVotes>,
}

impl From<GroupCount> for GroupVotes {
    fn from(group: GroupCount) -> Self {
        Self {
            group: group.group,
            ballots: group.ballots,
            candidates: group.candidates.into_iter().map(Into::into).collect(),
        }
    }
}

/// One page of the groups in a round's attribute breakdown.
///
/// Counts always cover the whole round. Only the list of groups is paged.
#[derive(Debug, Serialize)]
pub struct BreakdownPage {
    pub groups: Vec<GroupVotes>,
    /// Ballots in the round whose voter could not be looked up.
    pub excluded: u64,
    /// Ballots in the round.
    pub ballots: u64,
    /// False if lookups were cut short, in which case unreached ballots are excluded.
    pub complete: bool,
    pub pagination: PaginationResult,
}

impl BreakdownPage {
    pub fn new(breakdown: Breakdown, pagination: Pagination) -> Self {
        let result = pagination.result(breakdown.groups.len());
        let groups = breakdown
            .groups
            .into_iter()
            .skip(pagination.skip() as usize)
            .take(pagination.limit() as usize)
            .map(Into::into)
            .collect();
        Self {
            groups,
            excluded: breakdown.excluded,
            ballots: breakdown.total,
            complete: breakdown.complete,
            pagination: result,
        }
    }
}
