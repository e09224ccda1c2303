//! The campaign engine: phases, eligibility, the candidate pool, the vote
//! ledger, and statistics.

use rocket::{Request, State};

pub mod eligibility;
pub mod ledger;
pub mod phase;
pub mod pool;
pub mod statistics;

pub use eligibility::{EligibilityRules, Ineligibility};
pub use ledger::{BallotBox, VoteLedger};
pub use phase::{assert_phase, current_phase, elapsed_from, Phase};
pub use pool::{CandidatePool, PoolStore};
pub use statistics::StatisticsAggregator;

/// Clone a collaborator out of managed state.
///
/// Panics iff the collaborator is not managed by [`rocket::Rocket`].
async fn managed<T>(req: &Request<'_>) -> T
where
    T: Clone + Send + Sync + 'static,
{
    req.guard::<&State<T>>().await.unwrap().inner().clone()
}
