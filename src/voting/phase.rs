//! The time-gated phase model of a campaign.
//!
//! Phases are never stored. They are derived from the campaign's dates and
//! the current instant whenever an operation needs them.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{common::RoundIndex, db::campaign::CampaignCore};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Nominations have not opened yet.
    Upcoming,
    /// Within the nomination window.
    Nominating,
    /// After nominations close, before the first round opens.
    Gap,
    /// Within a round's voting window.
    Voting { round: RoundIndex },
    /// Between the end of one round and the start of the next.
    BetweenRounds { after: RoundIndex },
    /// The last round has closed.
    Archived,
}

impl Phase {
    /// Position of this phase in the campaign's timeline.
    pub fn ordinal(&self) -> u64 {
        match self {
            Self::Upcoming => 0,
            Self::Nominating => 1,
            Self::Gap => 2,
            Self::Voting { round } => 3 + 2 * u64::from(*round),
            Self::BetweenRounds { after } => 4 + 2 * u64::from(*after),
            Self::Archived => u64::MAX,
        }
    }

    /// Has the given round closed?
    pub fn is_after_round(&self, round: RoundIndex) -> bool {
        *self > Self::Voting { round }
    }
}

impl PartialOrd for Phase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Phase {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordinal().cmp(&other.ordinal())
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upcoming => write!(f, "Upcoming"),
            Self::Nominating => write!(f, "Nominating"),
            Self::Gap => write!(f, "Gap"),
            Self::Voting { round } => write!(f, "VotingRound[{round}]"),
            Self::BetweenRounds { after } => write!(f, "BetweenRounds[{after}]"),
            Self::Archived => write!(f, "Archived"),
        }
    }
}

/// Derive the phase of a campaign at the given instant.
pub fn current_phase(campaign: &CampaignCore, now: DateTime<Utc>) -> Phase {
    if now < campaign.nomination.start {
        return Phase::Upcoming;
    }
    if campaign.nomination.contains(now) {
        return Phase::Nominating;
    }

    // A campaign without rounds waits in the gap until one is appended.
    let Some(first) = campaign.rounds.first() else {
        return Phase::Gap;
    };
    if now < first.voting.start {
        return Phase::Gap;
    }

    for (index, round) in campaign.rounds.iter().enumerate() {
        let index = index as RoundIndex;
        if round.voting.contains(now) {
            return Phase::Voting { round: index };
        }
        if let Some(next) = campaign.rounds.get(index as usize + 1) {
            if round.voting.end <= now && now < next.voting.start {
                return Phase::BetweenRounds { after: index };
            }
        }
    }

    Phase::Archived
}

/// Fail with `PhaseMismatch` unless the campaign is in exactly the expected phase.
pub fn assert_phase(campaign: &CampaignCore, now: DateTime<Utc>, expected: Phase) -> Result<()> {
    let actual = current_phase(campaign, now);
    if actual == expected {
        Ok(())
    } else {
        Err(Error::PhaseMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// `now`, moved forward by the time elapsed since `started`.
///
/// Operations take `now` once on entry. Writes that follow slow collaborator
/// work re-derive the phase at this later instant.
pub fn elapsed_from(now: DateTime<Utc>, started: Instant) -> DateTime<Utc> {
    now + chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::db::campaign::examples::jan;

    #[test]
    fn scenario_phases() {
        let campaign = CampaignCore::two_round_example();
        let cases = [
            (jan(1) - Duration::seconds(1), Phase::Upcoming),
            (jan(1), Phase::Nominating),
            (jan(5), Phase::Nominating),
            (jan(10), Phase::Gap),
            (jan(14), Phase::Gap),
            (jan(15), Phase::Voting { round: 0 }),
            (jan(16), Phase::Voting { round: 0 }),
            (jan(20), Phase::BetweenRounds { after: 0 }),
            (jan(25), Phase::Voting { round: 1 }),
            (jan(28), Phase::Archived),
            (jan(31), Phase::Archived),
        ];
        for (now, expected) in cases {
            assert_eq!(expected, current_phase(&campaign, now), "at {now}");
        }
    }

    #[test]
    fn deterministic() {
        let campaign = CampaignCore::example();
        for day in 1..=25 {
            let first = current_phase(&campaign, jan(day));
            let second = current_phase(&campaign, jan(day));
            assert_eq!(first, second);
        }
    }

    #[test]
    fn monotonic_in_time() {
        let campaign = CampaignCore::two_round_example();
        let mut now = jan(1) - Duration::days(1);
        let mut previous = current_phase(&campaign, now);
        while now < jan(31) {
            now += Duration::hours(1);
            let phase = current_phase(&campaign, now);
            assert!(phase >= previous, "{phase} came after {previous}");
            previous = phase;
        }
        assert_eq!(Phase::Archived, previous);
    }

    #[test]
    fn no_rounds_stays_in_gap() {
        let mut campaign = CampaignCore::example();
        campaign.rounds.clear();
        assert_eq!(Phase::Gap, current_phase(&campaign, jan(31)));
    }

    #[test]
    fn assert_phase_reports_actual() {
        let campaign = CampaignCore::example();
        assert!(assert_phase(&campaign, jan(5), Phase::Nominating).is_ok());
        match assert_phase(&campaign, jan(14), Phase::Voting { round: 0 }) {
            Err(Error::PhaseMismatch { actual, .. }) => assert_eq!(Phase::Gap, actual),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn round_closure() {
        assert!(!Phase::Voting { round: 0 }.is_after_round(0));
        assert!(Phase::BetweenRounds { after: 0 }.is_after_round(0));
        assert!(!Phase::BetweenRounds { after: 0 }.is_after_round(1));
        assert!(Phase::Archived.is_after_round(1));
    }

    #[test]
    fn elapsed_time_moves_forward() {
        let started = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let later = elapsed_from(jan(5), started);
        assert!(later >= jan(5) + Duration::milliseconds(5));
        assert!(later < jan(6));
    }
}
