pub mod voter;

/// Rounds are identified by their ordinal position within a campaign.
pub type RoundIndex = u32;
