/// A kind of authenticated caller.
pub trait User {
    /// The role a token must carry to act as this kind of user, if any.
    const ROLE: Option<&'static str>;
}

/// Any authenticated member.
pub struct Member;

impl User for Member {
    const ROLE: Option<&'static str> = None;
}

/// A member allowed to administer campaigns.
pub struct Organiser;

impl User for Organiser {
    const ROLE: Option<&'static str> = Some(ORGANISER_ROLE);
}

pub const ORGANISER_ROLE: &str = "voteOrganiser";
