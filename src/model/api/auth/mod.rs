mod token;
mod user;

#[cfg(test)]
pub use token::examples;
pub use token::{AuthToken, AUTH_TOKEN_COOKIE};
pub use user::{Member, Organiser, User, ORGANISER_ROLE};
