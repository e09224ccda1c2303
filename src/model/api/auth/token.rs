use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation};
use rocket::{
    http::Status,
    outcome::{try_outcome, IntoOutcome},
    request::{FromRequest, Outcome},
    Request, State,
};
use serde::{Deserialize, Serialize};

use super::user::User;
use crate::config::Config;
use crate::error::Error;
use crate::model::{api::id::ApiId, mongodb::Id};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// A verified authentication token for a member acting as a specific kind of user.
/// Tokens are issued elsewhere; this service only verifies them.
#[derive(Serialize, Deserialize)]
pub struct AuthToken<U> {
    #[serde(rename = "sub")]
    id: ApiId,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(skip)]
    phantom: PhantomData<U>,
}

impl<U> AuthToken<U> {
    /// The authenticated member.
    pub fn id(&self) -> Id {
        self.id.into()
    }

    /// Does this token carry the given role?
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl<U> AuthToken<U>
where
    U: User,
{
    /// Does this token permit acting as `U`?
    pub fn permits(&self) -> bool {
        U::ROLE.map_or(true, |role| self.has_role(role))
    }

    /// Verify and decode a raw JWT.
    pub fn decode(token: &str, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            token,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|claims: TokenData<Claims<U>>| claims.claims.token)?;
        Ok(token)
    }
}

/// Token claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims<U> {
    #[serde(flatten, bound = "")]
    token: AuthToken<U>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

/// Get the raw token from the `Authorization` header, falling back to the cookie.
fn raw_token<'r>(req: &'r Request<'_>) -> Option<&'r str> {
    req.headers()
        .get_one("Authorization")
        .and_then(|header| header.strip_prefix("Bearer "))
        .or_else(|| req.cookies().get(AUTH_TOKEN_COOKIE).map(|c| c.value()))
}

#[rocket::async_trait]
impl<'r, U> FromRequest<'r> for AuthToken<U>
where
    U: User + Send,
{
    type Error = Error;

    /// Get an [`AuthToken`] from the request and verify that it permits this user type.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match req.guard::<&State<Config>>().await {
            Outcome::Success(config) => config,
            _ => {
                return Outcome::Failure((
                    Status::InternalServerError,
                    Error::Dependency("Config is not managed".to_string()),
                ))
            }
        };

        // Forward to any routes that do not require an authentication token.
        let raw = try_outcome!(raw_token(req).or_forward(()));

        // Decode the token.
        let token = match Self::decode(raw, config) {
            Ok(token) => token,
            Err(e) => {
                debug!("Rejected authentication token: {e}");
                return Outcome::Forward(());
            }
        };

        // Check it carries the correct role.
        if !token.permits() {
            return Outcome::Forward(());
        }
        Outcome::Success(token)
    }
}
