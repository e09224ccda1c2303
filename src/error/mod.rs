use jsonwebtoken::errors::Error as JwtError;
use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder};
use thiserror::Error;

use crate::logging::RequestId;
use crate::model::common::RoundIndex;
use crate::voting::Phase;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Operation requires phase {expected}, but campaign is {actual}")]
    PhaseMismatch { expected: String, actual: Phase },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Round {0} does not exist")]
    InvalidRound(RoundIndex),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Dependency unavailable: {0}")]
    Dependency(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} with ID '{id}'"))
    }

    pub fn status(&self) -> Status {
        match self {
            Self::PhaseMismatch { .. } => Status::Locked,
            Self::Conflict(_) => Status::Conflict,
            Self::Forbidden(_) => Status::Forbidden,
            Self::NotFound(_) | Self::InvalidRound(_) => Status::NotFound,
            Self::Validation(_) => Status::UnprocessableEntity,
            Self::Dependency(_) => Status::ServiceUnavailable,
            Self::Db(_) | Self::Io(_) => Status::InternalServerError,
            Self::Jwt(_) => Status::Unauthorized,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        let id = req.local_cache(RequestId::next);
        let status = self.status();
        if status.code >= 500 {
            error!("  req{id} {self}");
        } else {
            warn!("  req{id} {self}");
        }
        Err(status)
    }
}
