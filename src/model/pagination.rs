use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};
use serde::Serialize;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Paging parameters from the `page_num` and `page_size` query values.
/// Pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page_num: usize,
    page_size: usize,
}

impl Pagination {
    pub fn new(page_num: usize, page_size: usize) -> Option<Self> {
        (page_num >= 1 && (1..=MAX_PAGE_SIZE).contains(&page_size)).then_some(Self {
            page_num,
            page_size,
        })
    }

    pub fn page_num(&self) -> usize {
        self.page_num
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn skip(&self) -> u64 {
        ((self.page_num - 1) * self.page_size) as u64
    }

    pub fn limit(&self) -> u64 {
        self.page_size as u64
    }

    pub fn result(self, total: usize) -> PaginationResult {
        PaginationResult {
            page_num: self.page_num,
            page_size: self.page_size,
            total,
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Pagination {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let page_num = req.query_value::<usize>("page_num").unwrap_or(Ok(1));
        let page_size = req
            .query_value::<usize>("page_size")
            .unwrap_or(Ok(DEFAULT_PAGE_SIZE));
        match (page_num, page_size) {
            (Ok(page_num), Ok(page_size)) => match Self::new(page_num, page_size) {
                Some(pagination) => request::Outcome::Success(pagination),
                None => request::Outcome::Failure((Status::BadRequest, ())),
            },
            _ => request::Outcome::Failure((Status::BadRequest, ())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginationResult {
    page_num: usize,
    page_size: usize,
    total: usize,
}
