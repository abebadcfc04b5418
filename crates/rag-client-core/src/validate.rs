//! Client-side input validation.
//!
//! Inputs are checked here before any request is built, so a rejected
//! search or feedback never reaches the network.

use thiserror::Error;

use crate::models::{FeedbackRequest, SearchRequest};

/// Minimum search query length, in characters.
pub const MIN_QUERY_CHARS: usize = 5;
/// Maximum search query length, in characters.
pub const MAX_QUERY_CHARS: usize = 200;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// Maximum feedback comment length, in characters, after trimming.
pub const MAX_COMMENT_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("search query must be at least {min} characters (got {actual})")]
    QueryTooShort { min: usize, actual: usize },

    #[error("search query must be at most {max} characters (got {actual})")]
    QueryTooLong { max: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedbackValidationError {
    #[error("a rating is required")]
    MissingRating,

    #[error("rating must be between 1 and 5 (got {0})")]
    RatingOutOfRange(u8),

    #[error("query_id must not be empty")]
    MissingQueryId,

    #[error("comment must be at most {max} characters (got {actual})")]
    CommentTooLong { max: usize, actual: usize },
}

/// Check a search query's length in characters (not bytes).
pub fn validate_query(query: &str) -> Result<(), ValidationError> {
    let actual = query.chars().count();
    if actual < MIN_QUERY_CHARS {
        return Err(ValidationError::QueryTooShort {
            min: MIN_QUERY_CHARS,
            actual,
        });
    }
    if actual > MAX_QUERY_CHARS {
        return Err(ValidationError::QueryTooLong {
            max: MAX_QUERY_CHARS,
            actual,
        });
    }
    Ok(())
}

impl SearchRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_query(&self.query)
    }
}

/// Feedback as collected from the user, before validation.
///
/// `rating` is `None` until the user picks a star.
#[derive(Debug, Clone, Default)]
pub struct FeedbackDraft {
    pub query_id: String,
    pub rating: Option<u8>,
    pub comment: Option<String>,
}

impl FeedbackDraft {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            ..Default::default()
        }
    }

    pub fn rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Validate and produce the wire request.
    ///
    /// The comment is trimmed; a blank one is sent as absent.
    pub fn into_request(self) -> Result<FeedbackRequest, FeedbackValidationError> {
        if self.query_id.trim().is_empty() {
            return Err(FeedbackValidationError::MissingQueryId);
        }
        let rating = match self.rating {
            None | Some(0) => return Err(FeedbackValidationError::MissingRating),
            Some(r) if r > MAX_RATING => return Err(FeedbackValidationError::RatingOutOfRange(r)),
            Some(r) => r,
        };
        let comment = self
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if let Some(ref c) = comment {
            let actual = c.chars().count();
            if actual > MAX_COMMENT_CHARS {
                return Err(FeedbackValidationError::CommentTooLong {
                    max: MAX_COMMENT_CHARS,
                    actual,
                });
            }
        }

        Ok(FeedbackRequest {
            query_id: self.query_id,
            rating,
            comment,
        })
    }
}
