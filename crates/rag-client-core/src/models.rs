//! Wire models for the RAG search backend.
//!
//! Every request and response body exchanged with the backend is defined
//! here. Field names match the JSON contract exactly, so the types derive
//! `Serialize`/`Deserialize` without renames.
//!
//! | Endpoint | Request | Response |
//! |----------|---------|----------|
//! | `POST /api/v1/auth/login` | [`LoginRequest`] | [`LoginResponse`] |
//! | `POST /api/v1/auth/logout` | — | [`LogoutResponse`] |
//! | `POST /api/v1/search` | [`SearchRequest`] | [`SearchResponse`] |
//! | `GET /api/v1/users/me/history` | `page`, `page_size` | [`HistoryResponse`] |
//! | `POST /api/v1/feedback` | [`FeedbackRequest`] | [`FeedbackResponse`] |
//! | `GET /health` | — | [`HealthResponse`] |

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════
// Auth
// ═══════════════════════════════════════════════════════════════════════

/// Profile of the signed-in user.
///
/// Replaced wholesale on every login; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub department: String,
    /// Document access tier (1–3). Enforced server-side; display only here.
    pub access_level: u8,
}

impl UserProfile {
    /// Human-readable access tier, e.g. `"Level 2"`.
    pub fn access_label(&self) -> String {
        format!("Level {}", self.access_level)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    #[serde(default)]
    pub message: String,
}

// ═══════════════════════════════════════════════════════════════════════
// Search
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A cited passage backing the generated answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSource {
    pub document_id: String,
    pub document_title: String,
    pub document_source: String,
    pub chunk_content: String,
    pub page_number: Option<u32>,
    /// Similarity in `[0, 1]`.
    pub relevance_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub embedding_time_ms: f64,
    pub search_time_ms: f64,
    pub llm_time_ms: f64,
    pub total_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub is_fallback: bool,
    pub fallback_reason: Option<String>,
    pub model_used: String,
    pub search_result_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query_id: String,
    pub query: String,
    pub answer: String,
    pub sources: Vec<DocumentSource>,
    pub performance: PerformanceMetrics,
    pub metadata: ResponseMetadata,
}

// ═══════════════════════════════════════════════════════════════════════
// History
// ═══════════════════════════════════════════════════════════════════════

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub query_id: String,
    pub query: String,
    pub answer: String,
    /// ISO 8601 timestamp as sent by the backend.
    pub created_at: String,
    pub rating: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub items: Vec<HistoryItem>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl HistoryResponse {
    /// Number of pages needed to show `total` items; `0` when empty.
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.page_size))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) < self.total_pages()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Feedback
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub query_id: String,
    /// Star rating, 1–5.
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub feedback_id: String,
    pub message: String,
}

// ═══════════════════════════════════════════════════════════════════════
// Health / errors
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy") || self.status.eq_ignore_ascii_case("ok")
    }
}

/// Error body returned by the backend for non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(total: u64, page: u32, page_size: u32) -> HistoryResponse {
        HistoryResponse {
            items: Vec::new(),
            total,
            page,
            page_size,
        }
    }

    #[test]
    fn test_total_pages_rounds_up() {
        assert_eq!(history(0, 1, 10).total_pages(), 0);
        assert_eq!(history(10, 1, 10).total_pages(), 1);
        assert_eq!(history(11, 1, 10).total_pages(), 2);
    }

    #[test]
    fn test_page_navigation() {
        let first = history(25, 1, 10);
        assert!(first.has_next());
        assert!(!first.has_prev());

        let last = history(25, 3, 10);
        assert!(!last.has_next());
        assert!(last.has_prev());
    }

    #[test]
    fn test_search_request_omits_unset_fields() {
        let body = serde_json::to_value(SearchRequest::new("연차 사용 방법")).unwrap();
        assert_eq!(body, serde_json::json!({ "query": "연차 사용 방법" }));
    }

    #[test]
    fn test_search_response_accepts_null_page_and_reason() {
        let json = serde_json::json!({
            "query_id": "q1",
            "query": "how do I book leave",
            "answer": "Use the HR portal.",
            "sources": [{
                "document_id": "d1",
                "document_title": "Leave Policy",
                "document_source": "hr/leave.pdf",
                "chunk_content": "Annual leave is requested...",
                "page_number": null,
                "relevance_score": 0.87
            }],
            "performance": {
                "embedding_time_ms": 12.0,
                "search_time_ms": 30.5,
                "llm_time_ms": 900.0,
                "total_time_ms": 950.2
            },
            "metadata": {
                "is_fallback": false,
                "fallback_reason": null,
                "model_used": "gpt-4o-mini",
                "search_result_count": 1
            }
        });
        let resp: SearchResponse = serde_json::from_value(json).unwrap();
        assert_eq!(resp.sources[0].page_number, None);
        assert!(resp.metadata.fallback_reason.is_none());
    }

    #[test]
    fn test_access_label() {
        let user = UserProfile {
            id: "u1".into(),
            email: "user@example.com".into(),
            name: "Test User".into(),
            department: "Engineering".into(),
            access_level: 2,
        };
        assert_eq!(user.access_label(), "Level 2");
    }
}
