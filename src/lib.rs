//! # RAG Client
//!
//! Client core for an internal question-answering backend built on
//! retrieval-augmented generation.
//!
//! The crate signs users in, keeps their session on disk, sends
//! authenticated requests through an interceptor pipeline, and caches
//! read-only results (query history, service health) with staleness,
//! de-duplication and invalidation. State-changing calls (search,
//! feedback) run as one-shot mutations that invalidate dependent cache
//! entries on success.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   CLI (rag)  │──▶│  RagClient   │──▶│ QueryCache / │
//! │  or embedder │   │   facade     │   │  Mutations   │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                           │                  │
//!                           ▼                  ▼
//!                    ┌──────────────┐   ┌──────────────┐
//!                    │ AuthSession  │   │   Gateway    │──▶ backend
//!                    │   Manager    │   │ interceptors │
//!                    └──────┬───────┘   └──────┬───────┘
//!                           │                  │
//!                           ▼                  ▼
//!                    ┌─────────────────────────────────┐
//!                    │    SessionStore (file / memory) │
//!                    └─────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag login --email user@example.com
//! rag search "What is the vacation policy?"
//! rag history --page 2
//! rag feedback <query_id> --rating 5 --comment "spot on"
//! rag health --watch
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Failure classification |
//! | [`storage`] | Durable key/value storage |
//! | [`session`] | Persisted token and user profile |
//! | [`gateway`] | HTTP client with interceptors |
//! | [`api`] | Typed backend endpoints |
//! | [`cache`] | Query cache |
//! | [`mutation`] | One-shot state-changing calls |
//! | [`auth`] | Signed-in state and transitions |
//! | [`health`] | Background health polling |
//! | [`client`] | Facade wiring everything together |
//! | [`commands`] | CLI command implementations |

pub mod api;
pub mod auth;
pub mod cache;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod mutation;
pub mod session;
pub mod storage;

pub use rag_client_core::{models, validate};

pub use client::RagClient;
pub use error::{ApiError, ApiResult, HttpError, HttpErrorKind};
