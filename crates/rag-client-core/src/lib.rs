//! # RAG Client Core
//!
//! Shared, I/O-free logic for the RAG search client: the backend wire
//! models, client-side input validation, and the key-value storage
//! abstraction that session persistence is built on.
//!
//! This crate contains no tokio, reqwest, filesystem I/O, or other
//! native-only dependencies.

pub mod models;
pub mod storage;
pub mod validate;
