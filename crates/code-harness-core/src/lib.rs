//! # Code Harness Core
//!
//! Runtime-agnostic logic for Code Harness: the chunk data model, parsers
//! that turn files into semantic chunks, the chunk store abstraction,
//! access policy, and the hybrid retrieval algorithm.
//!
//! This crate contains no tokio runtime, sqlx, or filesystem I/O. The
//! `code-harness` app crate supplies persistence, the watcher, and the
//! network collaborators.

pub mod access;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod events;
pub mod expansion;
pub mod ignore;
pub mod lexical;
pub mod models;
pub mod rerank;
pub mod search;
pub mod store;

pub use error::HarnessError;
