//! # Code Harness
//!
//! A local codebase indexer with hybrid semantic retrieval.
//!
//! Code Harness watches registered repository roots, parses changed files
//! into semantic chunks (functions, classes, and methods via tree-sitter;
//! sections and pages for Markdown and PDF), embeds them, and serves
//! hybrid (dense + lexical) search with role-based access filtering.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Watcher    │──▶│   Indexer    │──▶│  SQLite   │
//! │ notify+deb. │   │ parse+embed  │   │ FTS5+Vec  │
//! └─────────────┘   └──────────────┘   └─────┬─────┘
//!                                            │
//!                                     ┌──────▼──────┐
//!                                     │  Retriever  │
//!                                     │ merge+ACL+  │
//!                                     │   rerank    │
//!                                     └──────┬──────┘
//!                                            ▼
//!                                     ┌─────────────┐
//!                                     │ Engine/CLI  │
//!                                     │   (chx)     │
//!                                     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chx init
//! chx repo add backend ./services/backend --access 'src/auth/**=restricted'
//! chx search "token refresh" --repo backend
//! chx watch
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite-backed chunk store |
//! | [`registry`] | Repository registry |
//! | [`indexer`] | Per-file pipeline and full reindex |
//! | [`watcher`] | Filesystem watcher with debounce |
//! | [`embedding`] | Embedding providers |
//! | [`expansion`] | LLM query expansion |
//! | [`rerank`] | HTTP reranker |
//! | [`auth`] | Credential resolution |
//! | [`engine`] | Facade wiring everything together |

pub mod auth;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod expansion;
pub mod get;
pub mod indexer;
pub mod migrate;
pub mod progress;
pub mod registry;
pub mod repo_cmd;
pub mod rerank;
pub mod search;
pub mod sqlite_store;
pub mod watcher;

pub use engine::Engine;
