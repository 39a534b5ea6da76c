//! # Docent
//!
//! A retrieval-augmented question answering backend over user documents.
//!
//! Users upload documents, which are chunked, embedded and stored per user.
//! A question is embedded, matched against that user's chunks by cosine
//! similarity (with one retry at a lowered threshold), and answered by a
//! local LLM, either grounded in the retrieved passages or, when nothing
//! matches, from general knowledge with an explicit notice.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Ingestion  │──▶│ Chunk+Embed  │──▶│  SQLite   │
//! │ PDF/DOCX/MD │   │ docent-core  │   │ f32 BLOBs │
//! └─────────────┘   └──────────────┘   └─────┬─────┘
//!                                            │
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │   CLI    │         │   HTTP   │
//!                 │ (docent) │         │  (axum)  │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docent init
//! docent ingest --user alice ./handbook.pdf
//! docent query --user alice "How many vacation days do I get?"
//! docent serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`embedding`] | Embedding backends |
//! | [`ollama`] | Generation backend |
//! | [`extract`] | PDF/DOCX/text extraction |
//! | [`ingest`] | Document ingestion |
//! | [`service`] | Pipeline wiring |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod ollama;
pub mod query;
pub mod server;
pub mod service;
pub mod sqlite_store;
pub mod status;
