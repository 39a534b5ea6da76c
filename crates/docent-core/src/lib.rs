//! # Docent Core
//!
//! Storage-agnostic RAG logic for Docent: data models, chunking, the
//! embedder service, the vector store abstraction, adaptive retrieval, answer
//! generation, and the pipeline coordinator that ties them together.
//!
//! This crate contains no sqlx, HTTP client, or filesystem I/O. Concrete
//! stores and model backends live in the `docent` app crate and plug in
//! through [`store::VectorStore`], [`embedding::EmbeddingBackend`], and
//! [`generation::GenerationBackend`].

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod models;
pub mod pipeline;
pub mod retrieval;
pub mod search;
pub mod store;

pub use error::{RagError, Result};
