//! # docqa
//!
//! A local document question-answering core.
//!
//! docqa ingests PDF, DOCX and TXT files into a persistent vector index and
//! answers natural-language questions from them. Answers are built only from
//! retrieved passages and cite the files they came from.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │   Uploads   │──▶│     Pipeline     │──▶│    SQLite    │
//! │ PDF/DOCX/TXT│   │ Extract+Chunk+Emb│   │ chunks + vecs│
//! └─────────────┘   └──────────────────┘   └──────┬───────┘
//!                                                 │
//!                         ┌───────────────────────┤
//!                         ▼                       ▼
//!                   ┌───────────┐          ┌────────────┐
//!                   │ Retriever │─────────▶│ Synthesizer│
//!                   │  top-K    │          │ + citations│
//!                   └───────────┘          └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa init                              # create directories and index
//! docqa ingest report.pdf notes.txt       # ingest documents
//! docqa ask "What is the deadline?"       # grounded answer with sources
//! docqa usage                             # upload directory usage
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides, validation |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors per pipeline stage |
//! | [`extract`] | PDF, DOCX and TXT text extraction |
//! | [`chunk`] | Overlapping, boundary-aware text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`http`] | Shared HTTP client and retry loop |
//! | [`store`] | Persistent vector store |
//! | [`storage`] | Upload directory management |
//! | [`ingest`] | Batch ingestion with quota enforcement |
//! | [`retrieve`] | Query → top-K chunks |
//! | [`generate`] | Answer generators |
//! | [`synthesize`] | Grounded answer synthesis |
//! | [`qa`] | Question answering with a safe fallback |
//! | [`knowledge`] | The public facade over all of the above |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod http;
pub mod ingest;
pub mod knowledge;
pub mod migrate;
pub mod models;
pub mod qa;
pub mod retrieve;
pub mod storage;
pub mod store;
pub mod synthesize;

pub use error::{Error, Result};
pub use knowledge::KnowledgeBase;
