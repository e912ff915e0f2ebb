//! Resumable Regulatory Document Processing Pipeline
//!
//! Ingests long regulatory documents split into ordered parts and extracts
//! structured legal provisions and machine-actionable compliance rules from
//! each part via an external text-generation oracle.
//!
//! # Design
//!
//! - **Resumable**: part status drives the state machine; a crashed run is
//!   reclaimed on the next resume, and already-processed parts are not
//!   re-extracted.
//! - **Fault isolated**: one failing part never aborts the document.
//! - **Chunked extraction**: rules are requested per category so each
//!   oracle response stays small enough to survive output limits intact.
//! - **Untrusting**: every enumerated field in oracle output is validated
//!   against its allow-list before persistence.
//! - **Cooperative cancellation**: a token and a store-backed abort flag
//!   are checked at part boundaries, never mid-part.
//!
//! # Usage
//!
//! ```rust,ignore
//! use statute_pipeline::{MemoryStore, Pipeline, ProcessRequest};
//! use statute_pipeline::testing::MockOracle;
//! use tokio_util::sync::CancellationToken;
//!
//! let store = MemoryStore::new();
//! let pipeline = Pipeline::new(store, MockOracle::new());
//!
//! let report = pipeline
//!     .process(&ProcessRequest::full(document_id), CancellationToken::new())
//!     .await?;
//! println!("{} provisions extracted", report.provisions_extracted);
//! ```
//!
//! # Modules
//!
//! - [`types`] - Documents, parts, provisions, rules, and their statuses
//! - [`traits`] - The [`DocumentStore`] and [`Oracle`] seams
//! - [`pipeline`] - Controller, processor, reclaimer, dedup, finalizer
//! - [`events`] - Append-only processing log
//! - [`stores`] - Storage implementations (memory, Postgres)
//! - [`oracle`] - Oracle implementations (OpenAI-compatible)
//! - [`testing`] - Mock oracle for tests

pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

pub mod oracle;

// Re-export core types at crate root
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use events::{EventEmitter, EventStatus, EventType, ProcessingEvent, Stage};
pub use pipeline::{Pipeline, ProcessMode, ProcessReport, ProcessRequest};
pub use stores::MemoryStore;
pub use traits::{DocumentStore, Oracle, OracleOptions};
pub use types::{
    ComplianceRule, Document, DocumentId, DocumentMeta, DocumentStatus, Part, PartId, PartStatus,
    Provision, ProvisionType, RuleCategory, RunId,
};

#[cfg(feature = "postgres")]
pub use stores::PostgresStore;

#[cfg(feature = "openai")]
pub use oracle::OpenAiOracle;
