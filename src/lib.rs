// src/lib.rs

//! `robotgen_pipeline` turns a natural-language UI test description into a validated,
//! containerized Robot Framework test run.
//!
//! The crate is organized around the pipeline's stages, end to end:
//!
//! - [`config`] — typed runtime configuration loaded from environment variables.
//! - [`errors`] — the crate-wide [`errors::PipelineError`] boundary.
//! - [`cloudllm`] — the provider-agnostic LLM client abstraction and conversational session.
//! - [`keyword_store`] — the disk-backed library keyword/vector store.
//! - [`pattern_journal`] — the append-only query/keyword usage journal and the learning feedback loop.
//! - [`context_optimizer`] — the three-tier context retrieval/prompting strategy.
//! - [`library_rules`] — fixed Robot Framework library rule bundles.
//! - [`agent_runner`] — the four-agent (Planner/Identifier/Assembler/Validator) generation pipeline.
//! - [`script_processor`] — Robot Framework script extraction and validator-verdict parsing.
//! - [`container_engine`] — idempotent, containerized one-shot test execution.
//! - [`event`] — the progress event type streamed to callers.
//! - [`metrics_journal`] — the append-only merged metrics journal.
//! - [`orchestrator`] — ties every stage together behind `generate`/`execute`/`generate_and_run`.

pub mod cloudllm;
pub mod config;
pub mod errors;

pub mod event;
pub mod keyword_store;
pub mod library_rules;
pub mod metrics_journal;
pub mod pattern_journal;

pub mod context_optimizer;

pub mod agent_runner;
pub mod container_engine;
pub mod script_processor;

pub mod orchestrator;

pub use cloudllm::client_wrapper::{ClientWrapper, Message, Role};
pub use cloudllm::LLMSession;
pub use config::Config;
pub use errors::PipelineError;
pub use event::Event;
pub use orchestrator::Orchestrator;
