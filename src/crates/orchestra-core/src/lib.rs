//! Orchestra pipeline engine
//!
//! Executes an author-written directed graph of stages — most of which invoke
//! an external agent backend — with durable, resumable execution state.
//!
//! The crate is organized around a small set of collaborators:
//! - [`model`] — the immutable graph plus the mutable [`model::Context`] and
//!   per-stage [`model::Outcome`] records
//! - [`engine`] — edge selection, retry, goal gates, join policies, graph
//!   analysis, and the [`engine::PipelineRunner`] interpreter loop
//! - [`handlers`] — one handler per stage shape, dispatched by a registry
//! - [`events`] — typed events fanned out to observers (stdout, context
//!   store, workspace manager)
//! - [`dot`] / [`validation`] / [`transforms`] — the graph input pipeline
//! - [`backend`] / [`interviewer`] — contracts for agent backends and
//!   human interaction, with simulation/queue implementations for tests

pub mod backend;
pub mod conditions;
pub mod config;
pub mod dot;
pub mod engine;
pub mod events;
pub mod handlers;
pub mod interviewer;
pub mod model;
pub mod prompts;
pub mod transforms;
pub mod validation;

mod error;

pub use error::{OrchestraError, Result};
