//! extract-queue library crate.
//!
//! GPU-aware job orchestration for PDF extraction: a content-addressed job
//! store, an in-memory work queue, a worker pool that drives an external
//! extraction pipeline, and a thin HTTP API on top.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod services;

pub use error::{Error, Result};
