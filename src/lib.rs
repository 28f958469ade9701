#![forbid(unsafe_code)]

//! Public entry point for the tube-fetch crate.
//!
//! The `backend` binary wires these modules into an HTTP server: lookups go
//! through the [`cache`], downloads flow through [`metadata`], [`pipeline`]
//! and [`download`], and every provider call sits behind the
//! [`provider::Provider`] trait so tests can swap in fakes.

pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod filename;
pub mod metadata;
pub mod pipeline;
pub mod provider;
pub mod server;
pub mod service;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;
