//! Core of an HTTP(S) range-fetching filesystem backend.
//!
//! This crate does not mount anything: it implements the three
//! subsystems a kernel-facing FUSE adapter would be built on top of.
//!
//! - [`transport`] — the HTTP/1.1 range-fetching client: socket transport,
//!   header codec, and the exchange engine that drives a request/response
//!   round trip with retry semantics.
//! - [`cache`] — the bounded, ring-allocated on-disk range cache.
//! - [`fetch`] — the orchestrator that composes cache lookup, network
//!   fetch, and digest verification into a single `get_data` call.
//!
//! [`url::UrlState`] and [`worker`] tie these together: one master URL
//! parsed at startup, one independently-owned copy per concurrently
//! active worker.

pub mod cache;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod timeout;
pub mod transport;
pub mod url;
pub mod util;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use url::UrlState;
