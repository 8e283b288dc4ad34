//! Origin-to-edge content distribution.
//!
//! The origin records uploads in a [`services::ContentRegistry`]; the
//! [`services::CdnController`] pushes accepted changes to region-matched
//! [`services::EdgeNode`]s through a `distribution_events::EventPublisher` and
//! falls back to pull-on-read for edges the push missed.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{CdnError, Result};
