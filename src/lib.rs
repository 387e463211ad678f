//! E-book library: catalog, request ledger, issuance lifecycle and the
//! scheduled jobs around it.

pub mod accounts;
pub mod auth;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod issuance;
pub mod jobs;
pub mod ledger;
pub mod library;
pub mod notify;
pub mod routes;
pub mod scheduler;
pub mod sql;
pub mod types;

pub use error::{ErrorKind, LibraryError, Result};
pub use library::{Library, SharedState};
