//! Route handlers for the bridge. Each returns an HTML fragment (or JSON for
//! the persistence endpoints) ready for HTMX to swap in.

pub mod config;
pub mod decrypt;
pub mod encrypt;
pub mod history;
pub mod util;
