//! Collaborator interfaces at the edge of the crawl core

pub mod traits;

pub use traits::*;
