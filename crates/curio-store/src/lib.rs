//! Curio Store - Object store clients for the model library
//!
//! - [`HttpObjectStore`]: Firebase Storage style bucket over HTTPS
//! - [`DirectoryStore`]: files in a local directory

pub mod directory;
pub mod http;

pub use directory::DirectoryStore;
pub use http::{HttpObjectStore, DEFAULT_BASE_URL};
