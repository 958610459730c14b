//! rad-analyse: radiology study upload, storage and table browsing.
//!
//! The server half (`web`, `store`) ingests validated study batches into
//! SQLite and serves them page by page. The client half (`engine`) is a
//! headless table engine with paging, column filters, search, virtual
//! scrolling and an upload queue.

pub mod cli;
pub mod config;
pub mod engine;
pub mod logging;
pub mod store;
pub mod study;
pub mod web;
