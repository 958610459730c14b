//! Headless study table engine.
//!
//! The engine renders nothing itself. A host (the terminal `browse` command,
//! the tests) drives a [`StudyBrowser`] with explicit events and timestamps
//! and reads back what should be on screen.
//!
//! - [`table`]: paged loading and column binding
//! - [`filter`]: column filter menus, direct filters, global search
//! - [`optimizer`]: virtualization window, layout sync, lazy loading, write batching
//! - [`upload`]: validated upload queue with bounded concurrency
//! - [`visibility`]: the pure per-row visibility decision

pub mod browser;
pub mod collate;
pub mod context;
pub mod filter;
pub mod http;
pub mod optimizer;
pub mod storage;
pub mod table;
pub mod timing;
pub mod upload;
pub mod visibility;

pub use browser::{RenderedView, SessionConfig, StudyBrowser, TickReport};
pub use context::{Rect, UiContext, Viewport};
pub use filter::{ActiveFilters, FilterManager};
pub use http::{HttpRowSource, HttpUploadSink};
pub use storage::{FileFilterStore, FilterStore, MemoryFilterStore};
pub use table::{LoadOutcome, PageResult, RowSource, TableManager};
pub use upload::{UploadFile, UploadManager, UploadSink};
