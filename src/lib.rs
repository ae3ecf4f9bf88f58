//! # notewiki
//!
//! Builds a personal wiki from a directory of Typst notes. Every note
//! declares a stable `identifier: "..."`; notes cite each other with
//! `#ln("denote:<id>")[text]` and embed each other with `#tr("denote:<id>")`.
//!
//! ## Pipeline
//!
//! ```text
//! typ/*.typ
//!     │
//!     ├──> IdentifierIndex (identifier <-> path, persisted as JSON)
//!     │
//!     └──> per note:
//!            compile ──> scan references ──> render backmatter
//!                                   └──> compose into shell ──> html/<id>.html
//! ```

pub mod backmatter;
pub mod builder;
pub mod compose;
pub mod config;
pub mod error;
pub mod index;
pub mod refs;
pub mod render;
pub mod search;
pub mod site;
pub mod target;

pub use builder::{BuildReport, IndexRefresh, SiteBuilder, Stage};
pub use config::Config;
pub use error::{Error, Result};
pub use index::{DocumentPath, IdentifierIndex};
pub use render::{ExternalRenderer, TypstRenderer};
pub use search::{CorpusSearcher, SearchScope, TextSearchProvider};
