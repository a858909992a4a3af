//! Webpforge-Common: shared error type and identifiers.
//!
//! - **Typed IDs**: [`TaskId`], a UUID wrapper for conversion tasks
//! - **Error Handling**: the crate-wide [`Error`] and [`Result`] alias
//!
//! # Examples
//!
//! ```
//! use webpforge_common::{Error, Result, TaskId};
//!
//! let id = TaskId::new();
//!
//! fn lookup(id: TaskId) -> Result<()> {
//!     Err(Error::not_found("task", id))
//! }
//! assert!(lookup(id).is_err());
//! ```

pub mod error;
pub mod ids;

pub use error::{Error, Result};
pub use ids::TaskId;
