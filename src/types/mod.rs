//! Shared types

pub mod error;
pub mod page;

pub use error::{GrievanceError, Result};
pub use page::{Page, Pagination};
