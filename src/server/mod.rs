//! HTTP server
//!
//! - `http` - listener, shared state and the router
//! - `request` - buffered request view
//! - `reply` - handler responses and header conventions

pub mod http;
pub mod reply;
pub mod request;

pub use http::{route, run, AppState};
pub use reply::{Handled, Reply};
pub use request::ApiRequest;
