//! Complaints
//!
//! - `model` - the complaint document and its value types
//! - `transitions` - pure state changes and their side-effect intents
//! - `store` - persistence trait and in-memory backend
//! - `service` - the state machine that ties store, cache, audit and
//!   notifications together

pub mod model;
pub mod service;
pub mod store;
pub mod transitions;

pub use model::{
    generate_complaint_id, haversine_km, validate_media, ActionEntry, ActionKind, ActorType,
    Complaint, ComplaintCategory, ComplaintStatus, Location, Media, MediaType, NewComplaint,
    Refile,
};
pub use service::{now_millis, ComplaintHistory, ComplaintStateMachine, SweepReport, SweepSkip};
pub use store::{
    submission_fingerprint, Applied, ComplaintQuery, ComplaintStore, MemoryComplaintStore,
};
pub use transitions::{Command, Effect, StatusUpdate, CONFIRMATIONS_TO_RESOLVE};
