//! Runtime around `facegate-core`: the ticking detection loop, the
//! encrypted reference store, and the sinks accepted faces flow into.

pub mod config;
pub mod detector;
pub mod replay;
pub mod session;
pub mod sinks;
pub mod store;

pub use config::Config;
pub use replay::ReplayFeed;
pub use session::{
    EndReason, IdentitySource, Session, SessionDeps, SessionError, SessionOptions, SessionStatus,
    SessionSummary,
};
pub use store::FacegateStore;
