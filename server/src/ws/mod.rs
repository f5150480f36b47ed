pub mod actor;
pub mod delivery;
pub mod handler;
pub mod protocol;
pub mod registry;

pub use registry::{ConnectionHandle, ConnectionSender, Session, SessionRegistry};

