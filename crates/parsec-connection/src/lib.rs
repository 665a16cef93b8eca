//! Parsec Connection - server command contract
//!
//! Defines what the client engine can ask of a server, and how it finds the
//! server for a given address. The server side is plugged in at runtime
//! through [`register_server`].

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod cmds;
pub mod error;
pub mod events;
pub mod greeting;
pub mod protocol;
pub mod registry;

pub use cmds::{AnonymousCmds, AuthenticatedCmds, EventsListener, InvitedCmds};
pub use error::ConnectionError;
pub use events::ServerEvent;
pub use greeting::{ClaimerStep, GreeterStep, GreetingStepRep};
pub use registry::{
    anonymous_cmds, authenticated_cmds, invited_cmds, register_server, unregister_server,
    ServerConnector,
};
