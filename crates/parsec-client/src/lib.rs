//! Parsec Client - the client engine
//!
//! A [`Client`] is a running device of an organization. From it the caller
//! reaches the organization's users, its workspaces ([`WorkspaceOps`] and
//! [`WorkspaceHistoryOps`]) and the greeter side of invitations. The claimer
//! side of invitations and the organization bootstrap run without a client,
//! since the device does not exist yet.
//!
//! Everything that happens asynchronously is reported as [`ClientEvent`]s on
//! the client's [`EventBus`].

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod certif;
pub mod client;
pub mod config;
pub mod event_bus;
pub mod invite;
mod monitors;
pub mod realms;
pub mod workspace;

pub use certif::{CertifPollError, CertificatesStore, DeviceInfo, UserInfo};
pub use client::{
    bootstrap_organization, import_recovery_device, Client, ClientInfo, ClientInfoError, ClientStartError,
    ClientStopError,
};
pub use config::{ClientConfig, LogLevel, MountpointMountStrategy, PreventSyncPattern, WorkspaceStorageCacheSize};
pub use event_bus::{ClientEvent, EventBus};
pub use realms::WorkspaceInfo;
pub use workspace::{WorkspaceHistoryOps, WorkspaceOps};
