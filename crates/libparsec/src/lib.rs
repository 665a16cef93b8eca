//! libparsec - handle based boundary of the Parsec client engine
//!
//! Callers never hold engine objects directly. Starting a client, a
//! workspace, a history view, a mountpoint or an invitation stage gives back
//! an opaque [`Handle`] that every later operation takes as first argument.
//! Handles outlive nothing: once their resource is stopped they resolve to
//! the operation's `Stopped` (or `NotFound`) error, never to another resource.
//!
//! Every operation is an `async fn` returning a `Result` whose error is a
//! closed enum specific to the operation. Network-bound invitation steps take
//! a canceller handle, see [`new_canceller`] and [`cancel`].
//!
//! Client events reach the caller through the callback registered with
//! [`set_on_event_callback`], tagged with the handle of their client.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

mod cancel;
mod client;
mod device;
mod events;
mod handle;
mod init;
mod invite;
mod path;
mod workspace;
mod workspace_history;

pub use cancel::*;
pub use client::*;
pub use device::*;
pub use events::*;
pub use handle::{Handle, HandleError, HandleKind};
pub use init::*;
pub use invite::*;
pub use path::*;
pub use workspace::*;
pub use workspace_history::*;

pub use parsec_client::{ClientConfig, ClientEvent, LogLevel, MountpointMountStrategy};
pub use parsec_device_loader::{AvailableDevice, DeviceAccessStrategy, DeviceSaveStrategy};
