//! Parsec Device Loader - device key files
//!
//! A device key file holds a [`LocalDevice`] encrypted with a key obtained
//! through one of several protection schemes (password, system keyring,
//! account vault, smartcard), along with a cleartext header describing the
//! device so it can be listed without being unlocked.
//!
//! Files live under `<config_dir>/devices/` and are written atomically.
//!
//! [`LocalDevice`]: parsec_types::LocalDevice

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
mod file;
pub mod keyring;
pub mod recovery;
pub mod strategy;

pub use error::{ArchiveDeviceError, LoadDeviceError, LoadRecoveryDeviceError, SaveDeviceError, UpdateDeviceError};
pub use file::{
    archive_device, get_default_key_file, list_available_devices, load_available_device,
    load_device, save_device, update_device_change_authentication,
    update_device_overwrite_server_addr,
};
pub use keyring::{is_keyring_available, keyring_store, set_keyring_store, InMemoryKeyring, KeyringError, KeyringStore};
pub use recovery::{dump_recovery_device, load_recovery_device};
pub use strategy::{AvailableDevice, AvailableDeviceType, DeviceAccessStrategy, DeviceSaveStrategy};

/// Sub-directory of the config dir holding key files
pub const DEVICES_DIR: &str = "devices";
/// Extension of active key files
pub const DEVICE_FILE_EXT: &str = "keys";
/// Extension given to key files by [`archive_device`]
pub const ARCHIVED_DEVICE_FILE_EXT: &str = "archived";
