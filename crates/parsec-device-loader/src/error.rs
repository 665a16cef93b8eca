//! Errors of key file operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadDeviceError {
    /// The protection scheme is not usable on this machine
    #[error("Device storage is not available")]
    StorageNotAvailable,
    #[error("Invalid key file path: {0}")]
    InvalidPath(anyhow::Error),
    #[error("Cannot deserialize key file content")]
    InvalidData,
    #[error("Failed to decrypt key file content")]
    DecryptionFailed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SaveDeviceError {
    #[error("Device storage is not available")]
    StorageNotAvailable,
    #[error("Invalid key file path: {0}")]
    InvalidPath(anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum UpdateDeviceError {
    #[error("Device storage is not available")]
    StorageNotAvailable,
    #[error("Invalid key file path: {0}")]
    InvalidPath(anyhow::Error),
    #[error("Cannot deserialize key file content")]
    InvalidData,
    #[error("Failed to decrypt key file content")]
    DecryptionFailed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<LoadDeviceError> for UpdateDeviceError {
    fn from(value: LoadDeviceError) -> Self {
        match value {
            LoadDeviceError::StorageNotAvailable => Self::StorageNotAvailable,
            LoadDeviceError::InvalidPath(e) => Self::InvalidPath(e),
            LoadDeviceError::InvalidData => Self::InvalidData,
            LoadDeviceError::DecryptionFailed => Self::DecryptionFailed,
            LoadDeviceError::Internal(e) => Self::Internal(e),
        }
    }
}

impl From<SaveDeviceError> for UpdateDeviceError {
    fn from(value: SaveDeviceError) -> Self {
        match value {
            SaveDeviceError::StorageNotAvailable => Self::StorageNotAvailable,
            SaveDeviceError::InvalidPath(e) => Self::InvalidPath(e),
            SaveDeviceError::Internal(e) => Self::Internal(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveDeviceError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum LoadRecoveryDeviceError {
    #[error("Cannot deserialize recovery file content")]
    InvalidData,
    #[error("Invalid passphrase format")]
    InvalidPassphrase,
    #[error("Failed to decrypt recovery file content")]
    DecryptionFailed,
}
