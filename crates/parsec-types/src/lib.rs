//! Parsec Types - data model of the client engine
//!
//! Pure data and cryptographic primitives shared by every other crate:
//!
//! - identifiers, validated names and workspace paths
//! - `parsec3://` addresses
//! - symmetric/asymmetric crypto, SAS codes and Shamir secret sharing
//! - certificates, manifests and realm keys bundles
//! - the local device and the clock it reads time from
//!
//! Nothing in here performs I/O.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod addr;
pub mod certif;
pub mod crypto;
pub mod fs_path;
pub mod ids;
pub mod invite;
pub mod local_device;
pub mod manifest;
pub mod names;
pub mod roles;
pub mod sas;
pub mod shamir;
pub mod time;

pub use addr::{
    build_parsec_organization_bootstrap_addr, parse_parsec_addr, ParseParsecAddrError, ParsecAddr,
    ParsecInvitationAddr, ParsecOrganizationAddr, ParsecOrganizationBootstrapAddr,
    ParsecPkiEnrollmentAddr, ParsecWorkspacePathAddr, ParsedParsecAddr,
};
pub use certif::{
    AnyCertificate, CertifError, CertificateAuthor, DeviceCertificate, RealmNameCertificate,
    RealmRoleCertificate, RevokedUserCertificate, ShamirRecoveryBriefCertificate,
    ShamirRecoveryDeletionCertificate, ShamirRecoveryShareCertificate, UserCertificate,
    UserUpdateCertificate,
};
pub use crypto::{CryptoError, HashDigest, PrivateKey, PublicKey, SecretKey, SigningKey, VerifyKey};
pub use fs_path::{FsPath, FsPathError};
pub use ids::{
    AccountVaultItemOpaqueKeyID, BlockID, BootstrapToken, ChunkID, DeviceID, EntryID,
    GreetingAttemptID, InvalidId, InvitationToken, RealmID, ShamirRevealToken, UserID, VlobID,
};
pub use invite::{
    CancelledGreetingAttemptReason, GreeterOrClaimer, InvitationEmailSentStatus, InvitationStatus,
    InvitationType, UserOnlineStatus,
};
pub use local_device::LocalDevice;
pub use manifest::{
    BlockAccess, ChildManifest, DataError, FileManifest, FolderManifest, RealmKeysBundle,
    DEFAULT_BLOCK_SIZE,
};
pub use names::{
    validators, DeviceLabel, EmailAddress, EntryName, HumanHandle, HumanHandleLabel, NameError,
    OrganizationID,
};
pub use roles::{DevicePurpose, RealmRole, UserProfile};
pub use sas::SasCode;
pub use shamir::{ShamirError, ShamirShare};
pub use time::{
    timestamps_in_the_ballpark, DateTime, MockedTime, TimeProvider, BALLPARK_CLIENT_EARLY_OFFSET,
    BALLPARK_CLIENT_LATE_OFFSET,
};
