//! Shamir recovery of the client's own user
//!
//! The setup registers a recovery device whose serialized keys are kept by
//! the server, encrypted with a random data key. The data key and the token
//! needed to retrieve the ciphered device form the secret split among the
//! recipients, each share being encrypted for its recipient.

use super::Client;
use crate::certif::ShamirSetup;
use crate::invite::{ShamirRecoverySecret, ShamirRecoveryShareData};
use parsec_connection::protocol::CertificateRejection;
use parsec_types::shamir::make_shares;
use parsec_types::{
    AnyCertificate, DateTime, DeviceID, DeviceLabel, DevicePurpose, SecretKey, ShamirError,
    ShamirRecoveryBriefCertificate, ShamirRecoveryDeletionCertificate, ShamirRecoveryShareCertificate,
    ShamirRevealToken, ShamirShare, UserID,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const SHAMIR_RECOVERY_DEVICE_LABEL: &str = "shamir-recovery";

#[derive(Debug, thiserror::Error)]
pub enum ClientSetupShamirRecoveryError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Client is stopped")]
    Stopped,
    #[error("At least one recipient is required")]
    MissingRecipients,
    #[error("A user cannot be a recipient of its own shamir recovery")]
    AuthorAmongRecipients,
    #[error("Recipients must each hold at least one share")]
    RecipientWithoutShare,
    #[error("Threshold must be between 1 and the total number of shares")]
    ThresholdBiggerThanSumOfShares,
    #[error("Too many shares")]
    TooManyShares,
    #[error("Recipient {0} not found")]
    RecipientNotFound(UserID),
    #[error("Recipient {0} is revoked")]
    RecipientRevoked(UserID),
    #[error("A shamir recovery is already setup")]
    ShamirRecoveryAlreadyExists,
    #[error("Our clock ({client_timestamp}) and the server's one ({server_timestamp}) are too far apart")]
    TimestampOutOfBallpark {
        server_timestamp: DateTime,
        client_timestamp: DateTime,
        ballpark_client_early_offset: f64,
        ballpark_client_late_offset: f64,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientDeleteShamirRecoveryError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Client is stopped")]
    Stopped,
    #[error("No shamir recovery to delete")]
    ShamirRecoveryNotFound,
    #[error("Our clock ({client_timestamp}) and the server's one ({server_timestamp}) are too far apart")]
    TimestampOutOfBallpark {
        server_timestamp: DateTime,
        client_timestamp: DateTime,
        ballpark_client_early_offset: f64,
        ballpark_client_late_offset: f64,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// State of our own shamir recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfShamirRecoveryInfo {
    NeverSetup,
    Deleted {
        created_on: DateTime,
        created_by: DeviceID,
        threshold: u8,
        per_recipient_shares: BTreeMap<UserID, u8>,
        deleted_on: DateTime,
        deleted_by: DeviceID,
    },
    SetupAllValid {
        created_on: DateTime,
        created_by: DeviceID,
        threshold: u8,
        per_recipient_shares: BTreeMap<UserID, u8>,
    },
    /// Some recipients are revoked but the others still reach the threshold
    SetupWithRevokedRecipients {
        created_on: DateTime,
        created_by: DeviceID,
        threshold: u8,
        per_recipient_shares: BTreeMap<UserID, u8>,
        revoked_recipients: BTreeSet<UserID>,
    },
    /// Too many recipients are revoked to ever reach the threshold
    SetupButUnusable {
        created_on: DateTime,
        created_by: DeviceID,
        threshold: u8,
        per_recipient_shares: BTreeMap<UserID, u8>,
        revoked_recipients: BTreeSet<UserID>,
    },
}

/// Shamir recovery of another user in which we are a recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtherShamirRecoveryInfo {
    Deleted {
        user_id: UserID,
        created_on: DateTime,
        created_by: DeviceID,
        threshold: u8,
        per_recipient_shares: BTreeMap<UserID, u8>,
        deleted_on: DateTime,
        deleted_by: DeviceID,
    },
    SetupAllValid {
        user_id: UserID,
        created_on: DateTime,
        created_by: DeviceID,
        threshold: u8,
        per_recipient_shares: BTreeMap<UserID, u8>,
    },
    SetupWithRevokedRecipients {
        user_id: UserID,
        created_on: DateTime,
        created_by: DeviceID,
        threshold: u8,
        per_recipient_shares: BTreeMap<UserID, u8>,
        revoked_recipients: BTreeSet<UserID>,
    },
    SetupButUnusable {
        user_id: UserID,
        created_on: DateTime,
        created_by: DeviceID,
        threshold: u8,
        per_recipient_shares: BTreeMap<UserID, u8>,
        revoked_recipients: BTreeSet<UserID>,
    },
}

/// Where a certified setup stands
enum SetupStatus {
    Deleted { deleted_on: DateTime, deleted_by: DeviceID },
    AllValid,
    WithRevokedRecipients(BTreeSet<UserID>),
    Unusable(BTreeSet<UserID>),
}

/// Split shares among recipients in their ID order
fn distribute_shares(
    per_recipient_shares: &BTreeMap<UserID, u8>,
    shares: Vec<ShamirShare>,
) -> BTreeMap<UserID, Vec<ShamirShare>> {
    let mut shares = shares.into_iter();
    per_recipient_shares
        .iter()
        .map(|(recipient, count)| (*recipient, shares.by_ref().take(usize::from(*count)).collect()))
        .collect()
}

impl Client {
    /// Revoked recipients of a setup and whether the others still reach its threshold
    fn revoked_recipients(&self, setup: &ShamirSetup) -> (BTreeSet<UserID>, bool) {
        let revoked: BTreeSet<UserID> = setup
            .brief
            .per_recipient_shares
            .keys()
            .filter(|recipient| {
                self.certificates
                    .get_user_info(**recipient)
                    .map_or(true, |user| user.is_revoked())
            })
            .copied()
            .collect();
        let usable_shares: u32 = setup
            .brief
            .per_recipient_shares
            .iter()
            .filter(|(recipient, _)| !revoked.contains(recipient))
            .map(|(_, shares)| u32::from(*shares))
            .sum();
        let usable = usable_shares >= u32::from(setup.brief.threshold);
        (revoked, usable)
    }

    fn setup_status(&self, setup: &ShamirSetup) -> SetupStatus {
        if let Some(deletion) = &setup.deletion {
            return SetupStatus::Deleted {
                deleted_on: deletion.timestamp,
                deleted_by: deletion.author,
            };
        }
        let (revoked_recipients, usable) = self.revoked_recipients(setup);
        if revoked_recipients.is_empty() {
            SetupStatus::AllValid
        } else if usable {
            SetupStatus::WithRevokedRecipients(revoked_recipients)
        } else {
            SetupStatus::Unusable(revoked_recipients)
        }
    }

    pub async fn get_self_shamir_recovery(&self) -> anyhow::Result<SelfShamirRecoveryInfo> {
        self.refresh_certificates().await?;
        let Some(setup) = self.certificates.shamir_setup(self.device.user_id) else {
            return Ok(SelfShamirRecoveryInfo::NeverSetup);
        };
        let status = self.setup_status(&setup);
        let ShamirRecoveryBriefCertificate {
            author: created_by,
            timestamp: created_on,
            threshold,
            per_recipient_shares,
            ..
        } = setup.brief;
        Ok(match status {
            SetupStatus::Deleted { deleted_on, deleted_by } => SelfShamirRecoveryInfo::Deleted {
                created_on,
                created_by,
                threshold,
                per_recipient_shares,
                deleted_on,
                deleted_by,
            },
            SetupStatus::AllValid => SelfShamirRecoveryInfo::SetupAllValid {
                created_on,
                created_by,
                threshold,
                per_recipient_shares,
            },
            SetupStatus::WithRevokedRecipients(revoked_recipients) => {
                SelfShamirRecoveryInfo::SetupWithRevokedRecipients {
                    created_on,
                    created_by,
                    threshold,
                    per_recipient_shares,
                    revoked_recipients,
                }
            }
            SetupStatus::Unusable(revoked_recipients) => SelfShamirRecoveryInfo::SetupButUnusable {
                created_on,
                created_by,
                threshold,
                per_recipient_shares,
                revoked_recipients,
            },
        })
    }

    /// Setups of other users in which we hold shares, oldest first
    pub async fn list_shamir_recoveries_for_others(&self) -> anyhow::Result<Vec<OtherShamirRecoveryInfo>> {
        self.refresh_certificates().await?;
        let infos = self
            .certificates
            .shamir_setups_for_others()
            .into_iter()
            .map(|setup| {
                let status = self.setup_status(&setup);
                let ShamirRecoveryBriefCertificate {
                    author: created_by,
                    timestamp: created_on,
                    user_id,
                    threshold,
                    per_recipient_shares,
                } = setup.brief;
                match status {
                    SetupStatus::Deleted { deleted_on, deleted_by } => OtherShamirRecoveryInfo::Deleted {
                        user_id,
                        created_on,
                        created_by,
                        threshold,
                        per_recipient_shares,
                        deleted_on,
                        deleted_by,
                    },
                    SetupStatus::AllValid => OtherShamirRecoveryInfo::SetupAllValid {
                        user_id,
                        created_on,
                        created_by,
                        threshold,
                        per_recipient_shares,
                    },
                    SetupStatus::WithRevokedRecipients(revoked_recipients) => {
                        OtherShamirRecoveryInfo::SetupWithRevokedRecipients {
                            user_id,
                            created_on,
                            created_by,
                            threshold,
                            per_recipient_shares,
                            revoked_recipients,
                        }
                    }
                    SetupStatus::Unusable(revoked_recipients) => OtherShamirRecoveryInfo::SetupButUnusable {
                        user_id,
                        created_on,
                        created_by,
                        threshold,
                        per_recipient_shares,
                        revoked_recipients,
                    },
                }
            })
            .collect();
        Ok(infos)
    }

    /// Split the ability to recover our user among `per_recipient_shares`
    ///
    /// Any `threshold` shares are enough to register a new device of ours.
    pub async fn setup_shamir_recovery(
        &self,
        per_recipient_shares: BTreeMap<UserID, u8>,
        threshold: u8,
    ) -> Result<(), ClientSetupShamirRecoveryError> {
        if self.is_stopped() {
            return Err(ClientSetupShamirRecoveryError::Stopped);
        }
        if per_recipient_shares.is_empty() {
            return Err(ClientSetupShamirRecoveryError::MissingRecipients);
        }
        if per_recipient_shares.contains_key(&self.device.user_id) {
            return Err(ClientSetupShamirRecoveryError::AuthorAmongRecipients);
        }
        if per_recipient_shares.values().any(|shares| *shares == 0) {
            return Err(ClientSetupShamirRecoveryError::RecipientWithoutShare);
        }
        let total_shares: usize = per_recipient_shares.values().map(|shares| usize::from(*shares)).sum();
        if threshold == 0 || usize::from(threshold) > total_shares {
            return Err(ClientSetupShamirRecoveryError::ThresholdBiggerThanSumOfShares);
        }

        self.refresh_certificates().await?;
        let mut recipients_keys = HashMap::with_capacity(per_recipient_shares.len());
        for recipient in per_recipient_shares.keys() {
            let user = self
                .certificates
                .get_user_info(*recipient)
                .ok_or(ClientSetupShamirRecoveryError::RecipientNotFound(*recipient))?;
            if user.is_revoked() {
                return Err(ClientSetupShamirRecoveryError::RecipientRevoked(*recipient));
            }
            let public_key = self
                .certificates
                .user_public_key(*recipient)
                .ok_or(ClientSetupShamirRecoveryError::RecipientNotFound(*recipient))?;
            recipients_keys.insert(*recipient, public_key);
        }
        if let Some(setup) = self.certificates.shamir_setup(self.device.user_id) {
            if setup.deletion.is_none() {
                return Err(ClientSetupShamirRecoveryError::ShamirRecoveryAlreadyExists);
            }
        }

        let secret = ShamirRecoverySecret {
            data_key: SecretKey::generate(),
            reveal_token: ShamirRevealToken::default_new(),
        };
        let raw_secret = bincode::serialize(&secret).map_err(anyhow::Error::from)?;
        let shares = make_shares(usize::from(threshold), &raw_secret, total_shares).map_err(|err| match err {
            ShamirError::TooManyShares => ClientSetupShamirRecoveryError::TooManyShares,
            ShamirError::InvalidThreshold { .. } => ClientSetupShamirRecoveryError::ThresholdBiggerThanSumOfShares,
            err => ClientSetupShamirRecoveryError::Internal(err.into()),
        })?;
        let mut ciphered_shares = BTreeMap::new();
        for (recipient, weighted_share) in distribute_shares(&per_recipient_shares, shares) {
            let raw = bincode::serialize(&ShamirRecoveryShareData { weighted_share }).map_err(anyhow::Error::from)?;
            let public_key = recipients_keys
                .get(&recipient)
                .ok_or(ClientSetupShamirRecoveryError::RecipientNotFound(recipient))?;
            ciphered_shares.insert(recipient, public_key.encrypt_for_self(&raw));
        }

        let label: DeviceLabel = SHAMIR_RECOVERY_DEVICE_LABEL
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid recovery device label: {err:?}"))?;
        let recovery_device = self
            .register_self_device(label, DevicePurpose::ShamirRecovery)
            .await
            .map_err(|err| submit_error_into!(ClientSetupShamirRecoveryError, err))?;
        let ciphered_data = secret.data_key.encrypt(&recovery_device.dump());

        let device = &self.device;
        let cmds = &self.cmds;
        let per_recipient_shares = &per_recipient_shares;
        let ciphered_shares = &ciphered_shares;
        self.certificates
            .submit(|timestamp| {
                let brief = AnyCertificate::ShamirRecoveryBrief(ShamirRecoveryBriefCertificate {
                    author: device.device_id,
                    timestamp,
                    user_id: device.user_id,
                    threshold,
                    per_recipient_shares: per_recipient_shares.clone(),
                })
                .dump_and_sign(&device.signing_key);
                let share_certificates = ciphered_shares
                    .iter()
                    .map(|(recipient, ciphered_share)| {
                        AnyCertificate::ShamirRecoveryShare(ShamirRecoveryShareCertificate {
                            author: device.device_id,
                            timestamp,
                            user_id: device.user_id,
                            recipient: *recipient,
                            ciphered_share: ciphered_share.clone(),
                        })
                        .dump_and_sign(&device.signing_key)
                    })
                    .collect();
                let ciphered_data = ciphered_data.clone();
                let reveal_token = secret.reveal_token;
                async move {
                    cmds.shamir_recovery_setup(ciphered_data, reveal_token, brief, share_certificates)
                        .await
                }
            })
            .await
            .map_err(|err| {
                submit_error_into!(ClientSetupShamirRecoveryError, err,
                    CertificateRejection::ShamirRecoveryAlreadyExists => {
                        ClientSetupShamirRecoveryError::ShamirRecoveryAlreadyExists
                    }
                )
            })?;
        tracing::info!(threshold, recipients = per_recipient_shares.len(), "Shamir recovery setup");
        Ok(())
    }

    pub async fn delete_shamir_recovery(&self) -> Result<(), ClientDeleteShamirRecoveryError> {
        if self.is_stopped() {
            return Err(ClientDeleteShamirRecoveryError::Stopped);
        }
        self.refresh_certificates().await?;
        let setup = self
            .certificates
            .shamir_setup(self.device.user_id)
            .filter(|setup| setup.deletion.is_none())
            .ok_or(ClientDeleteShamirRecoveryError::ShamirRecoveryNotFound)?;
        let share_recipients: BTreeSet<UserID> = setup.brief.per_recipient_shares.keys().copied().collect();

        let device = &self.device;
        let cmds = &self.cmds;
        let share_recipients = &share_recipients;
        let setup_to_delete_timestamp = setup.brief.timestamp;
        self.certificates
            .submit(|timestamp| {
                let certificate = AnyCertificate::ShamirRecoveryDeletion(ShamirRecoveryDeletionCertificate {
                    author: device.device_id,
                    timestamp,
                    setup_to_delete_timestamp,
                    setup_to_delete_user_id: device.user_id,
                    share_recipients: share_recipients.clone(),
                })
                .dump_and_sign(&device.signing_key);
                async move { cmds.shamir_recovery_delete(certificate).await }
            })
            .await
            .map_err(|err| {
                submit_error_into!(ClientDeleteShamirRecoveryError, err,
                    CertificateRejection::ShamirRecoveryNotFound => {
                        ClientDeleteShamirRecoveryError::ShamirRecoveryNotFound
                    }
                )
            })?;
        tracing::info!(%setup_to_delete_timestamp, "Shamir recovery deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_types::shamir::recover_secret;

    #[test]
    fn test_distribute_shares_follows_recipient_order() {
        let alice = UserID::default_new();
        let bob = UserID::default_new();
        let per_recipient_shares = BTreeMap::from([(alice, 2), (bob, 1)]);
        let shares = make_shares(2, b"secret", 3).unwrap();

        let distributed = distribute_shares(&per_recipient_shares, shares.clone());

        let (first, second) = if alice < bob { (alice, bob) } else { (bob, alice) };
        let first_count = usize::from(per_recipient_shares[&first]);
        assert_eq!(distributed[&first], shares[..first_count].to_vec());
        assert_eq!(distributed[&second], shares[first_count..].to_vec());
    }

    #[test]
    fn test_single_weighted_recipient_can_recover() {
        let alice = UserID::default_new();
        let bob = UserID::default_new();
        let per_recipient_shares = BTreeMap::from([(alice, 2), (bob, 1)]);
        let shares = make_shares(2, b"secret", 3).unwrap();

        let distributed = distribute_shares(&per_recipient_shares, shares);

        assert_eq!(recover_secret(2, &distributed[&alice]).unwrap(), b"secret");
        assert!(recover_secret(2, &distributed[&bob]).is_err());
    }
}
