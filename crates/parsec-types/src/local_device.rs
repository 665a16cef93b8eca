//! Keys and identity of the device the engine runs as

use crate::addr::ParsecOrganizationAddr;
use crate::crypto::{PrivateKey, SecretKey, SigningKey};
use crate::ids::{DeviceID, UserID};
use crate::names::{DeviceLabel, HumanHandle, OrganizationID};
use crate::roles::UserProfile;
use crate::time::{DateTime, TimeProvider};
use serde::{Deserialize, Serialize};

/// Everything needed to act as a device of an organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDevice {
    pub organization_addr: ParsecOrganizationAddr,
    pub user_id: UserID,
    pub device_id: DeviceID,
    pub device_label: DeviceLabel,
    pub human_handle: HumanHandle,
    pub initial_profile: UserProfile,
    pub private_key: PrivateKey,
    pub signing_key: SigningKey,
    /// Key protecting local-only data (workspace names before bootstrap, caches)
    pub local_symkey: SecretKey,
    #[serde(skip)]
    pub time_provider: TimeProvider,
}

impl LocalDevice {
    /// A brand new device of a brand new user
    pub fn generate_new_device(
        organization_addr: ParsecOrganizationAddr,
        initial_profile: UserProfile,
        human_handle: HumanHandle,
        device_label: DeviceLabel,
    ) -> Self {
        Self {
            organization_addr,
            user_id: UserID::default_new(),
            device_id: DeviceID::default_new(),
            device_label,
            human_handle,
            initial_profile,
            private_key: PrivateKey::generate(),
            signing_key: SigningKey::generate(),
            local_symkey: SecretKey::generate(),
            time_provider: TimeProvider::default(),
        }
    }

    /// A new device for the same user: user keys are kept, device keys are new
    pub fn new_device_for_same_user(&self, device_label: DeviceLabel) -> Self {
        Self {
            organization_addr: self.organization_addr.clone(),
            user_id: self.user_id,
            device_id: DeviceID::default_new(),
            device_label,
            human_handle: self.human_handle.clone(),
            initial_profile: self.initial_profile,
            private_key: self.private_key.clone(),
            signing_key: SigningKey::generate(),
            local_symkey: SecretKey::generate(),
            time_provider: self.time_provider.clone(),
        }
    }

    pub fn organization_id(&self) -> &OrganizationID {
        self.organization_addr.organization_id()
    }

    /// Current time according to this device's clock
    pub fn now(&self) -> DateTime {
        self.time_provider.now()
    }

    /// Serialized form stored (encrypted) in device key files
    pub fn dump(&self) -> Vec<u8> {
        // bincode cannot fail on these plain data types
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn load(raw: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::ParsecAddr;

    fn device() -> LocalDevice {
        let addr = ParsecOrganizationAddr::new(
            ParsecAddr::new("test.invalid", None, false),
            "CoolOrg".parse().unwrap(),
            SigningKey::generate().verify_key(),
        );
        LocalDevice::generate_new_device(
            addr,
            UserProfile::Admin,
            HumanHandle::from_raw("alice@example.com", "Alice").unwrap(),
            "My laptop".parse().unwrap(),
        )
    }

    #[test]
    fn test_dump_load() {
        let device = device();
        let loaded = LocalDevice::load(&device.dump()).unwrap();
        assert_eq!(loaded.device_id, device.device_id);
        assert_eq!(loaded.private_key, device.private_key);
        assert_eq!(loaded.signing_key.verify_key(), device.signing_key.verify_key());
    }

    #[test]
    fn test_new_device_for_same_user() {
        let device = device();
        let other = device.new_device_for_same_user("Phone".parse().unwrap());
        assert_eq!(other.user_id, device.user_id);
        assert_ne!(other.device_id, device.device_id);
        assert_eq!(other.private_key, device.private_key);
        assert_ne!(other.signing_key.verify_key(), device.signing_key.verify_key());
    }
}
