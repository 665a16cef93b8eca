//! Validated textual names
//!
//! All of these types can only be built through their `FromStr`/`TryFrom`
//! implementation, so holding one is proof the value passed validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a name fails validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// Organization ID is empty, too long, or contains forbidden characters
    #[error("Invalid organization ID")]
    InvalidOrganizationID,
    /// Entry name is empty, too long, or contains forbidden characters
    #[error("Invalid entry name")]
    InvalidEntryName,
    /// Device label is empty, too long, or contains control characters
    #[error("Invalid device label")]
    InvalidDeviceLabel,
    /// Human handle label is empty, too long, or contains control characters
    #[error("Invalid human handle label")]
    InvalidHumanHandleLabel,
    /// Email address is malformed
    #[error("Invalid email address")]
    InvalidEmail,
}

const ORGANIZATION_ID_MAX_LEN: usize = 32;
const ENTRY_NAME_MAX_BYTES: usize = 255;
const LABEL_MAX_BYTES: usize = 254;
const EMAIL_MAX_BYTES: usize = 254;

macro_rules! impl_string_newtype {
    ($name:ident, $validate:ident) => {
        impl $name {
            /// Borrow the validated value
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $validate(s)?;
                Ok(Self(s.to_string()))
            }
        }

        impl TryFrom<String> for $name {
            type Error = NameError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                $validate(&s)?;
                Ok(Self(s))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Organization identifier, also used in addresses
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrganizationID(String);

fn validate_organization_id(raw: &str) -> Result<(), NameError> {
    let len = raw.chars().count();
    if len == 0
        || len > ORGANIZATION_ID_MAX_LEN
        || !raw.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(NameError::InvalidOrganizationID);
    }
    Ok(())
}

impl_string_newtype!(OrganizationID, validate_organization_id);

/// Name of an entry (file or folder) within a folder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryName(String);

fn validate_entry_name(raw: &str) -> Result<(), NameError> {
    if raw.is_empty()
        || raw.len() > ENTRY_NAME_MAX_BYTES
        || raw == "."
        || raw == ".."
        || raw.contains('/')
        || raw.contains('\0')
    {
        return Err(NameError::InvalidEntryName);
    }
    Ok(())
}

impl_string_newtype!(EntryName, validate_entry_name);

/// Human readable label of a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceLabel(String);

fn validate_label(raw: &str) -> bool {
    !raw.trim().is_empty() && raw.len() <= LABEL_MAX_BYTES && !raw.chars().any(char::is_control)
}

fn validate_device_label(raw: &str) -> Result<(), NameError> {
    validate_label(raw)
        .then_some(())
        .ok_or(NameError::InvalidDeviceLabel)
}

impl_string_newtype!(DeviceLabel, validate_device_label);

/// Email address of a user
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

fn validate_email(raw: &str) -> Result<(), NameError> {
    if raw.len() > EMAIL_MAX_BYTES || raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(NameError::InvalidEmail);
    }
    match raw.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !domain.starts_with('.')
                && !domain.ends_with('.') =>
        {
            Ok(())
        }
        _ => Err(NameError::InvalidEmail),
    }
}

impl_string_newtype!(EmailAddress, validate_email);

/// Label part of a human handle, validated like a device label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HumanHandleLabel(String);

fn validate_human_handle_label(raw: &str) -> Result<(), NameError> {
    validate_label(raw)
        .then_some(())
        .ok_or(NameError::InvalidHumanHandleLabel)
}

impl_string_newtype!(HumanHandleLabel, validate_human_handle_label);

/// Identity of the person behind a user: an email and a display label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HumanHandle {
    email: EmailAddress,
    label: HumanHandleLabel,
}

impl HumanHandle {
    /// Build a human handle from its validated parts
    pub fn new(email: EmailAddress, label: HumanHandleLabel) -> Self {
        Self { email, label }
    }

    /// Build a human handle from raw strings
    pub fn from_raw(email: &str, label: &str) -> Result<Self, NameError> {
        Ok(Self {
            email: email.parse()?,
            label: label.parse()?,
        })
    }

    /// Email address
    pub fn email(&self) -> &EmailAddress {
        &self.email
    }

    /// Display label
    pub fn label(&self) -> &str {
        self.label.as_str()
    }
}

impl fmt::Display for HumanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.label, self.email)
    }
}

/// Boolean validators mirroring the parsing rules above
pub mod validators {
    use super::*;

    /// Whether `raw` is a valid entry name
    pub fn validate_entry_name(raw: &str) -> bool {
        super::validate_entry_name(raw).is_ok()
    }

    /// Whether `raw` is a valid human handle label
    pub fn validate_human_handle_label(raw: &str) -> bool {
        super::validate_human_handle_label(raw).is_ok()
    }

    /// Whether `raw` is a valid email address
    pub fn validate_email(raw: &str) -> bool {
        super::validate_email(raw).is_ok()
    }

    /// Whether `raw` is a valid device label
    pub fn validate_device_label(raw: &str) -> bool {
        super::validate_device_label(raw).is_ok()
    }

    /// Whether `raw` is a valid organization ID
    pub fn validate_organization_id(raw: &str) -> bool {
        super::validate_organization_id(raw).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name_rules() {
        assert!("foo.txt".parse::<EntryName>().is_ok());
        assert!("".parse::<EntryName>().is_err());
        assert!(".".parse::<EntryName>().is_err());
        assert!("..".parse::<EntryName>().is_err());
        assert!("a/b".parse::<EntryName>().is_err());
        assert!("a".repeat(255).parse::<EntryName>().is_ok());
        assert!("a".repeat(256).parse::<EntryName>().is_err());
    }

    #[test]
    fn test_organization_id_rules() {
        assert!("CoolOrg".parse::<OrganizationID>().is_ok());
        assert!("Cool-Org_2".parse::<OrganizationID>().is_ok());
        assert!("Cool Org".parse::<OrganizationID>().is_err());
        assert!("a".repeat(33).parse::<OrganizationID>().is_err());
    }

    #[test]
    fn test_email_rules() {
        assert!(validators::validate_email("alice@example.com"));
        assert!(!validators::validate_email("alice"));
        assert!(!validators::validate_email("@example.com"));
        assert!(!validators::validate_email("alice@"));
        assert!(!validators::validate_email("al ice@example.com"));
    }

    #[test]
    fn test_human_handle_display() {
        let handle = HumanHandle::from_raw("alice@example.com", "Alicey McAliceFace").unwrap();
        assert_eq!(handle.to_string(), "Alicey McAliceFace <alice@example.com>");
    }

    #[test]
    fn test_serde_rejects_invalid_names() {
        let raw = bincode::serialize(&"a/b".to_string()).unwrap();
        assert!(bincode::deserialize::<EntryName>(&raw).is_err());
    }
}
