//! `parsec3://` addresses
//!
//! ```text
//! parsec3://host[:port][?no_ssl=true]                                  server
//! parsec3://host/Org?p=<root verify key>                               organization
//! parsec3://host/Org?a=bootstrap_organization[&p=<token>]              bootstrap
//! parsec3://host/Org?a=claim_user|claim_device|claim_shamir_recovery&p=<token>
//! parsec3://host/Org?a=path&p=<workspace, key index, encrypted path>
//! parsec3://host/Org?a=pki_enrollment
//! ```
//!
//! Payloads are base64url without padding. `http(s)://host/redirect/...`
//! URLs are accepted as an alternate form of the same addresses.

use crate::crypto::VerifyKey;
use crate::ids::{BootstrapToken, InvitationToken, VlobID};
use crate::invite::InvitationType;
use crate::names::OrganizationID;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const PARSEC_SCHEME: &str = "parsec3";
const REDIRECT_PREFIX: &str = "/redirect";

/// Error returned by address parsing, no partial result is ever exposed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseParsecAddrError {
    /// The URL is malformed or does not denote a known address kind
    #[error("Invalid URL: {message}")]
    InvalidUrl {
        /// What is wrong with the URL
        message: String,
    },
}

fn invalid(message: impl Into<String>) -> ParseParsecAddrError {
    ParseParsecAddrError::InvalidUrl {
        message: message.into(),
    }
}

/// Address of a server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParsecAddr {
    hostname: String,
    port: Option<u16>,
    use_ssl: bool,
}

impl ParsecAddr {
    /// Build a server address, `port` defaults to 443/80 depending on `use_ssl`
    pub fn new(hostname: impl Into<String>, port: Option<u16>, use_ssl: bool) -> Self {
        let mut addr = Self {
            hostname: hostname.into(),
            port,
            use_ssl,
        };
        if addr.port == Some(addr.default_port()) {
            addr.port = None;
        }
        addr
    }

    /// Server hostname
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Server port, explicit or default
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.default_port())
    }

    /// Whether TLS is used
    pub fn use_ssl(&self) -> bool {
        self.use_ssl
    }

    fn default_port(&self) -> u16 {
        if self.use_ssl {
            443
        } else {
            80
        }
    }

    fn netloc(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.hostname, port),
            None => self.hostname.clone(),
        }
    }

    fn to_url_with(&self, path: &str, query: &[(&str, String)]) -> String {
        let mut url = format!("{PARSEC_SCHEME}://{}{}", self.netloc(), path);
        let mut pairs: Vec<(&str, String)> = query.to_vec();
        if !self.use_ssl {
            pairs.push(("no_ssl", "true".to_string()));
        }
        if !pairs.is_empty() {
            let encoded = pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&encoded);
        }
        url
    }

    /// `http(s)://` URL pointing at the server itself
    pub fn to_http_url(&self, path: Option<&str>) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}{}", self.netloc(), path.unwrap_or(""))
    }

    /// `http(s)://host/redirect/...` form of a `parsec3://` URL served by this server
    pub fn to_http_redirection_url(&self, parsec_url: &str) -> String {
        let rest = parsec_url
            .strip_prefix(&format!("{PARSEC_SCHEME}://{}", self.netloc()))
            .unwrap_or("");
        let rest = rest.replace("&no_ssl=true", "").replace("?no_ssl=true", "");
        self.to_http_url(Some(&format!("{REDIRECT_PREFIX}{rest}")))
    }
}

impl fmt::Display for ParsecAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url_with("", &[]))
    }
}

/// Address of an organization, carrying its root verify key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsecOrganizationAddr {
    server: ParsecAddr,
    organization_id: OrganizationID,
    root_verify_key: VerifyKey,
}

impl ParsecOrganizationAddr {
    /// Build an organization address
    pub fn new(server: ParsecAddr, organization_id: OrganizationID, root_verify_key: VerifyKey) -> Self {
        Self {
            server,
            organization_id,
            root_verify_key,
        }
    }

    /// Server hosting the organization
    pub fn server(&self) -> &ParsecAddr {
        &self.server
    }

    /// Organization ID
    pub fn organization_id(&self) -> &OrganizationID {
        &self.organization_id
    }

    /// Key signing the organization's root certificates
    pub fn root_verify_key(&self) -> &VerifyKey {
        &self.root_verify_key
    }
}

impl fmt::Display for ParsecOrganizationAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.server.to_url_with(
            &format!("/{}", self.organization_id),
            &[("p", URL_SAFE_NO_PAD.encode(self.root_verify_key.as_bytes()))],
        ))
    }
}

/// Address handed to the first user of an organization to bootstrap it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsecOrganizationBootstrapAddr {
    server: ParsecAddr,
    organization_id: OrganizationID,
    token: Option<BootstrapToken>,
}

impl ParsecOrganizationBootstrapAddr {
    /// Build a bootstrap address; spontaneous bootstrap uses no token
    pub fn new(server: ParsecAddr, organization_id: OrganizationID, token: Option<BootstrapToken>) -> Self {
        Self {
            server,
            organization_id,
            token,
        }
    }

    /// Server hosting the organization
    pub fn server(&self) -> &ParsecAddr {
        &self.server
    }

    /// Organization ID
    pub fn organization_id(&self) -> &OrganizationID {
        &self.organization_id
    }

    /// Bootstrap token, if the organization was created with one
    pub fn token(&self) -> Option<BootstrapToken> {
        self.token
    }

    /// Organization address once bootstrapped with `root_verify_key`
    pub fn generate_organization_addr(&self, root_verify_key: VerifyKey) -> ParsecOrganizationAddr {
        ParsecOrganizationAddr::new(self.server.clone(), self.organization_id.clone(), root_verify_key)
    }
}

impl fmt::Display for ParsecOrganizationBootstrapAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut query = vec![("a", "bootstrap_organization".to_string())];
        if let Some(token) = self.token {
            query.push(("p", URL_SAFE_NO_PAD.encode(token.as_bytes())));
        }
        f.write_str(
            &self
                .server
                .to_url_with(&format!("/{}", self.organization_id), &query),
        )
    }
}

/// Address of an invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsecInvitationAddr {
    server: ParsecAddr,
    organization_id: OrganizationID,
    invitation_type: InvitationType,
    token: InvitationToken,
}

impl ParsecInvitationAddr {
    /// Build an invitation address
    pub fn new(
        server: ParsecAddr,
        organization_id: OrganizationID,
        invitation_type: InvitationType,
        token: InvitationToken,
    ) -> Self {
        Self {
            server,
            organization_id,
            invitation_type,
            token,
        }
    }

    /// Server hosting the organization
    pub fn server(&self) -> &ParsecAddr {
        &self.server
    }

    /// Organization ID
    pub fn organization_id(&self) -> &OrganizationID {
        &self.organization_id
    }

    /// Kind of invitation
    pub fn invitation_type(&self) -> InvitationType {
        self.invitation_type
    }

    /// Invitation token
    pub fn token(&self) -> InvitationToken {
        self.token
    }

    fn action(&self) -> &'static str {
        match self.invitation_type {
            InvitationType::User => "claim_user",
            InvitationType::Device => "claim_device",
            InvitationType::ShamirRecovery => "claim_shamir_recovery",
        }
    }
}

impl fmt::Display for ParsecInvitationAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.server.to_url_with(
            &format!("/{}", self.organization_id),
            &[
                ("a", self.action().to_string()),
                ("p", URL_SAFE_NO_PAD.encode(self.token.as_bytes())),
            ],
        ))
    }
}

/// Link to a path within a workspace; the path is encrypted with the realm key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsecWorkspacePathAddr {
    server: ParsecAddr,
    organization_id: OrganizationID,
    workspace_id: VlobID,
    key_index: u64,
    encrypted_path: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct WorkspacePathPayload {
    workspace_id: VlobID,
    key_index: u64,
    #[serde(with = "serde_bytes")]
    encrypted_path: Vec<u8>,
}

impl ParsecWorkspacePathAddr {
    /// Build a workspace path address
    pub fn new(
        server: ParsecAddr,
        organization_id: OrganizationID,
        workspace_id: VlobID,
        key_index: u64,
        encrypted_path: Vec<u8>,
    ) -> Self {
        Self {
            server,
            organization_id,
            workspace_id,
            key_index,
            encrypted_path,
        }
    }

    /// Server hosting the organization
    pub fn server(&self) -> &ParsecAddr {
        &self.server
    }

    /// Organization ID
    pub fn organization_id(&self) -> &OrganizationID {
        &self.organization_id
    }

    /// Workspace the path belongs to
    pub fn workspace_id(&self) -> VlobID {
        self.workspace_id
    }

    /// Index of the realm key used to encrypt the path
    pub fn key_index(&self) -> u64 {
        self.key_index
    }

    /// Encrypted path, opaque without the realm key
    pub fn encrypted_path(&self) -> &[u8] {
        &self.encrypted_path
    }
}

impl fmt::Display for ParsecWorkspacePathAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = WorkspacePathPayload {
            workspace_id: self.workspace_id,
            key_index: self.key_index,
            encrypted_path: self.encrypted_path.clone(),
        };
        let raw = bincode::serialize(&payload).map_err(|_| fmt::Error)?;
        f.write_str(&self.server.to_url_with(
            &format!("/{}", self.organization_id),
            &[("a", "path".to_string()), ("p", URL_SAFE_NO_PAD.encode(raw))],
        ))
    }
}

/// Address used to start a PKI enrollment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsecPkiEnrollmentAddr {
    server: ParsecAddr,
    organization_id: OrganizationID,
}

impl ParsecPkiEnrollmentAddr {
    /// Build a PKI enrollment address
    pub fn new(server: ParsecAddr, organization_id: OrganizationID) -> Self {
        Self {
            server,
            organization_id,
        }
    }

    /// Server hosting the organization
    pub fn server(&self) -> &ParsecAddr {
        &self.server
    }

    /// Organization ID
    pub fn organization_id(&self) -> &OrganizationID {
        &self.organization_id
    }
}

impl fmt::Display for ParsecPkiEnrollmentAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.server.to_url_with(
            &format!("/{}", self.organization_id),
            &[("a", "pki_enrollment".to_string())],
        ).as_str())
    }
}

/// Any parsed address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedParsecAddr {
    /// Server only
    Server(ParsecAddr),
    /// Organization
    Organization(ParsecOrganizationAddr),
    /// Organization bootstrap
    OrganizationBootstrap(ParsecOrganizationBootstrapAddr),
    /// User invitation
    InvitationUser(ParsecInvitationAddr),
    /// Device invitation
    InvitationDevice(ParsecInvitationAddr),
    /// Shamir recovery invitation
    InvitationShamirRecovery(ParsecInvitationAddr),
    /// Link to a workspace path
    WorkspacePath(ParsecWorkspacePathAddr),
    /// PKI enrollment
    PkiEnrollment(ParsecPkiEnrollmentAddr),
}

fn decode_payload(raw: Option<&str>) -> Result<Vec<u8>, ParseParsecAddrError> {
    let raw = raw.ok_or_else(|| invalid("Missing mandatory `p` param"))?;
    URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|_| invalid("Invalid `p` param"))
}

fn normalize_redirection(url: &str) -> Result<String, ParseParsecAddrError> {
    let (use_ssl, rest) = if let Some(rest) = url.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (false, rest)
    } else {
        return Ok(url.to_string());
    };
    let (netloc, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
    let path = path
        .strip_prefix(REDIRECT_PREFIX)
        .ok_or_else(|| invalid("HTTP URLs must use the /redirect/ path"))?;
    let mut normalized = format!("{PARSEC_SCHEME}://{netloc}{path}");
    if !use_ssl {
        normalized.push(if path.contains('?') { '&' } else { '?' });
        normalized.push_str("no_ssl=true");
    }
    Ok(normalized)
}

/// Parse any kind of `parsec3://` (or redirection) URL
pub fn parse_parsec_addr(url: &str) -> Result<ParsedParsecAddr, ParseParsecAddrError> {
    let normalized = normalize_redirection(url)?;
    let parsed = url::Url::parse(&normalized).map_err(|e| invalid(e.to_string()))?;
    if parsed.scheme() != PARSEC_SCHEME {
        return Err(invalid(format!("Must start with `{PARSEC_SCHEME}://`")));
    }
    let hostname = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("Missing hostname"))?;

    let mut no_ssl = None;
    let mut action = None;
    let mut payload = None;
    for (key, value) in parsed.query_pairs() {
        let slot = match key.as_ref() {
            "no_ssl" => &mut no_ssl,
            "a" => &mut action,
            "p" => &mut payload,
            _ => continue,
        };
        if slot.replace(value.into_owned()).is_some() {
            return Err(invalid(format!("Multiple values for param `{key}`")));
        }
    }
    let use_ssl = match no_ssl.as_deref() {
        None | Some("false") => true,
        Some("true") => false,
        Some(_) => return Err(invalid("Invalid `no_ssl` param value (must be true or false)")),
    };
    let server = ParsecAddr::new(hostname, parsed.port(), use_ssl);

    let path = parsed.path().trim_matches('/');
    if path.is_empty() {
        return match action {
            None => Ok(ParsedParsecAddr::Server(server)),
            Some(_) => Err(invalid("Missing organization ID")),
        };
    }
    let organization_id: OrganizationID = path.parse().map_err(|_| invalid("Invalid organization ID"))?;

    let invitation = |invitation_type: InvitationType| -> Result<ParsecInvitationAddr, ParseParsecAddrError> {
        let raw = decode_payload(payload.as_deref())?;
        let bytes: [u8; 16] = raw.try_into().map_err(|_| invalid("Invalid invitation token"))?;
        Ok(ParsecInvitationAddr::new(
            server.clone(),
            organization_id.clone(),
            invitation_type,
            InvitationToken::from_bytes(bytes),
        ))
    };

    match action.as_deref() {
        None => {
            let raw = decode_payload(payload.as_deref())?;
            let root_verify_key = VerifyKey::try_from_bytes(&raw).map_err(|_| invalid("Invalid root verify key"))?;
            Ok(ParsedParsecAddr::Organization(ParsecOrganizationAddr::new(
                server,
                organization_id,
                root_verify_key,
            )))
        }
        Some("bootstrap_organization") => {
            let token = match payload.as_deref() {
                None | Some("") => None,
                Some(raw) => {
                    let raw = decode_payload(Some(raw))?;
                    let bytes: [u8; 16] = raw.try_into().map_err(|_| invalid("Invalid bootstrap token"))?;
                    Some(BootstrapToken::from_bytes(bytes))
                }
            };
            Ok(ParsedParsecAddr::OrganizationBootstrap(
                ParsecOrganizationBootstrapAddr::new(server, organization_id, token),
            ))
        }
        Some("claim_user") => Ok(ParsedParsecAddr::InvitationUser(invitation(InvitationType::User)?)),
        Some("claim_device") => Ok(ParsedParsecAddr::InvitationDevice(invitation(InvitationType::Device)?)),
        Some("claim_shamir_recovery") => Ok(ParsedParsecAddr::InvitationShamirRecovery(invitation(
            InvitationType::ShamirRecovery,
        )?)),
        Some("path") => {
            let raw = decode_payload(payload.as_deref())?;
            let decoded: WorkspacePathPayload =
                bincode::deserialize(&raw).map_err(|_| invalid("Invalid workspace path payload"))?;
            Ok(ParsedParsecAddr::WorkspacePath(ParsecWorkspacePathAddr::new(
                server,
                organization_id,
                decoded.workspace_id,
                decoded.key_index,
                decoded.encrypted_path,
            )))
        }
        Some("pki_enrollment") => Ok(ParsedParsecAddr::PkiEnrollment(ParsecPkiEnrollmentAddr::new(
            server,
            organization_id,
        ))),
        Some(other) => Err(invalid(format!("Unknown action `{other}`"))),
    }
}

macro_rules! impl_from_str {
    ($ty:ty, $($variant:ident)|+) => {
        impl FromStr for $ty {
            type Err = ParseParsecAddrError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match parse_parsec_addr(s)? {
                    $(ParsedParsecAddr::$variant(addr) => Ok(addr),)+
                    _ => Err(invalid(concat!("Not a ", stringify!($ty)))),
                }
            }
        }
    };
}

impl_from_str!(ParsecAddr, Server);
impl_from_str!(ParsecOrganizationAddr, Organization);
impl_from_str!(ParsecOrganizationBootstrapAddr, OrganizationBootstrap);
impl_from_str!(
    ParsecInvitationAddr,
    InvitationUser | InvitationDevice | InvitationShamirRecovery
);
impl_from_str!(ParsecWorkspacePathAddr, WorkspacePath);
impl_from_str!(ParsecPkiEnrollmentAddr, PkiEnrollment);

/// Bootstrap address of `organization_id` on the server `addr`
pub fn build_parsec_organization_bootstrap_addr(
    addr: ParsecAddr,
    organization_id: OrganizationID,
) -> ParsecOrganizationBootstrapAddr {
    ParsecOrganizationBootstrapAddr::new(addr, organization_id, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SigningKey;
    use assert_matches::assert_matches;

    fn server() -> ParsecAddr {
        ParsecAddr::new("parsec.example.com", None, true)
    }

    #[test]
    fn test_server_addr() {
        let addr: ParsecAddr = "parsec3://parsec.example.com".parse().unwrap();
        assert_eq!(addr, server());
        assert_eq!(addr.port(), 443);
        let addr: ParsecAddr = "parsec3://localhost:6777?no_ssl=true".parse().unwrap();
        assert!(!addr.use_ssl());
        assert_eq!(addr.port(), 6777);
        assert_eq!(addr.to_string(), "parsec3://localhost:6777?no_ssl=true");
        let addr: ParsecAddr = "parsec3://localhost:80?no_ssl=true".parse().unwrap();
        assert_eq!(addr.to_string(), "parsec3://localhost?no_ssl=true");
    }

    #[test]
    fn test_organization_addr_roundtrip() {
        let root = SigningKey::generate().verify_key();
        let addr = ParsecOrganizationAddr::new(server(), "CoolOrg".parse().unwrap(), root);
        let parsed = parse_parsec_addr(&addr.to_string()).unwrap();
        assert_eq!(parsed, ParsedParsecAddr::Organization(addr));
    }

    #[test]
    fn test_invitation_addr_roundtrip() {
        for invitation_type in [
            InvitationType::User,
            InvitationType::Device,
            InvitationType::ShamirRecovery,
        ] {
            let addr = ParsecInvitationAddr::new(
                server(),
                "CoolOrg".parse().unwrap(),
                invitation_type,
                InvitationToken::default_new(),
            );
            let parsed: ParsecInvitationAddr = addr.to_string().parse().unwrap();
            assert_eq!(parsed, addr);
        }
    }

    #[test]
    fn test_bootstrap_addr_with_and_without_token() {
        let org: OrganizationID = "CoolOrg".parse().unwrap();
        let spontaneous = build_parsec_organization_bootstrap_addr(server(), org.clone());
        assert_eq!(
            spontaneous.to_string(),
            "parsec3://parsec.example.com/CoolOrg?a=bootstrap_organization"
        );
        let with_token = ParsecOrganizationBootstrapAddr::new(server(), org, Some(BootstrapToken::default_new()));
        let parsed: ParsecOrganizationBootstrapAddr = with_token.to_string().parse().unwrap();
        assert_eq!(parsed, with_token);
    }

    #[test]
    fn test_workspace_path_addr_roundtrip() {
        let addr = ParsecWorkspacePathAddr::new(
            server(),
            "CoolOrg".parse().unwrap(),
            VlobID::default_new(),
            1,
            vec![1, 2, 3, 4],
        );
        let parsed: ParsecWorkspacePathAddr = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn test_http_redirection() {
        let addr = ParsecInvitationAddr::new(
            ParsecAddr::new("localhost", Some(6777), false),
            "CoolOrg".parse().unwrap(),
            InvitationType::User,
            InvitationToken::default_new(),
        );
        let http = addr.server().to_http_redirection_url(&addr.to_string());
        assert!(http.starts_with("http://localhost:6777/redirect/CoolOrg?"));
        let parsed: ParsecInvitationAddr = http.parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn test_invalid_urls() {
        for raw in [
            "",
            "https://parsec.example.com/CoolOrg",
            "parsec://parsec.example.com",
            "parsec3://parsec.example.com?no_ssl=maybe",
            "parsec3://parsec.example.com/Cool%20Org?p=abc",
            "parsec3://parsec.example.com/CoolOrg",
            "parsec3://parsec.example.com/CoolOrg?a=claim_user",
            "parsec3://parsec.example.com/CoolOrg?a=claim_user&p=AAAA",
            "parsec3://parsec.example.com/CoolOrg?a=unknown",
        ] {
            assert_matches!(parse_parsec_addr(raw), Err(ParseParsecAddrError::InvalidUrl { .. }), "{raw}");
        }
    }
}
