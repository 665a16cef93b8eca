//! Ready-made organizations to run tests against
//!
//! - `empty`: an organization waiting to be bootstrapped
//! - `minimal`: bootstrapped by alice (admin)
//! - `coolorg`: alice (admin, two devices), bob (standard) and mallory
//!   (outsider); workspace `wksp1` owned by alice and shared with bob as
//!   reader; a pending user invitation for zack and a pending device
//!   invitation for alice
//!
//! Everything is built through the regular server commands, so the server
//! state is exactly what a real client would have produced.

use crate::server::TestbedServer;
use anyhow::{anyhow, bail};
use parking_lot::Mutex;
use parsec_connection::protocol::{CertificateRep, InviteNewRep};
use parsec_connection::{anonymous_cmds, authenticated_cmds, AuthenticatedCmds, ConnectionError};
use parsec_types::{
    AnyCertificate, BootstrapToken, CertificateAuthor, DateTime, DeviceCertificate, DevicePurpose,
    EmailAddress, HumanHandle, InvitationToken, LocalDevice, OrganizationID, ParsecOrganizationAddr,
    ParsecOrganizationBootstrapAddr, RealmKeysBundle, RealmNameCertificate, RealmRole,
    RealmRoleCertificate, SigningKey, UserCertificate, UserProfile, VlobID,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Password protecting device key files created in tests
pub const TESTBED_PASSWORD: &str = "P@ssw0rd.";

/// A workspace created by the environment
#[derive(Debug, Clone)]
pub struct TestbedWorkspace {
    pub realm_id: VlobID,
    pub name: String,
    pub keys_bundle: RealmKeysBundle,
}

/// A hosted organization and the devices of its members
pub struct TestbedEnv {
    pub server: TestbedServer,
    pub organization_id: OrganizationID,
    pub bootstrap_token: BootstrapToken,
    pub root_signing_key: SigningKey,
    devices: BTreeMap<String, Arc<LocalDevice>>,
    workspaces: BTreeMap<String, TestbedWorkspace>,
    invitations: BTreeMap<String, InvitationToken>,
    last_timestamp: Mutex<Option<DateTime>>,
}

impl TestbedEnv {
    /// Organization not bootstrapped yet
    pub fn empty() -> anyhow::Result<Self> {
        let server = TestbedServer::new();
        let organization_id: OrganizationID = "CoolOrg".parse()?;
        let bootstrap_token = BootstrapToken::default_new();
        server.create_organization(organization_id.clone(), Some(bootstrap_token));
        Ok(Self {
            server,
            organization_id,
            bootstrap_token,
            root_signing_key: SigningKey::generate(),
            devices: BTreeMap::new(),
            workspaces: BTreeMap::new(),
            invitations: BTreeMap::new(),
            last_timestamp: Mutex::new(None),
        })
    }

    pub async fn minimal() -> anyhow::Result<Self> {
        let mut env = Self::empty()?;
        env.bootstrap("alice", "alice@example.com", "Alicey McAliceFace", "dev1")
            .await?;
        Ok(env)
    }

    pub async fn coolorg() -> anyhow::Result<Self> {
        let mut env = Self::minimal().await?;
        let alice = env.device("alice")?;

        env.new_device(&alice, "alice2", "dev2").await?;
        env.new_user(&alice, "bob", "bob@example.com", "Boby McBobFace", UserProfile::Standard)
            .await?;
        env.new_user(
            &alice,
            "mallory",
            "mallory@example.com",
            "Malloryy McMalloryFace",
            UserProfile::Outsider,
        )
        .await?;

        env.new_workspace(&alice, "wksp1").await?;
        let bob = env.device("bob")?;
        env.share_workspace(&alice, "wksp1", &bob, RealmRole::Reader).await?;

        let cmds = env.cmds(&alice)?;
        let zack = "zack@example.invalid".parse::<EmailAddress>()?;
        let token = match cmds.invite_new_user(zack, false).await? {
            InviteNewRep::Ok { token, .. } => token,
            rep => bail!("Cannot invite zack: {rep:?}"),
        };
        env.invitations.insert("zack".to_owned(), token);
        let token = match cmds.invite_new_device(false).await? {
            InviteNewRep::Ok { token, .. } => token,
            rep => bail!("Cannot invite a new device for alice: {rep:?}"),
        };
        env.invitations.insert("alice_new_device".to_owned(), token);

        tracing::debug!(organization_id = %env.organization_id, "Testbed coolorg ready");
        Ok(env)
    }

    pub fn organization_addr(&self) -> ParsecOrganizationAddr {
        ParsecOrganizationAddr::new(
            self.server.addr().clone(),
            self.organization_id.clone(),
            self.root_signing_key.verify_key(),
        )
    }

    pub fn bootstrap_addr(&self) -> ParsecOrganizationBootstrapAddr {
        ParsecOrganizationBootstrapAddr::new(
            self.server.addr().clone(),
            self.organization_id.clone(),
            Some(self.bootstrap_token),
        )
    }

    /// Device by its testbed name (`alice`, `alice2`, `bob`, ...)
    pub fn device(&self, name: &str) -> anyhow::Result<Arc<LocalDevice>> {
        self.devices
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("No device `{name}` in this testbed"))
    }

    pub fn workspace(&self, name: &str) -> anyhow::Result<&TestbedWorkspace> {
        self.workspaces
            .get(name)
            .ok_or_else(|| anyhow!("No workspace `{name}` in this testbed"))
    }

    pub fn invitation(&self, name: &str) -> anyhow::Result<InvitationToken> {
        self.invitations
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("No invitation `{name}` in this testbed"))
    }

    pub fn cmds(&self, device: &LocalDevice) -> anyhow::Result<Arc<dyn AuthenticatedCmds>> {
        Ok(authenticated_cmds(
            self.server.addr(),
            &self.organization_id,
            device.device_id,
        )?)
    }

    /// Strictly increasing timestamps for the certificates issued here
    fn next_timestamp(&self) -> DateTime {
        let mut last = self.last_timestamp.lock();
        let mut now = self.server.time_provider().now();
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + chrono::Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }

    /// Submit certificates built for a timestamp, retrying if the server requires a newer one
    async fn submit<F, Fut>(&self, what: &str, build_and_send: F) -> anyhow::Result<()>
    where
        F: Fn(DateTime) -> Fut,
        Fut: Future<Output = Result<CertificateRep, ConnectionError>>,
    {
        for _ in 0..3 {
            let timestamp = self.next_timestamp();
            match build_and_send(timestamp).await? {
                CertificateRep::Ok => return Ok(()),
                CertificateRep::RequireGreaterTimestamp { strictly_greater_than } => {
                    *self.last_timestamp.lock() = Some(strictly_greater_than);
                }
                rep => bail!("Cannot {what}: {rep:?}"),
            }
        }
        bail!("Cannot {what}: server keeps requiring a greater timestamp")
    }

    pub async fn bootstrap(&mut self, name: &str, email: &str, label: &str, device_label: &str) -> anyhow::Result<Arc<LocalDevice>> {
        let device = LocalDevice::generate_new_device(
            self.organization_addr(),
            UserProfile::Admin,
            HumanHandle::from_raw(email, label)?,
            device_label.parse()?,
        );
        let cmds = anonymous_cmds(self.server.addr(), &self.organization_id)?;
        self.submit("bootstrap organization", |timestamp| {
            let user = AnyCertificate::User(UserCertificate {
                author: CertificateAuthor::Root,
                timestamp,
                user_id: device.user_id,
                human_handle: device.human_handle.clone(),
                public_key: device.private_key.public_key(),
                profile: UserProfile::Admin,
            })
            .dump_and_sign(&self.root_signing_key);
            let device_certificate = AnyCertificate::Device(DeviceCertificate {
                author: CertificateAuthor::Root,
                timestamp,
                user_id: device.user_id,
                device_id: device.device_id,
                device_label: device.device_label.clone(),
                verify_key: device.signing_key.verify_key(),
                purpose: DevicePurpose::Standard,
            })
            .dump_and_sign(&self.root_signing_key);
            let cmds = cmds.clone();
            let root_verify_key = self.root_signing_key.verify_key();
            let token = Some(self.bootstrap_token);
            async move {
                cmds.organization_bootstrap(token, root_verify_key, user, device_certificate)
                    .await
            }
        })
        .await?;
        let device = Arc::new(device);
        self.devices.insert(name.to_owned(), device.clone());
        Ok(device)
    }

    pub async fn new_user(
        &mut self,
        author: &LocalDevice,
        name: &str,
        email: &str,
        label: &str,
        profile: UserProfile,
    ) -> anyhow::Result<Arc<LocalDevice>> {
        let device = LocalDevice::generate_new_device(
            self.organization_addr(),
            profile,
            HumanHandle::from_raw(email, label)?,
            "dev1".parse()?,
        );
        let cmds = self.cmds(author)?;
        self.submit("create user", |timestamp| {
            let user_certificate = AnyCertificate::User(UserCertificate {
                author: CertificateAuthor::Device(author.device_id),
                timestamp,
                user_id: device.user_id,
                human_handle: device.human_handle.clone(),
                public_key: device.private_key.public_key(),
                profile,
            })
            .dump_and_sign(&author.signing_key);
            let device_certificate = device_certificate(author, &device, timestamp);
            let cmds = cmds.clone();
            async move { cmds.user_create(user_certificate, device_certificate).await }
        })
        .await?;
        let device = Arc::new(device);
        self.devices.insert(name.to_owned(), device.clone());
        Ok(device)
    }

    pub async fn new_device(&mut self, author: &LocalDevice, name: &str, device_label: &str) -> anyhow::Result<Arc<LocalDevice>> {
        let device = author.new_device_for_same_user(device_label.parse()?);
        let cmds = self.cmds(author)?;
        self.submit("create device", |timestamp| {
            let certificate = device_certificate(author, &device, timestamp);
            let cmds = cmds.clone();
            async move { cmds.device_create(certificate).await }
        })
        .await?;
        let device = Arc::new(device);
        self.devices.insert(name.to_owned(), device.clone());
        Ok(device)
    }

    pub async fn new_workspace(&mut self, owner: &LocalDevice, name: &str) -> anyhow::Result<TestbedWorkspace> {
        let realm_id = VlobID::default_new();
        let keys_bundle = RealmKeysBundle::generate(realm_id);
        let (key_index, key) = keys_bundle
            .current_key()
            .ok_or_else(|| anyhow!("Empty keys bundle"))?;
        let encrypted_name = key.encrypt(name.as_bytes());
        let cmds = self.cmds(owner)?;

        self.submit("create realm", |timestamp| {
            let certificate = AnyCertificate::RealmRole(RealmRoleCertificate {
                author: owner.device_id,
                timestamp,
                realm_id,
                user_id: owner.user_id,
                role: Some(RealmRole::Owner),
            })
            .dump_and_sign(&owner.signing_key);
            let access = keys_bundle.seal_for(&owner.private_key.public_key());
            let cmds = cmds.clone();
            async move { cmds.realm_create(certificate, access).await }
        })
        .await?;
        self.submit("name realm", |timestamp| {
            let certificate = AnyCertificate::RealmName(RealmNameCertificate {
                author: owner.device_id,
                timestamp,
                realm_id,
                key_index,
                encrypted_name: encrypted_name.clone(),
            })
            .dump_and_sign(&owner.signing_key);
            let cmds = cmds.clone();
            async move { cmds.realm_rename(certificate).await }
        })
        .await?;

        let workspace = TestbedWorkspace {
            realm_id,
            name: name.to_owned(),
            keys_bundle,
        };
        self.workspaces.insert(name.to_owned(), workspace.clone());
        Ok(workspace)
    }

    pub async fn share_workspace(
        &self,
        author: &LocalDevice,
        workspace: &str,
        recipient: &LocalDevice,
        role: RealmRole,
    ) -> anyhow::Result<()> {
        let workspace = self.workspace(workspace)?;
        let cmds = self.cmds(author)?;
        self.submit("share realm", |timestamp| {
            let certificate = AnyCertificate::RealmRole(RealmRoleCertificate {
                author: author.device_id,
                timestamp,
                realm_id: workspace.realm_id,
                user_id: recipient.user_id,
                role: Some(role),
            })
            .dump_and_sign(&author.signing_key);
            let access = workspace.keys_bundle.seal_for(&recipient.private_key.public_key());
            let cmds = cmds.clone();
            async move { cmds.realm_share(certificate, access).await }
        })
        .await
    }
}

fn device_certificate(author: &LocalDevice, device: &LocalDevice, timestamp: DateTime) -> Vec<u8> {
    AnyCertificate::Device(DeviceCertificate {
        author: CertificateAuthor::Device(author.device_id),
        timestamp,
        user_id: device.user_id,
        device_id: device.device_id,
        device_label: device.device_label.clone(),
        verify_key: device.signing_key.verify_key(),
        purpose: DevicePurpose::Standard,
    })
    .dump_and_sign(&author.signing_key)
}
