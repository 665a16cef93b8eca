#![allow(dead_code)]

use libparsec::{client_list_users, client_start_with_device, ClientConfig, DeviceSaveStrategy, Handle};
use parsec_testbed::{TestbedEnv, TESTBED_PASSWORD};
use parsec_types::{EntryName, FsPath};
use std::path::Path;
use std::sync::Arc;

pub fn config(dir: &Path) -> Arc<ClientConfig> {
    Arc::new(ClientConfig::with_dirs(
        dir.join("config"),
        dir.join("data"),
        dir.join("mountpoints"),
    ))
}

pub fn password_strategy() -> DeviceSaveStrategy {
    DeviceSaveStrategy::Password {
        password: TESTBED_PASSWORD.to_owned(),
    }
}

/// Client handle for a testbed device, certificates already fetched
pub async fn start_client(env: &TestbedEnv, name: &str, dir: &Path) -> Handle {
    let device = env.device(name).unwrap();
    let client = client_start_with_device(config(dir), device).await.unwrap();
    client_list_users(client, false).await.unwrap();
    client
}

pub fn path(raw: &str) -> FsPath {
    raw.parse().unwrap()
}

pub fn name(raw: &str) -> EntryName {
    raw.parse().unwrap()
}
