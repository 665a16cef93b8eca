#![allow(dead_code)]

use parsec_client::{Client, ClientConfig};
use parsec_device_loader::DeviceSaveStrategy;
use parsec_testbed::{TestbedEnv, TESTBED_PASSWORD};
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

/// Start a client for a testbed device, with every certificate fetched
pub async fn start_client(env: &TestbedEnv, name: &str, dir: &Path) -> Arc<Client> {
    let device = env.device(name).unwrap();
    let client = Client::start_with_device(config(dir), device).await.unwrap();
    client
        .certificates()
        .poll_server_for_new_certificates()
        .await
        .unwrap();
    client
}
