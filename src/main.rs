// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bluetooth remote-control harness daemon.

use anyhow::{anyhow, bail, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bt_remote_harness::bluetooth::{Platform, SimulatedPlatform};
use bt_remote_harness::config::{Backend, Config};
use bt_remote_harness::events::EventBus;
use bt_remote_harness::rpc::RpcServer;
use bt_remote_harness::Harness;

/// Parse `--config <path>`, the only supported argument.
fn config_path_arg() -> Result<Option<PathBuf>> {
    let mut args = env::args().skip(1);
    let mut path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a path"))?;
                path = Some(PathBuf::from(value));
            }
            other => bail!("unknown argument: {}", other),
        }
    }
    Ok(path)
}

async fn create_platform(backend: Backend, bus: &EventBus) -> Result<Arc<dyn Platform>> {
    match backend {
        Backend::Simulated => {
            info!("Using simulated Bluetooth platform");
            Ok(Arc::new(SimulatedPlatform::new(bus.clone())))
        }
        #[cfg(feature = "bluez")]
        Backend::Bluez => {
            let platform = bt_remote_harness::bluetooth::BluezPlatform::new(bus.clone()).await?;
            Ok(Arc::new(platform))
        }
        #[cfg(not(feature = "bluez"))]
        Backend::Bluez => bail!("built without the `bluez` feature"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_arg()?;
    let config = Config::load(config_path.as_deref())?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(config.log.filter.parse()?))
        .init();

    info!(
        "Starting Bluetooth remote harness v{}...",
        env!("CARGO_PKG_VERSION")
    );
    info!("Configuration loaded");

    let bus = EventBus::new();
    let platform = create_platform(config.platform.backend, &bus).await?;
    let harness = Arc::new(Harness::new(bus, platform, &config));

    let server = RpcServer::bind(&config.server.listen_addr, harness.clone()).await?;
    info!("Ready.");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("RPC server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    harness.shutdown();
    info!("Bluetooth remote harness stopped");
    Ok(())
}
