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

//! TCP server accepting RPC clients.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::connection::ConnectionHandler;
use crate::service::Harness;

/// JSON-lines RPC server.
pub struct RpcServer {
    listener: TcpListener,
    harness: Arc<Harness>,
}

impl RpcServer {
    /// Bind the listening socket.
    pub async fn bind(addr: &str, harness: Arc<Harness>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {}", addr))?;
        info!("RPC server listening on {}", listener.local_addr()?);

        Ok(Self { listener, harness })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Each connection runs on its own task.
    pub async fn run(self) -> Result<()> {
        info!("Waiting for connections...");

        loop {
            match self.listener.accept().await {
                Ok((stream, remote_addr)) => {
                    info!("Connection from: {}", remote_addr);
                    let handler = ConnectionHandler::new(stream, self.harness.clone());

                    tokio::spawn(async move {
                        if let Err(e) = handler.run().await {
                            error!("Connection handler error: {}", e);
                        }
                        info!("Connection from {} finished", remote_addr);
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}
