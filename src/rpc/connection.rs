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

//! Individual client connection handler.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::protocol::{
    from_line, to_line, ActiveLogDump, DisableParams, EnableParams, Method, PeerParams, Request,
    Response, SecureParams, SecurityResult, WaitConnectedParams, WaitSecurityParams,
};
use crate::error::Error;
use crate::security::{PairingEvent, PairingEventAnswer, PairingSession};
use crate::service::Harness;

/// Buffered events and answers per pairing stream.
const PAIRING_CHANNEL_SIZE: usize = 16;

type LineReader<S> = Lines<BufReader<ReadHalf<S>>>;

/// Handler for a single client connection.
///
/// Requests are answered one at a time, in order. An accepted `OnPairing`
/// request turns the connection into a pairing stream for the rest of its
/// lifetime.
pub struct ConnectionHandler<S> {
    stream: S,
    harness: Arc<Harness>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, harness: Arc<Harness>) -> Self {
        Self { stream, harness }
    }

    /// Run the connection handler.
    pub async fn run(self) -> Result<()> {
        info!("Connection handler started");

        let (reader, mut writer) = tokio::io::split(self.stream);
        let mut lines = BufReader::new(reader).lines();
        let harness = self.harness;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            debug!("Received: {}", line.trim());

            let request: Request = match from_line(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Malformed request: {}", e);
                    let err = Error::validation(format!("malformed request: {e}"));
                    send(&mut writer, &Response::error(None, &err)).await?;
                    continue;
                }
            };

            if request.method == Method::OnPairing {
                match harness.router().open() {
                    Ok(session) => {
                        send(&mut writer, &Response::ok(request.id, &Value::Null)?).await?;
                        return pairing_stream(session, request.id, lines, writer).await;
                    }
                    Err(e) => {
                        warn!("OnPairing rejected: {}", e);
                        send(&mut writer, &Response::error(Some(request.id), &e)).await?;
                        continue;
                    }
                }
            }

            let response = match call(&harness, &request).await {
                Ok(result) => Response::ok(request.id, &result)?,
                Err(e) => {
                    warn!("{} failed: {}", request.method.as_str(), e);
                    Response::error(Some(request.id), &e)
                }
            };
            send(&mut writer, &response).await?;
        }

        info!("Connection closed by remote");
        Ok(())
    }
}

/// Execute a unary request.
async fn call(harness: &Harness, request: &Request) -> crate::error::Result<Value> {
    debug!("Dispatching {} (id {})", request.method.as_str(), request.id);

    match request.method {
        Method::Secure => {
            let p: SecureParams = request.params()?;
            let outcome = harness
                .negotiator()
                .secure(&p.peer, p.transport, p.level)
                .await?;
            encode(SecurityResult { outcome })
        }
        Method::WaitSecurity => {
            let p: WaitSecurityParams = request.params()?;
            let outcome = harness.negotiator().wait_security(&p.peer, p.level).await?;
            encode(SecurityResult { outcome })
        }
        Method::Pair => {
            let p: PeerParams = request.params()?;
            harness.negotiator().pair(&p.peer)?;
            Ok(Value::Null)
        }
        Method::DeletePairing => {
            let p: PeerParams = request.params()?;
            harness.negotiator().delete_pairing(&p.peer).await?;
            Ok(Value::Null)
        }
        Method::Enable => {
            let p: EnableParams = request.params()?;
            harness
                .host()
                .enable(p.reason, &p.package_name, p.is_ble)
                .await?;
            encode(harness.host().adapter_state())
        }
        Method::Disable => {
            let p: DisableParams = request.params()?;
            harness.host().disable(p.reason, &p.package_name).await?;
            encode(harness.host().adapter_state())
        }
        Method::DumpActiveLog => {
            let log = harness.host().active_log();
            encode(ActiveLogDump {
                text: log.dump(),
                entries: log.entries(),
            })
        }
        Method::WaitConnected => {
            let p: WaitConnectedParams = request.params()?;
            harness.profiles().wait_connected(&p.peer, p.profile).await?;
            Ok(Value::Null)
        }
        Method::OnPairing => Err(Error::validation("OnPairing opens a stream")),
    }
}

/// Relay a pairing session over the connection until either side closes.
async fn pairing_stream<S>(
    session: PairingSession,
    id: u64,
    mut lines: LineReader<S>,
    mut writer: WriteHalf<S>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (answer_tx, answer_rx) = mpsc::channel::<PairingEventAnswer>(PAIRING_CHANNEL_SIZE);
    let (event_tx, mut event_rx) = mpsc::channel::<PairingEvent>(PAIRING_CHANNEL_SIZE);
    let session = tokio::spawn(session.run(answer_rx, event_tx));

    // An answer line that cannot be parsed ends the stream like a bad decision.
    let mut rejected: Option<Error> = None;

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                send(&mut writer, &event).await?;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("OnPairing: read error: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match from_line::<PairingEventAnswer>(&line) {
                    Ok(answer) => {
                        if answer_tx.send(answer).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        rejected = Some(Error::validation(format!("malformed pairing answer: {e}")));
                        break;
                    }
                }
            }
        }
    }

    // The session may be parked on a full event channel.
    drop(answer_tx);
    drop(event_rx);
    if rejected.is_some() {
        session.abort();
    }

    let outcome = match session.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => {
            error!("OnPairing session task failed: {}", e);
            return Ok(());
        }
    };

    if let Some(err) = rejected.or(outcome.err()) {
        // The client may already be gone.
        let _ = send(&mut writer, &Response::error(Some(id), &err)).await;
    }
    Ok(())
}

fn encode<T: Serialize>(value: T) -> crate::error::Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::platform(format!("encoding result: {e}")))
}

async fn send<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = to_line(value)?;
    debug!("Sending: {}", line.trim());
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
