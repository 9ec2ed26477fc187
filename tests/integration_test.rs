//! Integration tests for the full harness flow.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use bt_remote_harness::bluetooth::{
    Address, AddressType, BondResponse, DeviceType, PeerIdentity, PlatformCommand,
    SimulatedPlatform, Transport,
};
use bt_remote_harness::config::Config;
use bt_remote_harness::events::EventBus;
use bt_remote_harness::rpc::{Response, RpcServer};
use bt_remote_harness::security::{
    raw_variant, ClassicLevel, LeLevel, PairingDecision, PairingEventAnswer, PairingVariant,
    SecurityLevel, SecurityOutcome,
};
use bt_remote_harness::{Error, Harness};

fn le_peer() -> PeerIdentity {
    PeerIdentity::le(Address::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]), AddressType::Random)
}

fn classic_peer() -> PeerIdentity {
    PeerIdentity::classic(Address::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x77]))
}

fn harness() -> (Arc<SimulatedPlatform>, Arc<Harness>) {
    let bus = EventBus::new();
    let platform = Arc::new(SimulatedPlatform::new(bus.clone()));
    let harness = Arc::new(Harness::new(bus, platform.clone(), &Config::default()));
    (platform, harness)
}

#[tokio::test]
async fn test_secure_with_manual_passkey_entry() {
    let (platform, harness) = harness();
    platform.add_device(
        &le_peer(),
        DeviceType::Le,
        BondResponse::Prompt {
            variant: raw_variant::PIN,
            key: None,
            encrypt: true,
        },
    );

    let session = harness.router().open().unwrap();
    let (answer_tx, answer_rx) = mpsc::channel(4);
    let (event_tx, mut event_rx) = mpsc::channel(4);
    let session = tokio::spawn(session.run(answer_rx, event_tx));

    let secure = {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .negotiator()
                .secure(&le_peer(), Transport::Le, SecurityLevel::Le(LeLevel::Level3))
                .await
        })
    };

    let event = event_rx.recv().await.unwrap();
    assert_eq!(event.variant, PairingVariant::PasskeyEntryRequest);
    answer_tx
        .send(PairingEventAnswer {
            event,
            decision: PairingDecision::Passkey(123),
        })
        .await
        .unwrap();

    assert_eq!(secure.await.unwrap().unwrap(), SecurityOutcome::Reached);
    assert!(platform.commands().contains(&PlatformCommand::SetPin {
        peer: le_peer(),
        pin: b"000123".to_vec(),
    }));

    drop(answer_tx);
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_secure_with_auto_confirm() {
    let (platform, harness) = harness();
    platform.add_device(
        &classic_peer(),
        DeviceType::Classic,
        BondResponse::Prompt {
            variant: raw_variant::CONSENT,
            key: None,
            encrypt: true,
        },
    );

    let outcome = harness
        .negotiator()
        .secure(
            &classic_peer(),
            Transport::BrEdr,
            SecurityLevel::Classic(ClassicLevel::Level2),
        )
        .await
        .unwrap();
    assert_eq!(outcome, SecurityOutcome::Reached);
}

#[tokio::test]
async fn test_shutdown_completes_pending_waits() {
    let (_platform, harness) = harness();

    let wait = {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .negotiator()
                .wait_security(&le_peer(), SecurityLevel::Le(LeLevel::Level2))
                .await
        })
    };
    // Auto-confirm and adapter tracking hold two subscriptions already.
    while harness.bus().subscriber_count() < 3 {
        tokio::task::yield_now().await;
    }

    harness.shutdown();
    assert!(matches!(wait.await.unwrap(), Err(Error::Closed)));
}

struct RpcClient {
    lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    next_id: u64,
}

impl RpcClient {
    async fn connect(harness: Arc<Harness>) -> Self {
        let server = RpcServer::bind("127.0.0.1:0", harness).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
            next_id: 1,
        }
    }

    async fn call(&mut self, method: &str, params: Value) -> Response {
        let id = self.next_id;
        self.next_id += 1;

        let line = format!("{}\n", json!({"id": id, "method": method, "params": params}));
        self.writer.write_all(line.as_bytes()).await.unwrap();

        let reply = self.lines.next_line().await.unwrap().unwrap();
        let response: Response = serde_json::from_str(&reply).unwrap();
        assert_eq!(response.id, Some(id));
        response
    }
}

#[tokio::test]
async fn test_rpc_server_round_trip() {
    let (platform, harness) = harness();
    platform.add_device(&classic_peer(), DeviceType::Classic, BondResponse::Bond { encrypt: false });
    let mut client = RpcClient::connect(harness).await;

    let response = client
        .call(
            "Enable",
            json!({"reason": "SYSTEM_BOOT", "package_name": "com.example.tests"}),
        )
        .await;
    assert!(response.is_ok());
    assert_eq!(response.result.unwrap(), "ON");

    let peer = serde_json::to_value(classic_peer()).unwrap();
    let response = client
        .call(
            "Secure",
            json!({"peer": peer, "transport": "BR_EDR", "level": {"classic": "LEVEL2"}}),
        )
        .await;
    assert_eq!(response.result.unwrap()["outcome"], "not_reached");

    let response = client.call("DeletePairing", json!({"peer": peer})).await;
    assert!(response.is_ok());

    let response = client
        .call(
            "WaitSecurity",
            json!({"peer": peer, "level": {"le": "LE_LEVEL4"}}),
        )
        .await;
    assert_eq!(response.error.unwrap().kind, "validation");

    let response = client.call("DumpActiveLog", Value::Null).await;
    let result = response.result.unwrap();
    let text = result["text"].as_str().unwrap();
    assert!(text.starts_with("Enable log:\n"));
    assert_eq!(text.lines().count(), 2);
    assert_eq!(result["entries"][0]["reason_code"], 6);
    assert_eq!(result["entries"][0]["package_name"], "com.example.tests");
}
