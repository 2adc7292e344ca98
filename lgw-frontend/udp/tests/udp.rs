mod common;

use common::{init_tracing, TestServer};
use lgw_core::IoCounters;
use lgw_error::GwResult;
use lgw_frontend_udp::{
    packets::{Datr, Packet, PacketData, PacketType, PushPayload, RxPacket, Stat, TxAckPayload},
    serve, RateLimitingConfig, UdpConfig,
};
use lgw_models::{
    DataRate, DownlinkMessage, DownlinkPath, DownlinkSettings, Eui64, TxAckResult, TxRequest,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::UdpSocket, time::timeout};
use tokio_util::sync::CancellationToken;

const EUI: &str = "1122334455667788";

fn eui() -> Eui64 {
    EUI.parse().unwrap()
}

fn test_config() -> UdpConfig {
    UdpConfig {
        packet_handlers: 8,
        packet_buffer: 16,
        downlink_path_expires: Duration::from_millis(400),
        connection_expires: Duration::from_secs(5),
        connection_error_expires: Duration::from_millis(500),
        schedule_late_time: Duration::from_millis(800),
        addr_change_block: None,
        rate_limiting: RateLimitingConfig {
            enable: false,
            ..Default::default()
        },
    }
}

struct Harness {
    server: Arc<TestServer>,
    counters: Arc<IoCounters>,
    cancel: CancellationToken,
    addr: SocketAddr,
}

impl Harness {
    async fn start(server: TestServer, config: UdpConfig) -> Self {
        init_tracing();
        let server = Arc::new(server);
        let counters = Arc::new(IoCounters::default());
        let cancel = CancellationToken::new();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(serve(
            server.clone() as Arc<dyn lgw_core::GatewayServer>,
            socket,
            config,
            Arc::clone(&counters),
            cancel.clone(),
        ));
        Self {
            server,
            counters,
            cancel,
            addr,
        }
    }

    async fn client(&self) -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(self.addr).await.unwrap();
        socket
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn rxpk(tmst: u32) -> RxPacket {
    RxPacket {
        time: None,
        tmms: None,
        tmst,
        freq: 868.1,
        chan: 2,
        rfch: 0,
        stat: 1,
        modu: "LORA".to_string(),
        datr: Datr(DataRate::lora(7, 125_000)),
        codr: Some("4/5".to_string()),
        rssi: -35,
        lsnr: 5.1,
        size: 3,
        data: "AAEC".to_string(),
    }
}

fn push_data(token: u16, payload: PushPayload) -> Vec<u8> {
    Packet {
        protocol_version: 2,
        token,
        data: PacketData::PushData {
            eui: eui(),
            payload,
        },
    }
    .marshal()
    .unwrap()
}

fn pull_data(token: u16) -> Vec<u8> {
    Packet {
        protocol_version: 2,
        token,
        data: PacketData::PullData { eui: eui() },
    }
    .marshal()
    .unwrap()
}

async fn recv_packet(socket: &UdpSocket) -> GwResult<Packet> {
    let mut buf = [0u8; 65_536];
    let len = timeout(Duration::from_secs(3), socket.recv(&mut buf))
        .await
        .expect("timed out waiting for packet")?;
    Packet::unmarshal(&buf[..len])
}

#[tokio::test(flavor = "multi_thread")]
async fn push_data_is_acked_and_uplink_forwarded() {
    let harness = Harness::start(TestServer::default(), test_config()).await;
    let client = harness.client().await;

    client
        .send(&push_data(
            0x2A2B,
            PushPayload {
                rxpk: vec![rxpk(100)],
                stat: None,
            },
        ))
        .await
        .unwrap();

    let ack = recv_packet(&client).await.unwrap();
    assert_eq!(ack.packet_type(), PacketType::PushAck);
    assert_eq!(ack.token, 0x2A2B);
    assert_eq!(ack.protocol_version, 2);

    let conn = harness.server.wait_for_connection().await;
    let mut up_rx = conn.take_up().unwrap();
    let uplink = timeout(Duration::from_secs(2), up_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(uplink.rx_metadata[0].timestamp, 100);
    assert_eq!(uplink.settings.frequency, 868_100_000);
    assert_eq!(uplink.raw_payload, vec![0, 1, 2]);
    assert_eq!(conn.stats().uplink_count, 1);
    assert_eq!(conn.gateway().ids.gateway_id, format!("eui-{EUI}"));
}

#[tokio::test(flavor = "multi_thread")]
async fn stat_is_forwarded_as_status() {
    let harness = Harness::start(TestServer::default(), test_config()).await;
    let client = harness.client().await;

    client
        .send(&push_data(
            1,
            PushPayload {
                rxpk: Vec::new(),
                stat: Some(Stat {
                    rxnb: 7,
                    ..Default::default()
                }),
            },
        ))
        .await
        .unwrap();
    recv_packet(&client).await.unwrap();

    let conn = harness.server.wait_for_connection().await;
    let mut status_rx = conn.take_status().unwrap();
    let status = timeout(Duration::from_secs(2), status_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.metrics["rxnb"], 7.0);
    assert!(conn.last_status().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn downlink_roundtrip_with_tx_ack() {
    let harness = Harness::start(TestServer::default(), test_config()).await;
    let client = harness.client().await;

    // Uplink first: synchronizes the clock and yields the downlink path
    // token.
    let uplink_at = tokio::time::Instant::now();
    client
        .send(&push_data(
            1,
            PushPayload {
                rxpk: vec![rxpk(100)],
                stat: None,
            },
        ))
        .await
        .unwrap();
    assert_eq!(
        recv_packet(&client).await.unwrap().packet_type(),
        PacketType::PushAck
    );
    let conn = harness.server.wait_for_connection().await;
    let mut up_rx = conn.take_up().unwrap();
    let uplink = timeout(Duration::from_secs(2), up_rx.recv())
        .await
        .unwrap()
        .unwrap();

    // PULL_DATA opens the downlink path and claims it.
    client.send(&pull_data(2)).await.unwrap();
    assert_eq!(
        recv_packet(&client).await.unwrap().packet_type(),
        PacketType::PullAck
    );
    for _ in 0..100 {
        if harness.server.has_downlink_claim(&conn.gateway().ids) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(harness.server.has_downlink_claim(&conn.gateway().ids));

    // Send a class-A downlink anchored on the uplink. Without an observed
    // TX_ACK the frontend holds it until shortly before its TX time: the
    // downlink fires 2 s after the uplink and schedule_late_time is 800 ms,
    // so the write should land no earlier than ~1.2 s after the uplink.
    conn.send_down(DownlinkMessage {
        raw_payload: vec![0x60, 0x01, 0x02],
        correlation_ids: vec!["dl:1".to_string()],
        settings: DownlinkSettings::Request(TxRequest {
            downlink_paths: vec![DownlinkPath::UplinkToken(
                uplink.rx_metadata[0].uplink_token.clone(),
            )],
            rx1_delay: 2,
            rx1_data_rate_index: 5,
            rx1_frequency: 868_100_000,
            rx2_data_rate_index: 0,
            rx2_frequency: 869_525_000,
            frequency_plan_id: "EU_863_870".to_string(),
            ..Default::default()
        }),
    })
    .await
    .unwrap();

    let resp = recv_packet(&client).await.unwrap();
    assert!(
        uplink_at.elapsed() >= Duration::from_millis(1_000),
        "downlink should have been scheduled late, arrived {:?} after the uplink",
        uplink_at.elapsed()
    );
    assert_eq!(resp.packet_type(), PacketType::PullResp);
    let txpk = match resp.data {
        PacketData::PullResp { payload } => payload.txpk,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(txpk.tmst, Some(100 + 2_000_000));
    assert_eq!(txpk.datr, Datr(DataRate::lora(7, 125_000)));
    assert!(txpk.ipol);

    // Acknowledge with the stamped token; the ack correlates back.
    let mut raw = Packet {
        protocol_version: 2,
        token: resp.token,
        data: PacketData::TxAck {
            eui: eui(),
            payload: Some(TxAckPayload::default()),
        },
    }
    .marshal()
    .unwrap();
    client.send(&raw).await.unwrap();
    let mut ack_rx = conn.take_tx_ack().unwrap();
    let ack = timeout(Duration::from_secs(2), ack_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ack.result, TxAckResult::Success);
    assert_eq!(ack.correlation_ids, vec!["dl:1".to_string()]);
    assert!(conn.received_tx_ack());
    assert!(conn.rtt().stats(10, chrono::Utc::now()).is_some());

    // An unknown token still forwards, with empty correlation ids.
    raw = Packet {
        protocol_version: 2,
        token: resp.token.wrapping_add(1000),
        data: PacketData::TxAck {
            eui: eui(),
            payload: None,
        },
    }
    .marshal()
    .unwrap();
    client.send(&raw).await.unwrap();
    let ack = timeout(Duration::from_secs(2), ack_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(ack.correlation_ids.is_empty());

    // The gateway has proven it acknowledges downlinks, so subsequent
    // downlinks are handed over just-in-time instead of being held back.
    let sent_at = tokio::time::Instant::now();
    conn.send_down(DownlinkMessage {
        raw_payload: vec![0x60, 0x03],
        correlation_ids: vec!["dl:2".to_string()],
        settings: DownlinkSettings::Request(TxRequest {
            downlink_paths: vec![DownlinkPath::UplinkToken(
                uplink.rx_metadata[0].uplink_token.clone(),
            )],
            rx1_delay: 2,
            rx1_data_rate_index: 5,
            rx1_frequency: 868_100_000,
            rx2_data_rate_index: 0,
            rx2_frequency: 869_525_000,
            frequency_plan_id: "EU_863_870".to_string(),
            ..Default::default()
        }),
    })
    .await
    .unwrap();
    let resp = recv_packet(&client).await.unwrap();
    assert_eq!(resp.packet_type(), PacketType::PullResp);
    assert!(
        sent_at.elapsed() < Duration::from_millis(800),
        "JIT downlink should not be held back, took {:?}",
        sent_at.elapsed()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn downlink_path_expires_and_reclaims() {
    let harness = Harness::start(TestServer::default(), test_config()).await;
    let client = harness.client().await;

    client.send(&pull_data(1)).await.unwrap();
    recv_packet(&client).await.unwrap();
    let conn = harness.server.wait_for_connection().await;
    for _ in 0..100 {
        if harness.server.has_downlink_claim(&conn.gateway().ids) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(harness.server.has_downlink_claim(&conn.gateway().ids));

    // Stop sending PULL_DATA; the dispatcher must exit and unclaim within
    // downlink_path_expires plus one ticker period.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if !harness.server.has_downlink_claim(&conn.gateway().ids) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "downlink claim was not released"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // A fresh PULL_DATA re-claims.
    client.send(&pull_data(2)).await.unwrap();
    recv_packet(&client).await.unwrap();
    for _ in 0..100 {
        if harness.server.has_downlink_claim(&conn.gateway().ids) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("downlink path was not re-claimed");
}

#[tokio::test(flavor = "multi_thread")]
async fn per_gateway_rate_limit_drops_floods() {
    let mut config = test_config();
    config.rate_limiting = RateLimitingConfig {
        enable: true,
        messages: 3,
        threshold: Duration::from_secs(1),
    };
    let harness = Harness::start(TestServer::default(), config).await;
    let client = harness.client().await;

    for token in 0..4u16 {
        client
            .send(&push_data(
                token,
                PushPayload {
                    rxpk: vec![rxpk(token as u32)],
                    stat: None,
                },
            ))
            .await
            .unwrap();
        // ACKs are written before the firewall; consume them.
        recv_packet(&client).await.unwrap();
    }

    let conn = harness.server.wait_for_connection().await;
    let mut up_rx = conn.take_up().unwrap();
    let mut received = 0;
    while timeout(Duration::from_millis(300), up_rx.recv()).await.is_ok() {
        received += 1;
    }
    assert_eq!(received, 3, "expected the fourth packet to be rate limited");
    assert!(
        harness
            .counters
            .rate_limited
            .load(std::sync::atomic::Ordering::Relaxed)
            >= 1
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn addr_change_within_block_window_is_dropped() {
    let mut config = test_config();
    config.addr_change_block = Some(Duration::from_secs(5));
    let harness = Harness::start(TestServer::default(), config).await;
    let client_a = harness.client().await;
    // A second loopback address so the source IP genuinely changes.
    let client_b = UdpSocket::bind("127.0.0.2:0").await.unwrap();
    client_b.connect(harness.addr).await.unwrap();

    client_a
        .send(&push_data(
            1,
            PushPayload {
                rxpk: vec![rxpk(1)],
                stat: None,
            },
        ))
        .await
        .unwrap();
    recv_packet(&client_a).await.unwrap();
    let conn = harness.server.wait_for_connection().await;
    let mut up_rx = conn.take_up().unwrap();
    timeout(Duration::from_secs(2), up_rx.recv())
        .await
        .unwrap()
        .unwrap();

    // A different source port on the same IP passes.
    let client_a2 = harness.client().await;
    client_a2
        .send(&push_data(
            2,
            PushPayload {
                rxpk: vec![rxpk(2)],
                stat: None,
            },
        ))
        .await
        .unwrap();
    recv_packet(&client_a2).await.unwrap();
    timeout(Duration::from_secs(2), up_rx.recv())
        .await
        .unwrap()
        .unwrap();

    // The same EUI from a different IP inside the block window is dropped.
    client_b
        .send(&push_data(
            3,
            PushPayload {
                rxpk: vec![rxpk(3)],
                stat: None,
            },
        ))
        .await
        .unwrap();
    recv_packet(&client_b).await.unwrap();
    assert!(
        timeout(Duration::from_millis(400), up_rx.recv()).await.is_err(),
        "uplink from the blocked address should not be forwarded"
    );
    for _ in 0..100 {
        if harness
            .counters
            .firewall_drops
            .load(std::sync::atomic::Ordering::Relaxed)
            >= 1
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("firewall drop was not counted");
}
