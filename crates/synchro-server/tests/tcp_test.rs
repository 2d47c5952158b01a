//! End-to-end tests over TCP

use std::{net::SocketAddr, time::Duration};

use hex_literal::hex;
use synchro_server::{RequestHeader, Server, ServerRuntimeConfig};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use zerocopy::IntoBytes;

const MAJOR: u8 = 130;

async fn start_server(max_request_bytes: usize) -> SocketAddr {
    let config = ServerRuntimeConfig {
        bind_address: "127.0.0.1:0".to_string(),
        max_request_bytes,
        ..Default::default()
    };
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        Self { stream: TcpStream::connect(addr).await.unwrap() }
    }

    async fn send(&mut self, major: u8, minor: u8, body: &[u8]) {
        let header = RequestHeader::new(major, minor, body.len()).unwrap();
        self.stream.write_all(header.as_bytes()).await.unwrap();
        self.stream.write_all(body).await.unwrap();
    }

    async fn read_packet(&mut self) -> [u8; 32] {
        let mut packet = [0u8; 32];
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_exact(&mut packet))
            .await
            .unwrap()
            .unwrap();
        packet
    }

    async fn read_extra(&mut self, len: usize) -> Vec<u8> {
        let mut extra = vec![0u8; len];
        self.stream.read_exact(&mut extra).await.unwrap();
        extra
    }
}

fn counter_body(id: u32, value: i64) -> Vec<u8> {
    let mut body = id.to_be_bytes().to_vec();
    body.extend_from_slice(&value.to_be_bytes());
    body
}

#[tokio::test]
async fn initialize_and_list_system_counters() {
    let addr = start_server(1024).await;
    let mut client = TestClient::connect(addr).await;

    client.send(MAJOR, 0, &[3, 1, 0, 0]).await;
    let reply = client.read_packet().await;
    assert_eq!(&reply[..10], &hex!("01 00 0001 00000000 03 01"));

    client.send(MAJOR, 1, &[]).await;
    let reply = client.read_packet().await;
    assert_eq!(&reply[..12], &hex!("01 01 0002 00000008 00000001"));

    let body = client.read_extra(32).await;
    assert_eq!(&body[..4], &hex!("00000001"));
    assert_eq!(&body[12..14], &hex!("000A"));
    assert_eq!(&body[14..24], b"SERVERTIME");
}

#[tokio::test]
async fn sequence_counts_replyless_requests() {
    let addr = start_server(1024).await;
    let mut client = TestClient::connect(addr).await;

    client.send(MAJOR, 2, &counter_body(0x10, -2)).await;
    client.send(MAJOR, 5, &0x10u32.to_be_bytes()).await;
    let reply = client.read_packet().await;
    assert_eq!(&reply[..16], &hex!("01 05 0002 00000000 FFFFFFFF FFFFFFFE"));

    client.send(MAJOR, 5, &0x11u32.to_be_bytes()).await;
    let error = client.read_packet().await;
    assert_eq!(&error[..11], &hex!("00 9A 0003 00000011 0005 82"));
}

#[tokio::test]
async fn await_woken_by_other_connection() {
    let addr = start_server(1024).await;
    let mut waiter = TestClient::connect(addr).await;
    let mut setter = TestClient::connect(addr).await;

    waiter.send(MAJOR, 2, &counter_body(0x20, 0)).await;
    waiter.send(MAJOR, 5, &0x20u32.to_be_bytes()).await;
    waiter.read_packet().await;

    // Counter 0x20 >= 10, absolute, positive comparison.
    waiter
        .send(
            MAJOR,
            7,
            &hex!("00000020 00000000 00000000 0000000A 00000002 00000000 00000000"),
        )
        .await;
    setter.send(MAJOR, 3, &counter_body(0x20, 10)).await;

    let event = waiter.read_packet().await;
    assert_eq!(
        &event[..24],
        &hex!("5F 00 0003 00000020 00000000 0000000A 00000000 0000000A")
    );
    assert_eq!(&event[28..31], &hex!("0000 00"));
}

#[tokio::test]
async fn await_fence_woken_by_trigger() {
    let addr = start_server(1024).await;
    let mut waiter = TestClient::connect(addr).await;
    let mut trigger = TestClient::connect(addr).await;

    waiter.send(MAJOR, 14, &hex!("00000001 00000042 00000000")).await;
    waiter.send(MAJOR, 18, &hex!("00000042")).await;
    let reply = waiter.read_packet().await;
    assert_eq!(&reply[..9], &hex!("01 12 0002 00000000 00"));

    waiter.send(MAJOR, 19, &hex!("00000042")).await;
    trigger.send(MAJOR, 15, &hex!("00000042")).await;

    // AwaitFence has no reply; the next reply proves the await finished.
    waiter.send(MAJOR, 18, &hex!("00000042")).await;
    let reply = waiter.read_packet().await;
    assert_eq!(&reply[..9], &hex!("01 12 0004 00000000 01"));
}

#[tokio::test]
async fn foreign_major_opcode_is_rejected() {
    let addr = start_server(1024).await;
    let mut client = TestClient::connect(addr).await;

    client.send(7, 4, &[]).await;
    let error = client.read_packet().await;
    assert_eq!(&error[..11], &hex!("00 11 0001 00000000 0004 07"));
}

#[tokio::test]
async fn oversized_request_keeps_connection() {
    let addr = start_server(16).await;
    let mut client = TestClient::connect(addr).await;

    client.send(MAJOR, 7, &[0u8; 28]).await;
    let error = client.read_packet().await;
    assert_eq!(&error[..11], &hex!("00 10 0001 00000000 0007 82"));

    client.send(MAJOR, 0, &[3, 1, 0, 0]).await;
    let reply = client.read_packet().await;
    assert_eq!(&reply[..4], &hex!("01 00 0002"));
}
