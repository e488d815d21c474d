//! Scanner gateway scenarios against real TCP sockets: collect-window
//! contents, per-endpoint ordering, and idle disconnects.

use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use ios_core::coder::CoderGateway;
use ios_core::config::CoderConfig;
use ios_core::messaging::Direction;

fn config(client_timeout_ms: u64) -> CoderConfig {
    CoderConfig {
        socket_address: "127.0.0.1".to_string(),
        socket_port: 0,
        max_clients: 8,
        receive_buffer_size: 512,
        client_timeout_ms,
        scan_timeout_ms: 300,
    }
}

async fn connect(gateway: &CoderGateway) -> TcpStream {
    let stream = TcpStream::connect(gateway.local_addr().unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream
}

#[tokio::test]
async fn collect_window_gathers_codes_in_per_endpoint_order() {
    let gateway = CoderGateway::new(config(60_000));
    gateway.start().await.unwrap();

    let mut first = connect(&gateway).await;
    let mut second = connect(&gateway).await;

    let writer = tokio::spawn(async move {
        // Land inside the window: after the 500 ms ready delay.
        tokio::time::sleep(Duration::from_millis(600)).await;
        first.write_all(b"A-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        first.write_all(b"A-2").await.unwrap();
        second.write_all(b"B-1").await.unwrap();
        (first, second)
    });

    let result = gateway
        .start_scan(Direction::Out, 200.0, Some(400))
        .await
        .unwrap();
    let _streams = writer.await.unwrap();

    assert_eq!(result.codes.len(), 3);
    // Per-endpoint arrival order is preserved.
    let first_pos = result.codes.iter().position(|c| c == "A-1").unwrap();
    let second_pos = result.codes.iter().position(|c| c == "A-2").unwrap();
    assert!(first_pos < second_pos);
    assert!(result.codes.contains(&"B-1".to_string()));

    gateway.stop().await;
}

#[tokio::test]
async fn messages_before_the_window_are_not_collected() {
    let gateway = CoderGateway::new(config(60_000));
    gateway.start().await.unwrap();
    let mut client = connect(&gateway).await;

    client.write_all(b"EARLY").await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let result = gateway
        .start_scan(Direction::Out, 0.0, Some(150))
        .await
        .unwrap();
    assert!(result.codes.is_empty());

    gateway.stop().await;
}

#[tokio::test]
async fn scan_returns_when_window_elapses_without_responses() {
    let gateway = CoderGateway::new(config(60_000));
    gateway.start().await.unwrap();
    let _client = connect(&gateway).await;

    let started = tokio::time::Instant::now();
    let result = gateway
        .start_scan(Direction::In, 0.0, Some(200))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(result.codes.is_empty());
    // 500 ms ready delay + 200 ms window, with headroom for scheduling.
    assert!(elapsed >= Duration::from_millis(700));
    assert!(elapsed < Duration::from_secs(3));

    gateway.stop().await;
}

#[tokio::test]
async fn silent_client_is_dropped_and_broadcast_survives() {
    let gateway = CoderGateway::new(config(200));
    gateway.start().await.unwrap();
    let _client = connect(&gateway).await;

    assert_eq!(gateway.get_status().await.connection_count, 1);

    // No bytes for longer than the client timeout.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(gateway.get_connected_clients().await.is_empty());

    // A subsequent broadcast must not raise.
    gateway.broadcast("HELLO").await;

    gateway.stop().await;
}

#[tokio::test]
async fn send_reaches_the_scanner() {
    let gateway = CoderGateway::new(config(60_000));
    gateway.start().await.unwrap();
    let client = connect(&gateway).await;

    let endpoint = gateway.get_connected_clients().await[0].endpoint.clone();
    gateway.send(&endpoint, "TRG").await.unwrap();

    client.readable().await.unwrap();
    let mut buffer = [0u8; 16];
    let n = client.try_read(&mut buffer).unwrap();
    assert_eq!(&buffer[..n], b"TRG");

    gateway.stop().await;
}
