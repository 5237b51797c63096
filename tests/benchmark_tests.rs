//! Load and ordering benchmarks for the session server

use client::Client;
use server::heartbeat::Heartbeat;
use server::queue::MessageQueue;
use server::{Server, ServerConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SECRET: &str = "benchmark-secret";

fn bench_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        secret: SECRET.to_string(),
        tick_interval_ms: 10,
        liveness_timeout_ms: 5_000,
        read_timeout_ms: 100,
        max_sessions: 128,
        ..ServerConfig::default()
    }
}

/// Benchmarks bounded queue push and drain throughput
#[test]
fn benchmark_queue_throughput() {
    let iterations = 100_000;
    let queue = MessageQueue::new(iterations);
    let start = Instant::now();

    for i in 0..iterations {
        queue.push(format!("line {}", i)).unwrap();
    }
    let drained = queue.drain();

    let duration = start.elapsed();
    println!(
        "Queue push+drain: {} lines in {:?} ({:.2} ns/line)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(drained.len(), iterations);
    assert_eq!(drained.last().map(String::as_str), Some("line 99999"));
    assert!(duration.as_secs() < 2);
}

/// Benchmarks a heartbeat pass over an empty scheduler
#[tokio::test]
async fn benchmark_empty_tick() {
    let heartbeat = Heartbeat::new(Duration::from_millis(10));
    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        heartbeat.tick_once().await;
    }

    let duration = start.elapsed();
    println!(
        "Empty tick: {} passes in {:?} ({:.2} us/pass)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );
    assert_eq!(heartbeat.ticks(), iterations as u64);
    assert!(duration.as_secs() < 2);
}

/// Stress test with many clients authenticating and pinging at once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_test_many_clients() {
    let server = Server::new(bench_config()).unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let clients = 32;
    let pings = 10;
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..clients {
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect_and_authenticate(addr, SECRET).await.unwrap();
            for _ in 0..pings {
                client.ping(Duration::from_secs(5)).await.unwrap();
            }
            client
        }));
    }

    let mut connected = Vec::new();
    for handle in handles {
        connected.push(handle.await.unwrap());
    }

    let duration = start.elapsed();
    println!("{} clients x {} pings in {:?}", clients, pings, duration);
    assert_eq!(server.context().registry.len().await, clients);

    for client in connected {
        assert_eq!(client.quit().await.unwrap(), vec![shared::GOODBYE_REPLY]);
    }
    server.shutdown().await.unwrap();
    assert!(server.context().registry.is_empty().await);
}

/// Large volumes of queued output arrive complete and in order
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stress_test_output_order() {
    let server = Server::new(bench_config()).unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut client = Client::connect_and_authenticate(addr, SECRET).await.unwrap();
    client.ping(Duration::from_secs(2)).await.unwrap();
    let session = Arc::clone(&server.context().registry.snapshot().await[0]);

    let lines = 1_000;
    let producer = tokio::spawn(async move {
        for i in 0..lines {
            while session.enqueue_outgoing(format!("msg {}", i)).is_err() {
                tokio::task::yield_now().await;
            }
        }
    });

    let start = Instant::now();
    for i in 0..lines {
        let line = client
            .recv_line_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, format!("msg {}", i));
    }
    producer.await.unwrap();

    println!("{} queued lines delivered in {:?}", lines, start.elapsed());
    server.shutdown().await.unwrap();
}
