//! End-to-end throughput benchmark for Courier.
//!
//! Connects N clients to a running server, has each one send `message`
//! events as fast as acknowledgements come back, and reports acknowledged
//! events per second.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

/// Events a client keeps in flight before waiting for acknowledgements.
const WINDOW: usize = 32;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║        Courier End-to-End Throughput Benchmark               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_ack_benchmark(num_clients).await;
}

async fn run_ack_benchmark(num_clients: usize) {
    println!("📊 Acknowledgement Benchmark: {} clients", num_clients);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let acked = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    // Spawn client tasks
    for client_id in 0..num_clients {
        let acked = Arc::clone(&acked);
        let rejected = Arc::clone(&rejected);
        let barrier = Arc::clone(&barrier);

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client_id, acked, rejected, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("✓ All {} clients connected", num_clients);

    // Warmup phase
    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counters and start measurement
    acked.store(0, Ordering::SeqCst);
    rejected.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_acked = acked.load(Ordering::SeqCst);
    let total_rejected = rejected.load(Ordering::SeqCst);

    let acks_per_sec = total_acked as f64 / elapsed.as_secs_f64();
    let acks_per_sec_per_client = acks_per_sec / num_clients as f64;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Acknowledged:         {:>10}                           ║",
        total_acked
    );
    println!(
        "║  Rejected:             {:>10}                           ║",
        total_rejected
    );
    println!(
        "║  Throughput:           {:>10.0} ack/s                    ║",
        acks_per_sec
    );
    println!(
        "║  Per-Client:           {:>10.0} ack/s                    ║",
        acks_per_sec_per_client
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    // Stop clients
    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    acked: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let user_id = format!("bench-{client_id}");
    let (ws, _) = connect_async(format!("{SERVER_URL}?userId={user_id}")).await?;
    let (mut sender, mut receiver) = ws.split();

    // Wait for all clients to be ready
    barrier.wait().await;

    let event = serde_json::json!({
        "type": "message",
        "senderId": user_id,
        "roomId": "benchmark",
        "payload": "x".repeat(64),
    })
    .to_string();
    let event_msg = Message::Text(event);

    loop {
        for _ in 0..WINDOW {
            sender.send(event_msg.clone()).await?;
        }

        let mut outstanding = WINDOW;
        while outstanding > 0 {
            match receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    outstanding -= 1;
                    let status: serde_json::Value = serde_json::from_str(&text)?;
                    if status["statusCode"] == 0 {
                        acked.fetch_add(1, Ordering::Relaxed);
                    } else {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            }
        }
    }
}
