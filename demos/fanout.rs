//! Fan-out demo
//!
//! Run with: cargo run --example fanout [SUBSCRIBERS] [UPDATES]
//!
//! A simulated price feed publishes a full snapshot followed by diffs on a
//! hot topic, plus an append-style trade log. Subscribers join at different
//! points and each prints what it received. Set `RUST_LOG=fanout_broker=trace`
//! to watch per-message delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fanout_broker::{Broker, BrokerConfig, Msg, QueueSubscriber, UpdateType};
use tokio::sync::mpsc;

const PRICES: &str = "prices";
const TRADES: &str = "trades";

fn print_usage() {
    println!("Usage: fanout [SUBSCRIBERS] [UPDATES]");
    println!();
    println!("  SUBSCRIBERS  number of subscribers (default 8)");
    println!("  UPDATES      number of diffs published (default 20)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let subscribers: usize = args.get(1).map(|s| s.parse()).transpose()?.unwrap_or(8);
    let updates: i64 = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(20);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fanout_broker=info".parse()?)
                .add_directive("fanout=info".parse()?),
        )
        .init();

    let config = BrokerConfig::default()
        .shard_topic(PRICES, 4)
        .append_depth(16)
        .topic_expiry(Duration::from_secs(60));
    let broker = Arc::new(Broker::with_current_hook(config, |topic| {
        tracing::info!(topic = %topic, "Backend asked for current state");
    }));

    let (feed, upstream) = mpsc::channel(64);
    let consume = broker.consume(upstream);

    // Early subscribers wait for the first full state
    let mut readers = Vec::new();
    for i in 0..subscribers / 2 {
        readers.push(spawn_reader(&broker, i, 0).await?);
    }

    feed.send(Msg::full(PRICES, 1, Bytes::from_static(b"{\"eur\":1.0}")))
        .await?;
    for ts in 2..=updates {
        let payload = Bytes::from(format!("{{\"eur\":{}}}", 1.0 + ts as f64 / 100.0));
        feed.send(Msg::diff(PRICES, ts, payload)).await?;
        feed.send(Msg::append(TRADES, ts, Bytes::from(format!("trade {ts}"))))
            .await?;
        if ts % 5 == 0 {
            feed.send(Msg::event(PRICES, ts, Bytes::from_static(b"heartbeat")))
                .await?;
        }
    }
    broker.flush().await?;

    // Late subscribers catch up from the cache
    for i in subscribers / 2..subscribers {
        readers.push(spawn_reader(&broker, i, updates / 2).await?);
    }

    for stats in broker.topic_stats().await? {
        println!(
            "topic {:<8} shards={} subscribers={} cached={} received={} fan-out={:.1}",
            stats.name,
            stats.shards,
            stats.subscribers,
            stats.cached,
            stats.received,
            stats.fan_out()
        );
    }

    drop(feed);
    broker.wait().await;
    consume.await?;

    for reader in readers {
        let (id, counts) = reader.await?;
        println!("subscriber {id}: {counts:?}");
    }

    Ok(())
}

async fn spawn_reader(
    broker: &Broker,
    index: usize,
    ts: i64,
) -> Result<tokio::task::JoinHandle<(usize, HashMap<UpdateType, usize>)>, Box<dyn std::error::Error>>
{
    let (sink, mut rx) = QueueSubscriber::channel(1024);
    let consumer = broker.consumer(Arc::new(sink.with_meta("reader", index.to_string())));
    let topics = HashMap::from([(PRICES.to_string(), ts), (TRADES.to_string(), ts)]);
    broker.subscribe(&consumer, topics).await?;

    Ok(tokio::spawn(async move {
        let mut counts = HashMap::new();
        while let Some(msg) = rx.recv().await {
            *counts.entry(msg.update_type).or_insert(0) += 1;
        }
        (index, counts)
    }))
}
