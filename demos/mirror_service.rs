//! Mirror a few catalog feeds and serve cached reads.
//!
//! Run with:
//!
//! ```bash
//! PODCAST_SYNC_REMOTE_API_KEY=... cargo run --example mirror_service -- 920666:1 41504:2
//! ```
//!
//! Each argument is `feed_id:podcast_id`. Set `PODCAST_SYNC_CONFIG` to a YAML
//! file to override defaults.

use anyhow::Context;
use futures::future::join_all;
use podcast_sync::http::{handler_fn, Handler, HttpRequest, HttpResponse, StatusCode};
use podcast_sync::{ServiceConfig, SyncService};
use std::path::PathBuf;
use std::time::Duration;

fn parse_feed(arg: &str) -> anyhow::Result<(i64, i64)> {
    let (feed, podcast) = arg
        .split_once(':')
        .with_context(|| format!("expected feed_id:podcast_id, got {arg:?}"))?;
    Ok((feed.parse()?, podcast.parse()?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("PODCAST_SYNC_CONFIG").ok().map(PathBuf::from);
    let config = ServiceConfig::load(config_path.as_deref())?;
    podcast_sync::logging::init(&config.log_filter);

    let feeds = std::env::args()
        .skip(1)
        .map(|a| parse_feed(&a))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let feeds = if feeds.is_empty() { vec![(920666, 1)] } else { feeds };

    let service = SyncService::from_config(config)?;
    let engine = service.engine().clone();

    let fetches = feeds.iter().map(|&(feed_id, podcast_id)| {
        let engine = engine.clone();
        async move { (feed_id, engine.fetch_and_sync(feed_id, podcast_id, 20).await) }
    });
    for (feed_id, result) in join_all(fetches).await {
        match result {
            Ok(records) => println!("feed {feed_id}: fetched {} episodes", records.len()),
            Err(e) => eprintln!("feed {feed_id}: {e}"),
        }
    }

    // Let background reconciliation land before reading.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let read_engine = engine.clone();
    let stack = service.wrap(handler_fn(move |req: HttpRequest| {
        let engine = read_engine.clone();
        async move {
            let limit = req
                .query_param("limit")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10);
            match engine.list_recent(limit).await {
                Ok(items) => HttpResponse::json(StatusCode::OK, &items)
                    .unwrap_or_else(|e| e.to_response()),
                Err(e) => e.to_response(),
            }
        }
    }));

    for _ in 0..2 {
        let resp = stack
            .handle(HttpRequest::get("/episodes/recent?limit=5").with_header("x-real-ip", "127.0.0.1"))
            .await;
        println!(
            "GET /episodes/recent -> {} ({}, {} bytes)",
            resp.status,
            resp.header("x-cache").unwrap_or("-"),
            resp.body.len()
        );
    }

    let stats = service.entity_cache().stats();
    println!(
        "entity cache: {} hits, {} misses, hit ratio {:.2}",
        stats.hits,
        stats.misses,
        stats.hit_ratio()
    );

    if !service.shutdown().await {
        eprintln!("some background syncs were cancelled");
    }
    Ok(())
}
