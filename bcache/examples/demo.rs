//! Interactive CLI demo of a small gossiping cache cluster.
//!
//! Walks through three peers joining an in-memory mesh, a Set propagating
//! to the others, a cross-peer update winning by timestamp, a delete
//! tombstoning across the cluster, and a single-flight filler racing
//! concurrent misses. The output uses ANSI escape codes for colored,
//! storytelling-style terminal rendering.
//!
//! Run with:
//!   cargo run --example demo --release

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bcache::{Bcache, BcacheConfig, LoopbackMesh};

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

const BG_BLUE: &str = "\x1b[44m";

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn banner() {
    println!();
    println!("{BG_BLUE}{BOLD}{WHITE}                                                              {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}    bcache  --  Gossiping Cache Cluster Demo                 {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}    Version 0.1.0  |  LRU + Tombstones + Last-Writer-Wins    {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}                                                              {RESET}");
    println!();
}

fn section(num: u32, title: &str) {
    println!();
    println!("{BOLD}{CYAN}===[{YELLOW} Step {num} {CYAN}]============================================={RESET}");
    println!("{BOLD}{WHITE}  {title}{RESET}");
    println!("{CYAN}-------------------------------------------------------{RESET}");
}

fn subsection(text: &str) {
    println!("{DIM}{CYAN}  >> {text}{RESET}");
}

fn success(text: &str) {
    println!("{GREEN}  [OK] {text}{RESET}");
}

fn info(label: &str, value: &str) {
    println!("{WHITE}  {BOLD}{label}:{RESET} {YELLOW}{value}{RESET}");
}

fn timing(label: &str, elapsed: Duration) {
    println!(
        "\x1b[35m  [{label}: {:.2} ms]{RESET}",
        elapsed.as_secs_f64() * 1000.0
    );
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn config(peer_id: u64) -> BcacheConfig {
    BcacheConfig {
        peer_id,
        max_keys: 1_000,
        ..Default::default()
    }
}

#[tokio::main]
async fn main() {
    let demo_start = Instant::now();
    banner();

    // -----------------------------------------------------------------------
    // Step 1: Cluster formation
    // -----------------------------------------------------------------------
    section(1, "Cluster Formation");
    subsection("Three peers join a shared in-memory gossip mesh...");
    let mesh = LoopbackMesh::new();
    let start = Instant::now();
    let p1 = Bcache::new(config(1), mesh.clone()).await.expect("peer 1");
    let p2 = Bcache::new(config(2), mesh.clone()).await.expect("peer 2");
    let p3 = Bcache::new(config(3), mesh.clone()).await.expect("peer 3");
    timing("registration", start.elapsed());
    info("peer 1 id", &p1.peer_id().to_string());
    info("peer 2 id", &p2.peer_id().to_string());
    info("peer 3 id", &p3.peer_id().to_string());
    success("cluster formed");

    // -----------------------------------------------------------------------
    // Step 2: Local Set propagates
    // -----------------------------------------------------------------------
    section(2, "Set Propagation");
    subsection("peer 1 sets \"region\" -> \"us-east-1\" with a 1 hour ttl...");
    p1.set("region", "us-east-1", 3600).await;
    settle().await;
    let (val, present) = p2.get("region");
    info("peer 2 read", &format!("{val:?} present={present}"));
    success("Set replicated to every peer in the cluster");

    // -----------------------------------------------------------------------
    // Step 3: Cross-peer update, last-writer-wins
    // -----------------------------------------------------------------------
    section(3, "Last-Writer-Wins Update");
    subsection("peer 1 sets \"leader\" -> \"node-1\" (ttl=600s)...");
    p1.set("leader", "node-1", 600).await;
    settle().await;
    subsection("peer 2 then sets \"leader\" -> \"node-2\" (ttl=600s, later timestamp)...");
    p2.set("leader", "node-2", 600).await;
    settle().await;
    for (name, peer) in [("peer 1", &p1), ("peer 2", &p2), ("peer 3", &p3)] {
        let (val, _) = peer.get("leader");
        info(&format!("{name} sees leader"), &val);
    }
    success("later write won on every peer — convergence under LWW");

    // -----------------------------------------------------------------------
    // Step 4: Delete propagation
    // -----------------------------------------------------------------------
    section(4, "Tombstone Propagation");
    subsection("peer 1 deletes \"leader\"...");
    p1.delete("leader").await;
    settle().await;
    for (name, peer) in [("peer 2", &p2), ("peer 3", &p3)] {
        let (_, present) = peer.get("leader");
        info(&format!("{name} sees leader present?"), &present.to_string());
    }
    success("tombstone replicated; key now absent cluster-wide");

    // -----------------------------------------------------------------------
    // Step 5: Single-flight filler under concurrent misses
    // -----------------------------------------------------------------------
    section(5, "Single-Flight Filler");
    subsection("16 concurrent callers race a cold key through peer 1's filler...");
    let calls = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut pending = Vec::new();
    for _ in 0..16 {
        let calls = calls.clone();
        pending.push(p1.get_with_filler(
            "cold-key",
            Some(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok("computed-once".to_string())
            }),
            600,
        ));
    }
    let results = futures::future::join_all(pending).await;
    timing("16 concurrent GetWithFiller calls", start.elapsed());
    let all_same = results.iter().all(|r| r.as_deref() == Ok("computed-once"));
    info("filler invocation count", &calls.load(Ordering::SeqCst).to_string());
    info("all callers observed same value", &all_same.to_string());
    settle().await;
    info("peer 3 observes filled value", &p3.get("cold-key").0);
    success("exactly one filler invocation, value shared by all waiters");

    // -----------------------------------------------------------------------
    // Wrap up
    // -----------------------------------------------------------------------
    println!();
    timing("total demo runtime", demo_start.elapsed());
    println!("{BOLD}{GREEN}  Demo complete.{RESET}");
    println!();

    let _ = p1.close().await;
    let _ = p2.close().await;
    let _ = p3.close().await;
}
