//! Topology-setup utility: a one-shot probe that discovers which robots can
//! reach which staging inventories and writes the resulting topology config.
//!
//! Grounded on `main.rs`'s `#[tokio::main]` + `clap` entry-point shape,
//! reduced to a single pass with no tick loop — this utility runs once and
//! exits.

use std::io::Write as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};
use tracing::{info, warn};

use crafting_coordinator::config;
use crafting_coordinator::msg::{header, storage::DroneItemListPayload, robot::ScanAdjacentResultPayload};
use crafting_coordinator::net::message::Transport;
use crafting_coordinator::topology::Topology;

#[derive(Parser, Debug)]
#[command(name = "topology-setup", about = "Probe robot/staging reachability and write robots.config")]
struct Args {
    #[arg(long, default_value = "0.0.0.0:0")]
    listen: String,

    /// Known storage address; if omitted, broadcasts stor_discover on
    /// `storage_broadcast_addr` until a reply arrives, retried without
    /// bound until interrupted.
    #[arg(long)]
    storage_addr: Option<SocketAddr>,

    #[arg(long, default_value = "255.255.255.255:8764")]
    storage_broadcast_addr: SocketAddr,

    /// Addresses of every robot to probe.
    #[arg(long, value_delimiter = ',')]
    robot_addrs: Vec<SocketAddr>,

    /// Probe item, e.g. `minecraft:coal/0`; prompted on stdin if absent.
    #[arg(long)]
    item: Option<String>,

    #[arg(long, default_value = "robots.config")]
    out: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();

    if args.robot_addrs.is_empty() {
        eprintln!("--robot-addrs must list at least one robot address");
        std::process::exit(1);
    }

    let mut transport = Transport::bind(&args.listen).await.expect("bind UDP socket");
    transport.set_broadcast_peers(args.robot_addrs.iter().copied());

    let storage_addr = match args.storage_addr {
        Some(addr) => addr,
        None => discover_storage(&transport, args.storage_broadcast_addr).await,
    };
    info!(%storage_addr, "storage located");

    let item = match args.item {
        Some(item) => item,
        None => prompt_for_item(),
    };

    let staging_indices = match fetch_staging_indices(&transport, storage_addr).await {
        Some(indices) if !indices.is_empty() => indices,
        _ => {
            eprintln!("storage reported no staging inventories");
            std::process::exit(1);
        }
    };

    let mut topology_text = String::from("# staging index -> {robot id -> side}\n");
    let mut any_unreachable = false;

    for staging_index in &staging_indices {
        let results = transport
            .broadcast_gather(
                header::ROBOT_SCAN_ADJACENT,
                json!({ "item": item, "amount": 1 }),
                |h| h == header::ROBOT_SCAN_ADJACENT_RESULT,
                args.robot_addrs.len(),
                Duration::from_secs(config::T_DISCOVER_SECS),
            )
            .await
            .unwrap_or_default();

        let mut robots = std::collections::BTreeMap::new();
        for (from, frame) in results {
            if let Ok(result) = serde_json::from_value::<ScanAdjacentResultPayload>(frame.payload) {
                if let Some(side) = result.side {
                    robots.insert(from.to_string(), side);
                }
            }
        }

        if robots.is_empty() {
            warn!(staging_index, "no robot reported access to this staging inventory");
            any_unreachable = true;
        }

        topology_text.push_str(&format!("staging {staging_index}\n"));
        for (robot_id, side) in &robots {
            topology_text.push_str(&format!("  robot {robot_id} {side}\n"));
        }
    }

    // Round-trip through Topology so the written file matches what the
    // coordinator will parse back, rather than hand-formatting trust.
    let topology = Topology::from_text(&topology_text).expect("internally generated topology text must parse");
    std::fs::write(&args.out, topology.to_text()).expect("write topology config");

    if any_unreachable {
        eprintln!("one or more staging inventories have no reachable robot; see warnings above");
        std::process::exit(1);
    }

    println!("wrote {}", args.out.display());
}

async fn discover_storage(transport: &Transport, broadcast_addr: SocketAddr) -> SocketAddr {
    loop {
        if let Err(e) = transport.send(broadcast_addr, header::STOR_DISCOVER, Value::Null).await {
            warn!(error = %e, "stor_discover send failed, retrying");
        }
        match transport.receive(Duration::from_secs(config::T_DISCOVER_SECS)).await {
            Ok(Some((from, frame))) if frame.header == header::STOR_ITEM_LIST => return from,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "discovery receive error, retrying");
                continue;
            }
        }
    }
}

async fn fetch_staging_indices(transport: &Transport, storage_addr: SocketAddr) -> Option<Vec<u32>> {
    let frame = transport
        .request(
            storage_addr,
            header::STOR_GET_DRONE_ITEM_LIST,
            Value::Null,
            |h| h == header::STOR_DRONE_ITEM_LIST,
            Duration::from_secs(5),
        )
        .await
        .ok()?;
    let list: DroneItemListPayload = serde_json::from_value(frame.payload).ok()?;
    Some(list.stagings.into_iter().map(|s| s.staging_index).collect())
}

fn prompt_for_item() -> String {
    print!("probe item (e.g. minecraft:coal/0): ");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).expect("read stdin");
    line.trim().to_string()
}
