//! Coordinator process: binds the UDP port, loads the recipe database and
//! topology, and runs the single-threaded cooperative tick loop.
//!
//! Keeps the `select!` shape of a tick `interval` raced against inbound
//! traffic and `ctrl_c` for shutdown, adapted from a `TcpListener`/WebSocket
//! accept loop to one bound `Transport` since the coordinator speaks to a
//! fixed, pre-addressed set of peers rather than accepting new connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crafting_coordinator::config;
use crafting_coordinator::error::CoordinatorError;
use crafting_coordinator::interface;
use crafting_coordinator::logging;
use crafting_coordinator::msg::{header, storage};
use crafting_coordinator::net::message::Transport;
use crafting_coordinator::recipe::{ItemName, RecipeDb};
use crafting_coordinator::scheduler::{Outbound, Scheduler};
use crafting_coordinator::storage_view::StorageSnapshot;
use crafting_coordinator::topology::Topology;

#[derive(Parser, Debug)]
#[command(name = "coordinator", about = "Distributed crafting coordinator")]
struct Args {
    /// Address to bind the coordinator's UDP port on.
    #[arg(long, default_value = "0.0.0.0:8765")]
    listen: String,

    /// Path to the recipe database text file.
    #[arg(long, default_value = "recipes.txt")]
    recipes: PathBuf,

    /// Path to the topology produced by `topology-setup`.
    #[arg(long, default_value = "robots.config")]
    topology: PathBuf,

    /// Address of the storage subsystem.
    #[arg(long)]
    storage_addr: SocketAddr,

    /// Addresses of every robot, for broadcast sends.
    #[arg(long, value_delimiter = ',')]
    robot_addrs: Vec<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), CoordinatorError> {
    logging::init(&HashMap::new(), true);

    let args = Args::parse();

    let recipes_text = tokio::fs::read_to_string(&args.recipes).await?;
    let db = RecipeDb::from_text(&recipes_text)?;

    let topology_text = tokio::fs::read_to_string(&args.topology).await?;
    let topology = Topology::from_text(&topology_text)?;

    let mut transport = Transport::bind(&args.listen).await?;
    transport.set_broadcast_peers(args.robot_addrs.iter().copied());

    let mut scheduler = Scheduler::new(topology);
    // Most recent stor_item_list snapshot, refreshed whenever storage pushes
    // one; craft_check_recipe plans against whatever is cached, rather than
    // the tick loop blocking on a nested request/response round trip.
    let mut snapshot = StorageSnapshot::new();
    // Address of whichever interface client last issued a craft_* request;
    // the catalog has no fixed interface address, so replies go back to the
    // most recent sender.
    let mut interface_addr: Option<SocketAddr> = None;

    info!(addr = %args.listen, storage = %args.storage_addr, "crafting coordinator listening");

    let mut tick = tokio::time::interval(Duration::from_millis(config::TICK_INTERVAL_MS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("shutdown signal received");
                return Ok(());
            }
        }

        match transport.receive(Duration::from_millis(config::RECEIVE_POLL_MS)).await {
            Ok(Some((from, frame))) => {
                if frame.header == header::STOR_ITEM_LIST {
                    match serde_json::from_value::<storage::ItemListPayload>(frame.payload.clone()) {
                        Ok(items) => {
                            let counts = items.items.into_iter().map(|(name, count)| (ItemName::normalize(&name), count)).collect();
                            snapshot = StorageSnapshot::from_counts(counts);
                        }
                        Err(e) => warn!(error = %e, "malformed stor_item_list"),
                    }
                } else {
                    if is_interface_request(&frame.header) {
                        interface_addr = Some(from);
                    }
                    let outbound = interface::handle_frame(&mut scheduler, &db, &snapshot, &frame);
                    send_all(&transport, args.storage_addr, interface_addr, outbound).await;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "receive error"),
        }

        let outbound = scheduler.tick(config::TICK_INTERVAL_MS, &db);
        send_all(&transport, args.storage_addr, interface_addr, outbound).await;
    }
}

fn is_interface_request(h: &str) -> bool {
    matches!(h, header::CRAFT_CHECK_RECIPE | header::CRAFT_RECIPE_START | header::CRAFT_RECIPE_CANCEL)
}

async fn send_all(transport: &Transport, storage_addr: SocketAddr, interface_addr: Option<SocketAddr>, outbound: Vec<Outbound>) {
    for cmd in outbound {
        let result = match cmd {
            Outbound::ToStorage { header, payload } => transport.send(storage_addr, header, payload).await,
            Outbound::ToRobot { robot_id, header, payload } => match robot_id.parse::<SocketAddr>() {
                Ok(addr) => transport.send(addr, header, payload).await,
                Err(_) => {
                    warn!(robot_id, "robot id does not resolve to a socket address");
                    continue;
                }
            },
            Outbound::BroadcastToRobots { header, payload } => transport.send_broadcast(header, payload).await,
            Outbound::ToInterface { header, payload } => match interface_addr {
                Some(addr) => transport.send(addr, header, payload).await,
                None => {
                    warn!(header, "no interface client has connected yet, dropping reply");
                    continue;
                }
            },
        };
        if let Err(e) = result {
            warn!(error = %e, "send failed");
        }
    }
}
