//! Interface adapter: translates inbound frames into planner/scheduler calls
//! and scheduler state into outbound frames.
//!
//! Grounded on `game/mod.rs`'s `handle_raw_message`, adapted from a `match`
//! on a `u8` type id to a `match` on the string `header` field of a decoded
//! `Frame`.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde_json::Value;
use tracing::warn;

use crate::msg::{craft, header, robot, storage};
use crate::net::protocol::Frame;
use crate::planner::{self, Plan};
use crate::recipe::{ItemName, RecipeDb};
use crate::scheduler::{Outbound, Scheduler};
use crate::storage_view::StorageSnapshot;
use crate::ticket::TicketId;

fn parse_ticket_id(s: &str) -> Option<TicketId> {
    // TicketId's Display is "ticket-<n>"; this is the inverse.
    s.strip_prefix("ticket-").and_then(|n| n.parse::<u64>().ok()).map(TicketId::from_raw)
}

/// Dispatch one inbound frame. `pending_plan_request` is a held storage
/// snapshot awaiting a `craft_check_recipe`; in the real system the
/// coordinator first issues `stor_item_list` and plans once the snapshot
/// arrives, which `main`'s tick loop coordinates.
pub fn handle_frame(scheduler: &mut Scheduler, db: &RecipeDb, snapshot: &StorageSnapshot, frame: &Frame) -> Vec<Outbound> {
    match frame.header.as_str() {
        header::CRAFT_CHECK_RECIPE => handle_check_recipe(scheduler, db, snapshot, &frame.payload),
        header::CRAFT_RECIPE_START => handle_recipe_start(scheduler, &frame.payload),
        header::CRAFT_RECIPE_CANCEL => handle_recipe_cancel(scheduler, &frame.payload),
        header::STOR_DRONE_ITEM_DIFF => handle_drone_item_diff(scheduler, db, &frame.payload),
        header::ROBOT_FINISHED_CRAFT => handle_robot_finished(scheduler, &frame.payload),
        other => {
            warn!(header = other, "unhandled inbound header");
            Vec::new()
        }
    }
}

fn handle_check_recipe(scheduler: &mut Scheduler, db: &RecipeDb, snapshot: &StorageSnapshot, payload: &Value) -> Vec<Outbound> {
    let Ok(req) = serde_json::from_value::<craft::CheckRecipePayload>(payload.clone()) else {
        return vec![Outbound::ToInterface {
            header: header::CRAFT_RECIPE_ERROR,
            payload: serde_json::json!({ "message": "malformed craft_check_recipe payload" }),
        }];
    };
    let target = ItemName::normalize(&req.item);
    let plan: Plan = planner::solve(db, snapshot, &target, req.amount);
    scheduler.register_plan(target, req.amount, plan)
}

fn handle_recipe_start(scheduler: &mut Scheduler, payload: &Value) -> Vec<Outbound> {
    let Ok(req) = serde_json::from_value::<craft::RecipeStartPayload>(payload.clone()) else {
        return Vec::new();
    };
    match parse_ticket_id(&req.ticket_id) {
        Some(id) => scheduler.handle_start(id),
        None => Vec::new(),
    }
}

fn handle_recipe_cancel(scheduler: &mut Scheduler, payload: &Value) -> Vec<Outbound> {
    let Ok(req) = serde_json::from_value::<craft::RecipeCancelPayload>(payload.clone()) else {
        return Vec::new();
    };
    match parse_ticket_id(&req.ticket_id) {
        Some(id) => scheduler.handle_cancel(id),
        None => Vec::new(),
    }
}

fn handle_drone_item_diff(scheduler: &mut Scheduler, db: &RecipeDb, payload: &Value) -> Vec<Outbound> {
    let Ok(diff) = serde_json::from_value::<storage::DroneItemDiffPayload>(payload.clone()) else {
        return Vec::new();
    };
    let Some(ticket_id) = parse_ticket_id(&diff.ticket_id) else {
        return Vec::new();
    };
    if diff.per_staging_diff.is_empty() {
        // Empty diff reused as the reservation ack (no distinct header in
        // the catalog for it — see DESIGN.md).
        scheduler.handle_reserve_ack(ticket_id);
        return Vec::new();
    }
    let ok = diff.result == storage::DroneDiffResult::Ok;
    let mut out = Vec::new();
    for entry in &diff.per_staging_diff {
        out.extend(scheduler.handle_extract_diff(ticket_id, entry.staging_index, ok, db));
    }
    out
}

fn handle_robot_finished(scheduler: &mut Scheduler, payload: &Value) -> Vec<Outbound> {
    let Ok(finished) = serde_json::from_value::<robot::FinishedCraftPayload>(payload.clone()) else {
        return Vec::new();
    };
    let Ok(task_id) = u64::from_str(&finished.task_id) else {
        return Vec::new();
    };
    // The ticket owning this task is found by scanning active tickets; the
    // wire payload for a finished craft doesn't carry a ticket id.
    let owner = scheduler
        .tickets
        .iter()
        .find(|t| t.tasks.iter().any(|task| task.task_id == task_id))
        .map(|t| t.id);
    match owner {
        Some(ticket_id) => {
            let deltas: BTreeMap<String, i64> = finished.items_delta.clone();
            scheduler.handle_robot_finished(ticket_id, task_id, &deltas)
        }
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Topology;

    fn db() -> RecipeDb {
        RecipeDb::from_text(
            "
[recipe]
station = crafting_table
batch_unit = 4
input = coal 1
output = torch 4
",
        )
        .unwrap()
    }

    #[test]
    fn check_recipe_registers_a_ticket() {
        let mut scheduler = Scheduler::new(Topology::from_text("staging 1\n  robot r1 0\n").unwrap());
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(ItemName::normalize("coal"), 100);
        let frame = Frame::new(header::CRAFT_CHECK_RECIPE, serde_json::json!({"item": "torch", "amount": 16}));
        let out = handle_frame(&mut scheduler, &db(), &snapshot, &frame);
        assert!(!out.is_empty());
        assert_eq!(scheduler.tickets.active_ids_sorted().len(), 1);
    }

    #[test]
    fn malformed_check_recipe_reports_error() {
        let mut scheduler = Scheduler::new(Topology::from_text("staging 1\n  robot r1 0\n").unwrap());
        let snapshot = StorageSnapshot::new();
        let frame = Frame::new(header::CRAFT_CHECK_RECIPE, serde_json::json!({"item": "torch"}));
        let out = handle_frame(&mut scheduler, &db(), &snapshot, &frame);
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], Outbound::ToInterface { header: h, .. } if *h == header::CRAFT_RECIPE_ERROR));
    }
}
