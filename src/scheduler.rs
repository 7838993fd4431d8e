//! Scheduler: advances every active ticket one step per tick.
//!
//! Grounded on `game/mod.rs`'s `run_tick` (`drain_messages` + `game_tick`)
//! split, generalized from one shared game-loop tick to per-ticket
//! round-robin fairness. IO is kept out of this module: each
//! method returns a list of `Outbound` commands instead of calling the
//! transport directly, so the state machine is testable without sockets —
//! `main` is the only place that actually sends them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

use crate::config;
use crate::msg::craft::MISSING_TICKET_ID;
use crate::msg::header;
use crate::planner::{Plan, PlanStatus};
use crate::recipe::{ItemName, RecipeDb};
use crate::ticket::{RobotTask, RobotTaskState, Ticket, TicketId, TicketState, TicketStore};
use crate::topology::Topology;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// A command the scheduler wants sent; `main` performs the actual IO.
#[derive(Debug, Clone)]
pub enum Outbound {
    ToStorage { header: &'static str, payload: Value },
    ToRobot { robot_id: String, header: &'static str, payload: Value },
    BroadcastToRobots { header: &'static str, payload: Value },
    ToInterface { header: &'static str, payload: Value },
}

fn required_items_to_wire(required: &BTreeMap<ItemName, i64>) -> BTreeMap<String, i64> {
    required.iter().map(|(k, v)| (k.as_str().to_string(), *v)).collect()
}

pub struct Scheduler {
    pub tickets: TicketStore,
    topology: Topology,
    free_stagings: HashSet<u32>,
    free_robots: HashSet<String>,
    /// staging_index -> (ticket, robot) currently occupying it.
    staging_owner: HashMap<u32, (TicketId, String)>,
    /// robot_id -> ticket currently using it.
    robot_owner: HashMap<String, TicketId>,
}

impl Scheduler {
    pub fn new(topology: Topology) -> Self {
        let free_stagings: HashSet<u32> = topology.staging_indices().collect();
        let mut free_robots = HashSet::new();
        for staging in free_stagings.iter() {
            free_robots.extend(topology.robots_for_staging(*staging).keys().cloned());
        }
        Self {
            tickets: TicketStore::new(),
            topology,
            free_stagings,
            free_robots,
            staging_owner: HashMap::new(),
            robot_owner: HashMap::new(),
        }
    }

    /// Register a freshly solved plan, the `planning` state's transition.
    pub fn register_plan(&mut self, target: ItemName, amount: u64, plan: Plan) -> Vec<Outbound> {
        if plan.status == PlanStatus::Error {
            return vec![Outbound::ToInterface {
                header: header::CRAFT_RECIPE_ERROR,
                payload: json!({ "message": "malformed recipe database" }),
            }];
        }

        let id = self.tickets.create(target, amount);
        let ticket = self.tickets.get_mut(id).expect("just created");
        let requirements = required_items_to_wire(&plan.required_items);
        let is_missing = plan.status == PlanStatus::Missing;
        ticket.plan = Some(plan);
        ticket.transition(TicketState::PendingConfirm);

        let wire_ticket_id = if is_missing {
            MISSING_TICKET_ID.to_string()
        } else {
            id.to_string()
        };
        let mut out = vec![Outbound::ToInterface {
            header: header::CRAFT_RECIPE_CONFIRM,
            payload: json!({ "ticketId": wire_ticket_id, "requirements": requirements }),
        }];

        if is_missing {
            self.tickets.get_mut(id).unwrap().fail("planner reported missing items");
        } else {
            let ticket = self.tickets.get_mut(id).unwrap();
            let required_for_reserve = required_items_to_wire(&ticket.plan.as_ref().unwrap().required_items);
            out.push(Outbound::ToStorage {
                header: header::STOR_RECIPE_RESERVE,
                payload: json!({ "ticketId": id.to_string(), "requiredItems": required_for_reserve }),
            });
        }
        out
    }

    /// Storage acknowledged the reservation (modeled as a `stor_drone_item_diff`
    /// with an empty diff, reusing the generic ack/diff header since the
    /// message catalog has no distinct reserve-ack header — see DESIGN.md).
    pub fn handle_reserve_ack(&mut self, ticket_id: TicketId) {
        if let Some(ticket) = self.tickets.get_mut(ticket_id) {
            if ticket.state == TicketState::PendingConfirm {
                ticket.transition(TicketState::Reserved);
            }
        }
    }

    pub fn handle_start(&mut self, ticket_id: TicketId) -> Vec<Outbound> {
        let Some(ticket) = self.tickets.get_mut(ticket_id) else {
            return Vec::new();
        };
        if !matches!(ticket.state, TicketState::PendingConfirm | TicketState::Reserved) {
            return Vec::new();
        }
        ticket.transition(TicketState::Active);
        vec![Outbound::ToStorage {
            header: header::STOR_RECIPE_START,
            payload: json!({ "ticketId": ticket_id.to_string() }),
        }]
    }

    pub fn handle_cancel(&mut self, ticket_id: TicketId) -> Vec<Outbound> {
        let Some(ticket) = self.tickets.get_mut(ticket_id) else {
            return Vec::new();
        };
        if ticket.state.is_terminal() || ticket.state == TicketState::Draining {
            return Vec::new();
        }
        let mut out = self.halt_and_release(ticket_id);
        if let Some(ticket) = self.tickets.get_mut(ticket_id) {
            ticket.transition(TicketState::Cancelled);
        }
        out.push(Outbound::ToStorage {
            header: header::STOR_DRONE_INSERT,
            payload: json!({ "ticketId": ticket_id.to_string() }),
        });
        out
    }

    fn halt_and_release(&mut self, ticket_id: TicketId) -> Vec<Outbound> {
        let mut out = Vec::new();
        if let Some(ticket) = self.tickets.get(ticket_id) {
            for task in &ticket.tasks {
                if !matches!(task.state, RobotTaskState::Done | RobotTaskState::Failed) {
                    out.push(Outbound::ToRobot {
                        robot_id: task.robot_id.clone(),
                        header: header::ROBOT_HALT,
                        payload: Value::Null,
                    });
                }
            }
        }
        self.release_ticket_resources(ticket_id);
        out
    }

    fn release_ticket_resources(&mut self, ticket_id: TicketId) {
        self.staging_owner.retain(|staging, (owner, robot)| {
            if *owner == ticket_id {
                self.free_stagings.insert(*staging);
                self.free_robots.insert(robot.clone());
                false
            } else {
                true
            }
        });
        self.robot_owner.retain(|_, owner| *owner != ticket_id);
    }

    /// Advance every active ticket by one step, round-robining in ascending
    /// ticket-id order. `tick_ms` is how much wall time this call represents,
    /// for timeout accounting. `db` resolves recipe inputs for staging
    /// extracts and is otherwise not mutated by ticking.
    pub fn tick(&mut self, tick_ms: u64, db: &RecipeDb) -> Vec<Outbound> {
        let mut out = Vec::new();
        for id in self.tickets.active_ids_sorted() {
            out.extend(self.advance_ticket(id, tick_ms, db));
        }
        out
    }

    fn advance_ticket(&mut self, id: TicketId, tick_ms: u64, db: &RecipeDb) -> Vec<Outbound> {
        let Some(state) = self.tickets.get(id).map(|t| t.state) else {
            return Vec::new();
        };

        match state {
            TicketState::PendingConfirm | TicketState::Reserved => {
                let ticket = self.tickets.get_mut(id).unwrap();
                ticket.awaiting_start_ticks = ticket.awaiting_start_ticks.saturating_add(1);
                let elapsed_ms = ticket.awaiting_start_ticks as u64 * tick_ms;
                if elapsed_ms >= config::T_CONFIRM_SECS * 1000 {
                    let mut out = self.halt_and_release(id);
                    out.push(Outbound::ToStorage {
                        header: header::STOR_DRONE_INSERT,
                        payload: json!({ "ticketId": id.to_string() }),
                    });
                    if let Some(ticket) = self.tickets.get_mut(id) {
                        ticket.transition(TicketState::Cancelled);
                    }
                    out
                } else {
                    Vec::new()
                }
            }
            TicketState::Active => self.advance_active(id, tick_ms, db),
            TicketState::Draining => self.advance_draining(id),
            _ => Vec::new(),
        }
    }

    fn advance_active(&mut self, id: TicketId, tick_ms: u64, db: &RecipeDb) -> Vec<Outbound> {
        let mut out = self.check_task_timeouts(id, tick_ms, db);
        if self.tickets.get(id).map(|t| t.state) != Some(TicketState::Active) {
            return out;
        }

        // Collect ready steps for this ticket first, to avoid holding a
        // mutable borrow on `self.tickets` while calling into resource
        // allocation (which also needs `&mut self`).
        let next_step = self.tickets.get(id).map(|t| t.next_step).unwrap_or(0);
        let total_steps = self.tickets.get(id).and_then(|t| t.plan.as_ref()).map(|p| p.steps.len()).unwrap_or(0);

        if next_step >= total_steps {
            if let Some(ticket) = self.tickets.get_mut(id) {
                if ticket.tasks.iter().all(|t| matches!(t.state, RobotTaskState::Done | RobotTaskState::Failed)) {
                    ticket.transition(TicketState::Draining);
                }
            }
            return out;
        }

        let already_dispatched = self
            .tickets
            .get(id)
            .map(|t| t.tasks.iter().any(|task| matches!(task.state, RobotTaskState::Extracting | RobotTaskState::Crafting) && step_matches(t, next_step)))
            .unwrap_or(false);
        if already_dispatched {
            return out;
        }

        let pairing = self.topology.candidate_pairings(&self.free_stagings, &self.free_robots).into_iter().next();
        let Some((staging_index, robot_id)) = pairing else {
            return out; // no free resources this tick; retry next tick
        };
        let side = *self.topology.robots_for_staging(staging_index).get(&robot_id).unwrap_or(&0);

        let (recipe_index, multiplier) = {
            let ticket = self.tickets.get(id).unwrap();
            let step = &ticket.plan.as_ref().unwrap().steps[next_step];
            (step.recipe_index, step.multiplier)
        };

        let task_id = next_task_id();
        self.free_stagings.remove(&staging_index);
        self.free_robots.remove(&robot_id);
        self.staging_owner.insert(staging_index, (id, robot_id.clone()));
        self.robot_owner.insert(robot_id.clone(), id);

        let ticket = self.tickets.get_mut(id).unwrap();
        ticket.tasks.push(RobotTask {
            task_id,
            robot_id: robot_id.clone(),
            side,
            staging_index,
            recipe_index,
            multiplier,
            state: RobotTaskState::Extracting,
            extract_attempts: 0,
            ticks_in_task_state: 0,
        });

        out.push(Outbound::ToStorage {
            header: header::STOR_DRONE_EXTRACT,
            payload: json!({
                "stagingIndex": staging_index,
                "ticketId": id.to_string(),
                "extractList": extract_list_for(db, recipe_index, multiplier),
            }),
        });
        out.push(Outbound::ToRobot {
            robot_id,
            header: header::ROBOT_PREPARE_CRAFT,
            payload: json!({ "taskId": task_id.to_string(), "recipeIndex": recipe_index, "multiplier": multiplier }),
        });
        out
    }

    /// Walks every in-flight task of an active ticket looking for a stale
    /// deadline: a `extracting` task that has sat silent past `T_extract`, or
    /// a `crafting` task that has sat silent past `T_craft`. Called once per
    /// tick before any new dispatch, so a task that just timed out doesn't
    /// also get treated as "already dispatched" for a fresh assignment.
    fn check_task_timeouts(&mut self, id: TicketId, tick_ms: u64, db: &RecipeDb) -> Vec<Outbound> {
        let mut out = Vec::new();

        let due: Vec<(u64, RobotTaskState)> = {
            let Some(ticket) = self.tickets.get_mut(id) else {
                return out;
            };
            ticket
                .tasks
                .iter_mut()
                .filter_map(|task| {
                    if !matches!(task.state, RobotTaskState::Extracting | RobotTaskState::Crafting) {
                        return None;
                    }
                    task.ticks_in_task_state = task.ticks_in_task_state.saturating_add(1);
                    let elapsed_ms = task.ticks_in_task_state as u64 * tick_ms;
                    match task.state {
                        RobotTaskState::Extracting if elapsed_ms >= config::T_EXTRACT_SECS * 1000 => Some((task.task_id, task.state)),
                        RobotTaskState::Crafting if elapsed_ms >= config::T_CRAFT_SECS * 1000 => Some((task.task_id, task.state)),
                        _ => None,
                    }
                })
                .collect()
        };

        for (task_id, state) in due {
            match state {
                RobotTaskState::Extracting => out.extend(self.extract_timed_out(id, task_id, db)),
                RobotTaskState::Crafting => out.extend(self.robot_timed_out(id, task_id)),
                _ => unreachable!(),
            }
            // A timeout may have failed the whole ticket; stop walking tasks
            // that no longer belong to a live ticket.
            if self.tickets.get(id).map(|t| t.state) != Some(TicketState::Active) {
                break;
            }
        }
        out
    }

    fn advance_draining(&mut self, id: TicketId) -> Vec<Outbound> {
        let mut out = Vec::new();
        let has_residue = self.tickets.get(id).map(|t| t.stored.values().any(|&c| c > 0)).unwrap_or(false);
        if has_residue {
            out.push(Outbound::ToStorage {
                header: header::STOR_DRONE_INSERT,
                payload: json!({ "ticketId": id.to_string() }),
            });
        }
        self.release_ticket_resources(id);
        if let Some(ticket) = self.tickets.get_mut(id) {
            ticket.transition(TicketState::Retired);
        }
        out
    }

    /// Storage reported an extract result. On success, advances the matching
    /// task to `crafting` and tells the robot to begin; on failure, retries
    /// the extract (same recipe inputs) up to `T_EXTRACT_RETRIES` times
    /// before failing the ticket outright.
    pub fn handle_extract_diff(&mut self, ticket_id: TicketId, staging_index: u32, ok: bool, db: &RecipeDb) -> Vec<Outbound> {
        let mut out = Vec::new();
        let Some(ticket) = self.tickets.get_mut(ticket_id) else {
            return out;
        };
        let Some(task) = ticket.tasks.iter_mut().find(|t| t.staging_index == staging_index && t.state == RobotTaskState::Extracting) else {
            return out;
        };

        if ok {
            task.state = RobotTaskState::Crafting;
            task.ticks_in_task_state = 0;
            let task_id = task.task_id;
            let robot_id = task.robot_id.clone();
            ticket.next_step += 1;
            out.push(Outbound::ToRobot {
                robot_id,
                header: header::ROBOT_START_CRAFT,
                payload: json!({ "taskId": task_id.to_string() }),
            });
            out
        } else {
            let task_id = task.task_id;
            self.retry_or_fail_extract(ticket_id, task_id, staging_index, db)
        }
    }

    /// Shared by the explicit `stor_drone_item_diff(result: missing)` path
    /// and the silent `T_extract` timeout: bump the attempt counter and
    /// either re-issue the extract or fail the ticket once retries run out.
    fn retry_or_fail_extract(&mut self, ticket_id: TicketId, task_id: u64, staging_index: u32, db: &RecipeDb) -> Vec<Outbound> {
        let mut out = Vec::new();
        let (recipe_index, multiplier, exhausted) = {
            let Some(ticket) = self.tickets.get_mut(ticket_id) else {
                return out;
            };
            let Some(task) = ticket.tasks.iter_mut().find(|t| t.task_id == task_id) else {
                return out;
            };
            task.extract_attempts += 1;
            task.ticks_in_task_state = 0;
            let exhausted = task.extract_attempts > config::T_EXTRACT_RETRIES;
            if exhausted {
                task.state = RobotTaskState::Failed;
            }
            (task.recipe_index, task.multiplier, exhausted)
        };

        if exhausted {
            out.extend(self.halt_and_release(ticket_id));
            if let Some(ticket) = self.tickets.get_mut(ticket_id) {
                ticket.fail("extract failed after retries");
            }
            out.push(Outbound::ToStorage {
                header: header::STOR_DRONE_INSERT,
                payload: json!({ "ticketId": ticket_id.to_string() }),
            });
        } else {
            out.push(Outbound::ToStorage {
                header: header::STOR_DRONE_EXTRACT,
                payload: json!({
                    "stagingIndex": staging_index,
                    "ticketId": ticket_id.to_string(),
                    "extractList": extract_list_for(db, recipe_index, multiplier),
                }),
            });
        }
        out
    }

    /// No `stor_drone_item_diff` arrived within `T_extract`: treat it the
    /// same as an explicit `missing` result.
    fn extract_timed_out(&mut self, ticket_id: TicketId, task_id: u64, db: &RecipeDb) -> Vec<Outbound> {
        let Some(staging_index) = self
            .tickets
            .get(ticket_id)
            .and_then(|t| t.tasks.iter().find(|task| task.task_id == task_id))
            .map(|task| task.staging_index)
        else {
            return Vec::new();
        };
        self.retry_or_fail_extract(ticket_id, task_id, staging_index, db)
    }

    /// A robot finished its craft: fold the delta into `stored`, free the
    /// robot/staging for reuse, and report the change to the interface.
    pub fn handle_robot_finished(&mut self, ticket_id: TicketId, task_id: u64, deltas: &BTreeMap<String, i64>) -> Vec<Outbound> {
        let Some(ticket) = self.tickets.get_mut(ticket_id) else {
            return Vec::new();
        };
        let Some(task) = ticket.tasks.iter_mut().find(|t| t.task_id == task_id) else {
            return Vec::new();
        };
        task.state = RobotTaskState::Done;
        let staging_index = task.staging_index;
        let robot_id = task.robot_id.clone();

        for (item_str, delta) in deltas {
            let item = ItemName::normalize(item_str);
            let entry = ticket.stored.entry(item).or_insert(0);
            if *delta >= 0 {
                *entry += *delta as u64;
            } else {
                *entry = entry.saturating_sub((-delta) as u64);
            }
        }

        self.free_stagings.insert(staging_index);
        self.free_robots.insert(robot_id.clone());
        self.staging_owner.remove(&staging_index);
        self.robot_owner.remove(&robot_id);

        vec![Outbound::ToInterface {
            header: header::CRAFT_RECIPE_PROGRESS,
            payload: json!({ "ticketId": ticket_id.to_string(), "diff": deltas }),
        }]
    }

    pub fn robot_timed_out(&mut self, ticket_id: TicketId, task_id: u64) -> Vec<Outbound> {
        let mut out = Vec::new();
        let Some(ticket) = self.tickets.get_mut(ticket_id) else {
            return out;
        };
        if let Some(task) = ticket.tasks.iter_mut().find(|t| t.task_id == task_id) {
            task.state = RobotTaskState::Failed;
        }
        out.extend(self.halt_and_release(ticket_id));
        if let Some(ticket) = self.tickets.get_mut(ticket_id) {
            ticket.fail("robot craft timeout");
        }
        out.push(Outbound::ToStorage {
            header: header::STOR_DRONE_INSERT,
            payload: json!({ "ticketId": ticket_id.to_string() }),
        });
        out
    }
}

/// `stor_drone_extract`'s `extractList`: the recipe's inputs, scaled by the
/// batch multiplier, not the step's own output.
fn extract_list_for(db: &RecipeDb, recipe_index: usize, multiplier: u64) -> Vec<Value> {
    db.recipe(recipe_index)
        .inputs
        .iter()
        .map(|input| json!({ "item": input.item.to_string(), "amount": multiplier * input.amount as u64 }))
        .collect()
}

fn step_matches(ticket: &Ticket, step_index: usize) -> bool {
    ticket
        .plan
        .as_ref()
        .and_then(|p| p.steps.get(step_index))
        .map(|s| ticket.tasks.iter().any(|t| t.recipe_index == s.recipe_index))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::RecipeDb;
    use crate::storage_view::StorageSnapshot;

    fn topo() -> Topology {
        Topology::from_text(
            "
staging 1
  robot r1 3
",
        )
        .unwrap()
    }

    fn torch_db() -> RecipeDb {
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
    fn register_ok_plan_sends_confirm_and_reserve() {
        let mut scheduler = Scheduler::new(topo());
        let db = torch_db();
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(ItemName::normalize("coal"), 100);
        let plan = crate::planner::solve(&db, &snapshot, &ItemName::normalize("torch"), 16);
        let out = scheduler.register_plan(ItemName::normalize("torch"), 16, plan);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Outbound::ToInterface { header: h, .. } if h == header::CRAFT_RECIPE_CONFIRM));
        assert!(matches!(out[1], Outbound::ToStorage { header: h, .. } if h == header::STOR_RECIPE_RESERVE));
        let id = scheduler.tickets.active_ids_sorted()[0];
        assert_eq!(scheduler.tickets.get(id).unwrap().state, TicketState::PendingConfirm);
    }

    #[test]
    fn register_missing_plan_fails_immediately_after_confirm() {
        let mut scheduler = Scheduler::new(topo());
        let db = torch_db();
        let snapshot = StorageSnapshot::new();
        let plan = crate::planner::solve(&db, &snapshot, &ItemName::normalize("torch"), 16);
        let out = scheduler.register_plan(ItemName::normalize("torch"), 16, plan);
        assert_eq!(out.len(), 1);
        match &out[0] {
            Outbound::ToInterface { payload, .. } => {
                assert_eq!(payload["ticketId"], MISSING_TICKET_ID);
            }
            _ => panic!("expected interface message"),
        }
    }

    #[test]
    fn confirm_timeout_cancels_ticket() {
        let mut scheduler = Scheduler::new(topo());
        let db = torch_db();
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(ItemName::normalize("coal"), 100);
        let plan = crate::planner::solve(&db, &snapshot, &ItemName::normalize("torch"), 16);
        scheduler.register_plan(ItemName::normalize("torch"), 16, plan);
        let id = scheduler.tickets.active_ids_sorted()[0];

        // Advance past the confirm timeout (30s) in 1s ticks.
        for _ in 0..31 {
            scheduler.tick(1000, &db);
        }
        assert_eq!(scheduler.tickets.get(id).unwrap().state, TicketState::Cancelled);
    }

    #[test]
    fn cancel_releases_resources_and_halts_robots() {
        let mut scheduler = Scheduler::new(topo());
        let db = torch_db();
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(ItemName::normalize("coal"), 100);
        let plan = crate::planner::solve(&db, &snapshot, &ItemName::normalize("torch"), 16);
        scheduler.register_plan(ItemName::normalize("torch"), 16, plan);
        let id = scheduler.tickets.active_ids_sorted()[0];
        scheduler.handle_reserve_ack(id);
        scheduler.handle_start(id);
        scheduler.tick(50, &db); // dispatches the one available robot/staging

        let out = scheduler.handle_cancel(id);
        assert!(out.iter().any(|o| matches!(o, Outbound::ToRobot { header: h, .. } if *h == header::ROBOT_HALT)));
        assert_eq!(scheduler.tickets.get(id).unwrap().state, TicketState::Cancelled);
        assert!(scheduler.free_robots.contains("r1"));
        assert!(scheduler.free_stagings.contains(&1));
    }

    #[test]
    fn two_tickets_one_robot_never_double_assign() {
        let mut scheduler = Scheduler::new(topo());
        let db = torch_db();
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(ItemName::normalize("coal"), 100);

        let plan_a = crate::planner::solve(&db, &snapshot, &ItemName::normalize("torch"), 16);
        let plan_b = crate::planner::solve(&db, &snapshot, &ItemName::normalize("torch"), 16);
        scheduler.register_plan(ItemName::normalize("torch"), 16, plan_a);
        scheduler.register_plan(ItemName::normalize("torch"), 16, plan_b);
        let ids = scheduler.tickets.active_ids_sorted();
        for &id in &ids {
            scheduler.handle_reserve_ack(id);
            scheduler.handle_start(id);
        }

        scheduler.tick(50, &db);
        let busy_count = ids.iter().filter(|id| scheduler.tickets.get(**id).unwrap().tasks.iter().any(|t| t.state == RobotTaskState::Extracting)).count();
        assert_eq!(busy_count, 1, "only one ticket should have claimed the single robot");
        assert!(scheduler.free_robots.is_empty());
    }

    #[test]
    fn extract_dispatch_uses_recipe_inputs_not_output() {
        let mut scheduler = Scheduler::new(topo());
        let db = torch_db();
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(ItemName::normalize("coal"), 100);
        let plan = crate::planner::solve(&db, &snapshot, &ItemName::normalize("torch"), 16);
        scheduler.register_plan(ItemName::normalize("torch"), 16, plan);
        let id = scheduler.tickets.active_ids_sorted()[0];
        scheduler.handle_reserve_ack(id);
        scheduler.handle_start(id);

        let out = scheduler.tick(50, &db);
        let extract = out
            .iter()
            .find(|o| matches!(o, Outbound::ToStorage { header: h, .. } if *h == header::STOR_DRONE_EXTRACT))
            .expect("extract dispatched");
        match extract {
            Outbound::ToStorage { payload, .. } => {
                let list = payload["extractList"].as_array().unwrap();
                assert_eq!(list.len(), 1);
                assert_eq!(list[0]["item"], "coal/0");
                assert_eq!(list[0]["amount"], 4);
            }
            _ => unreachable!(),
        }
        let task = &scheduler.tickets.get(id).unwrap().tasks[0];
        assert_eq!(task.state, RobotTaskState::Extracting);
    }

    #[test]
    fn extract_failure_retried_three_times_then_ticket_fails() {
        let mut scheduler = Scheduler::new(topo());
        let db = torch_db();
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(ItemName::normalize("coal"), 100);
        let plan = crate::planner::solve(&db, &snapshot, &ItemName::normalize("torch"), 16);
        scheduler.register_plan(ItemName::normalize("torch"), 16, plan);
        let id = scheduler.tickets.active_ids_sorted()[0];
        scheduler.handle_reserve_ack(id);
        scheduler.handle_start(id);
        scheduler.tick(50, &db);
        let staging_index = scheduler.tickets.get(id).unwrap().tasks[0].staging_index;

        for _ in 0..config::T_EXTRACT_RETRIES {
            let out = scheduler.handle_extract_diff(id, staging_index, false, &db);
            assert!(out.iter().any(|o| matches!(o, Outbound::ToStorage { header: h, .. } if *h == header::STOR_DRONE_EXTRACT)));
            assert_eq!(scheduler.tickets.get(id).unwrap().state, TicketState::Active);
        }

        let out = scheduler.handle_extract_diff(id, staging_index, false, &db);
        assert!(out.iter().any(|o| matches!(o, Outbound::ToRobot { header: h, .. } if *h == header::ROBOT_HALT)));
        assert_eq!(scheduler.tickets.get(id).unwrap().state, TicketState::Failed);
    }

    #[test]
    fn extract_silence_past_t_extract_retries_then_fails_craft_path() {
        let mut scheduler = Scheduler::new(topo());
        let db = torch_db();
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(ItemName::normalize("coal"), 100);
        let plan = crate::planner::solve(&db, &snapshot, &ItemName::normalize("torch"), 16);
        scheduler.register_plan(ItemName::normalize("torch"), 16, plan);
        let id = scheduler.tickets.active_ids_sorted()[0];
        scheduler.handle_reserve_ack(id);
        scheduler.handle_start(id);
        scheduler.tick(50, &db); // dispatches the extract, task enters `extracting`

        // No stor_drone_item_diff ever arrives; each 6s of ticks re-fires the
        // extract-timeout once more until retries are exhausted.
        let mut out = Vec::new();
        for _ in 0..(4 * 6) {
            out = scheduler.tick(1000, &db);
        }
        assert!(out.iter().any(|o| matches!(o, Outbound::ToRobot { header: h, .. } if *h == header::ROBOT_HALT)));
        assert_eq!(scheduler.tickets.get(id).unwrap().state, TicketState::Failed);
    }

    #[test]
    fn robot_craft_silence_past_t_craft_fails_ticket() {
        let mut scheduler = Scheduler::new(topo());
        let db = torch_db();
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(ItemName::normalize("coal"), 100);
        let plan = crate::planner::solve(&db, &snapshot, &ItemName::normalize("torch"), 16);
        scheduler.register_plan(ItemName::normalize("torch"), 16, plan);
        let id = scheduler.tickets.active_ids_sorted()[0];
        scheduler.handle_reserve_ack(id);
        scheduler.handle_start(id);
        scheduler.tick(50, &db);
        let staging_index = scheduler.tickets.get(id).unwrap().tasks[0].staging_index;
        scheduler.handle_extract_diff(id, staging_index, true, &db);
        assert_eq!(scheduler.tickets.get(id).unwrap().tasks[0].state, RobotTaskState::Crafting);

        let mut out = Vec::new();
        for _ in 0..61 {
            out = scheduler.tick(1000, &db);
        }
        assert!(out.iter().any(|o| matches!(o, Outbound::ToStorage { header: h, .. } if *h == header::STOR_DRONE_INSERT)));
        assert_eq!(scheduler.tickets.get(id).unwrap().state, TicketState::Failed);
    }
}
