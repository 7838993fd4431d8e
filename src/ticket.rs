//! Ticket store: the crafting-request lifecycle state machine.
//!
//! Grounded on `game/mod.rs`'s `GameServer`, which owns every live entity in
//! a `HashMap` keyed by an opaque id minted from an `AtomicU64` counter
//! (`systems/crafting.rs`'s `job_id` pattern) rather than `rand`/`uuid` — the
//! coordinator is deterministic and ids only need to be unique, not random.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::planner::Plan;
use crate::recipe::ItemName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(u64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket-{}", self.0)
    }
}

impl TicketId {
    /// Reconstructs a `TicketId` from the numeric suffix of its `Display`
    /// form — used when parsing a `ticketId` field back off the wire.
    pub fn from_raw(n: u64) -> Self {
        Self(n)
    }
}

static NEXT_TICKET_ID: AtomicU64 = AtomicU64::new(1);

fn next_ticket_id() -> TicketId {
    TicketId(NEXT_TICKET_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Planning,
    PendingConfirm,
    Reserved,
    Active,
    Draining,
    Retired,
    Failed,
    Cancelled,
}

impl TicketState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Retired | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotTaskState {
    Extracting,
    Crafting,
    Done,
    Failed,
}

/// A single staging-slot robot assignment within a ticket's active phase.
#[derive(Debug, Clone)]
pub struct RobotTask {
    pub task_id: u64,
    pub robot_id: String,
    pub side: u8,
    pub staging_index: u32,
    pub recipe_index: usize,
    pub multiplier: u64,
    pub state: RobotTaskState,
    pub extract_attempts: u32,
    /// Ticks spent in the current `state`, reset whenever the task's state
    /// changes; drives the per-task `T_extract`/`T_craft` deadlines.
    pub ticks_in_task_state: u32,
}

#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: TicketId,
    pub target: ItemName,
    pub amount: u64,
    pub state: TicketState,
    pub plan: Option<Plan>,
    /// Shadow of storage's reservation bookkeeping for this ticket;
    /// storage is the authority, this copy is updated on ack.
    pub reservation: BTreeMap<ItemName, i64>,
    /// Items currently sitting in staging inventories for this ticket
    /// (every entry stays >= 0 for the life of the ticket).
    pub stored: BTreeMap<ItemName, u64>,
    pub tasks: Vec<RobotTask>,
    pub failure_reason: Option<String>,
    /// Index into `plan.steps` of the next step awaiting dispatch.
    pub next_step: usize,
    /// Ticks since the confirm was sent; spans both `pending_confirm` and
    /// `reserved` (the timeout window covers the whole wait for the
    /// interface's `craft_recipe_start`), reset only on leaving both.
    pub awaiting_start_ticks: u32,
}

impl Ticket {
    fn new(id: TicketId, target: ItemName, amount: u64) -> Self {
        Self {
            id,
            target,
            amount,
            state: TicketState::Planning,
            plan: None,
            reservation: BTreeMap::new(),
            stored: BTreeMap::new(),
            tasks: Vec::new(),
            failure_reason: None,
            next_step: 0,
            awaiting_start_ticks: 0,
        }
    }

    pub fn transition(&mut self, next: TicketState) {
        if !matches!(self.state, TicketState::PendingConfirm | TicketState::Reserved)
            || !matches!(next, TicketState::PendingConfirm | TicketState::Reserved)
        {
            self.awaiting_start_ticks = 0;
        }
        self.state = next;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.transition(TicketState::Failed);
    }

    pub fn current_step(&self) -> Option<&crate::planner::PlanStep> {
        self.plan.as_ref().and_then(|p| p.steps.get(self.next_step))
    }
}

/// Owns every live ticket. Mirrors `GameServer`'s per-entity `HashMap`
/// ownership — the scheduler borrows tickets by id each tick rather than
/// holding long-lived references across await points.
#[derive(Default)]
pub struct TicketStore {
    tickets: HashMap<TicketId, Ticket>,
}

impl TicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, target: ItemName, amount: u64) -> TicketId {
        let id = next_ticket_id();
        self.tickets.insert(id, Ticket::new(id, target, amount));
        id
    }

    pub fn get(&self, id: TicketId) -> Option<&Ticket> {
        self.tickets.get(&id)
    }

    pub fn get_mut(&mut self, id: TicketId) -> Option<&mut Ticket> {
        self.tickets.get_mut(&id)
    }

    pub fn remove(&mut self, id: TicketId) -> Option<Ticket> {
        self.tickets.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Ticket> {
        self.tickets.values_mut()
    }

    /// Active (non-terminal) tickets, in ascending id order — the scheduler's
    /// round-robin fairness rule iterates in this order each tick.
    pub fn active_ids_sorted(&self) -> Vec<TicketId> {
        let mut ids: Vec<TicketId> = self
            .tickets
            .values()
            .filter(|t| !t.state.is_terminal())
            .map(|t| t.id)
            .collect();
        ids.sort();
        ids
    }

    /// Drop tickets that reached a terminal state, freeing their storage.
    /// Call periodically, not every tick, so callers can still observe a
    /// just-retired ticket before it disappears.
    pub fn sweep_terminal(&mut self) {
        self.tickets.retain(|_, t| !t.state.is_terminal());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_unique_ascending_ids() {
        let mut store = TicketStore::new();
        let a = store.create(ItemName::normalize("torch"), 16);
        let b = store.create(ItemName::normalize("torch"), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn transition_changes_state() {
        let mut store = TicketStore::new();
        let id = store.create(ItemName::normalize("torch"), 16);
        let ticket = store.get_mut(id).unwrap();
        ticket.transition(TicketState::PendingConfirm);
        assert_eq!(ticket.state, TicketState::PendingConfirm);
    }

    #[test]
    fn awaiting_start_ticks_survives_pending_to_reserved() {
        let mut store = TicketStore::new();
        let id = store.create(ItemName::normalize("torch"), 16);
        let ticket = store.get_mut(id).unwrap();
        ticket.transition(TicketState::PendingConfirm);
        ticket.awaiting_start_ticks = 10;
        ticket.transition(TicketState::Reserved);
        assert_eq!(ticket.awaiting_start_ticks, 10);
        ticket.transition(TicketState::Active);
        assert_eq!(ticket.awaiting_start_ticks, 0);
    }

    #[test]
    fn sweep_removes_only_terminal_tickets() {
        let mut store = TicketStore::new();
        let keep = store.create(ItemName::normalize("torch"), 16);
        let drop_id = store.create(ItemName::normalize("stick"), 4);
        store.get_mut(drop_id).unwrap().transition(TicketState::Retired);
        store.sweep_terminal();
        assert!(store.get(keep).is_some());
        assert!(store.get(drop_id).is_none());
    }

    #[test]
    fn active_ids_sorted_excludes_terminal() {
        let mut store = TicketStore::new();
        let a = store.create(ItemName::normalize("torch"), 16);
        let b = store.create(ItemName::normalize("stick"), 4);
        store.get_mut(b).unwrap().transition(TicketState::Cancelled);
        assert_eq!(store.active_ids_sorted(), vec![a]);
    }
}
