//! Crafting planner: depth-first recipe selection with ordered backtracking.
//!
//! Grounded on the recursive `resolve`/checkpoint shape of a production
//! dependency resolver (see `other_examples` in the retrieval pack), adapted
//! to this system's multi-producer backtracking and recursive-recipe collapse
//! rules.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::recipe::{ItemName, RecipeDb};
use crate::storage_view::StorageSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Ok,
    Missing,
    Error,
}

/// One grouped crafting step: invoke `recipe_index` `multiplier` times.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub item: ItemName,
    pub recipe_index: usize,
    pub multiplier: u64,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub status: PlanStatus,
    pub steps: Vec<PlanStep>,
    /// Net consumption across the full plan: positive = drawn from storage,
    /// negative = surplus output remaining.
    pub required_items: BTreeMap<ItemName, i64>,
    /// Shortfalls that no known recipe can make.
    pub missing_items: BTreeMap<ItemName, u64>,
}

impl Plan {
    fn empty_ok() -> Self {
        Self {
            status: PlanStatus::Ok,
            steps: Vec::new(),
            required_items: BTreeMap::new(),
            missing_items: BTreeMap::new(),
        }
    }
}

/// A single worklist entry as it was resolved, in the order it was first
/// attempted (pre-order: a recipe's own step precedes its inputs' steps).
struct RawStep {
    item: ItemName,
    amount: u64,
    recipe_index: usize,
    recursive: bool,
}

struct Ctx {
    required: HashMap<ItemName, i64>,
    missing: HashMap<ItemName, u64>,
    steps: Vec<RawStep>,
}

struct Checkpoint {
    required: HashMap<ItemName, i64>,
    missing: HashMap<ItemName, u64>,
    steps_len: usize,
}

impl Ctx {
    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            required: self.required.clone(),
            missing: self.missing.clone(),
            steps_len: self.steps.len(),
        }
    }

    fn restore(&mut self, cp: Checkpoint) {
        self.required = cp.required;
        self.missing = cp.missing;
        self.steps.truncate(cp.steps_len);
    }

    fn available(&self, snapshot: &StorageSnapshot, item: &ItemName) -> u64 {
        let required = self.required.get(item).copied().unwrap_or(0);
        (snapshot.total(item) as i64 - required).max(0) as u64
    }

    fn add_required(&mut self, item: &ItemName, delta: i64) {
        *self.required.entry(item.clone()).or_insert(0) += delta;
    }

    fn add_missing(&mut self, item: &ItemName, amount: u64) {
        if amount > 0 {
            *self.missing.entry(item.clone()).or_insert(0) += amount;
        }
    }
}

fn div_ceil(amount: u64, unit: u64) -> u64 {
    if unit == 0 {
        amount
    } else {
        (amount + unit - 1) / unit
    }
}

/// Resolve `amount` units of `item`, recording recipe choices and demand into
/// `ctx`. Returns `true` if this subtree introduced no missing shortfall.
fn resolve(db: &RecipeDb, snapshot: &StorageSnapshot, ctx: &mut Ctx, item: &ItemName, amount: u64) -> bool {
    let producers = db.producers_of(item).to_vec();

    if producers.is_empty() {
        let available = ctx.available(snapshot, item);
        let shortfall = amount.saturating_sub(available);
        ctx.add_missing(item, shortfall);
        return shortfall == 0;
    }

    if producers.len() == 1 {
        return apply_recipe(db, snapshot, ctx, item, amount, producers[0]);
    }

    // Multiple producers: ordered backtracking with savepoints.
    let mut first_attempt: Option<Checkpoint> = None;
    for (attempt, &recipe_index) in producers.iter().enumerate() {
        let pre = ctx.checkpoint();
        let ok = apply_recipe(db, snapshot, ctx, item, amount, recipe_index);
        if ok {
            return true;
        }
        let post_failure = ctx.checkpoint();
        ctx.restore(pre);
        if attempt == 0 {
            first_attempt = Some(post_failure);
        }
    }
    // All alternatives failed: keep the first attempt's result for diagnostics.
    if let Some(first) = first_attempt {
        ctx.restore(first);
    }
    false
}

fn apply_recipe(
    db: &RecipeDb,
    snapshot: &StorageSnapshot,
    ctx: &mut Ctx,
    item: &ItemName,
    amount: u64,
    recipe_index: usize,
) -> bool {
    let recipe = db.recipe(recipe_index);
    let recursive = recipe.is_recursive();
    let mult = if recursive {
        amount
    } else {
        div_ceil(amount, recipe.batch_unit as u64)
    };

    ctx.steps.push(RawStep {
        item: item.clone(),
        amount,
        recipe_index,
        recursive,
    });

    let own_outputs: HashSet<&ItemName> = recipe.outputs.iter().map(|o| &o.item).collect();

    let mut all_ok = true;
    for input in &recipe.inputs {
        let add_amount = mult * input.amount as u64;
        let available = ctx.available(snapshot, &input.item);
        ctx.add_required(&input.item, add_amount as i64);

        if own_outputs.contains(&input.item) {
            // Self-referential input of a recursive recipe: the output
            // decrement below settles this demand as net surplus/consumption
            // rather than recursing into an unbounded fixed point.
            continue;
        }

        if add_amount > available {
            let need = add_amount - available;
            if !db.producers_of(&input.item).is_empty() {
                let ok = resolve(db, snapshot, ctx, &input.item, need);
                all_ok = all_ok && ok;
            } else {
                ctx.add_missing(&input.item, need);
                all_ok = false;
            }
        }
    }

    for output in &recipe.outputs {
        ctx.add_required(&output.item, -((mult * output.amount as u64) as i64));
    }

    all_ok
}

/// Group consecutive raw steps that share a recipe index into batched plan
/// steps, walking the raw (pre-order) list in reverse so dependencies are
/// emitted before the steps that consume them.
fn group_steps(raw: Vec<RawStep>) -> Vec<PlanStep> {
    let mut grouped: Vec<PlanStep> = Vec::new();
    let mut pending: Option<(ItemName, usize, u64, bool)> = None; // item, recipe, amount_sum, recursive

    fn flush(pending: Option<(ItemName, usize, u64, bool)>, out: &mut Vec<PlanStep>) {
        if let Some((item, recipe_index, amount_sum, _recursive)) = pending {
            // multiplier is recomputed against the recipe's batch_unit by the
            // caller once summation is final; stash the raw sum for now.
            out.push(PlanStep {
                item,
                recipe_index,
                multiplier: amount_sum,
            });
        }
    }

    for step in raw.into_iter().rev() {
        match &mut pending {
            Some((_, recipe_index, amount_sum, _)) if *recipe_index == step.recipe_index => {
                *amount_sum += step.amount;
            }
            _ => {
                flush(pending.take(), &mut grouped);
                pending = Some((step.item, step.recipe_index, step.amount, step.recursive));
            }
        }
    }
    flush(pending, &mut grouped);
    grouped
}

/// Produce a Plan for crafting `amount` units of `target` from `snapshot`
/// using `db`.
pub fn solve(db: &RecipeDb, snapshot: &StorageSnapshot, target: &ItemName, amount: u64) -> Plan {
    if amount == 0 {
        return Plan::empty_ok();
    }

    let mut ctx = Ctx {
        required: HashMap::new(),
        missing: HashMap::new(),
        steps: Vec::new(),
    };

    let producers = db.producers_of(target);
    let fully_resolved = if producers.is_empty() {
        let available = ctx.available(snapshot, target);
        let shortfall = amount.saturating_sub(available);
        ctx.add_missing(target, shortfall);
        shortfall == 0
    } else {
        resolve(db, snapshot, &mut ctx, target, amount)
    };

    let steps = group_steps(ctx.steps);

    // Recompute each group's multiplier against its recipe's batch_unit now
    // that amounts are fully summed (recursive recipes keep the raw sum).
    let steps = steps
        .into_iter()
        .map(|mut s| {
            let recipe = db.recipe(s.recipe_index);
            if !recipe.is_recursive() {
                s.multiplier = div_ceil(s.multiplier, recipe.batch_unit as u64);
            }
            s
        })
        .collect();

    let status = if !ctx.missing.is_empty() {
        PlanStatus::Missing
    } else if fully_resolved {
        PlanStatus::Ok
    } else {
        // Internal inconsistency: backtracking exhausted with no recorded
        // shortfall. Treated as a malformed-database error.
        PlanStatus::Error
    };

    Plan {
        status,
        steps,
        required_items: ctx.required.into_iter().collect(),
        missing_items: ctx.missing.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(text: &str) -> RecipeDb {
        RecipeDb::from_text(text).unwrap()
    }

    fn item(s: &str) -> ItemName {
        ItemName::normalize(s)
    }

    // Scenario 1: torch, nothing available.
    #[test]
    fn scenario_torch_nothing_available() {
        let recipes = db(
            "
[recipe]
station = crafting_table
batch_unit = 4
input = coal 1
input = stick 1
output = torch 4

[recipe]
station = crafting_table
batch_unit = 4
input = planks 2
output = stick 4
",
        );
        let snapshot = StorageSnapshot::new();
        let plan = solve(&recipes, &snapshot, &item("torch"), 16);

        assert_eq!(plan.status, PlanStatus::Missing);
        assert_eq!(plan.missing_items.get(&item("coal")), Some(&4));
        assert_eq!(plan.missing_items.get(&item("planks")), Some(&2));
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].item, item("stick"));
        assert_eq!(plan.steps[1].item, item("torch"));
    }

    // Torch with 3 coal and 1 charcoal available — no recipe splits demand
    // across multiple producers (the planner never multi-sources one item
    // from two recipes in a single plan; this is a deliberate heuristic
    // simplification, see DESIGN.md), so the first-listed producer (coal) is
    // used for the full amount and its shortfall surfaces.
    #[test]
    fn scenario_torch_partial_coal() {
        let recipes = db(
            "
[recipe]
station = crafting_table
batch_unit = 4
input = coal 1
input = stick 1
output = torch 4

[recipe]
station = crafting_table
batch_unit = 4
input = charcoal 1
input = stick 1
output = torch 4

[recipe]
station = crafting_table
batch_unit = 4
input = planks 2
output = stick 4
",
        );
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(item("coal"), 3);
        snapshot.set(item("charcoal"), 1);
        snapshot.set(item("planks"), 100);

        let plan = solve(&recipes, &snapshot, &item("torch"), 16);
        assert_eq!(plan.status, PlanStatus::Missing);
        assert_eq!(plan.missing_items.get(&item("coal")), Some(&1));
    }

    // Scenario 3: recursive iron_alloy recipe.
    #[test]
    fn scenario_iron_alloy_recursive() {
        let recipes = db(
            "
[recipe]
station = processing
batch_unit = 3
input = iron_alloy 2
input = iron 3
output = iron_alloy 3
output = slag 1
",
        );
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(item("iron_alloy"), 2);
        snapshot.set(item("iron"), 100);

        let plan = solve(&recipes, &snapshot, &item("iron_alloy"), 10);
        assert_eq!(plan.status, PlanStatus::Ok);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].multiplier, 10);
        assert_eq!(plan.required_items.get(&item("iron")), Some(&30));
        // Net iron_alloy: +20 input demand, -30 output => -10 surplus.
        assert_eq!(plan.required_items.get(&item("iron_alloy")), Some(&-10));
    }

    // amount=0 yields the empty ok plan.
    #[test]
    fn zero_amount_is_empty_ok_plan() {
        let recipes = db(
            "
[recipe]
station = crafting_table
batch_unit = 1
input = a 1
output = b 1
",
        );
        let snapshot = StorageSnapshot::new();
        let plan = solve(&recipes, &snapshot, &item("b"), 0);
        assert_eq!(plan.status, PlanStatus::Ok);
        assert!(plan.required_items.is_empty());
        assert!(plan.steps.is_empty());
    }

    // status=missing iff missingItems is non-empty.
    #[test]
    fn missing_status_matches_missing_items() {
        let recipes = db(
            "
[recipe]
station = crafting_table
batch_unit = 1
input = ore 1
output = ingot 1
",
        );
        let mut snapshot = StorageSnapshot::new();
        snapshot.set(item("ore"), 100);
        let ok_plan = solve(&recipes, &snapshot, &item("ingot"), 5);
        assert_eq!(ok_plan.status, PlanStatus::Ok);
        assert!(ok_plan.missing_items.is_empty());

        let snapshot_empty = StorageSnapshot::new();
        let missing_plan = solve(&recipes, &snapshot_empty, &item("ingot"), 5);
        assert_eq!(missing_plan.status, PlanStatus::Missing);
        assert!(!missing_plan.missing_items.is_empty());
    }

    // determinism across repeated runs.
    #[test]
    fn deterministic_across_runs() {
        let recipes = db(
            "
[recipe]
station = crafting_table
batch_unit = 4
input = coal 1
input = stick 1
output = torch 4

[recipe]
station = crafting_table
batch_unit = 4
input = planks 2
output = stick 4
",
        );
        let snapshot = StorageSnapshot::new();
        let a = solve(&recipes, &snapshot, &item("torch"), 16);
        let b = solve(&recipes, &snapshot, &item("torch"), 16);
        assert_eq!(a.status, b.status);
        assert_eq!(a.missing_items, b.missing_items);
        assert_eq!(a.required_items, b.required_items);
        assert_eq!(a.steps.len(), b.steps.len());
        for (sa, sb) in a.steps.iter().zip(b.steps.iter()) {
            assert_eq!(sa.item, sb.item);
            assert_eq!(sa.recipe_index, sb.recipe_index);
            assert_eq!(sa.multiplier, sb.multiplier);
        }
    }

    #[test]
    fn no_producer_target_reports_missing_directly() {
        let recipes = db(
            "
[recipe]
station = crafting_table
batch_unit = 1
input = a 1
output = b 1
",
        );
        let snapshot = StorageSnapshot::new();
        let plan = solve(&recipes, &snapshot, &item("nonexistent"), 3);
        assert_eq!(plan.status, PlanStatus::Missing);
        assert_eq!(plan.missing_items.get(&item("nonexistent")), Some(&3));
        assert!(plan.steps.is_empty());
    }
}
