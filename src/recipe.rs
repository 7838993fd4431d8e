//! Recipe database: data-driven recipes loaded from a text configuration.
//!
//! Mirrors the Odyssey crafting table (`systems/crafting.rs` in the game this
//! was adapted from) but items are plain, case-normalized strings rather than
//! a closed enum, since the recipe set is no longer known at compile time.

use std::collections::HashMap;
use std::fmt;

/// An opaque item name of the form `<namespace>:<name>/<variant>[n]`.
///
/// Compared by equality only, after normalization (lowercased, missing
/// `/variant` defaulted to `/0`). The trailing `n` marks a damage-insensitive
/// match but is otherwise just part of the string for our purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemName(String);

impl ItemName {
    /// Normalizes a raw item name: lowercase, and appends `/0` if no variant
    /// is present. Idempotent: `normalize(normalize(x)) == normalize(x)`.
    pub fn normalize(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        if lower.contains('/') {
            Self(lower)
        } else {
            Self(format!("{lower}/0"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemName {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}

impl From<String> for ItemName {
    fn from(raw: String) -> Self {
        Self::normalize(&raw)
    }
}

/// Station a recipe is crafted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Station {
    CraftingTable,
    Processing,
}

impl Station {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "crafting_table" => Some(Self::CraftingTable),
            "processing" => Some(Self::Processing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecipeInput {
    pub item: ItemName,
    pub amount: u32,
}

#[derive(Debug, Clone)]
pub struct RecipeOutput {
    pub item: ItemName,
    pub amount: u32,
}

/// A single recipe: a fixed set of inputs consumed to produce a fixed set of
/// outputs, one invocation at a time. `batch_unit` is the quantity of the
/// primary (first) output one invocation yields.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub inputs: Vec<RecipeInput>,
    pub outputs: Vec<RecipeOutput>,
    pub station: Station,
    pub batch_unit: u32,
}

impl Recipe {
    /// A recipe is recursive if any input item also appears among its
    /// outputs (name match, directly or transitively through this one step).
    pub fn is_recursive(&self) -> bool {
        self.inputs
            .iter()
            .any(|i| self.outputs.iter().any(|o| o.item == i.item))
    }

    /// The primary output — the first in the outputs list, whose amount
    /// `batch_unit` is defined against.
    pub fn primary_output(&self) -> &RecipeOutput {
        &self.outputs[0]
    }
}

#[derive(Debug)]
pub enum RecipeDbError {
    Io(std::io::Error),
    Parse { line: usize, message: String },
    Invariant { message: String },
}

impl fmt::Display for RecipeDbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Parse { line, message } => write!(f, "line {line}: {message}"),
            Self::Invariant { message } => write!(f, "invalid recipe: {message}"),
        }
    }
}

impl std::error::Error for RecipeDbError {}

impl From<std::io::Error> for RecipeDbError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Read-mostly catalog: recipes plus an index from item -> producing recipes.
///
/// Producer order within an item's list is authoritative for branch priority:
/// with equal alternatives, the first one listed is chosen.
pub struct RecipeDb {
    recipes: Vec<Recipe>,
    producers: HashMap<ItemName, Vec<usize>>,
}

impl RecipeDb {
    pub fn from_text(text: &str) -> Result<Self, RecipeDbError> {
        let mut recipes = Vec::new();
        let mut cur: Option<RecipeBuilder> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line == "[recipe]" {
                if let Some(builder) = cur.take() {
                    recipes.push(builder.finish(line_no)?);
                }
                cur = Some(RecipeBuilder::default());
                continue;
            }
            let builder = cur.as_mut().ok_or_else(|| RecipeDbError::Parse {
                line: line_no,
                message: "entry outside of a [recipe] block".to_string(),
            })?;
            builder.apply_line(line, line_no)?;
        }
        if let Some(builder) = cur.take() {
            recipes.push(builder.finish(text.lines().count())?);
        }

        Self::from_recipes(recipes)
    }

    pub fn from_recipes(recipes: Vec<Recipe>) -> Result<Self, RecipeDbError> {
        let mut producers: HashMap<ItemName, Vec<usize>> = HashMap::new();
        for (i, recipe) in recipes.iter().enumerate() {
            if recipe.outputs.is_empty() {
                return Err(RecipeDbError::Invariant {
                    message: "recipe has no outputs".to_string(),
                });
            }
            for out in &recipe.outputs {
                if out.amount == 0 {
                    return Err(RecipeDbError::Invariant {
                        message: format!("output {} has amount 0", out.item),
                    });
                }
                producers.entry(out.item.clone()).or_default().push(i);
            }
            for input in &recipe.inputs {
                if input.amount == 0 {
                    return Err(RecipeDbError::Invariant {
                        message: format!("input {} has amount 0", input.item),
                    });
                }
            }
        }
        Ok(Self { recipes, producers })
    }

    pub fn recipe(&self, index: usize) -> &Recipe {
        &self.recipes[index]
    }

    pub fn producers_of(&self, item: &ItemName) -> &[usize] {
        self.producers
            .get(item)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Default)]
struct RecipeBuilder {
    station: Option<Station>,
    batch_unit: Option<u32>,
    inputs: Vec<RecipeInput>,
    outputs: Vec<RecipeOutput>,
}

impl RecipeBuilder {
    fn apply_line(&mut self, line: &str, line_no: usize) -> Result<(), RecipeDbError> {
        let (key, value) = line.split_once('=').ok_or_else(|| RecipeDbError::Parse {
            line: line_no,
            message: format!("expected `key = value`, got `{line}`"),
        })?;
        let key = key.trim();
        let value = value.trim();

        match key {
            "station" => {
                self.station = Some(Station::parse(value).ok_or_else(|| RecipeDbError::Parse {
                    line: line_no,
                    message: format!("unknown station `{value}`"),
                })?);
            }
            "batch_unit" => {
                self.batch_unit = Some(value.parse().map_err(|_| RecipeDbError::Parse {
                    line: line_no,
                    message: format!("invalid batch_unit `{value}`"),
                })?);
            }
            "input" => {
                let (item, amount) = parse_item_amount(value, line_no)?;
                self.inputs.push(RecipeInput { item, amount });
            }
            "output" => {
                let (item, amount) = parse_item_amount(value, line_no)?;
                self.outputs.push(RecipeOutput { item, amount });
            }
            other => {
                return Err(RecipeDbError::Parse {
                    line: line_no,
                    message: format!("unknown key `{other}`"),
                })
            }
        }
        Ok(())
    }

    fn finish(self, line_no: usize) -> Result<Recipe, RecipeDbError> {
        let station = self.station.ok_or_else(|| RecipeDbError::Parse {
            line: line_no,
            message: "recipe missing `station`".to_string(),
        })?;
        if self.outputs.is_empty() {
            return Err(RecipeDbError::Parse {
                line: line_no,
                message: "recipe has no `output` lines".to_string(),
            });
        }
        let batch_unit = self.batch_unit.unwrap_or(self.outputs[0].amount);
        Ok(Recipe {
            inputs: self.inputs,
            outputs: self.outputs,
            station,
            batch_unit,
        })
    }
}

fn parse_item_amount(value: &str, line_no: usize) -> Result<(ItemName, u32), RecipeDbError> {
    let mut parts = value.split_whitespace();
    let item = parts.next().ok_or_else(|| RecipeDbError::Parse {
        line: line_no,
        message: "missing item name".to_string(),
    })?;
    let amount = parts
        .next()
        .ok_or_else(|| RecipeDbError::Parse {
            line: line_no,
            message: "missing amount".to_string(),
        })?
        .parse()
        .map_err(|_| RecipeDbError::Parse {
            line: line_no,
            message: "amount is not a positive integer".to_string(),
        })?;
    Ok((ItemName::normalize(item), amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let a = ItemName::normalize("Minecraft:Coal");
        let b = ItemName::normalize(a.as_str());
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "minecraft:coal/0");
    }

    #[test]
    fn normalize_keeps_explicit_variant() {
        let a = ItemName::normalize("minecraft:wool/3");
        assert_eq!(a.as_str(), "minecraft:wool/3");
    }

    const TORCH_RECIPES: &str = "
# sample recipe db
[recipe]
station = crafting_table
batch_unit = 4
input = minecraft:coal 1
input = minecraft:stick 1
output = minecraft:torch 4

[recipe]
station = crafting_table
batch_unit = 4
input = minecraft:planks 2
output = minecraft:stick 4
";

    #[test]
    fn parses_recipe_blocks() {
        let db = RecipeDb::from_text(TORCH_RECIPES).unwrap();
        let torch = ItemName::normalize("minecraft:torch");
        let producers = db.producers_of(&torch);
        assert_eq!(producers.len(), 1);
        let recipe = db.recipe(producers[0]);
        assert_eq!(recipe.batch_unit, 4);
        assert!(!recipe.is_recursive());
    }

    #[test]
    fn detects_recursive_recipe() {
        let text = "
[recipe]
station = processing
batch_unit = 1
input = test:iron_alloy 2
input = test:iron 3
output = test:iron_alloy 3
output = test:slag 1
";
        let db = RecipeDb::from_text(text).unwrap();
        let alloy = ItemName::normalize("test:iron_alloy");
        let idx = db.producers_of(&alloy)[0];
        assert!(db.recipe(idx).is_recursive());
    }

    #[test]
    fn rejects_recipe_with_no_output() {
        let text = "
[recipe]
station = processing
input = test:a 1
";
        let err = RecipeDb::from_text(text).unwrap_err();
        assert!(matches!(err, RecipeDbError::Parse { .. }));
    }
}
