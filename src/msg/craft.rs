//! Payload structs for the `craft_*` message family (interface-facing).
#![allow(dead_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRecipePayload {
    pub item: String,
    pub amount: u64,
}

/// `ticket_id` is the literal string `"missing"` when the plan failed
/// (a real ticket id otherwise).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeConfirmPayload {
    pub ticket_id: String,
    pub requirements: BTreeMap<String, i64>,
}

pub const MISSING_TICKET_ID: &str = "missing";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStartPayload {
    pub ticket_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeCancelPayload {
    pub ticket_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeProgressPayload {
    pub ticket_id: String,
    pub diff: BTreeMap<String, i64>,
}
