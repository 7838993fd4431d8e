//! Payload structs for the `stor_*` message family.
#![allow(dead_code)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemListPayload {
    pub items: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneItemEntry {
    pub staging_index: u32,
    pub items: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneItemListPayload {
    pub stagings: Vec<DroneItemEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeReservePayload {
    pub ticket_id: String,
    // FIXME (open question, see DESIGN.md): conflated net account rather
    // than split netInputs/netOutputs, matching `Plan::required_items`.
    pub required_items: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStartPayload {
    pub ticket_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractItem {
    pub item: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneExtractPayload {
    pub staging_index: u32,
    pub ticket_id: String,
    pub extract_list: Vec<ExtractItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneInsertPayload {
    pub staging_index: u32,
    pub ticket_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DroneDiffResult {
    Ok,
    Missing,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneItemDiffPayload {
    pub ticket_id: String,
    pub result: DroneDiffResult,
    pub per_staging_diff: Vec<DroneItemEntry>,
}
