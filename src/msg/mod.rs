pub mod craft;
pub mod robot;
pub mod storage;

/// Message headers, grouped by sender/feature area — mirrors the shape of a
/// `msg::id` constant table, but keyed by the wire's string headers rather
/// than a closed `u8` enum, since the catalog is fixed by an external
/// protocol rather than a companion client binary we control.
#[allow(dead_code)]
pub mod header {
    // Storage (C<->S)
    pub const STOR_DISCOVER: &str = "stor_discover";
    pub const STOR_ITEM_LIST: &str = "stor_item_list";
    pub const STOR_GET_DRONE_ITEM_LIST: &str = "stor_get_drone_item_list";
    pub const STOR_DRONE_ITEM_LIST: &str = "stor_drone_item_list";
    pub const STOR_RECIPE_RESERVE: &str = "stor_recipe_reserve";
    pub const STOR_RECIPE_START: &str = "stor_recipe_start";
    pub const STOR_DRONE_EXTRACT: &str = "stor_drone_extract";
    pub const STOR_DRONE_INSERT: &str = "stor_drone_insert";
    pub const STOR_DRONE_ITEM_DIFF: &str = "stor_drone_item_diff";

    // Interface (U<->C)
    pub const CRAFT_CHECK_RECIPE: &str = "craft_check_recipe";
    pub const CRAFT_RECIPE_CONFIRM: &str = "craft_recipe_confirm";
    pub const CRAFT_RECIPE_ERROR: &str = "craft_recipe_error";
    pub const CRAFT_RECIPE_START: &str = "craft_recipe_start";
    pub const CRAFT_RECIPE_CANCEL: &str = "craft_recipe_cancel";
    pub const CRAFT_RECIPE_PROGRESS: &str = "craft_recipe_progress";

    // Robot (C<->R)
    pub const ROBOT_HALT: &str = "robot_halt";
    pub const ROBOT_UPLOAD: &str = "robot_upload";
    pub const ROBOT_PREPARE_CRAFT: &str = "robot_prepare_craft";
    pub const ROBOT_START_CRAFT: &str = "robot_start_craft";
    pub const ROBOT_FINISHED_CRAFT: &str = "robot_finished_craft";
    pub const ROBOT_SCAN_ADJACENT: &str = "robot_scan_adjacent";
    pub const ROBOT_SCAN_ADJACENT_RESULT: &str = "robot_scan_adjacent_result";
}
