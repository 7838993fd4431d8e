//! Subsystem-filtered logging setup.
//!
//! `main` used to initialize `tracing_subscriber::fmt()` directly; here we
//! build an `EnvFilter` from an explicit `{subsystem -> enabled}` map first,
//! falling back to a `*` wildcard, then hand that filter to the same
//! `fmt()` builder.

use std::collections::HashMap;

use tracing_subscriber::EnvFilter;

/// Builds an `EnvFilter` directive string from a subsystem enablement map.
/// Checked once at startup, before any formatting work.
pub fn build_filter(subsystems: &HashMap<String, bool>, wildcard_enabled: bool) -> EnvFilter {
    let mut directives: Vec<String> = subsystems
        .iter()
        .map(|(name, enabled)| format!("{name}={}", if *enabled { "debug" } else { "off" }))
        .collect();
    directives.sort();
    let base = if wildcard_enabled { "info" } else { "off" };
    let spec = if directives.is_empty() {
        base.to_string()
    } else {
        format!("{base},{}", directives.join(","))
    };
    EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(subsystems: &HashMap<String, bool>, wildcard_enabled: bool) {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_env_filter(build_filter(subsystems, wildcard_enabled))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_map_falls_back_to_wildcard() {
        let filter = build_filter(&HashMap::new(), true);
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn per_subsystem_directive_included() {
        let mut subsystems = HashMap::new();
        subsystems.insert("scheduler".to_string(), true);
        let filter = build_filter(&subsystems, false);
        assert!(filter.to_string().contains("scheduler=debug"));
    }
}
