//! Topology: the static `{staging index -> {robot id -> side}}` map produced
//! by the setup utility and loaded once at coordinator startup.
//!
//! Grounded on `config.rs`'s load-once, process-wide-immutable style, with a
//! text format in the line-oriented vein of `recipe.rs`'s `[recipe]` blocks.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug)]
pub enum TopologyError {
    Io(std::io::Error),
    Parse { line: usize, message: String },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Parse { line, message } => write!(f, "line {line}: {message}"),
        }
    }
}

impl std::error::Error for TopologyError {}

impl From<std::io::Error> for TopologyError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// {stagingIndex -> {robotId -> side}}, immutable after load.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    stagings: HashMap<u32, HashMap<String, u8>>,
}

impl Topology {
    pub fn from_text(text: &str) -> Result<Self, TopologyError> {
        let mut stagings: HashMap<u32, HashMap<String, u8>> = HashMap::new();
        let mut current: Option<u32> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("staging") => {
                    let index: u32 = parts
                        .next()
                        .ok_or_else(|| TopologyError::Parse {
                            line: line_no,
                            message: "missing staging index".to_string(),
                        })?
                        .parse()
                        .map_err(|_| TopologyError::Parse {
                            line: line_no,
                            message: "staging index is not a number".to_string(),
                        })?;
                    stagings.entry(index).or_default();
                    current = Some(index);
                }
                Some("robot") => {
                    let staging_index = current.ok_or_else(|| TopologyError::Parse {
                        line: line_no,
                        message: "robot entry outside of a staging block".to_string(),
                    })?;
                    let robot_id = parts
                        .next()
                        .ok_or_else(|| TopologyError::Parse {
                            line: line_no,
                            message: "missing robot id".to_string(),
                        })?
                        .to_string();
                    let side: u8 = parts
                        .next()
                        .ok_or_else(|| TopologyError::Parse {
                            line: line_no,
                            message: "missing side".to_string(),
                        })?
                        .parse()
                        .map_err(|_| TopologyError::Parse {
                            line: line_no,
                            message: "side is not a number".to_string(),
                        })?;
                    if side > 5 {
                        return Err(TopologyError::Parse {
                            line: line_no,
                            message: format!("side {side} out of range 0..5"),
                        });
                    }
                    stagings.entry(staging_index).or_default().insert(robot_id, side);
                }
                _ => {
                    return Err(TopologyError::Parse {
                        line: line_no,
                        message: format!("unknown entry `{line}`"),
                    })
                }
            }
        }

        Ok(Self { stagings })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::from("# staging index -> {robot id -> side}\n");
        let mut indices: Vec<&u32> = self.stagings.keys().collect();
        indices.sort();
        for index in indices {
            out.push_str(&format!("staging {index}\n"));
            let robots = &self.stagings[index];
            let mut ids: Vec<&String> = robots.keys().collect();
            ids.sort();
            for id in ids {
                out.push_str(&format!("  robot {id} {}\n", robots[id]));
            }
        }
        out
    }

    pub fn robots_for_staging(&self, staging_index: u32) -> &HashMap<String, u8> {
        self.stagings.get(&staging_index).unwrap_or(empty_map())
    }

    pub fn staging_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.stagings.keys().copied()
    }

    /// Candidate (staging, robot) pairs where both are currently free.
    pub fn candidate_pairings(
        &self,
        free_stagings: &std::collections::HashSet<u32>,
        free_robots: &std::collections::HashSet<String>,
    ) -> Vec<(u32, String)> {
        let mut pairs = Vec::new();
        let mut indices: Vec<&u32> = self.stagings.keys().collect();
        indices.sort();
        for &staging_index in indices {
            if !free_stagings.contains(&staging_index) {
                continue;
            }
            let mut robots: Vec<&String> = self.stagings[&staging_index].keys().collect();
            robots.sort();
            for robot_id in robots {
                if free_robots.contains(robot_id) {
                    pairs.push((staging_index, robot_id.clone()));
                }
            }
        }
        pairs
    }
}

fn empty_map() -> &'static HashMap<String, u8> {
    use std::sync::OnceLock;
    static EMPTY: OnceLock<HashMap<String, u8>> = OnceLock::new();
    EMPTY.get_or_init(HashMap::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const SAMPLE: &str = "
# staging index -> {robot id -> side}
staging 1
  robot r1 3
  robot r2 0
staging 2
  robot r1 5
";

    #[test]
    fn parses_staging_blocks() {
        let topo = Topology::from_text(SAMPLE).unwrap();
        assert_eq!(topo.robots_for_staging(1).len(), 2);
        assert_eq!(topo.robots_for_staging(1)["r1"], 3);
        assert_eq!(topo.robots_for_staging(2)["r1"], 5);
    }

    #[test]
    fn unknown_staging_has_no_robots() {
        let topo = Topology::from_text(SAMPLE).unwrap();
        assert!(topo.robots_for_staging(99).is_empty());
    }

    #[test]
    fn round_trips_through_to_text() {
        let topo = Topology::from_text(SAMPLE).unwrap();
        let text = topo.to_text();
        let reparsed = Topology::from_text(&text).unwrap();
        assert_eq!(reparsed.robots_for_staging(1).len(), 2);
    }

    #[test]
    fn candidate_pairings_respect_free_sets() {
        let topo = Topology::from_text(SAMPLE).unwrap();
        let free_stagings: HashSet<u32> = [1, 2].into_iter().collect();
        let free_robots: HashSet<String> = ["r1".to_string()].into_iter().collect();
        let pairs = topo.candidate_pairings(&free_stagings, &free_robots);
        assert_eq!(pairs, vec![(1, "r1".to_string()), (2, "r1".to_string())]);
    }
}
