use std::collections::BTreeMap;

use serde::Serialize;

/// Environment variables worth recording because they change what analyzers see.
const RECORDED_VARIABLES: &[&str] = &[
    "CARGO_HOME",
    "JAVA_HOME",
    "MAVEN_OPTS",
    "GRADLE_USER_HOME",
    "NODE_ENV",
    "PIP_INDEX_URL",
    "VIRTUAL_ENV",
];

/// Description of the machine and tool that produced a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Environment {
    pub tool_name: String,
    pub tool_version: String,
    pub os: String,
    pub arch: String,
    pub processors: usize,
    pub variables: BTreeMap<String, String>,
}

impl Environment {
    pub fn collect() -> Self {
        let variables = RECORDED_VARIABLES
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
            .collect();

        Environment {
            tool_name: env!("CARGO_PKG_NAME").to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            processors: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            variables,
        }
    }
}
