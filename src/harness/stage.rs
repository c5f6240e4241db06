//! Stage fixtures: the data a test case feeds through the daemon.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One request/response round trip through the daemon under test.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Stage {
    /// Payload the relay should receive from the daemon.
    pub cluster_input: String,
    /// Payload the relay answers with.
    pub cluster_output: String,
    /// Request sent on the client socket.
    pub port_input: String,
    /// Expected prefix of the client response.
    pub port_output: String,
    /// Agent groups present for the duration of the stage.
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub stages: Vec<Stage>,
}

/// Ordered set of test cases loaded from a TOML fixture.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StagePlan {
    #[serde(default)]
    pub cases: Vec<TestCase>,
}

impl StagePlan {
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read stage plan {}", path.display()))?;
        Self::from_toml(&data).with_context(|| format!("invalid stage plan {}", path.display()))
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        let plan: Self = toml::from_str(data).context("failed to parse stage plan")?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cases.is_empty() {
            bail!("stage plan has no cases");
        }
        for case in &self.cases {
            if case.stages.is_empty() {
                bail!("case {:?} has no stages", case.name);
            }
            for (idx, stage) in case.stages.iter().enumerate() {
                if stage.port_input.is_empty() {
                    bail!("case {:?} stage {} has an empty port_input", case.name, idx);
                }
            }
        }
        Ok(())
    }

    /// Cases whose name contains `filter`, or all of them.
    pub fn select<'a>(&'a self, filter: Option<&'a str>) -> impl Iterator<Item = &'a TestCase> {
        self.cases
            .iter()
            .filter(move |case| filter.map_or(true, |f| case.name.contains(f)))
    }
}
