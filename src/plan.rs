use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use patchpoint::matcher::{MatchSequence, SequenceSpec};
use serde::Deserialize;

/// Declarative description of one run: anchors to locate and methods to open for override.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PatchPlan {
    #[serde(default)]
    pub(crate) anchors: Vec<AnchorRequest>,
    #[serde(default)]
    pub(crate) overridable: Vec<OverrideRequest>,
}

/// Where to look for an anchor and how to recognize it.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct AnchorRequest {
    pub(crate) id: String,
    pub(crate) class: String,
    pub(crate) method: String,
    /// Restrict the search to one overload.
    #[serde(default)]
    pub(crate) descriptor: Option<String>,
    #[serde(default)]
    pub(crate) cardinality: Cardinality,
    #[serde(default)]
    pub(crate) required: bool,
    pub(crate) sequence: SequenceSpec,
}

impl AnchorRequest {
    pub(crate) fn compile(&self) -> Result<MatchSequence> {
        MatchSequence::from_spec(&self.sequence)
            .with_context(|| format!("invalid match sequence for anchor {}", self.id))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Cardinality {
    #[default]
    First,
    All,
}

/// Restricted method to widen and dispatch virtually.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct OverrideRequest {
    pub(crate) class: String,
    pub(crate) method: String,
    pub(crate) descriptor: String,
}

pub(crate) fn load_plan(path: &Path) -> Result<PatchPlan> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let plan: PatchPlan = serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    plan.validate()
        .with_context(|| format!("invalid patch plan {}", path.display()))?;
    Ok(plan)
}

impl PatchPlan {
    fn validate(&self) -> Result<()> {
        let mut ids = BTreeSet::new();
        for anchor in &self.anchors {
            if !ids.insert(anchor.id.as_str()) {
                anyhow::bail!("duplicate anchor id: {}", anchor.id);
            }
            anchor.compile()?;
        }
        Ok(())
    }
}
