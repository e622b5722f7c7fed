use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, Location, LogicalLocation, Message, Result as SarifResult, Run, Sarif,
    Tool, ToolComponent, SCHEMA_URL,
};

use patchpoint::finder::PatchAnchor;
use patchpoint::rewrite::MethodKey;

/// Rule id reported for methods opened for override.
pub(crate) const OVERRIDABLE_RULE_ID: &str = "OVERRIDABLE";

/// Anchor located for one plan entry in one method.
#[derive(Clone, Debug)]
pub(crate) struct AnchorHit {
    pub(crate) id: String,
    pub(crate) class_name: String,
    pub(crate) method_name: String,
    pub(crate) descriptor: String,
    pub(crate) anchor: PatchAnchor,
}

/// Method made overridable and the number of call sites switched to virtual dispatch.
#[derive(Clone, Debug)]
pub(crate) struct RewriteOutcome {
    pub(crate) method: MethodKey,
    pub(crate) call_sites: usize,
}

pub(crate) fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    hits: &[AnchorHit],
    rewrites: &[RewriteOutcome],
) -> Sarif {
    let driver = ToolComponent::builder().name("patchpoint").build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let mut results: Vec<SarifResult> = rewrites.iter().map(rewrite_result).collect();
    results.extend(hits.iter().map(anchor_result));

    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

fn anchor_result(hit: &AnchorHit) -> SarifResult {
    let anchor = &hit.anchor;
    let text = match anchor.line {
        Some(line) => format!(
            "Patch anchor {}: {} at offset {} (line {line})",
            hit.id, anchor.kind, anchor.offset
        ),
        None => format!(
            "Patch anchor {}: {} at offset {}",
            hit.id, anchor.kind, anchor.offset
        ),
    };
    SarifResult::builder()
        .rule_id(hit.id.as_str())
        .message(result_message(text))
        .locations(vec![method_location(
            &hit.class_name,
            &hit.method_name,
            &hit.descriptor,
        )])
        .build()
}

fn rewrite_result(outcome: &RewriteOutcome) -> SarifResult {
    let key = &outcome.method;
    let message = result_message(format!(
        "Made {key} overridable; {} call sites now dispatch virtually",
        outcome.call_sites
    ));
    SarifResult::builder()
        .rule_id(OVERRIDABLE_RULE_ID)
        .message(message)
        .locations(vec![method_location(&key.owner, &key.name, &key.descriptor)])
        .build()
}

pub(crate) fn method_location(class_name: &str, method_name: &str, descriptor: &str) -> Location {
    let logical = LogicalLocation::builder()
        .name(format!("{class_name}.{method_name}{descriptor}"))
        .kind("function")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}
