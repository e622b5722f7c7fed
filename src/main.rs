mod plan;
mod report;
mod scan;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_sarif::sarif::Invocation;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use patchpoint::expr::same_type_name;
use patchpoint::finder::{locate_all, locate_first, PatchAnchor};
use patchpoint::ir::Class;
use patchpoint::rewrite::{CallSiteRewrite, RewriteSession};

use crate::plan::{load_plan, Cardinality, PatchPlan};
use crate::report::{build_sarif, AnchorHit, RewriteOutcome};
use crate::scan::scan_inputs;

/// CLI arguments for patchpoint execution.
#[derive(Parser, Debug)]
#[command(
    name = "patchpoint",
    about = "Locate patch anchors in decoded JVM method bodies and open restricted methods for override.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    plan: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Write the classes after dispatch rewriting as JSON.
    #[arg(long, value_name = "PATH")]
    rewritten: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    run(cli)
}

fn init_tracing(quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("patchpoint=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    if !cli.plan.exists() {
        anyhow::bail!("plan not found: {}", cli.plan.display());
    }

    let plan = load_plan(&cli.plan)?;
    let started_at = Instant::now();
    let mut scan = scan_inputs(&cli.input)?;
    let class_count = scan.classes.len();

    let rewrites = apply_overrides(&plan, &mut scan.classes)?;
    let located = locate_anchors(&plan, &scan.classes)?;
    let anchor_count = located.hits.len();

    let invocation = build_invocation();
    let sarif = build_sarif(scan.artifacts, invocation, &located.hits, &rewrites);
    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if let Some(path) = cli.rewritten.as_deref() {
        write_classes(path, &scan.classes)?;
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} classes={} anchors={} rewrites={}",
            started_at.elapsed().as_millis(),
            class_count,
            anchor_count,
            rewrites.len()
        );
    }

    if !located.missing_required.is_empty() {
        anyhow::bail!(
            "required anchors not found: {}",
            located.missing_required.join(", ")
        );
    }

    Ok(())
}

/// Widen every requested method in one session, then rewrite call sites in all classes.
fn apply_overrides(plan: &PatchPlan, classes: &mut [Class]) -> Result<Vec<RewriteOutcome>> {
    let mut session = RewriteSession::new();
    for request in &plan.overridable {
        let class = classes
            .iter_mut()
            .find(|class| same_type_name(&class.name, &request.class))
            .with_context(|| format!("class not loaded: {}", request.class))?;
        session
            .make_overridable(class, &request.method, &request.descriptor)
            .with_context(|| {
                format!(
                    "failed to make {}.{}{} overridable",
                    request.class, request.method, request.descriptor
                )
            })?;
    }

    let mut outcomes: Vec<RewriteOutcome> = session
        .rules()
        .iter()
        .map(|rule| RewriteOutcome {
            method: rule.target.clone(),
            call_sites: count_call_sites(rule, classes),
        })
        .collect();
    let rewritten: usize = classes.iter_mut().map(|class| session.apply(class)).sum();
    debug!(rules = outcomes.len(), call_sites = rewritten, "applied dispatch rewrites");
    outcomes.sort_by(|a, b| a.method.cmp(&b.method));
    Ok(outcomes)
}

fn count_call_sites(rule: &CallSiteRewrite, classes: &[Class]) -> usize {
    classes
        .iter()
        .flat_map(|class| {
            class.methods.iter().flat_map(move |method| {
                method
                    .instructions
                    .iter()
                    .filter(move |inst| rule.rewrites(&class.name, method, inst))
            })
        })
        .count()
}

struct LocateOutput {
    hits: Vec<AnchorHit>,
    missing_required: Vec<String>,
}

fn locate_anchors(plan: &PatchPlan, classes: &[Class]) -> Result<LocateOutput> {
    let mut hits = Vec::new();
    let mut missing_required = Vec::new();

    for request in &plan.anchors {
        let sequence = request.compile()?;
        let mut found = 0;
        let targets = classes
            .iter()
            .filter(|class| same_type_name(&class.name, &request.class))
            .flat_map(|class| class.methods.iter().map(move |method| (class, method)))
            .filter(|(_, method)| method.name == request.method)
            .filter(|(_, method)| {
                request
                    .descriptor
                    .as_deref()
                    .is_none_or(|descriptor| method.descriptor == descriptor)
            });
        for (class, method) in targets {
            let anchors: Vec<PatchAnchor> = match request.cardinality {
                Cardinality::First => locate_first(&class.name, method, &sequence)
                    .into_iter()
                    .collect(),
                Cardinality::All => locate_all(&class.name, method, &sequence),
            };
            found += anchors.len();
            hits.extend(anchors.into_iter().map(|anchor| AnchorHit {
                id: request.id.clone(),
                class_name: class.name.clone(),
                method_name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                anchor,
            }));
        }

        if found == 0 {
            if request.required {
                warn!(anchor = %request.id, "required anchor not found");
                missing_required.push(request.id.clone());
            } else {
                debug!(anchor = %request.id, "optional anchor not found");
            }
        }
    }

    Ok(LocateOutput {
        hits,
        missing_required,
    })
}

fn write_classes(path: &Path, classes: &[Class]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::to_writer_pretty(file, classes)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}
