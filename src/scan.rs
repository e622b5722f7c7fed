use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use patchpoint::ir::Class;
use serde::Deserialize;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};

/// Decoded classes and their artifacts for one run.
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) classes: Vec<Class>,
}

/// A dump file holds one class or a list of classes.
#[derive(Deserialize)]
#[serde(untagged)]
enum DumpFile {
    One(Class),
    Many(Vec<Class>),
}

pub(crate) fn scan_inputs(input: &Path) -> Result<ScanOutput> {
    let mut output = ScanOutput {
        artifacts: Vec::new(),
        classes: Vec::new(),
    };
    scan_path(input, true, true, &mut output)?;
    Ok(output)
}

fn scan_path(path: &Path, is_input: bool, strict: bool, output: &mut ScanOutput) -> Result<()> {
    if path.is_dir() {
        scan_dir(path, output)?;
        return Ok(());
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "json" => scan_dump_file(path, is_input, output),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn scan_dir(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    // Keep deterministic ordering regardless of directory iteration order.
    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, output)?;
        } else {
            scan_path(&entry, false, false, output)?;
        }
    }

    Ok(())
}

fn scan_dump_file(path: &Path, is_input: bool, output: &mut ScanOutput) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let dump: DumpFile = serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let roles = if is_input {
        Some(vec![serde_json::to_value(ArtifactRoles::AnalysisTarget)
            .context("serialize artifact role")?])
    } else {
        None
    };
    let artifact_index = push_artifact(path_to_uri(path), data.len() as u64, roles, &mut output.artifacts);

    let classes = match dump {
        DumpFile::One(class) => vec![class],
        DumpFile::Many(classes) => classes,
    };
    for mut class in classes {
        class.artifact_index = artifact_index;
        output.classes.push(class);
    }
    Ok(())
}

fn push_artifact(
    uri: String,
    len: u64,
    roles: Option<Vec<Value>>,
    artifacts: &mut Vec<Artifact>,
) -> i64 {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = match roles {
        Some(roles) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        None => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    let index = artifacts.len() as i64;
    artifacts.push(artifact);
    index
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
