use std::path::Path;

use anyhow::{bail, Result};
use serde::Serialize;
use xnode_bind::{BooleanSetter, SetOutcome};

use crate::common::{self, Document, NodePath};

#[derive(Serialize)]
struct ToggleResponse<'a> {
    path: &'a str,
    value: Option<bool>,
}

/// Flip a boolean: `true` becomes `false`, anything else becomes `true`.
pub fn run(file: &Path, path: &str, binary: bool, json: bool) -> Result<()> {
    let mut doc = Document::load(file)?;
    let provider = doc.bind(&NodePath::parse(path)?)?;
    let setter = BooleanSetter::new(
        &mut doc.graph,
        provider,
        common::boolean_codec(binary, true),
    )?;
    match setter.toggle(&mut doc.graph)? {
        SetOutcome::Rejected(reason) => bail!("toggle rejected for {path}: {reason}"),
        SetOutcome::Committed | SetOutcome::Unchanged => doc.save()?,
    }
    let value = setter.value();

    if json {
        common::print_json(&ToggleResponse { path, value })?;
    } else {
        match value {
            Some(value) => println!("{value}"),
            None => println!("indeterminate"),
        }
    }

    Ok(())
}
