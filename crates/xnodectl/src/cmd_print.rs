use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::common::{self, Document, NodePath};

#[derive(Serialize)]
struct PrintResponse<'a> {
    path: Option<&'a str>,
    xml: String,
}

/// Print the whole document, or the subtree at `path`.
pub fn run(file: &Path, path: Option<&str>, json: bool) -> Result<()> {
    let mut doc = Document::load(file)?;
    let xml = match path {
        Some(path) => {
            let provider = doc.bind(&NodePath::parse(path)?)?;
            let node = doc
                .graph
                .node(provider)
                .ok_or_else(|| anyhow!("{path} does not exist in {}", file.display()))?;
            doc.graph.tree().to_string(node)?
        }
        None => doc.render()?,
    };

    if json {
        common::print_json(&PrintResponse { path, xml })?;
    } else {
        println!("{xml}");
    }

    Ok(())
}
