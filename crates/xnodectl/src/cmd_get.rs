use std::path::Path;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::common::{self, Document, NodePath};

#[derive(Serialize)]
struct GetResponse<'a> {
    path: &'a str,
    available: bool,
    value: Option<String>,
}

pub fn run(file: &Path, path: &str, json: bool) -> Result<()> {
    let mut doc = Document::load(file)?;
    let provider = doc.bind(&NodePath::parse(path)?)?;
    let value = doc.graph.raw_value(provider);

    if json {
        let payload = GetResponse {
            path,
            available: value.is_some(),
            value,
        };
        common::print_json(&payload)?;
    } else {
        match value {
            Some(value) => println!("{value}"),
            None => bail!("{path} does not exist in {}", file.display()),
        }
    }

    Ok(())
}
