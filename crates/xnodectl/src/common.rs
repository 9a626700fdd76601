use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info};
use xnode_bind::{BooleanCodec, BooleanConverter, ProviderGraph, ProviderId};

const DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// A file loaded into a provider graph under a single root provider.
pub struct Document {
    pub graph: ProviderGraph,
    pub root: ProviderId,
    pub file: PathBuf,
}

impl Document {
    pub fn load(file: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("document")?;
        graph
            .load_root(root, &text)
            .with_context(|| format!("parse {}", file.display()))?;
        info!(file = %file.display(), "loaded document");
        Ok(Document {
            graph,
            root,
            file: file.to_path_buf(),
        })
    }

    /// Register the providers for `path` and return the last one.
    pub fn bind(&mut self, path: &NodePath) -> Result<ProviderId> {
        let mut provider = self.root;
        for name in &path.elements {
            provider = self.graph.add_element(name, provider)?;
        }
        if let Some(attribute) = &path.attribute {
            provider = self.graph.add_attribute(attribute, provider)?;
        }
        debug!(%path, available = self.graph.is_available(provider), "bound path");
        Ok(provider)
    }

    /// Serialize the whole document.
    pub fn render(&self) -> Result<String> {
        let document = self
            .graph
            .node(self.root)
            .ok_or_else(|| anyhow!("document root is not bound"))?;
        Ok(self.graph.tree().to_string(document)?)
    }

    pub fn save(&self) -> Result<()> {
        let body = self.render()?;
        fs::write(&self.file, format!("{DECLARATION}\n{body}\n"))
            .with_context(|| format!("write {}", self.file.display()))?;
        info!(file = %self.file.display(), "saved document");
        Ok(())
    }
}

/// `/`-separated element names, optionally ending in `@attribute`.
///
/// The first element names the document element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    pub elements: Vec<String>,
    pub attribute: Option<String>,
}

impl NodePath {
    pub fn parse(text: &str) -> Result<Self> {
        let (elements, attribute) = match text.split_once('@') {
            Some((elements, attribute)) => {
                let attribute = attribute.trim();
                if attribute.is_empty() || attribute.contains(['@', '/']) {
                    bail!("invalid attribute in path {text:?}");
                }
                (elements, Some(attribute.to_string()))
            }
            None => (text, None),
        };
        let elements: Vec<String> = elements
            .trim_matches('/')
            .split('/')
            .map(str::trim)
            .map(str::to_string)
            .collect();
        if elements.iter().any(String::is_empty) {
            bail!("path {text:?} must name at least one element and no empty segments");
        }
        Ok(NodePath {
            elements,
            attribute,
        })
    }
}

impl std::fmt::Display for NodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.elements.join("/"))?;
        if let Some(attribute) = &self.attribute {
            write!(f, "@{attribute}")?;
        }
        Ok(())
    }
}

/// `"1"`/`"0"` when `binary`, otherwise `"true"`/`"false"`.
pub fn boolean_codec(binary: bool, three_state: bool) -> BooleanCodec {
    let converter = if binary {
        BooleanConverter::binary()
    } else {
        BooleanConverter::words()
    };
    BooleanCodec::new(converter).three_state(three_state)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_element_and_attribute_paths() {
        let path = NodePath::parse("Settings/Display@Brightness").expect("parse");
        assert_eq!(path.elements, vec!["Settings", "Display"]);
        assert_eq!(path.attribute.as_deref(), Some("Brightness"));
        assert_eq!(path.to_string(), "Settings/Display@Brightness");

        let path = NodePath::parse("/Settings/Name/").expect("parse");
        assert_eq!(path.elements, vec!["Settings", "Name"]);
        assert_eq!(path.attribute, None);
    }

    #[test]
    fn rejects_malformed_paths() {
        for text in ["", "@Mode", "A//B", "A@", "A@b@c", "A@b/c"] {
            assert!(NodePath::parse(text).is_err(), "{text:?} should be rejected");
        }
    }

    #[test]
    fn load_bind_and_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("settings.xml");
        fs::write(&file, r#"<Settings><Display Mode="auto"/></Settings>"#).unwrap();

        let mut doc = Document::load(&file).expect("load");
        let mode = doc
            .bind(&NodePath::parse("Settings/Display@Mode").unwrap())
            .unwrap();
        assert_eq!(doc.graph.raw_value(mode).as_deref(), Some("auto"));
        doc.save().expect("save");

        let saved = fs::read_to_string(&file).unwrap();
        assert!(saved.starts_with(DECLARATION));
        assert!(saved.contains(r#"<Display Mode="auto"/>"#));
    }
}
