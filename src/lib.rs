#![cfg_attr(docsrs, feature(doc_cfg))]
//! Facade over the workspace crates: the journaled XML tree and the
//! provider/setter layer built on it.
//!
//! ```rust
//! use xnode_rs::{load_document, StringCodec, StringSetter};
//!
//! let (mut graph, root) = load_document(r#"<Profile Name="default"/>"#)?;
//! let profile = graph.add_element("Profile", root)?;
//! let name = graph.add_attribute("Name", profile)?;
//! let setter = StringSetter::new(&mut graph, name, StringCodec::new())?;
//! assert_eq!(setter.value(), "default");
//! # Ok::<(), xnode_rs::BindError>(())
//! ```

pub use xnode_bind::*;

/// The underlying tree engine.
pub mod tree {
    pub use xnode_tree::*;
}

use tracing::debug;

/// Parse `xml` into a fresh graph with one root provider bound to the document.
pub fn load_document(xml: &str) -> Result<(ProviderGraph, ProviderId), BindError> {
    let mut graph = ProviderGraph::new();
    let root = graph.add_root("document")?;
    let document = graph.load_root(root, xml)?;
    debug!(document = document.index(), "loaded document");
    Ok((graph, root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_binds() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let (mut graph, root) = load_document("<A><B>text</B></A>").expect("load");
        let a = graph.add_element("A", root).unwrap();
        let b = graph.add_element("B", a).unwrap();
        assert_eq!(graph.raw_value(b).as_deref(), Some("text"));
        assert!(matches!(
            load_document("<A>"),
            Err(BindError::Tree(tree::TreeError::Xml(_)))
        ));
    }
}
