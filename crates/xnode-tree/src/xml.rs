//! Load and save trees using quick-xml.

use std::borrow::Cow;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use crate::{validate_name, NodeData, NodeId, NodeKind, TreeError, XmlTree};

impl XmlTree {
    /// Parse XML text into a new detached document.
    ///
    /// Whitespace-only text is dropped, comments and processing
    /// instructions are skipped. Parsing does not journal changes. On error
    /// every node built so far is released.
    pub fn parse(&mut self, xml: &str) -> Result<NodeId, TreeError> {
        let document = self.new_document();
        match self.read_document(document, xml) {
            Ok(()) => {
                debug!(document = document.index(), "parsed document");
                Ok(document)
            }
            Err(err) => {
                self.release(document)?;
                Err(err)
            }
        }
    }

    fn read_document(&mut self, document: NodeId, xml: &str) -> Result<(), TreeError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut buf = Vec::new();
        let mut stack = vec![document];

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let element = self.element_from_start(&e)?;
                    self.link(&stack, element)?;
                    stack.push(element);
                }
                Ok(Event::Empty(e)) => {
                    let element = self.element_from_start(&e)?;
                    self.link(&stack, element)?;
                }
                Ok(Event::End(_)) => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().map_err(|err| TreeError::Xml(err.to_string()))?;
                    self.push_text(&stack, text)?;
                }
                Ok(Event::CData(e)) => {
                    let raw = e.into_inner();
                    let text = std::str::from_utf8(&raw)
                        .map_err(|err| TreeError::Xml(format!("invalid UTF-8: {err}")))?;
                    self.push_text(&stack, Cow::Borrowed(text))?;
                }
                Ok(Event::Eof) => break,
                Err(err) => return Err(TreeError::Xml(err.to_string())),
                _ => {}
            }
            buf.clear();
        }

        if stack.len() > 1 {
            return Err(TreeError::Xml("unexpected end of document".into()));
        }
        if self.document_element(document).is_none() {
            return Err(TreeError::Xml("document has no root element".into()));
        }
        Ok(())
    }

    /// Serialize a node and its subtree.
    ///
    /// Documents serialize as their content without an XML declaration;
    /// attributes serialize as `name="value"`.
    pub fn to_string(&self, node: NodeId) -> Result<String, TreeError> {
        let mut writer = Writer::new(Vec::new());
        self.write_node(&mut writer, node)?;
        String::from_utf8(writer.into_inner())
            .map_err(|err| TreeError::Xml(format!("invalid UTF-8: {err}")))
    }

    fn write_node(&self, writer: &mut Writer<Vec<u8>>, node: NodeId) -> Result<(), TreeError> {
        let data = self.data(node)?;
        match data.kind {
            NodeKind::Document => {
                for child in &data.children {
                    self.write_node(writer, *child)?;
                }
            }
            NodeKind::Element => {
                let mut start = BytesStart::new(data.name.as_str());
                for attr in &data.attributes {
                    let attr = &self.nodes[attr.0];
                    start.push_attribute((attr.name.as_str(), attr.value.as_str()));
                }
                if data.children.is_empty() {
                    write_event(writer, Event::Empty(start))?;
                } else {
                    write_event(writer, Event::Start(start))?;
                    for child in &data.children {
                        self.write_node(writer, *child)?;
                    }
                    write_event(writer, Event::End(BytesEnd::new(data.name.as_str())))?;
                }
            }
            NodeKind::Text => {
                write_event(writer, Event::Text(BytesText::new(&data.value)))?;
            }
            NodeKind::Attribute => {
                let escaped = quick_xml::escape::escape(data.value.as_str());
                writer
                    .get_mut()
                    .extend_from_slice(format!("{}=\"{}\"", data.name, escaped).as_bytes());
            }
        }
        Ok(())
    }

    fn element_from_start(&mut self, event: &BytesStart<'_>) -> Result<NodeId, TreeError> {
        let name = std::str::from_utf8(event.name().as_ref())
            .map_err(|err| TreeError::Xml(format!("invalid UTF-8: {err}")))?
            .to_string();
        let mut pairs = Vec::new();
        for attr in event.attributes() {
            let attr = attr.map_err(|err| TreeError::Xml(err.to_string()))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|err| TreeError::Xml(format!("invalid UTF-8: {err}")))?
                .to_string();
            validate_name(&key)?;
            let value = attr
                .unescape_value()
                .map_err(|err| TreeError::Xml(err.to_string()))?
                .into_owned();
            pairs.push((key, value));
        }
        // Allocate only once the start tag is known to be valid.
        let element = self.new_element(&name)?;
        for (key, value) in pairs {
            let attr = self.alloc(NodeData::new(NodeKind::Attribute, key, value));
            self.nodes[attr.0].parent = Some(element);
            self.nodes[element.0].attributes.push(attr);
        }
        Ok(element)
    }

    fn push_text(&mut self, stack: &[NodeId], text: Cow<'_, str>) -> Result<(), TreeError> {
        // Text outside the root element carries no data.
        if stack.len() < 2 || text.is_empty() {
            return Ok(());
        }
        let node = self.new_text(&text);
        self.link(stack, node)
    }

    fn link(&mut self, stack: &[NodeId], child: NodeId) -> Result<(), TreeError> {
        let parent = *stack
            .last()
            .ok_or_else(|| TreeError::Xml("no open container".into()))?;
        if self.nodes[parent.0].kind == NodeKind::Document {
            if let Some(existing) = self.document_element(parent) {
                self.release(child)?;
                return Err(TreeError::DocumentElementExists(existing));
            }
        }
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
        Ok(())
    }
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), TreeError> {
    writer
        .write_event(event)
        .map_err(|err| TreeError::Xml(err.to_string()))
}
