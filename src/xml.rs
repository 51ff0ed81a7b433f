//! Owned element tree for the small alto2txt metadata documents.

use anyhow::{bail, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, tag: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// First descendant along a `/`-separated path of tags, relative to this node.
    pub fn find(&self, path: &str) -> Option<&XmlNode> {
        path.split('/')
            .filter(|p| !p.is_empty() && *p != ".")
            .try_fold(self, |node, tag| node.child(tag))
    }

    /// Text of the node at `path`; `None` when the node is missing.
    pub fn find_text(&self, path: &str) -> Option<&str> {
        self.find(path).map(|n| n.text.as_str())
    }
}

fn open_node(e: &BytesStart) -> Result<XmlNode> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        attrs.push((key, attr.unescape_value()?.into_owned()));
    }
    Ok(XmlNode {
        tag,
        attrs,
        ..Default::default()
    })
}

/// Parse a whole document and return its root element.
pub fn parse_document(xml: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(open_node(&e)?),
            Event::Empty(e) => {
                let node = open_node(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None if root.is_none() => root = Some(node),
                    None => bail!("more than one root element"),
                }
            }
            Event::Text(e) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(_) => {
                let Some(mut node) = stack.pop() else {
                    bail!("unexpected closing tag");
                };
                node.text = node.text.trim().to_string();
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None if root.is_none() => root = Some(node),
                    None => bail!("more than one root element"),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        bail!("unclosed element <{}>", open.tag);
    }
    match root {
        Some(root) => Ok(root),
        None => bail!("document has no root element"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<lwm>
  <process>
    <input_sub_path>0002194/1850/0101</input_sub_path>
    <lwm_tool><name>extract_text</name><version>0.4.1</version></lwm_tool>
  </process>
  <publication id="0002194">
    <title>The Ipswich Journal &amp; Gazette.</title>
    <issue id="issue-1"><date>1850-01-01</date><item id="art0001"/></issue>
  </publication>
</lwm>"#;

    #[test]
    fn parses_paths_and_attrs() {
        let root = parse_document(DOC).unwrap();
        assert_eq!(root.tag, "lwm");
        assert_eq!(root.find("publication").unwrap().attr("id"), Some("0002194"));
        assert_eq!(root.find_text("./process/input_sub_path"), Some("0002194/1850/0101"));
        assert_eq!(root.find_text("publication/issue/date"), Some("1850-01-01"));
        assert_eq!(
            root.find_text("publication/title"),
            Some("The Ipswich Journal & Gazette.")
        );
        assert_eq!(
            root.find("publication/issue/item").unwrap().attr("id"),
            Some("art0001")
        );
        assert!(root.find("publication/missing").is_none());
    }

    #[test]
    fn malformed_is_error() {
        assert!(parse_document("<lwm><process></lwm>").is_err());
        assert!(parse_document("<lwm><process>").is_err());
        assert!(parse_document("").is_err());
    }
}
