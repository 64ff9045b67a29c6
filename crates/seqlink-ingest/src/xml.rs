// SPDX-License-Identifier: Apache-2.0

//! XML plumbing: streaming record framing and a small element tree.
//!
//! The record iterator frames top-level elements of a multi-GB document
//! line by line without parsing the whole file, so memory stays
//! O(largest record). Each framed record is then parsed into an
//! [`XmlNode`] and converted to a JSON value with the conventions the
//! document schemas expect: attributes become plain fields, element text
//! becomes `content`, repeated child names become arrays.

use crate::IngestError;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

// === Record framing ===

pub struct RecordIter<R: BufRead> {
    reader: R,
    tag: String,
    inside: bool,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> RecordIter<R> {
    fn new(reader: R, tag: &str) -> Self {
        Self {
            reader,
            tag: tag.to_string(),
            inside: false,
            buf: Vec::new(),
            done: false,
        }
    }
}

fn is_record_start(stripped: &[u8], tag: &str) -> bool {
    let open = tag.as_bytes();
    if stripped.len() < open.len() + 1 || stripped[0] != b'<' {
        return false;
    }
    let name = &stripped[1..];
    name.starts_with(open)
        && matches!(name.get(open.len()), Some(b' ') | Some(b'>') | Some(b'\t') | Some(b'/'))
}

fn is_record_end(stripped: &[u8], tag: &str) -> bool {
    let mut close = Vec::with_capacity(tag.len() + 3);
    close.extend_from_slice(b"</");
    close.extend_from_slice(tag.as_bytes());
    close.push(b'>');
    stripped.starts_with(&close)
}

fn contains_record_end(line: &[u8], tag: &str) -> bool {
    let close = format!("</{tag}>");
    line.windows(close.len()).any(|w| w == close.as_bytes())
}

impl<R: BufRead> Iterator for RecordIter<R> {
    type Item = Result<Vec<u8>, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = match self.reader.read_until(b'\n', &mut line) {
                Ok(n) => n,
                Err(e) => {
                    self.done = true;
                    return Some(Err(IngestError(e.to_string())));
                }
            };
            if read == 0 {
                self.done = true;
                if self.inside {
                    return Some(Err(IngestError(format!(
                        "unterminated <{}> record at end of input",
                        self.tag
                    ))));
                }
                return None;
            }
            let stripped = trim_ascii_start(&line);

            if !self.inside && is_record_start(stripped, &self.tag) {
                self.buf.clear();
                self.buf.extend_from_slice(&line);
                // A one-line record closes on the same line.
                if contains_record_end(stripped, &self.tag) || is_self_closing(stripped) {
                    return Some(Ok(std::mem::take(&mut self.buf)));
                }
                self.inside = true;
            } else if self.inside && is_record_end(stripped, &self.tag) {
                self.inside = false;
                self.buf.extend_from_slice(&line);
                return Some(Ok(std::mem::take(&mut self.buf)));
            } else if self.inside {
                self.buf.extend_from_slice(&line);
            }
        }
    }
}

fn is_self_closing(stripped: &[u8]) -> bool {
    let trimmed = trim_ascii_end(stripped);
    trimmed.ends_with(b"/>")
}

fn trim_ascii_start(bytes: &[u8]) -> &[u8] {
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    &bytes[i..]
}

fn trim_ascii_end(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &bytes[..end]
}

/// Open a (possibly gzip-compressed, by suffix) XML file and iterate
/// its `<tag>` records.
pub fn iterate_records(
    path: &Path,
    tag: &str,
) -> Result<RecordIter<BufReader<Box<dyn Read>>>, IngestError> {
    let file = fs::File::open(path).map_err(|e| IngestError(format!("{}: {e}", path.display())))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(flate2::read::GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(RecordIter::new(BufReader::new(reader), tag))
}

// === Element tree ===

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    #[must_use]
    pub fn find(&self, path: &[&str]) -> Option<&XmlNode> {
        let mut node = self;
        for segment in path {
            node = node.child(segment)?;
        }
        Some(node)
    }

    /// Depth-first visit of this element and every descendant.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a XmlNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    #[must_use]
    pub fn text_trim(&self) -> Option<&str> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    /// JSON projection: attributes as fields, text as `content`,
    /// repeated child names as arrays, attribute-less text-only
    /// elements as bare strings.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let text = self.text.trim();
        if self.attrs.is_empty() && self.children.is_empty() {
            return if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            };
        }
        let mut map = Map::new();
        for (key, value) in &self.attrs {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        for child in &self.children {
            let value = child.to_value();
            match map.get_mut(&child.name) {
                None => {
                    map.insert(child.name.clone(), value);
                }
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            }
        }
        if !text.is_empty() {
            map.insert("content".to_string(), Value::String(text.to_string()));
        }
        Value::Object(map)
    }
}

fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

/// Parse one XML record into its root element.
pub fn parse_record(bytes: &[u8]) -> Result<XmlNode, IngestError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let node = start_node(&e)?;
                stack.push(node);
            }
            Ok(Event::Empty(e)) => {
                let node = start_node(&e)?;
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Text(e)) => {
                if let Some(top) = stack.last_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| IngestError(format!("bad text content: {err}")))?;
                    if !top.text.is_empty() {
                        top.text.push(' ');
                    }
                    top.text.push_str(text.trim());
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| IngestError("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(IngestError(format!("xml parse error: {e}"))),
        }
    }
    if !stack.is_empty() {
        return Err(IngestError("unterminated element".to_string()));
    }
    root.ok_or_else(|| IngestError("empty xml record".to_string()))
}

fn start_node(e: &quick_xml::events::BytesStart<'_>) -> Result<XmlNode, IngestError> {
    let mut node = XmlNode {
        name: local_name(e.name().as_ref()),
        ..XmlNode::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(|err| IngestError(format!("bad attribute: {err}")))?;
        let key = local_name(attr.key.as_ref());
        let value = attr
            .unescape_value()
            .map_err(|err| IngestError(format!("bad attribute value: {err}")))?
            .to_string();
        node.attrs.push((key, value));
    }
    Ok(node)
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), IngestError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        Ok(())
    } else if root.is_none() {
        *root = Some(node);
        Ok(())
    } else {
        Err(IngestError("multiple root elements in record".to_string()))
    }
}

// === Value helpers for the emitters ===

/// Walk an object path; `None` as soon as a segment is missing.
#[must_use]
pub fn v_get<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut node = value;
    for segment in path {
        node = node.get(segment)?;
    }
    Some(node)
}

/// A string either bare or wrapped as `{"content": …}`.
#[must_use]
pub fn v_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("content").and_then(Value::as_str).map(String::from),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Single-or-list access: an array yields its items, anything else
/// yields itself.
#[must_use]
pub fn v_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn records(input: &str, tag: &str) -> Vec<String> {
        RecordIter::new(Cursor::new(input.as_bytes().to_vec()), tag)
            .map(|r| String::from_utf8(r.expect("record")).expect("utf8"))
            .collect()
    }

    #[test]
    fn frames_multi_line_records() {
        let input = "<BioSampleSet>\n  <BioSample accession=\"SAMD1\">\n    <Title>x</Title>\n  </BioSample>\n  <BioSample accession=\"SAMD2\">\n  </BioSample>\n</BioSampleSet>\n";
        let out = records(input, "BioSample");
        assert_eq!(out.len(), 2);
        assert!(out[0].contains("SAMD1"));
        assert!(out[1].contains("SAMD2"));
    }

    #[test]
    fn wrapper_element_does_not_open_a_record() {
        // <BioSampleSet> shares the record tag's prefix; the framing
        // must not treat it as a record start.
        let input = "<BioSampleSet>\n</BioSampleSet>\n";
        assert!(records(input, "BioSample").is_empty());
    }

    #[test]
    fn unterminated_record_is_an_error() {
        let input = "<Set>\n<Package>\n  <Project/>\n</Set>\n";
        let mut iter = RecordIter::new(Cursor::new(input.as_bytes().to_vec()), "Package");
        let got = iter.next().expect("one item");
        assert!(got.is_err());
    }

    #[test]
    fn parses_attributes_children_and_text() {
        let node = parse_record(
            b"<BioSample accession=\"SAMD1\" access=\"public\">\
                <Ids><Id namespace=\"BioSample\">SAMD1</Id><Id db=\"SRA\">DRS1</Id></Ids>\
                <Description><Title>soil sample</Title></Description>\
              </BioSample>",
        )
        .expect("parse");
        assert_eq!(node.name, "BioSample");
        assert_eq!(node.attr("accession"), Some("SAMD1"));
        let ids: Vec<_> = node.child("Ids").expect("Ids").children_named("Id").collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].text_trim(), Some("SAMD1"));
        assert_eq!(
            node.find(&["Description", "Title"]).and_then(XmlNode::text_trim),
            Some("soil sample")
        );
    }

    #[test]
    fn to_value_follows_the_content_convention() {
        let node = parse_record(
            b"<Package><Project><ProjectID><ArchiveID accession=\"PRJDB1\"/></ProjectID>\
              <Names><Name>a</Name><Name>b</Name></Names></Project></Package>",
        )
        .expect("parse");
        let value = node.to_value();
        assert_eq!(
            v_get(&value, &["Project", "ProjectID", "ArchiveID", "accession"])
                .and_then(Value::as_str),
            Some("PRJDB1")
        );
        let names = v_get(&value, &["Project", "Names", "Name"]).expect("names");
        assert_eq!(v_list(names).len(), 2);
    }

    #[test]
    fn v_str_unwraps_content_objects() {
        assert_eq!(v_str(&serde_json::json!("x")).as_deref(), Some("x"));
        assert_eq!(
            v_str(&serde_json::json!({"content": "y", "abbr": "z"})).as_deref(),
            Some("y")
        );
        assert_eq!(v_str(&serde_json::json!(["a"])), None);
    }

    #[test]
    fn namespaced_tags_use_local_names() {
        let node = parse_record(b"<ns:Root xmlns:ns=\"urn:x\"><ns:Child>v</ns:Child></ns:Root>")
            .expect("parse");
        assert_eq!(node.name, "Root");
        assert_eq!(node.child("Child").and_then(XmlNode::text_trim), Some("v"));
    }
}
