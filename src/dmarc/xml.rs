//! A small structure-preserving XML decoder.
//!
//! Elements that only hold text become `Text`, elements with children become `Map`, and
//! sibling elements sharing a name are folded into a `List`. Empty elements are kept as
//! empty text rather than dropped.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::Error;
use crate::types::OneOrMany;

#[derive(Clone, Debug, PartialEq)]
pub enum XmlValue {
	Text(String),
	Map(BTreeMap<String, XmlValue>),
	List(Vec<XmlValue>),
}

impl XmlValue {
	pub fn get(&self, key: &str) -> Option<&XmlValue> {
		match self {
			XmlValue::Map(children) => children.get(key),
			_ => None,
		}
	}

	pub fn path(&self, keys: &[&str]) -> Option<&XmlValue> {
		keys.iter().try_fold(self, |value, key| value.get(key))
	}

	pub fn as_text(&self) -> Option<&str> {
		match self {
			XmlValue::Text(text) => Some(text),
			_ => None,
		}
	}

	pub fn text_at(&self, keys: &[&str]) -> Option<&str> {
		self.path(keys).and_then(XmlValue::as_text)
	}

	pub fn is_map(&self) -> bool {
		matches!(self, XmlValue::Map(_))
	}

	/// Treats a repeated element as `Many` and anything else as `One`.
	pub fn one_or_many(&self) -> OneOrMany<&XmlValue> {
		match self {
			XmlValue::List(items) => OneOrMany::Many(items.iter().collect()),
			other => OneOrMany::One(other),
		}
	}

	fn insert(children: &mut BTreeMap<String, XmlValue>, name: String, value: XmlValue) {
		match children.entry(name) {
			Entry::Vacant(entry) => {
				entry.insert(value);
			},
			Entry::Occupied(mut entry) => match entry.get_mut() {
				XmlValue::List(items) => items.push(value),
				existing => {
					let first = std::mem::replace(existing, XmlValue::List(Vec::new()));
					*existing = XmlValue::List(vec![first, value]);
				},
			},
		}
	}
}

struct Frame {
	name: String,
	text: String,
	children: BTreeMap<String, XmlValue>,
}

impl Frame {
	fn new(name: &[u8]) -> Frame {
		Frame {
			name: String::from_utf8_lossy(name).into_owned(),
			text: String::new(),
			children: BTreeMap::new(),
		}
	}

	fn into_value(self) -> (String, XmlValue) {
		let value = if self.children.is_empty() {
			XmlValue::Text(self.text)
		} else {
			XmlValue::Map(self.children)
		};
		(self.name, value)
	}
}

/// Deepest element nesting accepted. Reports use four levels.
const MAX_DEPTH: usize = 64;

/// Parses a document into its root element name and value.
pub fn parse(data: &[u8]) -> Result<(String, XmlValue), Error> {
	let mut reader = Reader::from_reader(data);
	reader.trim_text(true);

	let mut buf = Vec::with_capacity(128);
	let mut stack: Vec<Frame> = Vec::new();
	let mut root = None;

	loop {
		let event = reader
			.read_event_into(&mut buf)
			.map_err(|e| Error::Parse(format!("xml at position {}: {}", reader.buffer_position(), e)))?;

		match event {
			Event::Start(tag) => {
				if root.is_some() {
					return Err(Error::Parse("xml has more than one root element".to_string()));
				}
				if stack.len() >= MAX_DEPTH {
					return Err(Error::Parse("xml nested too deeply".to_string()));
				}
				stack.push(Frame::new(tag.local_name().as_ref()));
			},
			Event::Empty(tag) => {
				let (name, value) = Frame::new(tag.local_name().as_ref()).into_value();
				match stack.last_mut() {
					Some(parent) => XmlValue::insert(&mut parent.children, name, value),
					None if root.is_none() => root = Some((name, value)),
					None => return Err(Error::Parse("xml has more than one root element".to_string())),
				}
			},
			Event::Text(text) => {
				if let Some(frame) = stack.last_mut() {
					let text = text
						.unescape()
						.map_err(|e| Error::Parse(format!("xml text: {}", e)))?;
					frame.text.push_str(&text);
				}
			},
			Event::CData(data) => {
				if let Some(frame) = stack.last_mut() {
					frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
				}
			},
			Event::End(_) => {
				let frame = stack
					.pop()
					.ok_or_else(|| Error::Parse("xml has an unmatched end tag".to_string()))?;
				let (name, value) = frame.into_value();
				match stack.last_mut() {
					Some(parent) => XmlValue::insert(&mut parent.children, name, value),
					None => root = Some((name, value)),
				}
			},
			Event::Eof => break,
			_ => (),
		}

		buf.clear();
	}

	if !stack.is_empty() {
		return Err(Error::Parse("xml ended inside an element".to_string()));
	}

	root.ok_or_else(|| Error::Parse("xml has no root element".to_string()))
}
