use std::borrow::Cow;

use indexmap::IndexMap;
use roxmltree::Node;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Element of a parsed XML document: name, trimmed text and ordered children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub text: Option<String>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub(crate) fn from_node(node: Node<'_, '_>) -> Self {
        let children = node
            .children()
            .filter(Node::is_element)
            .map(XmlElement::from_node)
            .collect::<Vec<_>>();

        let text = node
            .children()
            .filter(Node::is_text)
            .filter_map(|child| child.text())
            .collect::<String>();
        let text = text.trim();

        Self {
            name: node.tag_name().name().to_string(),
            text: (!text.is_empty()).then(|| text.to_string()),
            children,
        }
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Text of the first child named `name`, if it has any.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|child| child.text.as_deref())
    }

    /// Converts the element into a [`PomValue`]. Elements with neither text
    /// nor children yield `None` and are dropped by their parent.
    pub fn to_value(&self) -> Option<PomValue> {
        if !self.children.is_empty() {
            let entries = self
                .children
                .iter()
                .filter_map(|child| child.to_value().map(|value| (child.name.clone(), value)))
                .collect();
            return Some(PomValue::Map(entries));
        }
        self.text.clone().map(PomValue::Text)
    }
}

/// Decoded POM content. Maps keep every entry in document order, including
/// repeated keys such as successive `dependency` elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PomValue {
    Text(String),
    Map(Vec<(String, PomValue)>),
}

impl PomValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PomValue::Text(text) => Some(text),
            PomValue::Map(_) => None,
        }
    }

    pub fn entries(&self) -> &[(String, PomValue)] {
        match self {
            PomValue::Map(entries) => entries,
            PomValue::Text(_) => &[],
        }
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&PomValue> {
        self.entries()
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Every value stored under `key`, in document order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a PomValue> {
        self.entries()
            .iter()
            .filter(move |(name, _)| name == key)
            .map(|(_, value)| value)
    }
}

impl Serialize for PomValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            PomValue::Text(text) => serializer.serialize_str(text),
            PomValue::Map(entries) => {
                let mut grouped: IndexMap<&str, Vec<&PomValue>> = IndexMap::new();
                for (key, value) in entries {
                    grouped.entry(key.as_str()).or_default().push(value);
                }

                let mut map = serializer.serialize_map(Some(grouped.len()))?;
                for (key, values) in grouped {
                    match values.as_slice() {
                        [single] => map.serialize_entry(key, single)?,
                        _ => map.serialize_entry(key, &values)?,
                    }
                }
                map.end()
            }
        }
    }
}

/// Replaces references to undeclared entities with a space so that legacy
/// POMs (e.g. HTML entities in descriptions) still parse.
pub(crate) fn normalize_xml_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '&' {
            output.push(ch);
            continue;
        }

        let mut entity = String::new();
        while let Some(&next) = chars.peek() {
            entity.push(next);
            chars.next();
            if next == ';' || entity.len() > 32 {
                break;
            }
        }

        let Some(name) = entity.strip_suffix(';') else {
            output.push('&');
            output.push_str(&entity);
            continue;
        };

        let predefined = ["lt", "gt", "amp", "quot", "apos"]
            .iter()
            .any(|known| name.eq_ignore_ascii_case(known));
        if predefined || name.starts_with('#') {
            output.push('&');
            output.push_str(&entity);
        } else {
            output.push(' ');
        }
    }

    Cow::Owned(output)
}
