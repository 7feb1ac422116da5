//! Property trees
//!
//! Free-form metadata attached to a calibration file and to each
//! calibration: an ordered tree of string scalars, lists and maps addressed
//! by paths such as `"fixture.ports[1].name"`.

use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};

/// One node of a property tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Scalar(String),
    List(Vec<Property>),
    /// Insertion-ordered key/value pairs.
    Map(Vec<(String, Property)>),
}

impl Property {
    pub fn scalar(value: impl ToString) -> Self {
        Property::Scalar(value.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Property::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Number of children; 1 for a scalar.
    pub fn len(&self) -> usize {
        match self {
            Property::Scalar(_) => 1,
            Property::List(items) => items.len(),
            Property::Map(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn child(&self, elem: &PathElem) -> Option<&Property> {
        match (self, elem) {
            (Property::Map(entries), PathElem::Key(k)) => {
                entries.iter().find(|(key, _)| key == k).map(|(_, v)| v)
            }
            (Property::List(items), PathElem::Index(i)) => items.get(*i),
            _ => None,
        }
    }

    /// Child for `elem`, created as an empty node when absent.
    fn child_mut_or_insert(&mut self, elem: &PathElem, next: Option<&PathElem>) -> Result<&mut Property> {
        let empty = || match next {
            Some(PathElem::Index(_)) => Property::List(Vec::new()),
            _ => Property::Map(Vec::new()),
        };
        match (self, elem) {
            (Property::Map(entries), PathElem::Key(k)) => {
                let pos = match entries.iter().position(|(key, _)| key == k) {
                    Some(pos) => pos,
                    None => {
                        entries.push((k.clone(), empty()));
                        entries.len() - 1
                    }
                };
                Ok(&mut entries[pos].1)
            }
            (Property::List(items), PathElem::Index(i)) => {
                if *i == items.len() {
                    items.push(empty());
                }
                items
                    .get_mut(*i)
                    .ok_or_else(|| Error::usage(format!("list index {i} out of range")))
            }
            (node, elem) => Err(Error::usage(format!(
                "cannot address {elem:?} in a {} node",
                node.kind()
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Property::Scalar(_) => "scalar",
            Property::List(_) => "list",
            Property::Map(_) => "map",
        }
    }
}

impl From<&Value> for Property {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Property::Scalar(String::new()),
            Value::Bool(b) => Property::scalar(b),
            Value::Number(n) => Property::scalar(n),
            Value::String(s) => Property::Scalar(s.clone()),
            Value::Sequence(seq) => Property::List(seq.iter().map(Property::from).collect()),
            Value::Mapping(map) => Property::Map(
                map.iter()
                    .map(|(k, v)| (yaml_key(k), Property::from(v)))
                    .collect(),
            ),
            Value::Tagged(tagged) => Property::from(&tagged.value),
        }
    }
}

impl From<&Property> for Value {
    fn from(prop: &Property) -> Self {
        match prop {
            Property::Scalar(s) => Value::String(s.clone()),
            Property::List(items) => Value::Sequence(items.iter().map(Value::from).collect()),
            Property::Map(entries) => {
                let mut map = Mapping::new();
                for (k, v) in entries {
                    map.insert(Value::String(k.clone()), Value::from(v));
                }
                Value::Mapping(map)
            }
        }
    }
}

fn yaml_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathElem {
    Key(String),
    Index(usize),
}

/// Split `a.b[2].c` into key and index elements.
fn parse_path(path: &str) -> Result<Vec<PathElem>> {
    let bad = || Error::usage(format!("invalid property path: {path:?}"));
    let mut elems = Vec::new();
    for segment in path.split('.') {
        let (key, mut rest) = match segment.find('[') {
            Some(pos) => segment.split_at(pos),
            None => (segment, ""),
        };
        if key.is_empty() && (elems.is_empty() || rest.is_empty()) {
            return Err(bad());
        }
        if !key.is_empty() {
            elems.push(PathElem::Key(key.to_string()));
        }
        while !rest.is_empty() {
            let close = rest.find(']').ok_or_else(bad)?;
            if !rest.starts_with('[') {
                return Err(bad());
            }
            let index = rest[1..close].trim().parse::<usize>().map_err(|_| bad())?;
            elems.push(PathElem::Index(index));
            rest = &rest[close + 1..];
        }
    }
    Ok(elems)
}

/// Root of a property tree: always a map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: Vec<(String, Property)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn root(&self) -> Property {
        Property::Map(self.entries.clone())
    }

    /// Look up a node by path.
    pub fn get(&self, path: &str) -> Option<&Property> {
        let elems = parse_path(path).ok()?;
        let (first, rest) = elems.split_first()?;
        let PathElem::Key(k) = first else {
            return None;
        };
        let mut node = self.entries.iter().find(|(key, _)| key == k).map(|(_, v)| v)?;
        for elem in rest {
            node = node.child(elem)?;
        }
        Some(node)
    }

    /// Scalar value at `path`.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Property::as_str)
    }

    /// Store `value` at `path`, creating intermediate maps and lists.
    ///
    /// A list index may be at most the current length (appends).
    pub fn set(&mut self, path: &str, value: Property) -> Result<()> {
        let elems = parse_path(path)?;
        let mut root = self.root();
        Self::set_in(&mut root, &elems, value)?;
        if let Property::Map(entries) = root {
            self.entries = entries;
        }
        Ok(())
    }

    fn set_in(root: &mut Property, elems: &[PathElem], value: Property) -> Result<()> {
        let mut node = root;
        for (k, elem) in elems.iter().enumerate() {
            node = node.child_mut_or_insert(elem, elems.get(k + 1))?;
        }
        *node = value;
        Ok(())
    }

    /// Remove and return the node at `path`.
    pub fn delete(&mut self, path: &str) -> Option<Property> {
        let elems = parse_path(path).ok()?;
        let (last, parents) = elems.split_last()?;
        let mut root = Property::Map(std::mem::take(&mut self.entries));
        let removed = Self::delete_in(&mut root, parents, last);
        if let Property::Map(entries) = root {
            self.entries = entries;
        }
        removed
    }

    fn delete_in(root: &mut Property, parents: &[PathElem], last: &PathElem) -> Option<Property> {
        let mut node = root;
        for elem in parents {
            node = match (node, elem) {
                (Property::Map(entries), PathElem::Key(k)) => {
                    entries.iter_mut().find(|(key, _)| key == k).map(|(_, v)| v)?
                }
                (Property::List(items), PathElem::Index(i)) => items.get_mut(*i)?,
                _ => return None,
            };
        }
        match (node, last) {
            (Property::Map(entries), PathElem::Key(k)) => {
                let pos = entries.iter().position(|(key, _)| key == k)?;
                Some(entries.remove(pos).1)
            }
            (Property::List(items), PathElem::Index(i)) if *i < items.len() => Some(items.remove(*i)),
            _ => None,
        }
    }

    /// Keys of the map at `path` (the root for `""`).
    pub fn keys(&self, path: &str) -> Vec<String> {
        let node = if path.is_empty() {
            Some(self.root())
        } else {
            self.get(path).cloned()
        };
        match node {
            Some(Property::Map(entries)) => entries.into_iter().map(|(k, _)| k).collect(),
            _ => Vec::new(),
        }
    }

    /// Build from a YAML mapping; other node kinds are a syntax error.
    pub fn from_yaml(value: &Value) -> Result<Self> {
        match Property::from(value) {
            Property::Map(entries) => Ok(Self { entries }),
            Property::Scalar(s) if s.is_empty() => Ok(Self::new()),
            _ => Err(Error::syntax("properties must be a mapping")),
        }
    }

    pub fn to_yaml(&self) -> Value {
        Value::from(&self.root())
    }
}
