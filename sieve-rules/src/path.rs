use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Dotted/bracketed property path (`payload.items[0].name`, `a["x.y"]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(transparent)]
pub struct FieldPath(String);

/// One step of a parsed [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Splits the path into segments. Fails on unbalanced brackets or quotes.
    pub fn segments(&self) -> Result<Vec<Segment>, String> {
        parse_segments(self.0.trim())
    }

    /// Borrow the value at this path. Any resolution problem yields `None`.
    pub fn locate<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let segments = self.segments().ok()?;
        let mut current = root;
        for segment in &segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                (Segment::Key(key), Value::Array(items)) => {
                    let index: usize = key.parse().ok()?;
                    items.get(index)?
                }
                (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Owned lookup; `Value::Null` when the path does not resolve.
    pub fn lookup(&self, root: &Value) -> Value {
        self.locate(root).cloned().unwrap_or(Value::Null)
    }

    /// Writes `value` at this path, creating intermediate objects and arrays.
    /// An empty path replaces the root.
    pub fn assign(&self, root: &mut Value, value: Value) -> Result<(), String> {
        let segments = self.segments()?;
        let Some((last, parents)) = segments.split_last() else {
            *root = value;
            return Ok(());
        };

        let mut current = root;
        for (position, segment) in parents.iter().enumerate() {
            let next = &segments[position + 1];
            current = child_mut(current, segment, next)?;
        }

        match last {
            Segment::Key(key) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => {
                        map.insert(key.clone(), value);
                        Ok(())
                    }
                    other => Err(format!("cannot set property {key:?} on {}", kind_of(other))),
                }
            }
            Segment::Index(index) => {
                if current.is_null() {
                    *current = Value::Array(Vec::new());
                }
                match current {
                    Value::Array(items) => {
                        *slot(items, *index)? = value;
                        Ok(())
                    }
                    other => Err(format!("cannot set index {index} on {}", kind_of(other))),
                }
            }
        }
    }
}

impl From<&str> for FieldPath {
    fn from(value: &str) -> Self {
        FieldPath::new(value)
    }
}

impl From<String> for FieldPath {
    fn from(value: String) -> Self {
        FieldPath::new(value)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn empty_container(next: &Segment) -> Value {
    match next {
        Segment::Key(_) => Value::Object(Map::new()),
        Segment::Index(_) => Value::Array(Vec::new()),
    }
}

fn child_mut<'a>(
    current: &'a mut Value,
    segment: &Segment,
    next: &Segment,
) -> Result<&'a mut Value, String> {
    match segment {
        Segment::Key(key) => {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            let kind = kind_of(current);
            let Value::Object(map) = current else {
                return Err(format!("cannot set property {key:?} on {kind}"));
            };
            let child = map.entry(key.clone()).or_insert(Value::Null);
            if child.is_null() {
                *child = empty_container(next);
            }
            Ok(child)
        }
        Segment::Index(index) => {
            if current.is_null() {
                *current = Value::Array(Vec::new());
            }
            let kind = kind_of(current);
            let Value::Array(items) = current else {
                return Err(format!("cannot set index {index} on {kind}"));
            };
            let child = slot(items, *index)?;
            if child.is_null() {
                *child = empty_container(next);
            }
            Ok(child)
        }
    }
}

/// Most `null` slots a single assignment may pad an array with.
const MAX_INDEX_GAP: usize = 1024;

fn slot(items: &mut Vec<Value>, index: usize) -> Result<&mut Value, String> {
    if index >= items.len() {
        if index - items.len() > MAX_INDEX_GAP {
            return Err(format!(
                "index {index} out of range for an array of length {}",
                items.len()
            ));
        }
        items.resize(index + 1, Value::Null);
    }
    Ok(&mut items[index])
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn parse_segments(raw: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
                match chars.peek().copied() {
                    Some(quote @ ('"' | '\'')) => {
                        chars.next();
                        let mut key = String::new();
                        loop {
                            match chars.next() {
                                Some('\\') => match chars.next() {
                                    Some(escaped) => key.push(escaped),
                                    None => return Err(format!("unterminated string in {raw:?}")),
                                },
                                Some(c) if c == quote => break,
                                Some(c) => key.push(c),
                                None => return Err(format!("unterminated string in {raw:?}")),
                            }
                        }
                        while chars.peek().is_some_and(|c| c.is_whitespace()) {
                            chars.next();
                        }
                        if chars.next() != Some(']') {
                            return Err(format!("expected ']' in {raw:?}"));
                        }
                        segments.push(Segment::Key(key));
                    }
                    _ => {
                        let mut inner = String::new();
                        loop {
                            match chars.next() {
                                Some(']') => break,
                                Some(c) => inner.push(c),
                                None => return Err(format!("unbalanced '[' in {raw:?}")),
                            }
                        }
                        let inner = inner.trim();
                        match inner.parse::<usize>() {
                            Ok(index) => segments.push(Segment::Index(index)),
                            Err(_) if !inner.is_empty() => {
                                segments.push(Segment::Key(inner.to_string()))
                            }
                            Err(_) => return Err(format!("empty brackets in {raw:?}")),
                        }
                    }
                }
            }
            ']' => return Err(format!("unbalanced ']' in {raw:?}")),
            other => current.push(other),
        }
    }

    if !current.is_empty() {
        segments.push(Segment::Key(current));
    }
    Ok(segments)
}
