//! Property keys.

use std::fmt;
use std::rc::Rc;

/// A property key on a record or array node.
///
/// Arrays expose `Index` slots plus a `Length` property; records expose
/// named `Field`s. Keys are cheap to clone (field names are `Rc<str>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Named record property.
    Field(Rc<str>),
    /// Array slot.
    Index(usize),
    /// An array's length.
    Length,
}

impl Key {
    /// Build a field key.
    #[must_use]
    pub fn field(name: impl Into<Rc<str>>) -> Self {
        Self::Field(name.into())
    }

    /// Field name, if this is a field key.
    #[must_use]
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Self::Field(name) => Some(name),
            _ => None,
        }
    }

    /// Slot index, if this is an index key.
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Field(name.into())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Field(name.into())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index(i) => write!(f, "{i}"),
            Self::Length => f.write_str("length"),
        }
    }
}

/// Render a key path as `a.b[0].length` for log output.
#[must_use]
pub fn display_path(path: &[Key]) -> String {
    let mut out = String::new();
    for key in path {
        match key {
            Key::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
            other => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(&other.to_string());
            }
        }
    }
    out
}
