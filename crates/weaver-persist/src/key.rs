//! Mapping from logical document names to flat store keys.

use std::fmt;

use smol_str::SmolStr;

use crate::error::KeyError;

/// Longest document name accepted, in bytes.
pub const MAX_NAME_BYTES: usize = 1024;

/// Separator between escaped path segments in a store key.
const SEGMENT_SEPARATOR: char = ':';

/// Flat key under which a document's record lives in the backing store.
///
/// Built from a hierarchical document name (`notebook/entry/draft`) by
/// percent-escaping `%` and `:` in every segment and joining the segments
/// with `:`. The escaping is reversible and the separator never survives
/// inside a segment, so distinct names always produce distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(SmolStr);

impl StoreKey {
    /// Map a document name to its store key, rejecting names that cannot be
    /// mapped without ambiguity.
    pub fn for_document(name: &str) -> Result<Self, KeyError> {
        if name.is_empty() {
            return Err(KeyError::Empty);
        }
        if name.len() > MAX_NAME_BYTES {
            return Err(KeyError::TooLong {
                len: name.len(),
                max: MAX_NAME_BYTES,
            });
        }
        if name.chars().any(char::is_control) {
            return Err(KeyError::ControlCharacter {
                name: name.to_string(),
            });
        }

        let mut key = String::with_capacity(name.len());
        for (i, segment) in name.split('/').enumerate() {
            if segment.is_empty() {
                return Err(KeyError::EmptySegment {
                    name: name.to_string(),
                });
            }
            if segment == "." || segment == ".." {
                return Err(KeyError::DotSegment {
                    name: name.to_string(),
                });
            }
            if i > 0 {
                key.push(SEGMENT_SEPARATOR);
            }
            escape_segment(segment, &mut key);
        }

        Ok(Self(SmolStr::from(key)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Recover the document name this key was built from.
    pub fn document_name(&self) -> String {
        let mut name = String::with_capacity(self.0.len());
        let mut chars = self.0.chars();
        while let Some(c) = chars.next() {
            match c {
                SEGMENT_SEPARATOR => name.push('/'),
                '%' => {
                    let escaped: String = chars.by_ref().take(2).collect();
                    match escaped.as_str() {
                        "25" => name.push('%'),
                        "3A" => name.push(':'),
                        other => {
                            name.push('%');
                            name.push_str(other);
                        }
                    }
                }
                c => name.push(c),
            }
        }
        name
    }
}

fn escape_segment(segment: &str, out: &mut String) {
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            SEGMENT_SEPARATOR => out.push_str("%3A"),
            c => out.push(c),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StoreKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
