//! Canonical request header map and the rules for folding repeated header lines into it.
//!
//! Header lines arrive from the parser one at a time, in wire order. Each field name is
//! normalized to lower case and classified once through a static table:
//!
//! | class             | fields                                        | repeated lines      |
//! |-------------------|-----------------------------------------------|---------------------|
//! | `Overwrite`       | host, content-type, user-agent, ...           | last one wins       |
//! | `CommaJoin`       | connection, cache-control, vary, unknown, ... | joined with `", "`  |
//! | `SemicolonJoin`   | cookie                                        | joined with `"; "`  |
//! | `SequenceCollect` | set-cookie                                    | kept as a list      |
//!
//! Unknown headers are comma-joined so that distinct values sharing a name are never lost.

use std::borrow::Cow;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::slice;

/// How repeated occurrences of one header field are folded together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderClass {
    Overwrite,
    CommaJoin,
    SemicolonJoin,
    SequenceCollect,
}

impl HeaderClass {
    /// Returns the delimiter used when joining a new value onto an existing one.
    pub fn delimiter(self) -> Option<&'static str> {
        match self {
            HeaderClass::CommaJoin => Some(", "),
            HeaderClass::SemicolonJoin => Some("; "),
            HeaderClass::Overwrite | HeaderClass::SequenceCollect => None,
        }
    }
}

const KNOWN_HEADERS: &[(&str, HeaderClass)] = &[
    ("content-type", HeaderClass::Overwrite),
    ("content-length", HeaderClass::Overwrite),
    ("user-agent", HeaderClass::Overwrite),
    ("referer", HeaderClass::Overwrite),
    ("host", HeaderClass::Overwrite),
    ("authorization", HeaderClass::Overwrite),
    ("proxy-authorization", HeaderClass::Overwrite),
    ("if-modified-since", HeaderClass::Overwrite),
    ("if-unmodified-since", HeaderClass::Overwrite),
    ("from", HeaderClass::Overwrite),
    ("location", HeaderClass::Overwrite),
    ("max-forwards", HeaderClass::Overwrite),
    ("retry-after", HeaderClass::Overwrite),
    ("etag", HeaderClass::Overwrite),
    ("last-modified", HeaderClass::Overwrite),
    ("server", HeaderClass::Overwrite),
    ("age", HeaderClass::Overwrite),
    ("expires", HeaderClass::Overwrite),
    ("set-cookie", HeaderClass::SequenceCollect),
    ("cookie", HeaderClass::SemicolonJoin),
    ("transfer-encoding", HeaderClass::CommaJoin),
    ("date", HeaderClass::CommaJoin),
    ("connection", HeaderClass::CommaJoin),
    ("cache-control", HeaderClass::CommaJoin),
    ("vary", HeaderClass::CommaJoin),
    ("content-encoding", HeaderClass::CommaJoin),
    ("origin", HeaderClass::CommaJoin),
    ("upgrade", HeaderClass::CommaJoin),
    ("expect", HeaderClass::CommaJoin),
    ("if-match", HeaderClass::CommaJoin),
    ("if-none-match", HeaderClass::CommaJoin),
    ("accept", HeaderClass::CommaJoin),
    ("accept-encoding", HeaderClass::CommaJoin),
    ("accept-language", HeaderClass::CommaJoin),
    ("x-forwarded-for", HeaderClass::CommaJoin),
    ("x-forwarded-host", HeaderClass::CommaJoin),
    ("x-forwarded-proto", HeaderClass::CommaJoin),
];

/// Normalizes a field name and returns its class.
///
/// Known names resolve to a static lower-case key regardless of the wire casing; anything else
/// is lower-cased and treated as comma-joinable.
pub fn classify(field_name: &str) -> (Cow<'static, str>, HeaderClass) {
    match KNOWN_HEADERS.iter().find(|(known, _)| known.eq_ignore_ascii_case(field_name)) {
        Some((known, class)) => (Cow::Borrowed(*known), *class),
        None => (Cow::Owned(field_name.to_ascii_lowercase()), HeaderClass::CommaJoin),
    }
}

/// A value in the canonical header map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderField {
    /// A single, possibly joined, value
    Single(String),
    /// Raw values in wire order, only used for `set-cookie`
    Sequence(Vec<String>),
}

impl HeaderField {
    /// Returns the value if this field is a single (possibly joined) string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderField::Single(value) => Some(value),
            HeaderField::Sequence(_) => None,
        }
    }

    /// Returns every value of this field.
    pub fn values(&self) -> &[String] {
        match self {
            HeaderField::Single(value) => slice::from_ref(value),
            HeaderField::Sequence(values) => values,
        }
    }
}

/// Request headers keyed by their canonical lower-case name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    map: HashMap<Cow<'static, str>, HeaderField>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { map: HashMap::with_capacity(capacity) }
    }

    /// Looks a field up by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&HeaderField> {
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.map.get(name.to_ascii_lowercase().as_str())
        } else {
            self.map.get(name)
        }
    }

    /// Shortcut for single-valued fields, `None` for absent fields and for `set-cookie`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderField::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderField)> {
        self.map.iter().map(|(name, field)| (name.as_ref(), field))
    }

    /// Folds one header line into the map, see [`add_header_line`].
    pub fn add_line(&mut self, field_name: &str, value: &str) {
        add_header_line(field_name, value, self);
    }
}

/// Folds one header line, as produced by the parser, into `dest`.
///
/// Must be called in wire order: overwrite semantics and joined values depend on it.
pub fn add_header_line(field_name: &str, value: &str, dest: &mut Headers) {
    let (name, class) = classify(field_name);

    match class {
        HeaderClass::Overwrite => {
            dest.map.insert(name, HeaderField::Single(value.to_owned()));
        }

        HeaderClass::SequenceCollect => match dest.map.entry(name) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                HeaderField::Sequence(values) => values.push(value.to_owned()),
                field @ HeaderField::Single(_) => *field = HeaderField::Sequence(vec![value.to_owned()]),
            },
            Entry::Vacant(entry) => {
                entry.insert(HeaderField::Sequence(vec![value.to_owned()]));
            }
        },

        HeaderClass::CommaJoin | HeaderClass::SemicolonJoin => {
            let delimiter = class.delimiter().unwrap_or(", ");
            match dest.map.entry(name) {
                Entry::Occupied(mut entry) => match entry.get_mut() {
                    HeaderField::Single(existing) => {
                        existing.reserve(delimiter.len() + value.len());
                        existing.push_str(delimiter);
                        existing.push_str(value);
                    }
                    field @ HeaderField::Sequence(_) => *field = HeaderField::Single(value.to_owned()),
                },
                Entry::Vacant(entry) => {
                    entry.insert(HeaderField::Single(value.to_owned()));
                }
            }
        }
    }
}

/// Returns true if the comma separated list `value` contains `token`, ignoring case.
///
/// Used for `Connection`, `Transfer-Encoding`, `TE` and similar list-valued fields.
pub fn contains_token(value: &[u8], token: &str) -> bool {
    value.split(|b| *b == b',').any(|item| item.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
}

/// Returns true if the last coding of a `Transfer-Encoding` list is `chunked`.
pub(crate) fn is_chunked(value: &[u8]) -> bool {
    value.rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
