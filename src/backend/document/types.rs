//! Identifiers and validated names used by the document store.

use std::fmt;

use git2::Oid;
use thiserror::Error;

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Oid);

        impl $name {
            pub(crate) fn new(oid: Oid) -> Self {
                Self(oid)
            }

            pub(crate) fn raw(&self) -> Oid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

object_id!(
    /// A commit on `main`; one per store write.
    CommitId
);
object_id!(
    /// The blob holding one document.
    BlobId
);
object_id!(TreeId);

impl CommitId {
    /// abbreviated hex form used in reflog lines
    pub fn short(&self) -> String {
        let mut hex = self.0.to_string();
        hex.truncate(7);
        hex
    }
}

/// Author and committer recorded on store commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

impl Committer {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub(crate) fn signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for Committer {
    fn default() -> Self {
        Self::new("Cardinal", "cardinal@localhost")
    }
}

/// A validated collection name.
///
/// Collection names become top-level directories of the repository tree.
///
/// Valid names:
/// - 1-64 characters
/// - alphanumeric, underscores, hyphens only
/// - must start with a letter or underscore
/// - cannot be a reserved name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionName(String);

impl CollectionName {
    const RESERVED: &'static [&'static str] = &["_meta", "_system", "_git"];

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        let Some(first) = name.chars().next() else {
            return Err(InvalidNameError::Empty);
        };

        if name.len() > 64 {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(InvalidNameError::InvalidStart(first));
        }

        check_characters(name)?;

        if Self::RESERVED.contains(&name.to_lowercase().as_str()) {
            return Err(InvalidNameError::Reserved(name.to_string()));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document key.
///
/// Any non-empty identifier is a key. On disk it becomes the file name
/// `<escaped>.json`: ASCII letters, digits, `_` and `-` are kept and every
/// other byte is written as `%` plus two hex digits, so `red.team` is
/// stored as `red%2eteam.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// longest key accepted, in bytes
    pub const MAX_LEN: usize = 1024;

    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        if key.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if key.len() > Self::MAX_LEN {
            return Err(InvalidNameError::TooLong(key.len()));
        }
        Ok(Self(key))
    }

    /// The key stored under a blob file name, if it is one.
    ///
    /// Only the exact escaping produced by [`file_name`](Self::file_name) is
    /// accepted, so every key has one file name.
    pub(crate) fn from_file_name(name: &str) -> Option<Self> {
        let escaped = name.strip_suffix(".json")?;
        let mut bytes = Vec::with_capacity(escaped.len());
        let mut rest = escaped.as_bytes();
        while let Some((&first, tail)) = rest.split_first() {
            if first == b'%' {
                let digits = tail.get(..2)?;
                bytes.extend(hex::decode(digits).ok()?);
                rest = &tail[2..];
            } else {
                bytes.push(first);
                rest = tail;
            }
        }

        let key = Self::new(String::from_utf8(bytes).ok()?).ok()?;
        (key.file_name() == name).then_some(key)
    }

    pub fn file_name(&self) -> String {
        let mut name = String::with_capacity(self.0.len() + 5);
        for &b in self.0.as_bytes() {
            if is_plain(b) {
                name.push(char::from(b));
            } else {
                name.push('%');
                name.push_str(&hex::encode([b]));
            }
        }
        name.push_str(".json");
        name
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn check_characters(name: &str) -> Result<(), InvalidNameError> {
    for (i, c) in name.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }
    Ok(())
}

/// Why a collection name or document key was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNameError {
    #[error("name cannot be empty")]
    Empty,

    #[error("name too long: {0} characters")]
    TooLong(usize),

    #[error("name cannot start with '{0}'")]
    InvalidStart(char),

    #[error("invalid character '{char}' at position {position}")]
    InvalidCharacter { char: char, position: usize },

    #[error("'{0}' is a reserved name")]
    Reserved(String),
}
