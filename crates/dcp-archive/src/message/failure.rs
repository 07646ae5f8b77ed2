//! Fixed-capacity failure/status code set.

use std::fmt;

/// Maximum number of distinct codes a message carries.
pub const MAX_FAILURE_CODES: usize = 8;

/// Code meaning "no failure"; never stored.
pub const NO_FAILURE: char = '-';

/// Ordered, de-duplicated set of single-character failure codes.
///
/// Insertion order is preserved. Once the set holds [`MAX_FAILURE_CODES`]
/// codes, further additions are dropped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FailureCodes {
    codes: [char; MAX_FAILURE_CODES],
    len: usize,
}

impl FailureCodes {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from the characters of `codes`, in order.
    pub fn from_codes(codes: &str) -> Self {
        let mut set = Self::new();
        for code in codes.chars() {
            set.add(code);
        }
        set
    }

    /// Adds a code. Returns true if the set changed.
    pub fn add(&mut self, code: char) -> bool {
        if code == NO_FAILURE || self.contains(code) || self.len == MAX_FAILURE_CODES {
            return false;
        }
        self.codes[self.len] = code;
        self.len += 1;
        true
    }

    /// Returns true if `code` is present.
    pub fn contains(&self, code: char) -> bool {
        self.as_slice().contains(&code)
    }

    /// Returns the first code added, the message's primary code.
    pub fn primary(&self) -> Option<char> {
        self.as_slice().first().copied()
    }

    /// Number of codes held.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no codes are held.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Codes in insertion order.
    pub fn as_slice(&self) -> &[char] {
        &self.codes[..self.len]
    }
}

impl fmt::Display for FailureCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        for code in self.as_slice() {
            write!(f, "{code}")?;
        }
        Ok(())
    }
}
