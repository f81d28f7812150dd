use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a specific quiz instance, as handed out by the backend.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TestCode(String);

impl TestCode {
    /// Creates a new `TestCode`.
    ///
    /// Surrounding whitespace is trimmed. The code becomes part of persisted
    /// key names, so it must be non-empty and free of `:` separators.
    ///
    /// # Errors
    ///
    /// Returns `ParseIdError` if the code is blank or contains `:` or whitespace.
    pub fn new(code: impl Into<String>) -> Result<Self, ParseIdError> {
        let code = code.into();
        let trimmed = code.trim();
        if trimmed.is_empty() || trimmed.contains(':') || trimmed.contains(char::is_whitespace) {
            return Err(ParseIdError {
                kind: "TestCode".to_string(),
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TestCode {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TestCode> for String {
    fn from(value: TestCode) -> Self {
        value.0
    }
}

/// Chat-platform user identifier of the test taker.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    /// Creates a new `UserId`
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying u64 value
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// One test-taking attempt is bound to a `(TestCode, UserId)` pair.
///
/// The key derives the names under which the deadline and the
/// already-submitted marker are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    code: TestCode,
    user: Option<UserId>,
}

impl SessionKey {
    #[must_use]
    pub fn new(code: TestCode, user: Option<UserId>) -> Self {
        Self { code, user }
    }

    #[must_use]
    pub fn code(&self) -> &TestCode {
        &self.code
    }

    #[must_use]
    pub fn user(&self) -> Option<UserId> {
        self.user
    }

    /// Persisted key holding the absolute deadline (epoch seconds).
    #[must_use]
    pub fn deadline_key(&self) -> String {
        format!("{}:deadline", self.prefix())
    }

    /// Persisted key holding the already-submitted marker.
    #[must_use]
    pub fn submitted_key(&self) -> String {
        format!("{}:submitted", self.prefix())
    }

    fn prefix(&self) -> String {
        match self.user {
            Some(user) => format!("quiz:{}:{}", self.code, user),
            None => format!("quiz:{}:anon", self.code),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.user {
            Some(user) => write!(f, "{}/{}", self.code, user),
            None => write!(f, "{}/anon", self.code),
        }
    }
}

impl fmt::Debug for TestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TestCode({})", self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

// ─── Display Implementations ───────────────────────────────────────────────────

impl fmt::Display for TestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── FromStr Implementations ───────────────────────────────────────────────────

/// Error type for parsing ID from string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

impl FromStr for TestCode {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TestCode::new(s)
    }
}

impl FromStr for UserId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(UserId::new)
            .map_err(|_| ParseIdError {
                kind: "UserId".to_string(),
            })
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
