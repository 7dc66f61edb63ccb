//! Revision identifiers.

use std::fmt;

use git2::Oid;

/// Immutable, content-addressed identifier of a commit.
///
/// Revisions are only compared for equality; no ordering is implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Revision(Oid);

impl Revision {
    pub fn oid(&self) -> Oid {
        self.0
    }

    /// Abbreviated hex form used in log lines.
    pub fn short(&self) -> String {
        let mut hex = self.0.to_string();
        hex.truncate(8);
        hex
    }
}

impl From<Oid> for Revision {
    fn from(oid: Oid) -> Self {
        Self(oid)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
