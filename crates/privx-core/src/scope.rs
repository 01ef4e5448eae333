//! Construct-path naming for logical ids.
//!
//! Every builder receives a `Scope` and derives the logical ids of the
//! resources it emits from it. An id is the alphanumeric concatenation of
//! the path below the stack root followed by eight hex digits of the
//! SHA-256 of the full path, which keeps ids stable between runs and
//! distinct between siblings that sanitize to the same text.

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    path: Vec<String>,
}

impl Scope {
    /// Root scope named after the stack.
    pub fn new(root: &str) -> Self {
        Self {
            path: vec![root.to_string()],
        }
    }

    /// Nested scope.
    pub fn child(&self, name: &str) -> Self {
        let mut path = self.path.clone();
        path.push(name.to_string());
        Self { path }
    }

    /// Slash-joined path, e.g. `privx-service/Db/b`.
    pub fn path(&self) -> String {
        self.path.join("/")
    }

    /// Name of the stack this scope belongs to.
    pub fn root(&self) -> &str {
        &self.path[0]
    }

    /// Logical id for a resource named `name` inside this scope.
    pub fn logical_id(&self, name: &str) -> String {
        let full = format!("{}/{}", self.path(), name);
        let digest = Sha256::digest(full.as_bytes());
        let suffix = hex::encode_upper(&digest[..4]);

        let mut id: String = self.path[1..]
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(name))
            .flat_map(|part| part.chars())
            .filter(char::is_ascii_alphanumeric)
            .collect();
        id.push_str(&suffix);
        id
    }
}
