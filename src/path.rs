use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PathError {
    #[error("path is not absolute: {0}")]
    NotAbsolute(String),

    #[error("path contains a NUL byte")]
    EmbeddedNul,

    #[error("path escapes the root")]
    EscapesRoot,

    #[error("path component is empty")]
    EmptyComponent,

    #[error("path component contains '/'")]
    ComponentWithSlash,
}

/// Absolute, canonicalized path identifying a mount point. Duplicate
/// slashes collapse, `.` disappears, `..` resolves lexically, and a
/// trailing slash is stripped. `..` above the root is an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MountPath(String);

impl MountPath {
    pub fn new(path: &str) -> Result<Self, PathError> {
        if !path.starts_with('/') {
            return Err(PathError::NotAbsolute(path.to_string()));
        }
        if path.contains('\0') {
            return Err(PathError::EmbeddedNul);
        }

        let mut parts: Vec<&str> = Vec::new();
        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(PathError::EscapesRoot);
                    }
                }
                other => parts.push(other),
            }
        }

        if parts.is_empty() {
            return Ok(Self("/".to_string()));
        }
        Ok(Self(format!("/{}", parts.join("/"))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MountPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single name within a directory. Opaque bytes: invalid UTF-8 is
/// allowed, `/` and NUL are not, and the name must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathComponent(Vec<u8>);

impl PathComponent {
    pub fn new(name: impl Into<Vec<u8>>) -> Result<Self, PathError> {
        let name = name.into();
        if name.is_empty() {
            return Err(PathError::EmptyComponent);
        }
        if name.contains(&b'/') {
            return Err(PathError::ComponentWithSlash);
        }
        if name.contains(&0) {
            return Err(PathError::EmbeddedNul);
        }
        Ok(Self(name))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}
