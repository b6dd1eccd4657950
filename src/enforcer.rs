//! Filesystem access enforcement.
//!
//! Every file operation an agent performs resolves through an
//! [`AccessEnforcer`]: symlinks and `..` segments are canonicalized away,
//! protected directories (always including the audit log directory) are
//! denied first, and the result must land inside a declared allowed root.
//! Resolution errors deny rather than bypass.
//!
//! Each agent instance owns its own enforcer. There is no shared mutable
//! enforcement state: the allowed-root and protected-dir sets are fixed at
//! construction and never re-parented.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// An access denial or construction failure. Messages name the layer so a
/// denial is never mistaken for a validator block or a human decision.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("access enforcer requires at least one allowed root")]
    NoAllowedRoots,

    #[error("allowed root {path} is invalid: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("'{operation}' denied: {path} is inside protected directory {protected}")]
    Protected {
        operation: String,
        path: PathBuf,
        protected: PathBuf,
    },

    #[error("'{operation}' denied: {path} is outside allowed paths {roots:?}")]
    OutsideRoots {
        operation: String,
        path: PathBuf,
        roots: Vec<PathBuf>,
    },

    #[error("'{operation}' denied: cannot resolve path {path}: {reason}")]
    Unresolvable {
        operation: String,
        path: PathBuf,
        reason: String,
    },
}

/// Confines one agent's file access to declared allowed roots.
#[derive(Debug)]
pub struct AccessEnforcer {
    allowed_roots: Vec<PathBuf>,
    protected_dirs: Vec<PathBuf>,
}

impl AccessEnforcer {
    /// Build an enforcer. Every allowed root must exist and be a directory;
    /// protected dirs are canonicalized when they exist so later prefix
    /// checks compare like with like.
    pub fn new(
        allowed_roots: Vec<PathBuf>,
        protected_dirs: Vec<PathBuf>,
    ) -> Result<Self, AccessError> {
        if allowed_roots.is_empty() {
            return Err(AccessError::NoAllowedRoots);
        }

        let mut roots = Vec::with_capacity(allowed_roots.len());
        for root in allowed_roots {
            let canonical = root.canonicalize().map_err(|e| AccessError::InvalidRoot {
                path: root.clone(),
                reason: e.to_string(),
            })?;
            if !canonical.is_dir() {
                return Err(AccessError::InvalidRoot {
                    path: root,
                    reason: "not a directory".to_string(),
                });
            }
            roots.push(canonical);
        }

        let protected = protected_dirs
            .into_iter()
            .map(|d| d.canonicalize().unwrap_or(d))
            .collect();

        Ok(Self {
            allowed_roots: roots,
            protected_dirs: protected,
        })
    }

    /// Build from an agent definition's `allowed_paths`, falling back to the
    /// current working directory when the list is empty.
    pub fn from_config(
        allowed_paths: &[PathBuf],
        protected_dirs: Vec<PathBuf>,
    ) -> Result<Self, AccessError> {
        if allowed_paths.is_empty() {
            tracing::warn!(
                "agent has no allowed_paths; defaulting to the current working \
                 directory. Declare allowed_paths for least-privilege confinement."
            );
            let cwd = std::env::current_dir().map_err(|e| AccessError::InvalidRoot {
                path: PathBuf::from("."),
                reason: e.to_string(),
            })?;
            return Self::new(vec![cwd], protected_dirs);
        }
        Self::new(allowed_paths.to_vec(), protected_dirs)
    }

    /// Authorize `path` for `operation`, returning the canonical resolved
    /// path on success. Denial order: protected dirs first, then the
    /// allowed-root membership check.
    pub fn authorize(&self, path: &Path, operation: &str) -> Result<PathBuf, AccessError> {
        let resolved = self.resolve(path, operation)?;

        for protected in &self.protected_dirs {
            if resolved.starts_with(protected) {
                return Err(AccessError::Protected {
                    operation: operation.to_string(),
                    path: resolved,
                    protected: protected.clone(),
                });
            }
        }

        for root in &self.allowed_roots {
            if resolved.starts_with(root) {
                return Ok(resolved);
            }
        }

        Err(AccessError::OutsideRoots {
            operation: operation.to_string(),
            path: resolved,
            roots: self.allowed_roots.clone(),
        })
    }

    /// The configured allowed roots, canonicalized.
    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    /// Canonicalize `path`, resolving symlinks and relative segments.
    /// Relative paths resolve against the first allowed root. For paths that
    /// do not exist yet (e.g. a file about to be written), the nearest
    /// existing ancestor is canonicalized and the remaining components are
    /// re-appended; `..` segments in the non-existing tail are rejected
    /// because they cannot be resolved against the real filesystem.
    fn resolve(&self, path: &Path, operation: &str) -> Result<PathBuf, AccessError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.allowed_roots[0].join(path)
        };

        if let Ok(canonical) = absolute.canonicalize() {
            return Ok(canonical);
        }

        // Walk up to the nearest existing ancestor, canonicalize it, and
        // re-append the missing tail.
        let mut existing = absolute.as_path();
        let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
        loop {
            match existing.parent() {
                Some(parent) => {
                    if let Some(name) = existing.file_name() {
                        tail.push(name);
                    } else {
                        return Err(AccessError::Unresolvable {
                            operation: operation.to_string(),
                            path: path.to_path_buf(),
                            reason: "path ends in '..'".to_string(),
                        });
                    }
                    if parent.exists() {
                        let canonical_parent =
                            parent.canonicalize().map_err(|e| AccessError::Unresolvable {
                                operation: operation.to_string(),
                                path: path.to_path_buf(),
                                reason: e.to_string(),
                            })?;
                        let mut out = canonical_parent;
                        for component in tail.iter().rev() {
                            out.push(component);
                        }
                        return Ok(out);
                    }
                    existing = parent;
                }
                None => {
                    return Err(AccessError::Unresolvable {
                        operation: operation.to_string(),
                        path: path.to_path_buf(),
                        reason: "no existing ancestor".to_string(),
                    });
                }
            }
        }
    }
}
