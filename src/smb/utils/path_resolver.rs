//! DOS path resolution against the share root.
//!
//! Client paths arrive backslash-separated and case-blind. Each component
//! is resolved case-insensitively against the on-disk directory, and the
//! result may never escape the share root.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::smb::types::SmbError;

pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied DOS path to a local path under the share
    /// root. Unknown trailing components are kept verbatim so callers can
    /// distinguish "not found" themselves.
    pub fn resolve(&self, dos_path: &str) -> Result<PathBuf, SmbError> {
        let mut out = self.root.clone();
        for comp in dos_path.split(['\\', '/']) {
            match comp {
                "" | "." => continue,
                ".." => {
                    warn!("rejecting path traversal in {:?}", dos_path);
                    return Err(SmbError::AccessDenied);
                }
                _ => out.push(resolve_component(&out, comp)),
            }
        }
        Ok(out)
    }

    /// Split a search path into its directory part and wildcard mask.
    /// `\docs\*.txt` becomes (`\docs`, `*.txt`); a bare mask searches the
    /// root, and an empty mask means everything.
    pub fn split_dir_and_mask<'b>(&self, dos_path: &'b str) -> (String, &'b str) {
        match dos_path.rfind(['\\', '/']) {
            Some(i) => {
                let mask = &dos_path[i + 1..];
                (
                    dos_path[..i].to_string(),
                    if mask.is_empty() { "*" } else { mask },
                )
            }
            None => (
                String::new(),
                if dos_path.is_empty() { "*" } else { dos_path },
            ),
        }
    }
}

/// Case-insensitive lookup of one component inside `dir`. Falls back to
/// the literal spelling when no entry matches.
fn resolve_component(dir: &Path, comp: &str) -> String {
    if dir.join(comp).exists() {
        return comp.to_string();
    }
    if let Ok(entries) = fs::read_dir(dir) {
        for e in entries.flatten() {
            if let Ok(name) = e.file_name().into_string() {
                if name.eq_ignore_ascii_case(comp) {
                    return name;
                }
            }
        }
    }
    comp.to_string()
}
