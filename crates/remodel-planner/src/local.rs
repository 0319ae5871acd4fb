use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use remodel_core::{LocalComponent, LocalSnap};
use remodel_security::verify_sha384_file;

use crate::RemodelError;

/// Snap and component files supplied for an offline remodel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalFiles {
    snaps: BTreeMap<String, LocalSnap>,
    components: BTreeMap<String, LocalComponent>,
}

impl LocalFiles {
    /// Indexes the files by snap name and component reference. Each snap
    /// and component may be supplied once.
    pub fn new(
        snaps: impl IntoIterator<Item = LocalSnap>,
        components: impl IntoIterator<Item = LocalComponent>,
    ) -> Result<Self, RemodelError> {
        let mut files = Self::default();
        for snap in snaps {
            let name = snap.side_info.name.clone();
            if files.snaps.insert(name.clone(), snap).is_some() {
                return Err(RemodelError::DuplicateLocalFile { name });
            }
        }
        for component in components {
            let name = component.reference();
            if files.components.insert(name.clone(), component).is_some() {
                return Err(RemodelError::DuplicateLocalFile { name });
            }
        }
        Ok(files)
    }

    pub fn is_empty(&self) -> bool {
        self.snaps.is_empty() && self.components.is_empty()
    }

    pub fn snap(&self, name: &str) -> Option<&LocalSnap> {
        self.snaps.get(name)
    }

    pub fn component(&self, snap: &str, component: &str) -> Option<&LocalComponent> {
        self.components.get(&format!("{snap}+{component}"))
    }

    /// Every file must be a regular file and match its digest when one is given.
    pub fn check(&self) -> Result<(), RemodelError> {
        for snap in self.snaps.values() {
            check_file(&snap.path, snap.sha384.as_deref())?;
        }
        for component in self.components.values() {
            check_file(&component.path, component.sha384.as_deref())?;
        }
        Ok(())
    }
}

fn check_file(path: &Path, sha384: Option<&str>) -> Result<(), RemodelError> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("cannot stat local snap file {}", path.display()))?;
    if !metadata.is_file() {
        return Err(RemodelError::LocalFileInvalid {
            path: path.display().to_string(),
        });
    }
    if let Some(expected) = sha384 {
        if !verify_sha384_file(path, expected)? {
            return Err(RemodelError::LocalFileDigestMismatch {
                path: path.display().to_string(),
            });
        }
    }
    Ok(())
}
