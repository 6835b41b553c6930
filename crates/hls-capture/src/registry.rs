//! Exclusive claims on output paths.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SessionError;

/// Shared set of media paths currently owned by a session.
#[derive(Debug, Clone, Default)]
pub struct OutputRegistry {
    claimed: Arc<Mutex<HashSet<PathBuf>>>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for exclusive writing. The claim is released when the returned
    /// guard is dropped.
    pub fn claim(&self, path: &Path) -> Result<OutputClaim, SessionError> {
        let mut claimed = self.claimed.lock();
        if !claimed.insert(path.to_path_buf()) {
            return Err(SessionError::OutputBusy(path.to_path_buf()));
        }
        Ok(OutputClaim {
            path: path.to_path_buf(),
            claimed: Arc::clone(&self.claimed),
        })
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.claimed.lock().contains(path)
    }
}

#[derive(Debug)]
pub struct OutputClaim {
    path: PathBuf,
    claimed: Arc<Mutex<HashSet<PathBuf>>>,
}

impl OutputClaim {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OutputClaim {
    fn drop(&mut self) {
        self.claimed.lock().remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_rejected_until_release() {
        let registry = OutputRegistry::new();
        let path = Path::new("/archive/show/show.ts");

        let claim = registry.claim(path).unwrap();
        assert!(registry.is_claimed(path));
        assert!(matches!(
            registry.claim(path),
            Err(SessionError::OutputBusy(p)) if p == path
        ));

        drop(claim);
        assert!(!registry.is_claimed(path));
        assert!(registry.claim(path).is_ok());
    }

    #[test]
    fn clones_share_claims() {
        let registry = OutputRegistry::new();
        let other = registry.clone();
        let _claim = registry.claim(Path::new("a.ts")).unwrap();
        assert!(other.claim(Path::new("a.ts")).is_err());
        assert!(other.claim(Path::new("b.ts")).is_ok());
    }
}
