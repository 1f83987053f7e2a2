//! Screenshot artifacts
//!
//! Captures land at `<root>/<category>/<CASE-ID>-<tag>.png`. Write failures
//! below the root are logged and swallowed; a root that cannot be created or
//! written to fails the caller.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::driver::Driver;
use crate::error::{HarnessError, HarnessResult};

/// A screenshot written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Path relative to the screenshot root.
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// Relative artifact path for a scenario capture.
pub fn artifact_path(category: &str, case_id: &str, tag: &str) -> PathBuf {
    Path::new(category).join(format!("{case_id}-{tag}.png"))
}

#[derive(Debug, Clone)]
pub struct ScreenshotRecorder {
    root: PathBuf,
}

impl ScreenshotRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Capture the page into `relative`. Returns `None` when the capture was
    /// taken but could not be stored below an otherwise writable root.
    pub async fn take(
        &self,
        page: &dyn Driver,
        relative: &Path,
    ) -> HarnessResult<Option<Artifact>> {
        if !stays_inside_root(relative) {
            return Err(HarnessError::Configuration(format!(
                "artifact path {} must stay inside the screenshot root",
                relative.display()
            )));
        }

        let png = page.screenshot().await?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| HarnessError::ArtifactWrite {
                path: self.root.clone(),
                source,
            })?;

        let target = self.root.join(relative);
        match write_file(&target, &png).await {
            Ok(()) => {
                debug!("Screenshot written to {}", target.display());
                Ok(Some(Artifact {
                    path: relative.to_path_buf(),
                    bytes: png.len() as u64,
                    sha256: hex::encode(Sha256::digest(&png)),
                }))
            }
            Err(source) => {
                let err = HarnessError::ArtifactWrite {
                    path: target,
                    source,
                };
                warn!("{}", err);
                self.ensure_root_writable()?;
                Ok(None)
            }
        }
    }

    fn ensure_root_writable(&self) -> HarnessResult<()> {
        tempfile::NamedTempFile::new_in(&self.root)
            .map(drop)
            .map_err(|source| HarnessError::ArtifactWrite {
                path: self.root.clone(),
                source,
            })
    }
}

fn stays_inside_root(relative: &Path) -> bool {
    !relative.as_os_str().is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Write through a temp file in the target directory and rename it into
/// place, so a reader never sees a partial PNG.
async fn write_file(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    tokio::fs::create_dir_all(&dir).await?;

    let target = target.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn builds_category_paths() {
        assert_eq!(
            artifact_path("services", "PKG-002", "before"),
            PathBuf::from("services/PKG-002-before.png")
        );
        assert_eq!(
            artifact_path("owner", "OWN-004", "before-services"),
            PathBuf::from("owner/OWN-004-before-services.png")
        );
    }

    #[test_case("/etc/passwd" ; "absolute")]
    #[test_case("../escape.png" ; "parent")]
    #[test_case("owner/../../escape.png" ; "nested parent")]
    #[test_case("./owner/x.png" ; "current dir")]
    #[test_case("" ; "empty")]
    fn rejects_paths_outside_root(path: &str) {
        assert!(!stays_inside_root(Path::new(path)));
    }

    #[tokio::test]
    async fn replaces_existing_capture_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("owner/OWN-IMG-004-after.png");

        write_file(&target, b"first").await.unwrap();
        write_file(&target, b"second").await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"second");
        let entries = std::fs::read_dir(dir.path().join("owner")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn accepts_category_paths() {
        assert!(stays_inside_root(&artifact_path("staff", "ADM-008", "after")));
    }
}
