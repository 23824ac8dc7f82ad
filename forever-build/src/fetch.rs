//! Source acquisition.
//!
//! Every source is resolved once per run, before any architecture starts, and
//! shared read-only by all of them. Fetched trees are keyed by their pin (git
//! commit or archive digest) so a later run with the same pin reuses them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::backend::run;
use crate::canonical::sha256_hex;
use crate::descriptor::{LibraryDescriptor, Source};
use crate::error::FailureReason;

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone)]
pub struct SourceFetcher {
    http: reqwest::Client,
    sources_dir: PathBuf,
    timeout: Duration,
}

impl SourceFetcher {
    pub fn new(sources_dir: impl Into<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::new(),
            sources_dir: sources_dir.into(),
            timeout: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn sources_dir(&self) -> &Path {
        &self.sources_dir
    }

    /// Directory a pinned source lands in. `None` for in-place path sources.
    pub fn checkout_dir(&self, library: &LibraryDescriptor) -> Option<PathBuf> {
        let pin = match &library.source {
            Source::Path { .. } => return None,
            Source::Git { rev, .. } => rev,
            Source::Archive { sha256, .. } => sha256,
        };
        Some(
            self.sources_dir
                .join(format!("{}-{}", library.name, &pin[..pin.len().min(12)])),
        )
    }

    /// Make `library`'s source tree available locally and return its root.
    pub async fn fetch(&self, library: &LibraryDescriptor) -> Result<PathBuf, FailureReason> {
        if let Source::Path { path } = &library.source {
            if !path.is_dir() {
                return Err(FailureReason::Fetch(format!(
                    "source directory {} does not exist",
                    path.display()
                )));
            }
            return Ok(path.clone());
        }
        let Some(dest) = self.checkout_dir(library) else {
            return Err(FailureReason::Internal(format!(
                "no checkout directory for {}",
                library.name
            )));
        };

        if dest.is_dir() {
            tracing::debug!(library = %library.name, dir = %dest.display(), "reusing fetched source");
            return Ok(dest);
        }
        tokio::fs::create_dir_all(&self.sources_dir).await?;
        let partial = with_suffix(&dest, PARTIAL_SUFFIX);
        if tokio::fs::try_exists(&partial).await? {
            tokio::fs::remove_dir_all(&partial).await?;
        }

        tracing::info!(library = %library.name, "fetching source");
        match &library.source {
            Source::Git { url, rev } => self.clone_git(url, rev, &partial).await?,
            Source::Archive { url, sha256 } => {
                self.download_archive(&library.name, url, sha256, &partial).await?
            }
            Source::Path { .. } => {}
        }
        tokio::fs::rename(&partial, &dest).await?;
        Ok(dest)
    }

    async fn clone_git(&self, url: &str, rev: &str, into: &Path) -> Result<(), FailureReason> {
        let env = BTreeMap::new();
        let mut clone = Command::new("git");
        clone
            .arg("clone")
            .arg("--quiet")
            .arg("--no-checkout")
            .arg(url)
            .arg(into);
        run(clone, &env, self.timeout).await?;

        let mut checkout = Command::new("git");
        checkout
            .arg("-C")
            .arg(into)
            .arg("checkout")
            .arg("--quiet")
            .arg("--detach")
            .arg(rev);
        run(checkout, &env, self.timeout).await
    }

    async fn download_archive(
        &self,
        library: &str,
        url: &str,
        expected: &str,
        into: &Path,
    ) -> Result<(), FailureReason> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FailureReason::Fetch(format!("{url}: {e}")))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| FailureReason::Fetch(format!("{url}: {e}")))?;

        verify_digest(&body, expected)?;

        let tarball = self.sources_dir.join(format!("{library}-{expected}.tar"));
        tokio::fs::write(&tarball, &body).await?;
        tokio::fs::create_dir_all(into).await?;

        let mut untar = Command::new("tar");
        untar
            .arg("-xf")
            .arg(&tarball)
            .arg("-C")
            .arg(into)
            .arg("--strip-components=1");
        let unpacked = run(untar, &BTreeMap::new(), self.timeout).await;
        tokio::fs::remove_file(&tarball).await?;
        unpacked
    }
}

fn verify_digest(data: &[u8], expected: &str) -> Result<(), FailureReason> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(FailureReason::DigestMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
