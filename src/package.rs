// src/package.rs

//! Post-build packaging: staging packages and container images
//!
//! For every succeeded build the packager copies the package into the
//! staging tree and derives a container image manifest that layers the
//! package over a minimal base image:
//!
//! ```text
//! <staging>/packages/<platform>/<name>-<version>-<build>.tar.gz
//! <staging>/images/<namespace>/<name>:<version>--<build>.json
//! ```
//!
//! When a registry or channel is configured, both are uploaded with a fixed
//! number of attempts. Every blocking I/O call is bounded by the I/O timeout.
//! A packaging failure never touches the build outcome.

use crate::artifact::{ArtifactKey, ArtifactStore};
use crate::error::{Error, Result};
use crate::hash::{Digest, hash_bytes};
use crate::scheduler::{BuildJob, BuiltArtifact, PostBuild};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Manifest schema written by this version
pub const MANIFEST_SCHEMA: u32 = 1;

/// Pushes image manifests to a container registry
pub trait ContainerRegistry: Send + Sync {
    fn push(&self, reference: &str, manifest: &[u8]) -> Result<()>;
}

/// Uploads package files to the distribution channel
pub trait PackageChannel: Send + Sync {
    fn upload(&self, key: &ArtifactKey, package: &Path) -> Result<()>;
}

/// Packaging settings
#[derive(Debug, Clone)]
pub struct PackagerConfig {
    pub staging_dir: PathBuf,
    /// Image repository namespace
    pub namespace: String,
    pub base_image: String,
    pub upload_attempts: u32,
    pub retry_delay: Duration,
    pub io_timeout: Duration,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("staging"),
            namespace: "biocontainers".to_string(),
            base_image: "quay.io/bioconda/base-glibc-busybox-bash:latest".to_string(),
            upload_attempts: 5,
            retry_delay: Duration::from_secs(5),
            io_timeout: Duration::from_secs(300),
        }
    }
}

/// One image layer: a package unpacked at the image root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLayer {
    pub digest: Digest,
    pub size: u64,
    pub package: String,
    pub platform: String,
}

/// Container image description derived from one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub schema: u32,
    pub repository: String,
    pub tag: String,
    pub base_image: String,
    pub layers: Vec<ImageLayer>,
    pub labels: BTreeMap<String, String>,
}

impl ImageManifest {
    /// Derive the manifest for a built package
    ///
    /// The result depends only on its inputs.
    pub fn for_package(
        namespace: &str,
        base_image: &str,
        key: &ArtifactKey,
        artifact: &BuiltArtifact,
    ) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("org.biocook.name".to_string(), key.name.clone());
        labels.insert("org.biocook.version".to_string(), key.version.clone());
        labels.insert("org.biocook.build".to_string(), key.build_number.to_string());
        labels.insert("org.biocook.platform".to_string(), key.platform.to_string());

        Self {
            schema: MANIFEST_SCHEMA,
            repository: format!("{}/{}", namespace, key.name),
            tag: image_tag(&key.version, key.build_number),
            base_image: base_image.to_string(),
            layers: vec![ImageLayer {
                digest: artifact.content_hash.clone(),
                size: artifact.size,
                package: key.file_name(),
                platform: key.platform.to_string(),
            }],
            labels,
        }
    }

    /// `namespace/name:version--build`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    /// Canonical encoding: field order is fixed and labels are sorted
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn digest(&self) -> Result<Digest> {
        Ok(hash_bytes(&self.to_canonical_json()?))
    }
}

/// Image tag for a package: `<version>--<build>`, restricted to tag characters
pub fn image_tag(version: &str, build_number: u32) -> String {
    let version: String = version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}--{}", version, build_number)
}

/// Stages and uploads finished packages
pub struct Packager {
    config: PackagerConfig,
    store: Arc<dyn ArtifactStore>,
    registry: Option<Arc<dyn ContainerRegistry>>,
    channel: Option<Arc<dyn PackageChannel>>,
}

impl Packager {
    pub fn new(config: PackagerConfig, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            config,
            store,
            registry: None,
            channel: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn ContainerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn PackageChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn package_path(&self, key: &ArtifactKey) -> PathBuf {
        self.config
            .staging_dir
            .join("packages")
            .join(key.platform.as_ref())
            .join(key.file_name())
    }

    pub fn manifest_path(&self, manifest: &ImageManifest) -> PathBuf {
        self.config
            .staging_dir
            .join("images")
            .join(format!("{}.json", manifest.reference()))
    }

    /// Stage package and image; upload when targets are configured
    ///
    /// Returns the image reference and whether anything was uploaded.
    pub fn stage(&self, key: &ArtifactKey, artifact: &BuiltArtifact) -> Result<(String, bool)> {
        let store = Arc::clone(&self.store);
        let fetch_key = key.clone();
        let bytes = with_io_timeout(self.config.io_timeout, "reading package", move || {
            store.get(&fetch_key)
        })?;
        if hash_bytes(&bytes) != artifact.content_hash {
            return Err(Error::PackagingError(format!(
                "stored package for {} does not match built content {}",
                key, artifact.content_hash
            )));
        }

        let package_path = self.package_path(key);
        write_staged(&package_path, &bytes)?;

        let manifest = ImageManifest::for_package(
            &self.config.namespace,
            &self.config.base_image,
            key,
            artifact,
        );
        let manifest_json = manifest.to_canonical_json()?;
        let reference = manifest.reference();
        write_staged(&self.manifest_path(&manifest), &manifest_json)?;
        debug!("Staged {} as {} ({})", key, reference, manifest.digest()?);

        let mut uploaded = false;
        if let Some(channel) = &self.channel {
            let what = format!("uploading {}", key.file_name());
            self.retry(&what, || {
                let channel = Arc::clone(channel);
                let key = key.clone();
                let path = package_path.clone();
                with_io_timeout(self.config.io_timeout, &what, move || {
                    channel.upload(&key, &path)
                })
            })?;
            uploaded = true;
        }
        if let Some(registry) = &self.registry {
            let what = format!("pushing {}", reference);
            self.retry(&what, || {
                let registry = Arc::clone(registry);
                let reference = reference.clone();
                let manifest = manifest_json.clone();
                with_io_timeout(self.config.io_timeout, &what, move || {
                    registry.push(&reference, &manifest)
                })
            })?;
            uploaded = true;
        }

        info!(
            "Packaged {} -> {}{}",
            key,
            reference,
            if uploaded { " (uploaded)" } else { "" }
        );
        Ok((reference, uploaded))
    }

    /// Run `op` up to `upload_attempts` times with a fixed delay in between
    fn retry<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let attempts = self.config.upload_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => {
                    return Err(Error::PackagingError(format!(
                        "{} failed after {} attempts: {}",
                        what, attempt, e
                    )));
                }
                Err(e) => {
                    warn!("{} attempt {} failed: {}, retrying...", what, attempt, e);
                    std::thread::sleep(self.config.retry_delay);
                }
            }
        }
    }
}

impl PostBuild for Packager {
    fn package(&self, job: &BuildJob, artifact: &BuiltArtifact) -> Result<(String, bool)> {
        self.stage(&job.key, artifact)
    }
}

/// Run a blocking call on a helper thread and give up after `timeout`
///
/// A call that times out keeps running in the background; its result is
/// discarded.
fn with_io_timeout<T, F>(timeout: Duration, what: &str, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(op());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(Error::PackagingError(format!(
            "{} timed out after {}s",
            what,
            timeout.as_secs_f64()
        ))),
        Err(RecvTimeoutError::Disconnected) => {
            Err(Error::PackagingError(format!("{} aborted", what)))
        }
    }
}

fn write_staged(dest: &Path, bytes: &[u8]) -> Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| Error::PackagingError(format!("No parent for {}", dest.display())))?;
    fs::create_dir_all(dir).map_err(|e| {
        Error::PackagingError(format!("Failed to create {}: {}", dir.display(), e))
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(dest)
        .map_err(|e| Error::PackagingError(format!("Failed to stage {}: {}", dest.display(), e)))?;
    Ok(())
}
