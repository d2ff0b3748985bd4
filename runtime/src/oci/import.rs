//! Artifact staging for the image store's bulk-load primitive.
//!
//! Understands the layouts Nix produces for container images:
//!
//! - docker-archive tarballs (`dockerTools.buildImage`), plain or gzip
//! - OCI archives and OCI image layout directories
//! - unpacked images given as separate rootfs, manifest and config paths

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use nixload_core::error::{NixloadError, Result};
use oci_spec::image::ImageIndex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tar::Archive;
use tempfile::TempDir;

/// OCI annotation carrying the image's reference name.
const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Something the image store can import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    /// Archive file or layout directory
    Path(PathBuf),
    /// Unpacked image parts
    Components {
        rootfs: PathBuf,
        manifest: PathBuf,
        config: PathBuf,
    },
}

impl std::fmt::Display for ImportSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Components { rootfs, .. } => write!(f, "{}", rootfs.display()),
        }
    }
}

/// One image found while staging.
#[derive(Debug, Clone)]
pub(crate) struct StagedImage {
    /// Hex content digest, used as the store id
    pub id: String,
    /// Names recorded in the artifact itself
    pub names: Vec<String>,
    /// Directory whose contents are copied into the store
    pub content_dir: PathBuf,
}

/// Staged images plus the scratch directory backing them.
pub(crate) struct Staging {
    pub images: Vec<StagedImage>,
    _scratch: Option<TempDir>,
}

/// Entry of a docker-archive `manifest.json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerManifestEntry {
    config: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
}

/// Inspect `source` and stage its images under `scratch_root`.
pub(crate) fn stage(source: &ImportSource, scratch_root: &Path) -> Result<Staging> {
    match source {
        ImportSource::Components {
            rootfs,
            manifest,
            config,
        } => stage_components(rootfs, manifest, config, scratch_root),
        ImportSource::Path(path) => {
            let metadata = std::fs::metadata(path).map_err(|e| {
                NixloadError::ImageStoreError(format!(
                    "Artifact {} is not accessible: {}",
                    path.display(),
                    e
                ))
            })?;

            if metadata.is_dir() {
                Ok(Staging {
                    images: scan_layout(path)?,
                    _scratch: None,
                })
            } else {
                let scratch = scratch_dir(scratch_root)?;
                unpack_archive(path, scratch.path())?;
                Ok(Staging {
                    images: scan_layout(scratch.path())?,
                    _scratch: Some(scratch),
                })
            }
        }
    }
}

/// Detect the layout of an unpacked image directory.
fn scan_layout(dir: &Path) -> Result<Vec<StagedImage>> {
    if dir.join("index.json").is_file() {
        scan_oci_layout(dir)
    } else if dir.join("manifest.json").is_file() {
        scan_docker_layout(dir)
    } else {
        Err(NixloadError::ImageStoreError(format!(
            "Unrecognized image layout in {}: expected index.json or manifest.json",
            dir.display()
        )))
    }
}

fn scan_oci_layout(dir: &Path) -> Result<Vec<StagedImage>> {
    let index = ImageIndex::from_file(dir.join("index.json")).map_err(|e| {
        NixloadError::ImageStoreError(format!(
            "Failed to parse index.json in {}: {}",
            dir.display(),
            e
        ))
    })?;

    index
        .manifests()
        .iter()
        .map(|descriptor| {
            let digest = descriptor.digest().to_string();
            let names = descriptor
                .annotations()
                .as_ref()
                .and_then(|a| a.get(ANNOTATION_REF_NAME))
                .cloned()
                .into_iter()
                .collect();
            Ok(StagedImage {
                id: content_id(&digest)?,
                names,
                content_dir: dir.to_path_buf(),
            })
        })
        .collect()
}

fn scan_docker_layout(dir: &Path) -> Result<Vec<StagedImage>> {
    let data = std::fs::read(dir.join("manifest.json"))?;
    let entries: Vec<DockerManifestEntry> = serde_json::from_slice(&data).map_err(|e| {
        NixloadError::ImageStoreError(format!(
            "Failed to parse manifest.json in {}: {}",
            dir.display(),
            e
        ))
    })?;

    entries
        .into_iter()
        .map(|entry| {
            let config_path = dir.join(&entry.config);
            Ok(StagedImage {
                id: sha256_file(&config_path)?,
                names: entry.repo_tags.unwrap_or_default(),
                content_dir: dir.to_path_buf(),
            })
        })
        .collect()
}

fn stage_components(
    rootfs: &Path,
    manifest: &Path,
    config: &Path,
    scratch_root: &Path,
) -> Result<Staging> {
    for (what, path) in [("rootfs", rootfs), ("manifest", manifest), ("config", config)] {
        if !path.exists() {
            return Err(NixloadError::ImageStoreError(format!(
                "Artifact {} not found: {}",
                what,
                path.display()
            )));
        }
    }

    let scratch = scratch_dir(scratch_root)?;
    copy_dir_recursive(rootfs, &scratch.path().join("rootfs"))?;
    std::fs::copy(manifest, scratch.path().join("manifest.json"))?;
    std::fs::copy(config, scratch.path().join("config.json"))?;

    Ok(Staging {
        images: vec![StagedImage {
            id: sha256_file(config)?,
            names: Vec::new(),
            content_dir: scratch.path().to_path_buf(),
        }],
        _scratch: Some(scratch),
    })
}

/// Unpack a tar archive, gunzipping it first when it starts with the gzip magic.
fn unpack_archive(archive_path: &Path, target_dir: &Path) -> Result<()> {
    let mut magic = [0u8; 2];
    let is_gzip = File::open(archive_path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| magic == [0x1f, 0x8b])
        .unwrap_or(false);

    let file = File::open(archive_path).map_err(|e| {
        NixloadError::ImageStoreError(format!(
            "Failed to open archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;
    let reader: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    Archive::new(reader).unpack(target_dir).map_err(|e| {
        NixloadError::ImageStoreError(format!(
            "Failed to extract archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;

    tracing::debug!(
        archive = %archive_path.display(),
        target = %target_dir.display(),
        gzip = is_gzip,
        "Extracted image archive"
    );
    Ok(())
}

fn scratch_dir(scratch_root: &Path) -> Result<TempDir> {
    std::fs::create_dir_all(scratch_root)?;
    Ok(tempfile::Builder::new()
        .prefix("import-")
        .tempdir_in(scratch_root)?)
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        NixloadError::ImageStoreError(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn strip_algorithm(digest: &str) -> &str {
    digest.split_once(':').map(|(_, hex)| hex).unwrap_or(digest)
}

/// Store id for a manifest digest: exactly 64 lowercase hex characters.
///
/// The id names a directory under the store, so anything else is rejected.
fn content_id(digest: &str) -> Result<String> {
    let hex = strip_algorithm(digest);
    let valid = hex.len() == 64
        && hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !valid {
        return Err(NixloadError::ImageStoreError(format!(
            "Invalid manifest digest in index.json: {}",
            digest
        )));
    }
    Ok(hex.to_string())
}

/// Recursively copy a directory.
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if file_type.is_symlink() {
            copy_symlink(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst).map(|_| ())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    const DIGEST_A: &str =
        "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const DIGEST_B: &str =
        "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn expected_id(config: &str) -> String {
        hex::encode(Sha256::digest(config.as_bytes()))
    }

    #[test]
    fn test_stage_docker_archive() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("image.tar");
        docker_archive(&archive, r#"{"architecture":"amd64"}"#, &["app:latest"], false);

        let staging = stage(&ImportSource::Path(archive), &tmp.path().join("scratch")).unwrap();
        assert_eq!(staging.images.len(), 1);
        assert_eq!(staging.images[0].id, expected_id(r#"{"architecture":"amd64"}"#));
        assert_eq!(staging.images[0].names, vec!["app:latest"]);
        assert!(staging.images[0].content_dir.join("layer.tar").exists());
    }

    #[test]
    fn test_stage_gzip_docker_archive() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("image.tar.gz");
        docker_archive(&archive, r#"{"os":"linux"}"#, &[], true);

        let staging = stage(&ImportSource::Path(archive), &tmp.path().join("scratch")).unwrap();
        assert_eq!(staging.images.len(), 1);
        assert_eq!(staging.images[0].id, expected_id(r#"{"os":"linux"}"#));
        assert!(staging.images[0].names.is_empty());
    }

    #[test]
    fn test_scratch_removed_on_drop() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("image.tar");
        docker_archive(&archive, "{}", &[], false);

        let content_dir = {
            let staging =
                stage(&ImportSource::Path(archive), &tmp.path().join("scratch")).unwrap();
            staging.images[0].content_dir.clone()
        };
        assert!(!content_dir.exists());
    }

    #[test]
    fn test_stage_oci_layout_dir() {
        let tmp = TempDir::new().unwrap();
        let layout = tmp.path().join("layout");
        oci_layout(&layout, &[(DIGEST_A, Some("app:v1")), (DIGEST_B, None)]);

        let staging = stage(&ImportSource::Path(layout.clone()), tmp.path()).unwrap();
        assert_eq!(staging.images.len(), 2);
        assert_eq!(staging.images[0].id, "a".repeat(64));
        assert_eq!(staging.images[0].names, vec!["app:v1"]);
        assert_eq!(staging.images[1].id, "b".repeat(64));
        assert!(staging.images[1].names.is_empty());
        assert_eq!(staging.images[0].content_dir, layout);
    }

    #[test]
    fn test_stage_empty_oci_index() {
        let tmp = TempDir::new().unwrap();
        let layout = tmp.path().join("layout");
        oci_layout(&layout, &[]);

        let staging = stage(&ImportSource::Path(layout), tmp.path()).unwrap();
        assert!(staging.images.is_empty());
    }

    #[test]
    fn test_stage_components() {
        let tmp = TempDir::new().unwrap();
        let rootfs = tmp.path().join("rootfs");
        std::fs::create_dir_all(rootfs.join("bin")).unwrap();
        std::fs::write(rootfs.join("bin/app"), "#!/bin/sh\n").unwrap();
        let manifest = tmp.path().join("manifest.json");
        std::fs::write(&manifest, "{}").unwrap();
        let config = tmp.path().join("config.json");
        std::fs::write(&config, r#"{"config":{}}"#).unwrap();

        let staging = stage(
            &ImportSource::Components {
                rootfs,
                manifest,
                config,
            },
            &tmp.path().join("scratch"),
        )
        .unwrap();

        let image = &staging.images[0];
        assert_eq!(image.id, expected_id(r#"{"config":{}}"#));
        assert!(image.content_dir.join("rootfs/bin/app").exists());
        assert!(image.content_dir.join("manifest.json").exists());
        assert!(image.content_dir.join("config.json").exists());
    }

    #[test]
    fn test_stage_missing_component() {
        let tmp = TempDir::new().unwrap();
        let err = stage(
            &ImportSource::Components {
                rootfs: tmp.path().join("rootfs"),
                manifest: tmp.path().join("m.json"),
                config: tmp.path().join("c.json"),
            },
            tmp.path(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("rootfs"));
    }

    #[test]
    fn test_stage_missing_path() {
        let tmp = TempDir::new().unwrap();
        let result = stage(&ImportSource::Path(tmp.path().join("nope")), tmp.path());
        assert!(matches!(result, Err(NixloadError::ImageStoreError(_))));
    }

    #[test]
    fn test_stage_unrecognized_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("empty");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(stage(&ImportSource::Path(dir), tmp.path()).is_err());
    }

    #[test]
    fn test_stage_rejects_path_like_digest() {
        let tmp = TempDir::new().unwrap();
        let layout = tmp.path().join("layout");
        oci_layout(&layout, &[("sha256:../../escaped", None)]);

        let result = stage(&ImportSource::Path(layout), tmp.path());
        assert!(matches!(result, Err(NixloadError::ImageStoreError(_))));
    }

    #[test]
    fn test_content_id() {
        assert_eq!(content_id(DIGEST_A).unwrap(), "a".repeat(64));
        assert!(content_id("sha256:abc").is_err());
        assert!(content_id(&format!("sha256:{}", "A".repeat(64))).is_err());
        assert!(content_id(&format!("sha256:{}", "é".repeat(32))).is_err());
        assert!(content_id("sha256:../../escaped").is_err());
    }

    #[test]
    fn test_strip_algorithm() {
        assert_eq!(strip_algorithm("sha256:abc"), "abc");
        assert_eq!(strip_algorithm("abc"), "abc");
    }
}
