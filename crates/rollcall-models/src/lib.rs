use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default embedding model file name inside the model directory.
pub const DEFAULT_EMBEDDING_MODEL: &str = "facenet512.onnx";

/// Extension of the optional sidecar file pinning a model's SHA-256.
pub const DIGEST_SIDECAR_EXT: &str = "sha256";

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {path}")]
    MissingModel { path: PathBuf },

    #[error("failed to open model file: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid SHA-256 digest {digest:?}: expected 64 hex characters")]
    InvalidDigest { digest: String },

    #[error("model checksum mismatch ({path})\n  expected: {expected}\n  got:      {got}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Outcome of a successful integrity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Digest matched the pinned value.
    Verified { digest: String },
    /// No digest was pinned; the computed one is reported for pinning.
    Unpinned { digest: String },
}

impl Verification {
    pub fn digest(&self) -> &str {
        match self {
            Verification::Verified { digest } | Verification::Unpinned { digest } => digest,
        }
    }
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| ModelIntegrityError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Lower-case and validate a hex digest.
pub fn normalize_digest(digest: &str) -> Result<String, ModelIntegrityError> {
    let trimmed = digest.trim().to_ascii_lowercase();
    if trimmed.len() != 64 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ModelIntegrityError::InvalidDigest {
            digest: digest.to_string(),
        });
    }
    Ok(trimmed)
}

/// Path of the sidecar digest file for `model_path` (`model.onnx.sha256`).
pub fn sidecar_path(model_path: &Path) -> PathBuf {
    let mut name = model_path.as_os_str().to_os_string();
    name.push(".");
    name.push(DIGEST_SIDECAR_EXT);
    PathBuf::from(name)
}

/// Read the pinned digest from the sidecar file, if one exists.
///
/// Accepts both a bare digest and `sha256sum` output (`<digest>  <file>`).
pub fn read_sidecar_digest(model_path: &Path) -> Result<Option<String>, ModelIntegrityError> {
    let path = sidecar_path(model_path);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path).map_err(|source| ModelIntegrityError::Read {
        path: path.clone(),
        source,
    })?;
    let token = contents.split_whitespace().next().unwrap_or_default();
    normalize_digest(token).map(Some)
}

pub fn verify_file_sha256(path: &Path, expected_sha256: &str) -> Result<String, ModelIntegrityError> {
    if !path.exists() {
        return Err(ModelIntegrityError::MissingModel {
            path: path.to_path_buf(),
        });
    }

    let expected = normalize_digest(expected_sha256)?;
    let digest = sha256_file_hex(path)?;
    if digest != expected {
        return Err(ModelIntegrityError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected,
            got: digest,
        });
    }

    Ok(digest)
}

/// Verify a model file before it is loaded.
///
/// The pinned digest is `expected` when given, otherwise the sidecar file's.
/// With neither, the file must still exist and its digest is returned as
/// `Unpinned`.
pub fn verify_model(path: &Path, expected: Option<&str>) -> Result<Verification, ModelIntegrityError> {
    let pinned = match expected {
        Some(digest) => Some(normalize_digest(digest)?),
        None => read_sidecar_digest(path)?,
    };

    match pinned {
        Some(expected) => {
            let digest = verify_file_sha256(path, &expected)?;
            tracing::info!(path = %path.display(), %digest, "model checksum verified");
            Ok(Verification::Verified { digest })
        }
        None => {
            if !path.exists() {
                return Err(ModelIntegrityError::MissingModel {
                    path: path.to_path_buf(),
                });
            }
            let digest = sha256_file_hex(path)?;
            tracing::warn!(
                path = %path.display(),
                %digest,
                "no pinned checksum for model; integrity not verified"
            );
            Ok(Verification::Unpinned { digest })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "rollcall-models-test-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = temp_dir("known");
        let path = dir.join("model.onnx");
        fs::write(&path, b"hello").unwrap();

        assert_eq!(sha256_file_hex(&path).unwrap(), HELLO_SHA256);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_file_sha256_rejects_missing() {
        let dir = temp_dir("missing");
        let path = dir.join("nope.onnx");

        let err = verify_file_sha256(&path, HELLO_SHA256).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::MissingModel { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_file_sha256_rejects_mismatch() {
        let dir = temp_dir("mismatch");
        let path = dir.join("model.onnx");
        fs::write(&path, b"hello!").unwrap();

        let err = verify_file_sha256(&path, HELLO_SHA256).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::ChecksumMismatch { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn normalize_digest_validates() {
        assert_eq!(
            normalize_digest(&HELLO_SHA256.to_uppercase()).unwrap(),
            HELLO_SHA256
        );
        assert!(matches!(
            normalize_digest("00"),
            Err(ModelIntegrityError::InvalidDigest { .. })
        ));
        assert!(normalize_digest(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn verify_model_uses_sidecar() {
        let dir = temp_dir("sidecar");
        let path = dir.join("model.onnx");
        fs::write(&path, b"hello").unwrap();

        // Unpinned: digest reported, not an error.
        let v = verify_model(&path, None).unwrap();
        assert_eq!(v, Verification::Unpinned { digest: HELLO_SHA256.to_string() });

        // sha256sum-style sidecar pins it.
        fs::write(sidecar_path(&path), format!("{HELLO_SHA256}  model.onnx\n")).unwrap();
        assert!(matches!(verify_model(&path, None).unwrap(), Verification::Verified { .. }));

        // A corrupted model no longer verifies.
        fs::write(&path, b"tampered").unwrap();
        assert!(matches!(
            verify_model(&path, None),
            Err(ModelIntegrityError::ChecksumMismatch { .. })
        ));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_model_explicit_digest_wins() {
        let dir = temp_dir("explicit");
        let path = dir.join("model.onnx");
        fs::write(&path, b"hello").unwrap();
        fs::write(sidecar_path(&path), "0".repeat(64)).unwrap();

        let v = verify_model(&path, Some(HELLO_SHA256)).unwrap();
        assert_eq!(v.digest(), HELLO_SHA256);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_model_reports_missing() {
        let dir = temp_dir("absent");
        let err = verify_model(&dir.join(DEFAULT_EMBEDDING_MODEL), None).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::MissingModel { .. }));

        let _ = fs::remove_dir_all(&dir);
    }
}
