// src/deploy/verify.rs

//! Integrity verification of downloaded artifacts
//!
//! Runs before anything is extracted. There are three possible outcomes and
//! they are deliberately kept apart:
//!
//! - `Verified`: a digest was found and matched
//! - `Unverified`: no digest could be located (not fatal on its own)
//! - `Failed`: a digest was found and did NOT match (always fatal)
//!
//! Whether `Unverified` may proceed is a policy decision made by
//! [`enforce`], not by the verifier.

use crate::error::{Error, Result};
use crate::hash::{verify_bytes, Hash, HashAlgorithm};
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static BSD_LINE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^(?i)(SHA-?256|SHA-?512|MD5)\s*\((.+)\)\s*=\s*([0-9a-f]+)$")
        .expect("valid BSD checksum regex")
});

static GNU_LINE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^([0-9a-fA-F]+)(?:\s+\*?(.+))?$").expect("valid GNU checksum regex")
});

/// One digest entry in a checksum manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// File the digest applies to; `None` for single-digest files
    /// (`rockbox-x.zip.sha256`) which name no file
    pub file_name: Option<String>,
    pub digest: Hash,
}

/// A published checksum manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumManifest {
    /// Where the manifest came from (file name or URL), for reports
    pub origin: String,
    pub entries: Vec<ManifestEntry>,
}

impl ChecksumManifest {
    /// Parse a manifest
    ///
    /// Accepts GNU coreutils lines (`<hex>  <name>`, `<hex> *<name>`), BSD
    /// tagged lines (`SHA256 (<name>) = <hex>`) and bare digests. The
    /// algorithm comes from the BSD tag, else from the manifest's name
    /// (`SHA256SUMS`, `x.zip.md5`), else from the digest length. Lines that
    /// fit none of these are skipped.
    pub fn parse(origin: &str, text: &str) -> Self {
        let name_hint = algorithm_from_name(origin);
        let mut entries = Vec::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parsed = if let Some(caps) = BSD_LINE.captures(line) {
                let algorithm = caps[1]
                    .replace('-', "")
                    .parse::<HashAlgorithm>()
                    .ok();
                algorithm.map(|a| (a, caps[3].to_string(), Some(caps[2].to_string())))
            } else if let Some(caps) = GNU_LINE.captures(line) {
                let hex = caps[1].to_string();
                name_hint
                    .or_else(|| HashAlgorithm::from_hex_len(hex.len()))
                    .map(|a| (a, hex, caps.get(2).map(|m| m.as_str().trim().to_string())))
            } else {
                None
            };

            let Some((algorithm, hex, file_name)) = parsed else {
                debug!("{}:{}: skipping unrecognized line", origin, lineno + 1);
                continue;
            };

            match Hash::new(algorithm, hex) {
                Ok(digest) => entries.push(ManifestEntry { file_name, digest }),
                Err(e) => warn!("{}:{}: ignoring bad digest: {}", origin, lineno + 1, e),
            }
        }

        Self {
            origin: origin.to_string(),
            entries,
        }
    }

    /// Find the digest for `artifact_name`
    ///
    /// Names are compared by their final path component, so `./x.zip` and
    /// `release/x.zip` both match `x.zip`. A bare digest matches anything,
    /// but only when it is the manifest's sole entry.
    pub fn find(&self, artifact_name: &str) -> Option<&Hash> {
        let wanted = base_name(artifact_name);

        let named = self.entries.iter().find(|e| {
            e.file_name
                .as_deref()
                .is_some_and(|name| base_name(name) == wanted)
        });
        if let Some(entry) = named {
            return Some(&entry.digest);
        }

        match self.entries.as_slice() {
            [only] if only.file_name.is_none() => Some(&only.digest),
            _ => None,
        }
    }
}

/// Where an expected digest may come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestSource {
    /// Supplied by the caller; verification is mandatory
    Explicit(Hash),
    /// Published next to the artifact
    Manifest(ChecksumManifest),
    /// Nothing available
    Unavailable,
}

impl DigestSource {
    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }
}

/// Result of checking an artifact against its digest source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified {
        digest: Hash,
        origin: String,
    },
    Unverified {
        reason: String,
    },
    Failed {
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },
}

impl VerifyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

impl fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified { digest, origin } => {
                write!(f, "verified ({} from {})", digest.algorithm, origin)
            }
            Self::Unverified { reason } => write!(f, "unverified ({})", reason),
            Self::Failed {
                algorithm,
                expected,
                actual,
            } => write!(
                f,
                "FAILED ({} expected {}, got {})",
                algorithm, expected, actual
            ),
        }
    }
}

/// Whether an artifact without a digest may be installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationPolicy {
    /// Proceed on `Unverified`, reporting it
    #[default]
    Optional,
    /// Treat `Unverified` as fatal
    Required,
}

/// Check `bytes` against the expected digest from `source`
pub fn verify(bytes: &[u8], artifact_name: &str, source: &DigestSource) -> VerifyOutcome {
    let (expected, origin) = match source {
        DigestSource::Explicit(hash) => (hash, "caller-supplied digest".to_string()),
        DigestSource::Manifest(manifest) => match manifest.find(artifact_name) {
            Some(hash) => (hash, manifest.origin.clone()),
            None => {
                return VerifyOutcome::Unverified {
                    reason: format!("no entry for {} in {}", artifact_name, manifest.origin),
                };
            }
        },
        DigestSource::Unavailable => {
            return VerifyOutcome::Unverified {
                reason: "no checksum published".to_string(),
            };
        }
    };

    match verify_bytes(bytes, expected) {
        Ok(digest) => {
            info!("Verified {} ({}) against {}", artifact_name, digest.algorithm, origin);
            VerifyOutcome::Verified { digest, origin }
        }
        Err(e) => {
            warn!("Integrity check failed for {}: {}", artifact_name, e);
            VerifyOutcome::Failed {
                algorithm: e.algorithm,
                expected: e.expected,
                actual: e.actual,
            }
        }
    }
}

/// Turn an outcome into a go/no-go decision
pub fn enforce(
    outcome: &VerifyOutcome,
    policy: VerificationPolicy,
    artifact_name: &str,
) -> Result<()> {
    match (outcome, policy) {
        (VerifyOutcome::Verified { .. }, _) => Ok(()),
        (
            VerifyOutcome::Failed {
                algorithm,
                expected,
                actual,
            },
            _,
        ) => Err(Error::IntegrityMismatch {
            algorithm: *algorithm,
            expected: expected.clone(),
            actual: actual.clone(),
        }),
        (VerifyOutcome::Unverified { .. }, VerificationPolicy::Required) => {
            Err(Error::ChecksumRequired(artifact_name.to_string()))
        }
        (VerifyOutcome::Unverified { reason }, VerificationPolicy::Optional) => {
            warn!("Proceeding without integrity check for {}: {}", artifact_name, reason);
            Ok(())
        }
    }
}

fn algorithm_from_name(name: &str) -> Option<HashAlgorithm> {
    let lower = base_name(name).to_lowercase();
    if lower.contains("sha512") {
        Some(HashAlgorithm::Sha512)
    } else if lower.contains("sha256") {
        Some(HashAlgorithm::Sha256)
    } else if lower.contains("md5") {
        Some(HashAlgorithm::Md5)
    } else {
        None
    }
}

fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_bytes, sha256};

    const ARTIFACT: &[u8] = b"rockbox build bytes";

    fn manifest_for(name: &str, line_name: &str) -> ChecksumManifest {
        let text = format!("{}  {}\n", sha256(ARTIFACT), line_name);
        ChecksumManifest::parse(name, &text)
    }

    #[test]
    fn test_parse_gnu_manifest() {
        let text = format!(
            "# comment\n{}  rockbox-ipod-4.0.zip\n{} *rockbox-sansa-4.0.zip\n\n",
            "a".repeat(64),
            "b".repeat(64)
        );
        let manifest = ChecksumManifest::parse("SHA256SUMS", &text);
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(
            manifest.find("rockbox-sansa-4.0.zip").unwrap().value,
            "b".repeat(64)
        );
        assert!(manifest.find("rockbox-h300-4.0.zip").is_none());
    }

    #[test]
    fn test_parse_bsd_manifest() {
        let digest = hash_bytes(HashAlgorithm::Sha512, ARTIFACT);
        let text = format!("SHA512 (rockbox-erosqnative-4.0.zip) = {}\n", digest.value);
        let manifest = ChecksumManifest::parse("CHECKSUMS", &text);

        let found = manifest.find("rockbox-erosqnative-4.0.zip").unwrap();
        assert_eq!(found.algorithm, HashAlgorithm::Sha512);
    }

    #[test]
    fn test_algorithm_inferred_from_length() {
        let md5 = hash_bytes(HashAlgorithm::Md5, ARTIFACT);
        let manifest = ChecksumManifest::parse("sums.txt", &format!("{} x.zip\n", md5.value));
        assert_eq!(manifest.find("x.zip").unwrap().algorithm, HashAlgorithm::Md5);
    }

    #[test]
    fn test_bare_digest_file() {
        let manifest =
            ChecksumManifest::parse("rockbox-ipod-4.0.zip.sha256", &format!("{}\n", sha256(ARTIFACT)));
        assert!(manifest.find("rockbox-ipod-4.0.zip").is_some());
    }

    #[test]
    fn test_name_hint_conflict_skips_line() {
        // MD5-length digest inside a SHA256 manifest is not trusted
        let text = format!("{}  x.zip\n", "c".repeat(32));
        let manifest = ChecksumManifest::parse("SHA256SUMS", &text);
        assert!(manifest.entries.is_empty());
    }

    #[test]
    fn test_path_prefixed_names_match() {
        let manifest = manifest_for("SHA256SUMS", "./release/rockbox-ipod-4.0.zip");
        assert!(manifest.find("rockbox-ipod-4.0.zip").is_some());
    }

    #[test]
    fn test_verify_outcomes() {
        let good = DigestSource::Manifest(manifest_for("SHA256SUMS", "x.zip"));
        assert!(verify(ARTIFACT, "x.zip", &good).is_verified());

        let outcome = verify(b"tampered", "x.zip", &good);
        assert!(matches!(outcome, VerifyOutcome::Failed { .. }));

        let outcome = verify(ARTIFACT, "y.zip", &good);
        assert!(matches!(outcome, VerifyOutcome::Unverified { .. }));

        let outcome = verify(ARTIFACT, "x.zip", &DigestSource::Unavailable);
        assert!(matches!(outcome, VerifyOutcome::Unverified { .. }));
    }

    #[test]
    fn test_explicit_digest() {
        let explicit = DigestSource::Explicit(hash_bytes(HashAlgorithm::Sha256, ARTIFACT));
        assert!(explicit.is_explicit());
        assert!(verify(ARTIFACT, "x.zip", &explicit).is_verified());
        assert!(!verify(b"other", "x.zip", &explicit).is_verified());
    }

    #[test]
    fn test_enforce_policy() {
        let unverified = VerifyOutcome::Unverified {
            reason: "none".to_string(),
        };
        assert!(enforce(&unverified, VerificationPolicy::Optional, "x.zip").is_ok());
        assert!(matches!(
            enforce(&unverified, VerificationPolicy::Required, "x.zip"),
            Err(Error::ChecksumRequired(_))
        ));

        let failed = VerifyOutcome::Failed {
            algorithm: HashAlgorithm::Sha256,
            expected: "a".repeat(64),
            actual: "b".repeat(64),
        };
        // A mismatch is fatal regardless of policy
        assert!(matches!(
            enforce(&failed, VerificationPolicy::Optional, "x.zip"),
            Err(Error::IntegrityMismatch { .. })
        ));
    }
}
