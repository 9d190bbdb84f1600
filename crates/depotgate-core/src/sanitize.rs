//! Path and input sanitization shared by the storage and sink layers.
//!
//! Every externally-sourced identifier or URI flows through these primitives
//! before it can touch the filesystem namespace. Two distinct postures exist:
//! storage locations hard-fail on any escape attempt ([`resolve_under_base`]),
//! while sink destinations have their `..`/`.` segments dropped before
//! resolution ([`neutralize_relative`]) so a hostile destination can only
//! name a deeper path under the sink base.

use std::path::{Component, Path, PathBuf};

use crate::error::{DepotError, DepotResult};

/// Maximum length of a sanitized path component.
pub const MAX_COMPONENT_LEN: usize = 200;

/// Maximum length of a tenant or task identifier.
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Sanitizes a single path component for use in an on-disk layout.
///
/// Runs of `/`, `\`, and `.` collapse to a single `_`; the result is
/// truncated to [`MAX_COMPONENT_LEN`] bytes and an empty result becomes
/// `"invalid"`.
#[must_use]
pub fn sanitize_component(component: &str) -> String {
    let mut out = String::with_capacity(component.len().min(MAX_COMPONENT_LEN));
    let mut in_run = false;
    let mut emitted = 0;
    for c in component.chars() {
        if emitted >= MAX_COMPONENT_LEN {
            break;
        }
        if matches!(c, '/' | '\\' | '.') {
            if !in_run {
                out.push('_');
                emitted += 1;
                in_run = true;
            }
        } else {
            out.push(c);
            emitted += 1;
            in_run = false;
        }
    }
    if out.is_empty() {
        out.push_str("invalid");
    }
    out
}

/// Validates a tenant or task identifier.
///
/// Accepts ASCII alphanumerics, `_`, and `-`, up to
/// [`MAX_IDENTIFIER_LEN`] bytes; anything else fails with
/// [`DepotError::InvalidIdentifier`].
pub fn validate_identifier(id: &str, what: &str) -> DepotResult<()> {
    if id.is_empty() {
        return Err(DepotError::InvalidIdentifier {
            detail: format!("{what} must not be empty"),
        });
    }
    if id.len() > MAX_IDENTIFIER_LEN {
        return Err(DepotError::InvalidIdentifier {
            detail: format!(
                "{what} exceeds {MAX_IDENTIFIER_LEN} bytes: {} bytes",
                id.len()
            ),
        });
    }
    for (i, c) in id.chars().enumerate() {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(DepotError::InvalidIdentifier {
                detail: format!("{what} contains invalid character at position {i}: {c:?}"),
            });
        }
    }
    Ok(())
}

/// Validates a task identifier. See [`validate_identifier`].
pub fn validate_task_id(id: &str) -> DepotResult<()> {
    validate_identifier(id, "task id")
}

/// Splits a location URI into `(scheme, body)`.
///
/// The scheme is required (bare paths are rejected) and must be a non-empty
/// run of lowercase ASCII letters, digits, `+`, `-`, or `.`.
pub fn parse_location(uri: &str) -> DepotResult<(&str, &str)> {
    let Some((scheme, body)) = uri.split_once("://") else {
        return Err(DepotError::InvalidLocation {
            detail: format!("missing scheme in {uri:?}"),
        });
    };
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.'));
    if !valid {
        return Err(DepotError::InvalidLocation {
            detail: format!("malformed scheme in {uri:?}"),
        });
    }
    Ok((scheme, body))
}

/// Drops `.` and `..` segments from a relative destination, leaving only
/// normal components. Used for sink destinations, where traversal segments
/// are neutralized rather than rejected.
#[must_use]
pub fn neutralize_relative(rel: &str) -> PathBuf {
    let mut clean = PathBuf::new();
    for comp in Path::new(rel).components() {
        if let Component::Normal(c) = comp {
            clean.push(c);
        }
    }
    clean
}

/// Resolves `rel` under `base` and verifies the result stays a descendant
/// of `base`.
///
/// Absolute inputs, prefix components, and `..` segments that would climb
/// out of `base` fail with [`DepotError::PathViolation`]. When both sides
/// exist on disk the canonical forms are compared as well, so a symlinked
/// intermediate cannot smuggle the path outside the base.
pub fn resolve_under_base(base: &Path, rel: impl AsRef<Path>) -> DepotResult<PathBuf> {
    let rel = rel.as_ref();
    if rel.is_absolute() {
        return Err(DepotError::PathViolation {
            detail: format!("absolute path {} not allowed", rel.display()),
        });
    }

    let mut clean = PathBuf::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(c) => clean.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(DepotError::PathViolation {
                        detail: format!("{} escapes its base", rel.display()),
                    });
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(DepotError::PathViolation {
                    detail: format!("{} is not relative", rel.display()),
                });
            }
        }
    }

    let resolved = base.join(&clean);
    if let (Ok(canon_base), Ok(canon)) = (base.canonicalize(), resolved.canonicalize()) {
        if !canon.starts_with(&canon_base) {
            return Err(DepotError::PathViolation {
                detail: format!("{} resolves outside its base", rel.display()),
            });
        }
        return Ok(canon);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_runs_collapse_to_single_underscore() {
        assert_eq!(sanitize_component("../../etc"), "_etc");
        assert_eq!(sanitize_component("a/b\\c.d"), "a_b_c_d");
        assert_eq!(sanitize_component("tenant-1"), "tenant-1");
    }

    #[test]
    fn component_truncates_at_200() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_component(&long).len(), MAX_COMPONENT_LEN);
    }

    #[test]
    fn empty_component_becomes_invalid() {
        assert_eq!(sanitize_component(""), "invalid");
        assert_eq!(sanitize_component("..."), "_");
    }

    #[test]
    fn identifier_accepts_alnum_dash_underscore() {
        assert!(validate_task_id("task-1_a").is_ok());
        assert!(validate_task_id(&"t".repeat(MAX_IDENTIFIER_LEN)).is_ok());
    }

    #[test]
    fn identifier_rejects_traversal_and_length() {
        for bad in ["../../etc", "a/b", "a b", "", "täsk"] {
            let err = validate_task_id(bad).unwrap_err();
            assert_eq!(err.kind(), "invalid_identifier", "input {bad:?}");
        }
        assert!(validate_task_id(&"t".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn location_parse_requires_scheme() {
        assert_eq!(parse_location("fs://a/b").unwrap(), ("fs", "a/b"));
        assert_eq!(parse_location("https://h/p").unwrap(), ("https", "h/p"));
        assert!(parse_location("/etc/passwd").is_err());
        assert!(parse_location("a/b").is_err());
        assert!(parse_location("://body").is_err());
        assert!(parse_location("FS://x").is_err());
    }

    #[test]
    fn neutralize_drops_traversal_segments() {
        assert_eq!(
            neutralize_relative("../a/./../b"),
            PathBuf::from("a").join("b")
        );
        assert_eq!(neutralize_relative(".."), PathBuf::new());
    }

    #[test]
    fn resolve_rejects_absolute_and_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_under_base(dir.path(), "/etc/cron.d").unwrap_err();
        assert_eq!(err.kind(), "path_violation");

        let err = resolve_under_base(dir.path(), "../outside").unwrap_err();
        assert_eq!(err.kind(), "path_violation");

        let err = resolve_under_base(dir.path(), "a/../../outside").unwrap_err();
        assert_eq!(err.kind(), "path_violation");
    }

    #[test]
    fn resolve_allows_interior_parent_segments() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_under_base(dir.path(), "a/../b/c").unwrap();
        assert!(resolved.ends_with(Path::new("b").join("c")));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_refuses_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let base = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), base.path().join("link")).unwrap();
        std::fs::write(outside.path().join("target"), b"x").unwrap();

        let err = resolve_under_base(base.path(), "link/target").unwrap_err();
        assert_eq!(err.kind(), "path_violation");
    }
}
