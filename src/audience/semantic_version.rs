//! Version comparison for `semver_*` match types.
use std::cmp::Ordering;

use semver::Version;

use crate::EvaluationError;

/// Compare `actual` to `target` up to the precision of `target`.
///
/// Fully specified versions on both sides are compared with SemVer precedence. Otherwise only the
/// components present in `target` are compared (`"2.1.7"` equals target `"2.1"`), and a
/// pre-release sorts before the matching release.
pub(crate) fn compare_versions(actual: &str, target: &str) -> Result<Ordering, EvaluationError> {
    if let (Ok(actual), Ok(target)) = (Version::parse(actual), Version::parse(target)) {
        return Ok(actual
            .major
            .cmp(&target.major)
            .then(actual.minor.cmp(&target.minor))
            .then(actual.patch.cmp(&target.patch))
            .then_with(|| actual.pre.cmp(&target.pre)));
    }

    let target_parts = split_version(target)?;
    let actual_parts = split_version(actual)?;
    let target_pre = is_prerelease(target);
    let actual_pre = is_prerelease(actual);

    for (idx, target_part) in target_parts.iter().enumerate() {
        let Some(actual_part) = actual_parts.get(idx) else {
            return Ok(if target_pre {
                Ordering::Greater
            } else {
                Ordering::Less
            });
        };

        if !is_number(actual_part) {
            match actual_part.cmp(target_part) {
                Ordering::Less => {
                    return Ok(if target_pre && !actual_pre {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    })
                }
                Ordering::Greater => {
                    return Ok(if !target_pre && actual_pre {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    })
                }
                Ordering::Equal => {}
            }
        } else if let (Ok(a), Ok(t)) = (actual_part.parse::<u64>(), target_part.parse::<u64>()) {
            match a.cmp(&t) {
                Ordering::Equal => {}
                ordering => return Ok(ordering),
            }
        } else {
            return Ok(Ordering::Less);
        }
    }

    if actual_pre && !target_pre {
        return Ok(Ordering::Less);
    }
    Ok(Ordering::Equal)
}

/// Split into up to three numeric components followed by the pre-release or build suffix, if
/// any.
fn split_version(version: &str) -> Result<Vec<&str>, EvaluationError> {
    let invalid = || EvaluationError::InvalidSemanticVersion(version.to_owned());

    if version.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let (prefix, suffix) = match separator(version) {
        Some(sep) => {
            let (prefix, suffix) = version.split_once(sep).ok_or_else(invalid)?;
            if suffix.is_empty() {
                return Err(invalid());
            }
            (prefix, Some(suffix))
        }
        None => (version, None),
    };

    if prefix.matches('.').count() > 2 {
        return Err(invalid());
    }

    let mut parts: Vec<&str> = prefix.split('.').collect();
    if !parts.iter().all(|p| is_number(p)) {
        return Err(invalid());
    }
    parts.extend(suffix);
    Ok(parts)
}

fn separator(version: &str) -> Option<char> {
    match (version.find('-'), version.find('+')) {
        (Some(dash), Some(plus)) => Some(if dash < plus { '-' } else { '+' }),
        (Some(_), None) => Some('-'),
        (None, Some(_)) => Some('+'),
        (None, None) => None,
    }
}

fn is_prerelease(version: &str) -> bool {
    separator(version) == Some('-')
}

fn is_number(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(actual: &str, target: &str) -> Ordering {
        compare_versions(actual, target).unwrap()
    }

    #[test]
    fn compares_up_to_target_precision() {
        assert_eq!(cmp("2.1.7", "2.1"), Ordering::Equal);
        assert_eq!(cmp("2.9", "2"), Ordering::Equal);
        assert_eq!(cmp("2", "2.1"), Ordering::Less);
        assert_eq!(cmp("3.0", "2.1"), Ordering::Greater);
    }

    #[test]
    fn full_versions() {
        assert_eq!(cmp("2.0.0", "2.0.0"), Ordering::Equal);
        assert_eq!(cmp("2.0.1", "2.0.0"), Ordering::Greater);
        assert_eq!(cmp("2.0.0", "10.0.0"), Ordering::Less);
        assert_eq!(cmp("2.0.0+build.1", "2.0.0"), Ordering::Equal);
    }

    #[test]
    fn prerelease_sorts_before_release() {
        assert_eq!(cmp("3.7.1-prerelease", "3.7.1"), Ordering::Less);
        assert_eq!(cmp("3.7.1", "3.7.1-beta"), Ordering::Greater);
        assert_eq!(cmp("3.7.1-beta", "3.7.1-alpha"), Ordering::Greater);
        assert_eq!(cmp("3.7.1-beta", "3.7"), Ordering::Less);
        assert_eq!(cmp("3.7", "3.7.0-beta"), Ordering::Greater);
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!(compare_versions("3.7.1", "3 .7").is_err());
        assert!(compare_versions("1.2.3.4", "1").is_err());
        assert!(compare_versions("a.b.c", "1").is_err());
        assert!(compare_versions("1.2.3-", "1").is_err());
        assert!(compare_versions("1..2", "1").is_err());
        assert!(compare_versions("", "1").is_err());
    }
}
