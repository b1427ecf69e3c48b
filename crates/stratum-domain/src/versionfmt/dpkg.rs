//! Debian package version ordering.
//!
//! Versions take the shape `[epoch:]upstream[-revision]`. Comparison walks
//! alternating non-digit and digit runs; `~` sorts before everything,
//! including the end of the string, which is how pre-releases like
//! `1.0~rc1` end up older than `1.0`.

use std::cmp::Ordering;

use super::{VersionError, VersionFormat};

pub struct DpkgFormat;

impl VersionFormat for DpkgFormat {
    fn name(&self) -> &'static str {
        "dpkg"
    }

    fn valid(&self, version: &str) -> bool {
        parse(version).is_ok()
    }

    fn compare_concrete(&self, a: &str, b: &str) -> Result<Ordering, VersionError> {
        let (a_epoch, a_upstream, a_revision) = parse(a)?;
        let (b_epoch, b_upstream, b_revision) = parse(b)?;

        Ok(a_epoch
            .cmp(&b_epoch)
            .then_with(|| verrevcmp(a_upstream, b_upstream))
            .then_with(|| verrevcmp(a_revision, b_revision)))
    }
}

fn parse(version: &str) -> Result<(u64, &str, &str), VersionError> {
    if version.trim().is_empty() {
        return Err(VersionError::InvalidVersion(version.to_string()));
    }
    let (epoch, rest) = match version.split_once(':') {
        Some((epoch, rest)) => {
            let epoch = epoch
                .parse::<u64>()
                .map_err(|_| VersionError::InvalidVersion(version.to_string()))?;
            (epoch, rest)
        }
        None => (0, version),
    };
    let (upstream, revision) = match rest.rsplit_once('-') {
        Some((upstream, revision)) => (upstream, revision),
        None => (rest, ""),
    };
    if upstream.is_empty() {
        return Err(VersionError::InvalidVersion(version.to_string()));
    }
    let allowed =
        |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-' | '~' | ':' | '_');
    if !rest.chars().all(allowed) {
        return Err(VersionError::InvalidVersion(version.to_string()));
    }
    Ok((epoch, upstream, revision))
}

/// Weight of a character in the non-digit comparison: `~` lowest, then the
/// end of the string, then letters, then everything else.
fn order(c: u8) -> i32 {
    if c.is_ascii_digit() {
        0
    } else if c.is_ascii_alphabetic() {
        i32::from(c)
    } else if c == b'~' {
        -1
    } else {
        i32::from(c) + 256
    }
}

fn verrevcmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        // Non-digit run, compared character by character.
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let ac = if i < a.len() { order(a[i]) } else { 0 };
            let bc = if j < b.len() { order(b[j]) } else { 0 };
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }
        // Digit run, compared numerically via first-difference tracking.
        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }
        let mut first_diff = Ordering::Equal;
        while i < a.len() && a[i].is_ascii_digit() && j < b.len() && b[j].is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if i < a.len() && a[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(a: &str, b: &str) -> Ordering {
        DpkgFormat.compare_concrete(a, b).unwrap()
    }

    #[test]
    fn plain_numeric_ordering() {
        assert_eq!(cmp("1.0", "2.0"), Ordering::Less);
        assert_eq!(cmp("2.0", "2.0"), Ordering::Equal);
        assert_eq!(cmp("10.1", "9.9"), Ordering::Greater);
        assert_eq!(cmp("1.01", "1.1"), Ordering::Equal);
    }

    #[test]
    fn epochs_dominate() {
        assert_eq!(cmp("1:0.1", "2.0"), Ordering::Greater);
        assert_eq!(cmp("0:2.0", "2.0"), Ordering::Equal);
        assert_eq!(cmp("1:1.0", "2:0.1"), Ordering::Less);
    }

    #[test]
    fn tilde_sorts_before_release() {
        assert_eq!(cmp("1.0~rc1", "1.0"), Ordering::Less);
        assert_eq!(cmp("1.0~rc1", "1.0~rc2"), Ordering::Less);
        assert_eq!(cmp("1.0~~", "1.0~"), Ordering::Less);
    }

    #[test]
    fn revisions_break_ties() {
        assert_eq!(cmp("1.0-1", "1.0-2"), Ordering::Less);
        assert_eq!(cmp("1.0", "1.0-1"), Ordering::Less);
        assert_eq!(cmp("1.2.3-4ubuntu1", "1.2.3-4"), Ordering::Greater);
    }

    #[test]
    fn letters_compare_within_runs() {
        assert_eq!(cmp("1.0a", "1.0b"), Ordering::Less);
        assert_eq!(cmp("1.0a1", "1.0a"), Ordering::Greater);
        // `+` (non-letter) sorts after letters.
        assert_eq!(cmp("1.0+dfsg", "1.0a"), Ordering::Greater);
    }

    #[test]
    fn openssl_style_versions() {
        assert_eq!(cmp("1.0.1e-2+deb7u1", "1.0.1e-2+deb7u3"), Ordering::Less);
        assert_eq!(cmp("1.0", "2.0"), Ordering::Less);
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!(!DpkgFormat.valid(""));
        assert!(!DpkgFormat.valid("a:1.0"));
        assert!(!DpkgFormat.valid("1 0"));
        assert!(DpkgFormat.valid("2:1.0~beta1-0ubuntu2"));
    }
}
