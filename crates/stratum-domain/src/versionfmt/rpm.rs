//! RPM version ordering (`[epoch:]version[-release]`, rpmvercmp segments).

use std::cmp::Ordering;

use super::{VersionError, VersionFormat};

pub struct RpmFormat;

impl VersionFormat for RpmFormat {
    fn name(&self) -> &'static str {
        "rpm"
    }

    fn valid(&self, version: &str) -> bool {
        parse(version).is_ok()
    }

    fn compare_concrete(&self, a: &str, b: &str) -> Result<Ordering, VersionError> {
        let (a_epoch, a_version, a_release) = parse(a)?;
        let (b_epoch, b_version, b_release) = parse(b)?;

        Ok(a_epoch
            .cmp(&b_epoch)
            .then_with(|| rpmvercmp(a_version, b_version))
            .then_with(|| rpmvercmp(a_release, b_release)))
    }
}

fn parse(version: &str) -> Result<(u64, &str, &str), VersionError> {
    if version.trim().is_empty() || version.contains(char::is_whitespace) {
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
    if rest.is_empty() {
        return Err(VersionError::InvalidVersion(version.to_string()));
    }
    let (ver, release) = match rest.rsplit_once('-') {
        Some((ver, release)) => (ver, release),
        None => (rest, ""),
    };
    if ver.is_empty() {
        return Err(VersionError::InvalidVersion(version.to_string()));
    }
    Ok((epoch, ver, release))
}

/// Segment-wise comparison as implemented by librpm: alternating alpha and
/// digit runs with separators skipped, `~` sorting before anything else at
/// its position, digit segments beating alpha segments.
fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    loop {
        // Skip separators, stopping at alphanumerics and tildes.
        while i < a.len() && !a[i].is_ascii_alphanumeric() && a[i] != b'~' {
            i += 1;
        }
        while j < b.len() && !b[j].is_ascii_alphanumeric() && b[j] != b'~' {
            j += 1;
        }

        let a_tilde = i < a.len() && a[i] == b'~';
        let b_tilde = j < b.len() && b[j] == b'~';
        if a_tilde || b_tilde {
            if a_tilde && b_tilde {
                i += 1;
                j += 1;
                continue;
            }
            // The tilde side is older, even against the end of the string.
            return if a_tilde {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }

        if i >= a.len() || j >= b.len() {
            break;
        }

        let numeric = a[i].is_ascii_digit();
        let a_start = i;
        let b_start = j;
        if numeric {
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
        } else {
            while i < a.len() && a[i].is_ascii_alphabetic() {
                i += 1;
            }
            while j < b.len() && b[j].is_ascii_alphabetic() {
                j += 1;
            }
        }

        let a_seg = &a[a_start..i];
        let b_seg = &b[b_start..j];
        if b_seg.is_empty() {
            // Mismatched segment types: the numeric side is newer.
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ordering = if numeric {
            let a_trim = trim_leading_zeros(a_seg);
            let b_trim = trim_leading_zeros(b_seg);
            a_trim.len().cmp(&b_trim.len()).then_with(|| a_trim.cmp(b_trim))
        } else {
            a_seg.cmp(b_seg)
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    // One side ran out of segments; the longer one is newer.
    (a.len() - i).cmp(&(b.len() - j))
}

fn trim_leading_zeros(segment: &[u8]) -> &[u8] {
    let start = segment.iter().take_while(|c| **c == b'0').count();
    &segment[start..]
}
