//! Alpine package version ordering.
//!
//! Shape: `number{.number}[letter]{_suffix[number]}[-r<rev>]`. Pre-release
//! suffixes (`_alpha`, `_beta`, `_pre`, `_rc`) sort before the bare version,
//! post-release suffixes (`_cvs`, `_svn`, `_git`, `_hg`, `_p`) after, and the
//! `-r` package revision breaks remaining ties.

use std::cmp::Ordering;

use super::{VersionError, VersionFormat};

pub struct ApkFormat;

impl VersionFormat for ApkFormat {
    fn name(&self) -> &'static str {
        "apk"
    }

    fn valid(&self, version: &str) -> bool {
        parse(version).is_ok()
    }

    fn compare_concrete(&self, a: &str, b: &str) -> Result<Ordering, VersionError> {
        let a = parse(a)?;
        let b = parse(b)?;
        Ok(a.cmp(&b))
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ParsedVersion {
    components: Vec<NumericComponent>,
    letter: Option<char>,
    suffixes: Vec<(i8, u64)>,
    revision: u64,
}

#[derive(Debug)]
struct NumericComponent(String);

impl Ord for NumericComponent {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.0.trim_start_matches('0');
        let b = other.0.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

impl PartialOrd for NumericComponent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NumericComponent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NumericComponent {}

fn suffix_class(name: &str) -> Option<i8> {
    match name {
        "alpha" => Some(-5),
        "beta" => Some(-4),
        "pre" => Some(-3),
        "rc" => Some(-2),
        "cvs" => Some(1),
        "svn" => Some(2),
        "git" => Some(3),
        "hg" => Some(4),
        "p" => Some(5),
        _ => None,
    }
}

fn parse(version: &str) -> Result<ParsedVersion, VersionError> {
    let invalid = || VersionError::InvalidVersion(version.to_string());
    let mut rest = version;

    let revision = match rest.rsplit_once("-r") {
        Some((head, rev)) if !rev.is_empty() && rev.bytes().all(|c| c.is_ascii_digit()) => {
            let parsed = rev.parse::<u64>().map_err(|_| invalid())?;
            rest = head;
            parsed
        }
        _ => 0,
    };

    let mut suffixes = Vec::new();
    while let Some((head, raw_suffix)) = rest.rsplit_once('_') {
        let name_end = raw_suffix
            .bytes()
            .take_while(|c| c.is_ascii_alphabetic())
            .count();
        let (name, number) = raw_suffix.split_at(name_end);
        let class = suffix_class(name).ok_or_else(invalid)?;
        let number = if number.is_empty() {
            0
        } else {
            number.parse::<u64>().map_err(|_| invalid())?
        };
        suffixes.push((class, number));
        rest = head;
    }
    suffixes.reverse();
    // A missing suffix ranks as the release itself; pad so `_p` beats it and
    // `_rc` loses to it under lexicographic Vec ordering.
    while suffixes.len() < 2 {
        suffixes.push((0, 0));
    }

    let letter = match rest.bytes().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            rest = &rest[..rest.len() - 1];
            Some(c.to_ascii_lowercase() as char)
        }
        _ => None,
    };

    if rest.is_empty() {
        return Err(invalid());
    }
    let mut components = Vec::new();
    for part in rest.split('.') {
        if part.is_empty() || !part.bytes().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        components.push(NumericComponent(part.to_string()));
    }

    Ok(ParsedVersion {
        components,
        letter,
        suffixes,
        revision,
    })
}
