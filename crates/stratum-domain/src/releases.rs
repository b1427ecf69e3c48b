//! Release code-name tables for the apt-sources namespace heuristic.

/// Debian code names and suite class names mapped to version numbers.
pub const DEBIAN_RELEASES: &[(&str, &str)] = &[
    // Code names
    ("squeeze", "6"),
    ("wheezy", "7"),
    ("jessie", "8"),
    ("stretch", "9"),
    ("buster", "10"),
    ("bullseye", "11"),
    ("sid", "unstable"),
    // Class names
    ("oldoldstable", "8"),
    ("oldstable", "9"),
    ("stable", "10"),
    ("testing", "11"),
    ("unstable", "unstable"),
];

/// Ubuntu code names mapped to version numbers.
pub const UBUNTU_RELEASES: &[(&str, &str)] = &[
    ("precise", "12.04"),
    ("quantal", "12.10"),
    ("raring", "13.04"),
    ("trusty", "14.04"),
    ("utopic", "14.10"),
    ("vivid", "15.04"),
    ("wily", "15.10"),
    ("xenial", "16.04"),
    ("yakkety", "16.10"),
    ("zesty", "17.04"),
    ("artful", "17.10"),
    ("bionic", "18.04"),
    ("cosmic", "18.10"),
    ("disco", "19.04"),
    ("eoan", "19.10"),
    ("focal", "20.04"),
    ("groovy", "20.10"),
    ("hirsute", "21.04"),
    ("impish", "21.10"),
];

/// Looks `codename` up in the Debian table.
pub fn debian_version(codename: &str) -> Option<&'static str> {
    lookup(DEBIAN_RELEASES, codename)
}

/// Looks `codename` up in the Ubuntu table.
pub fn ubuntu_version(codename: &str) -> Option<&'static str> {
    lookup(UBUNTU_RELEASES, codename)
}

fn lookup(table: &'static [(&str, &str)], codename: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(name, _)| *name == codename)
        .map(|(_, version)| *version)
}
