// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! RPM package version ordering. */

use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
};

/// An RPM `epoch:version-release` triple.
///
/// Ordering follows RPM semantics: epochs compare numerically, then version and release
/// compare with [rpmvercmp].
#[derive(Clone, Debug)]
pub struct Evr {
    pub epoch: String,
    pub version: String,
    pub release: String,
}

impl Evr {
    pub fn new(epoch: impl ToString, version: impl ToString, release: impl ToString) -> Self {
        Self {
            epoch: epoch.to_string(),
            version: version.to_string(),
            release: release.to_string(),
        }
    }

    /// The epoch as an integer. An empty or invalid epoch is 0.
    pub fn epoch_assumed(&self) -> u64 {
        self.epoch.parse().unwrap_or(0)
    }
}

impl Display for Evr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.epoch_assumed(), self.version, self.release)
    }
}

impl PartialEq for Evr {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Evr {}

impl PartialOrd<Self> for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch_assumed()
            .cmp(&other.epoch_assumed())
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| rpmvercmp(&self.release, &other.release))
    }
}

fn take_while(s: &[u8], f: impl Fn(u8) -> bool) -> (&[u8], &[u8]) {
    let end = s.iter().position(|c| !f(*c)).unwrap_or(s.len());
    s.split_at(end)
}

/// Compare two version or release strings using RPM's algorithm.
///
/// Strings are split into alternating runs of digits and letters; anything else
/// separates runs. `~` sorts before everything, including the end of the string.
/// `^` sorts after the end of the string but before anything else.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let separator = |c: u8| !c.is_ascii_alphanumeric() && c != b'~' && c != b'^';

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    while !one.is_empty() || !two.is_empty() {
        one = take_while(one, separator).1;
        two = take_while(two, separator).1;

        if one.first() == Some(&b'~') || two.first() == Some(&b'~') {
            if one.first() != Some(&b'~') {
                return Ordering::Greater;
            }
            if two.first() != Some(&b'~') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.first() == Some(&b'^') || two.first() == Some(&b'^') {
            if one.is_empty() {
                return Ordering::Less;
            }
            if two.is_empty() {
                return Ordering::Greater;
            }
            if one.first() != Some(&b'^') {
                return Ordering::Greater;
            }
            if two.first() != Some(&b'^') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();

        let (seg_one, rest_one) = if numeric {
            take_while(one, |c| c.is_ascii_digit())
        } else {
            take_while(one, |c| c.is_ascii_alphabetic())
        };
        let (seg_two, rest_two) = if numeric {
            take_while(two, |c| c.is_ascii_digit())
        } else {
            take_while(two, |c| c.is_ascii_alphabetic())
        };

        // Numeric segments are newer than alpha segments.
        if seg_two.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ordering = if numeric {
            let seg_one = take_while(seg_one, |c| c == b'0').1;
            let seg_two = take_while(seg_two, |c| c == b'0').1;

            seg_one
                .len()
                .cmp(&seg_two.len())
                .then_with(|| seg_one.cmp(seg_two))
        } else {
            seg_one.cmp(seg_two)
        };

        if ordering != Ordering::Equal {
            return ordering;
        }

        one = rest_one;
        two = rest_two;
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (false, _) => Ordering::Greater,
        (true, false) => Ordering::Less,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compare_versions() {
        for (a, b, expected) in [
            ("1.0", "1.0", Ordering::Equal),
            ("1.0", "2.0", Ordering::Less),
            ("2.0.1", "2.0", Ordering::Greater),
            ("2.0.1a", "2.0.1", Ordering::Greater),
            ("5.5p1", "5.5p2", Ordering::Less),
            ("10", "9", Ordering::Greater),
            ("010", "10", Ordering::Equal),
            ("1.0a", "1.0", Ordering::Greater),
            ("1.0", "1.0a", Ordering::Less),
            ("1.0~rc1", "1.0", Ordering::Less),
            ("1.0~rc1", "1.0~rc2", Ordering::Less),
            ("1.0^", "1.0", Ordering::Greater),
            ("1.0^git1", "1.0.1", Ordering::Less),
            ("1.0a", "1.01", Ordering::Less),
            ("1_0", "1.0", Ordering::Equal),
        ] {
            assert_eq!(rpmvercmp(a, b), expected, "{} vs {}", a, b);
        }
    }

    #[test]
    fn compare_evr() {
        assert!(Evr::new("1", "1.0", "1") > Evr::new("0", "2.0", "1"));
        assert!(Evr::new("", "1.0", "2") > Evr::new("0", "1.0", "1"));
        assert_eq!(
            Evr::new("0", "1.0", "1").cmp(&Evr::new("", "1.0", "1")),
            Ordering::Equal
        );
        assert_eq!(Evr::new("0", "1.0", "1"), Evr::new("", "1.0", "1"));
        assert_eq!(Evr::new("0", "1.01", "1"), Evr::new("0", "1.1", "1"));
        assert_ne!(Evr::new("0", "1.0", "1"), Evr::new("0", "1.0", "2"));
        assert_eq!(Evr::new("", "4.1", "1").to_string(), "0:4.1-1");
    }
}
