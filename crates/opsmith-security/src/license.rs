//! License classification against a small SPDX table.

use std::collections::HashMap;
use std::sync::LazyLock;

/// License category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LicenseKind {
    Unknown,
    Permissive,
    Copyleft,
    Proprietary,
}

/// Classification result for one license identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseInfo {
    pub name: String,
    pub kind: LicenseKind,
    /// OSI approved.
    pub osi: bool,
}

static KNOWN_LICENSES: LazyLock<HashMap<&'static str, LicenseInfo>> = LazyLock::new(|| {
    let permissive = |name: &str| LicenseInfo {
        name: name.to_string(),
        kind: LicenseKind::Permissive,
        osi: true,
    };
    let copyleft = |name: &str| LicenseInfo {
        name: name.to_string(),
        kind: LicenseKind::Copyleft,
        osi: true,
    };

    HashMap::from([
        ("MIT", permissive("MIT License")),
        ("Apache-2.0", permissive("Apache License 2.0")),
        ("BSD-2-Clause", permissive("BSD 2-Clause License")),
        ("BSD-3-Clause", permissive("BSD 3-Clause License")),
        ("ISC", permissive("ISC License")),
        ("0BSD", permissive("BSD Zero Clause License")),
        ("GPL-2.0", copyleft("GNU General Public License v2.0")),
        ("GPL-3.0", copyleft("GNU General Public License v3.0")),
        ("LGPL-2.1", copyleft("GNU Lesser General Public License v2.1")),
        ("LGPL-3.0", copyleft("GNU Lesser General Public License v3.0")),
        ("AGPL-3.0", copyleft("GNU Affero General Public License v3.0")),
        ("MPL-2.0", copyleft("Mozilla Public License 2.0")),
        ("EPL-2.0", copyleft("Eclipse Public License 2.0")),
    ])
});

fn lookup(license: &str) -> Option<&'static LicenseInfo> {
    let license = license.trim();
    KNOWN_LICENSES.get(license).or_else(|| {
        KNOWN_LICENSES
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(license))
            .map(|(_, info)| info)
    })
}

/// Checks classified licenses against a set of allowed categories.
pub struct LicenseChecker {
    allowed: Vec<LicenseKind>,
}

impl LicenseChecker {
    #[must_use]
    pub fn new(allowed: Vec<LicenseKind>) -> Self {
        Self { allowed }
    }

    /// Classify `license` and report whether its category is allowed.
    ///
    /// Unknown identifiers come back as `LicenseKind::Unknown` and are never
    /// allowed.
    #[must_use]
    pub fn check(&self, license: &str) -> (LicenseInfo, bool) {
        match lookup(license) {
            Some(info) => {
                let allowed = self.allowed.contains(&info.kind);
                (info.clone(), allowed)
            }
            None => (
                LicenseInfo {
                    name: license.trim().to_string(),
                    kind: LicenseKind::Unknown,
                    osi: false,
                },
                false,
            ),
        }
    }
}

#[must_use]
pub fn is_permissive(license: &str) -> bool {
    lookup(license).is_some_and(|info| info.kind == LicenseKind::Permissive)
}

#[must_use]
pub fn is_copyleft(license: &str) -> bool {
    lookup(license).is_some_and(|info| info.kind == LicenseKind::Copyleft)
}

#[must_use]
pub fn is_osi_approved(license: &str) -> bool {
    lookup(license).is_some_and(|info| info.osi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(is_permissive("MIT"));
        assert!(is_permissive("Apache-2.0"));
        assert!(is_copyleft("GPL-3.0"));
        assert!(is_copyleft("MPL-2.0"));
        assert!(!is_permissive("GPL-3.0"));
        assert!(!is_copyleft("unheard-of"));
        assert!(is_osi_approved("BSD-3-Clause"));
        assert!(!is_osi_approved("unheard-of"));
    }

    #[test]
    fn test_checker_allows_configured_kinds() {
        let checker = LicenseChecker::new(vec![LicenseKind::Permissive]);

        let (info, ok) = checker.check("MIT");
        assert!(ok);
        assert_eq!(info.kind, LicenseKind::Permissive);

        let (info, ok) = checker.check("AGPL-3.0");
        assert!(!ok);
        assert_eq!(info.kind, LicenseKind::Copyleft);
    }

    #[test]
    fn test_case_insensitive_fallback() {
        let checker = LicenseChecker::new(vec![LicenseKind::Permissive]);
        let (info, ok) = checker.check("mit");
        assert!(ok);
        assert_eq!(info.name, "MIT License");
    }

    #[test]
    fn test_unknown_license() {
        let checker = LicenseChecker::new(vec![LicenseKind::Permissive, LicenseKind::Copyleft]);
        let (info, ok) = checker.check("My-Custom-License");
        assert!(!ok);
        assert_eq!(info.kind, LicenseKind::Unknown);
        assert!(!info.osi);
        assert_eq!(info.name, "My-Custom-License");
    }
}
