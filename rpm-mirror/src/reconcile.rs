// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reconciliation of upstream records against known content.

Upstream records are validated and deduplicated by natural key, then split into units
the platform does not know yet ([ReconcilePlan::to_create]) and units that only need
associating with the new version ([ReconcilePlan::to_associate]).
*/

use {
    crate::{
        content::{Advisory, ContentUnit, NaturalKey, Package},
        error::{MirrorError, Result},
        platform::UnitId,
    },
    chrono::NaiveDateTime,
    serde::{Deserialize, Serialize},
    std::{
        cmp::Ordering,
        collections::{BTreeMap, HashMap},
    },
};

/// How to choose between two advisories sharing an id.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryConflictPolicy {
    /// The incoming advisory always wins.
    Replace,
    /// The advisory with the newest updated (or issued) date wins.
    #[default]
    KeepNewest,
}

/// Validation and merge policy applied to upstream records.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReconcilePolicy {
    /// Fail on packages without a checksum instead of skipping them.
    pub require_package_checksums: bool,
    pub advisory_conflict: AdvisoryConflictPolicy,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            require_package_checksums: true,
            advisory_conflict: AdvisoryConflictPolicy::default(),
        }
    }
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S UTC",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
];

fn parse_advisory_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();

    for format in DATE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }

    if let Ok(date) = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }

    value
        .parse::<i64>()
        .ok()
        .and_then(|secs| NaiveDateTime::from_timestamp_opt(secs, 0))
}

fn advisory_date(a: &Advisory) -> Option<NaiveDateTime> {
    a.updated_date
        .as_deref()
        .and_then(parse_advisory_date)
        .or_else(|| a.issued_date.as_deref().and_then(parse_advisory_date))
}

/// Whether `incoming` should supersede `existing`, an advisory with the same id.
pub fn prefer_incoming(policy: AdvisoryConflictPolicy, existing: &Advisory, incoming: &Advisory) -> bool {
    match policy {
        AdvisoryConflictPolicy::Replace => true,
        AdvisoryConflictPolicy::KeepNewest => {
            match advisory_date(incoming).cmp(&advisory_date(existing)) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => incoming.content_digest() > existing.content_digest(),
            }
        }
    }
}

/// The outcome of reconciliation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Units unknown to the platform.
    pub to_create: Vec<ContentUnit>,
    /// Known units to reference from the new version, with their upstream records.
    pub to_associate: Vec<(UnitId, ContentUnit)>,
    /// Packages dropped for lacking a checksum.
    pub skipped_missing_checksum: usize,
}

/// Accumulates upstream records one at a time.
pub struct ContentReconciler {
    policy: ReconcilePolicy,
    units: BTreeMap<NaturalKey, ContentUnit>,
    /// Packages by NEVRA.
    packages: BTreeMap<String, Package>,
    advisories: BTreeMap<String, Advisory>,
    skipped_missing_checksum: usize,
    duplicates: usize,
}

impl ContentReconciler {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self {
            policy,
            units: BTreeMap::new(),
            packages: BTreeMap::new(),
            advisories: BTreeMap::new(),
            skipped_missing_checksum: 0,
            duplicates: 0,
        }
    }

    /// Validate and record an upstream record.
    pub fn add(&mut self, unit: ContentUnit) -> Result<()> {
        match unit {
            ContentUnit::Package(p) => {
                if p.checksum.is_none() {
                    if self.policy.require_package_checksums {
                        return Err(MirrorError::SyncValidation(format!(
                            "package {} has no checksum",
                            p.nevra()
                        )));
                    }

                    log::warn!("skipping package {} without checksum", p.nevra());
                    self.skipped_missing_checksum += 1;
                    return Ok(());
                }

                if p.location_href.is_empty() {
                    return Err(MirrorError::SyncValidation(format!(
                        "package {} has no location",
                        p.nevra()
                    )));
                }

                match self.packages.get(&p.nevra()) {
                    Some(existing) if existing.natural_key() == p.natural_key() => {
                        self.duplicates += 1
                    }
                    Some(existing) => {
                        self.duplicates += 1;
                        log::warn!(
                            "upstream lists package {} with differing checksums",
                            p.nevra()
                        );
                        if p.checksum > existing.checksum {
                            self.packages.insert(p.nevra(), p);
                        }
                    }
                    None => {
                        self.packages.insert(p.nevra(), p);
                    }
                }
            }
            ContentUnit::Advisory(a) => match self.advisories.get(&a.id) {
                Some(existing) if existing == &a => self.duplicates += 1,
                Some(existing) => {
                    self.duplicates += 1;
                    if prefer_incoming(self.policy.advisory_conflict, existing, &a) {
                        log::debug!("advisory {} superseded within upstream feed", a.id);
                        self.advisories.insert(a.id.clone(), a);
                    }
                }
                None => {
                    self.advisories.insert(a.id.clone(), a);
                }
            },
            unit => self.insert(unit),
        }

        Ok(())
    }

    fn insert(&mut self, unit: ContentUnit) {
        let key = unit.natural_key();

        if self.units.contains_key(&key) {
            self.duplicates += 1;
        } else {
            self.units.insert(key, unit);
        }
    }

    /// Number of accepted records.
    pub fn len(&self) -> usize {
        self.units.len() + self.packages.len() + self.advisories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn skipped_missing_checksum(&self) -> usize {
        self.skipped_missing_checksum
    }

    /// Number of upstream records collapsed into another one.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Natural keys of the accepted records.
    pub fn keys(&self) -> impl Iterator<Item = NaturalKey> + '_ {
        self.units
            .keys()
            .cloned()
            .chain(self.packages.values().map(|p| p.natural_key()))
            .chain(self.advisories.values().map(|a| a.natural_key()))
    }

    /// Accepted records with their natural keys, in natural key order.
    pub fn into_records(self) -> (Vec<(NaturalKey, ContentUnit)>, usize) {
        let mut records = self.units.into_iter().collect::<Vec<_>>();
        records.extend(
            self.packages
                .into_values()
                .map(|p| (p.natural_key(), ContentUnit::Package(p))),
        );
        records.extend(self.advisories.into_values().map(|a| {
            let unit = ContentUnit::Advisory(a);
            (unit.natural_key(), unit)
        }));
        records.sort_by(|a, b| a.0.cmp(&b.0));

        (records, self.skipped_missing_checksum)
    }

    /// Split accepted records by whether `existing` knows them.
    pub fn plan(self, existing: &HashMap<NaturalKey, UnitId>) -> ReconcilePlan {
        let (records, skipped_missing_checksum) = self.into_records();

        let mut plan = ReconcilePlan {
            skipped_missing_checksum,
            ..Default::default()
        };

        for (key, unit) in records {
            match existing.get(&key) {
                Some(id) => plan.to_associate.push((*id, unit)),
                None => plan.to_create.push(unit),
            }
        }

        plan
    }
}

/// Reconcile a sequence of upstream records against known content.
pub fn reconcile(
    existing: &HashMap<NaturalKey, UnitId>,
    records: impl IntoIterator<Item = ContentUnit>,
    policy: ReconcilePolicy,
) -> Result<ReconcilePlan> {
    let mut reconciler = ContentReconciler::new(policy);

    for record in records {
        reconciler.add(record)?;
    }

    Ok(reconciler.plan(existing))
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::content::{Package, PackageChecksum},
        crate::io::ChecksumType,
    };

    fn package(name: &str, checksum: Option<&str>) -> ContentUnit {
        ContentUnit::Package(Package {
            package_type: "rpm".into(),
            name: name.into(),
            arch: "noarch".into(),
            epoch: "0".into(),
            version: "1.0".into(),
            release: "1".into(),
            checksum: checksum.map(|value| PackageChecksum {
                checksum_type: ChecksumType::Sha256,
                value: value.into(),
                pkgid: true,
            }),
            location_href: format!("{}-1.0-1.noarch.rpm", name),
            ..Default::default()
        })
    }

    fn advisory(id: &str, updated: Option<&str>, title: &str) -> Advisory {
        Advisory {
            id: id.into(),
            issued_date: Some("2020-01-01".into()),
            updated_date: updated.map(|s| s.into()),
            title: Some(title.into()),
            ..Default::default()
        }
    }

    #[test]
    fn create_versus_associate() -> Result<()> {
        let known = package("bear", Some(&"a".repeat(64)));
        let mut existing = HashMap::new();
        existing.insert(known.natural_key(), UnitId(7));

        let plan = reconcile(
            &existing,
            vec![
                known.clone(),
                package("camel", Some(&"b".repeat(64))),
                known,
            ],
            ReconcilePolicy::default(),
        )?;

        assert_eq!(plan.to_associate.len(), 1);
        assert_eq!(plan.to_associate[0].0, UnitId(7));
        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].as_package().map(|p| p.name.as_str()), Some("camel"));

        Ok(())
    }

    #[test]
    fn one_package_per_nevra() -> Result<()> {
        let low = package("bear", Some(&"a".repeat(64)));
        let high = package("bear", Some(&"b".repeat(64)));

        for records in [
            vec![low.clone(), high.clone()],
            vec![high.clone(), low.clone()],
        ] {
            let plan = reconcile(&HashMap::new(), records, ReconcilePolicy::default())?;

            assert_eq!(plan.to_create, vec![high.clone()]);
        }

        Ok(())
    }

    #[test]
    fn missing_checksum_policy() -> Result<()> {
        let strict = reconcile(
            &HashMap::new(),
            vec![package("bear", None)],
            ReconcilePolicy::default(),
        );
        assert!(matches!(strict, Err(MirrorError::SyncValidation(_))));

        let lenient = reconcile(
            &HashMap::new(),
            vec![package("bear", None), package("camel", Some(&"b".repeat(64)))],
            ReconcilePolicy {
                require_package_checksums: false,
                ..Default::default()
            },
        )?;
        assert_eq!(lenient.skipped_missing_checksum, 1);
        assert_eq!(lenient.to_create.len(), 1);

        Ok(())
    }

    #[test]
    fn keep_newest_advisory() {
        let old = advisory("RHSA-1", Some("2020-01-02 00:00:00"), "old");
        let new = advisory("RHSA-1", Some("2021-01-02 00:00:00"), "new");
        let issued_only = advisory("RHSA-1", None, "issued");

        let policy = AdvisoryConflictPolicy::KeepNewest;
        assert!(prefer_incoming(policy, &old, &new));
        assert!(!prefer_incoming(policy, &new, &old));
        assert!(prefer_incoming(policy, &issued_only, &old));
        assert!(prefer_incoming(AdvisoryConflictPolicy::Replace, &new, &old));
    }

    #[test]
    fn advisory_tie_break_is_symmetric() {
        let a = advisory("RHSA-1", Some("2020-01-02"), "a");
        let b = advisory("RHSA-1", Some("2020-01-02"), "b");

        let policy = AdvisoryConflictPolicy::KeepNewest;
        assert_ne!(prefer_incoming(policy, &a, &b), prefer_incoming(policy, &b, &a));
    }

    #[test]
    fn one_advisory_per_id() -> Result<()> {
        let plan = reconcile(
            &HashMap::new(),
            vec![
                ContentUnit::Advisory(advisory("RHSA-1", Some("2020-01-02"), "old")),
                ContentUnit::Advisory(advisory("RHSA-1", Some("2021-01-02"), "new")),
            ],
            ReconcilePolicy::default(),
        )?;

        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(
            plan.to_create[0]
                .as_advisory()
                .and_then(|a| a.title.as_deref()),
            Some("new")
        );

        Ok(())
    }
}
