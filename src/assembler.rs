use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::record::{Extracted, PartialRecord};
use crate::schema::{CompletedRecord, RecordKind, RecordSchema};

/// Handle of one entity under assembly, carried by continuation contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityKey(u64);

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A follow-up fetch that contributes fields to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    License,
    FileDetails,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::License => write!(f, "license"),
            Branch::FileDetails => write!(f, "file details"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyState {
    /// Held only while `start` merges the first page; never observed between calls.
    Started,
    AwaitingFragments,
    Complete,
    Abandoned,
}

/// The follow-up branches decided while processing an entity's first page.
#[derive(Debug, Clone, Default)]
pub struct Fanout {
    pending: Vec<Branch>,
    failed: Vec<(Branch, String)>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetch was dispatched for `branch`; its fragments will arrive later.
    pub fn awaiting(mut self, branch: Branch) -> Self {
        self.pending.push(branch);
        self
    }

    /// `branch` could not be dispatched at all.
    pub fn failed(mut self, branch: Branch, reason: impl Into<String>) -> Self {
        self.failed.push((branch, reason.into()));
        self
    }
}

/// Why and how an entity ended without completing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbandonmentReport {
    pub kind: RecordKind,
    pub entity: String,
    pub missing: Vec<&'static str>,
    pub reasons: Vec<String>,
    pub partial: PartialRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Still waiting for branches that may supply required fields.
    Pending,
    Completed(CompletedRecord),
    Abandoned(AbandonmentReport),
    /// Nothing changed: the entity was already settled or unknown.
    Ignored,
}

#[derive(Debug)]
struct Assembly {
    label: String,
    record: PartialRecord,
    state: AssemblyState,
    pending: BTreeSet<Branch>,
    failures: Vec<String>,
}

impl Assembly {
    fn report(self) -> AbandonmentReport {
        AbandonmentReport {
            kind: self.record.schema().kind,
            entity: self.label,
            missing: self.record.missing_required(),
            reasons: self.failures,
            partial: self.record,
        }
    }
}

/// Owns every in-flight entity and drives it through its states.
///
/// An entity completes as soon as all required fields are present, without
/// waiting for outstanding optional branches. It is abandoned once no pending
/// branch is left that could still supply the missing ones. Settled entities
/// drop their records but keep their terminal state.
#[derive(Debug, Default)]
pub struct RecordAssembler {
    next_key: u64,
    entities: BTreeMap<EntityKey, Assembly>,
    settled: BTreeMap<EntityKey, AssemblyState>,
}

impl RecordAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity from its first page.
    pub fn start(
        &mut self,
        schema: &'static RecordSchema,
        label: impl Into<String>,
        extracted: &Extracted,
        fanout: Fanout,
    ) -> (EntityKey, Outcome) {
        let key = EntityKey(self.next_key);
        self.next_key += 1;

        let mut record = PartialRecord::new(schema);
        record.merge_extracted(extracted);

        let mut assembly = Assembly {
            label: label.into(),
            record,
            state: AssemblyState::Started,
            pending: fanout.pending.into_iter().collect(),
            failures: fanout
                .failed
                .into_iter()
                .map(|(branch, reason)| format!("{}: {}", branch, reason))
                .collect(),
        };
        log::debug!(
            "Started {} {} '{}' awaiting {:?}",
            schema.name,
            key,
            assembly.label,
            assembly.pending
        );

        assembly.state = AssemblyState::AwaitingFragments;
        (key, self.settle(key, assembly))
    }

    /// Merge the fragments delivered by `branch` into the entity.
    pub fn resume(&mut self, key: EntityKey, branch: Branch, extracted: &Extracted) -> Outcome {
        let Some(mut assembly) = self.take_branch(key, branch) else {
            return Outcome::Ignored;
        };

        if assembly.state == AssemblyState::Complete {
            log::debug!("Discarding late {} fragments for '{}'", branch, assembly.label);
            self.park(key, assembly);
            return Outcome::Ignored;
        }

        assembly.record.merge_extracted(extracted);
        self.settle(key, assembly)
    }

    /// Record that `branch` will never deliver.
    pub fn fail_branch(&mut self, key: EntityKey, branch: Branch, reason: impl fmt::Display) -> Outcome {
        let Some(mut assembly) = self.take_branch(key, branch) else {
            return Outcome::Ignored;
        };

        if assembly.state == AssemblyState::Complete {
            self.park(key, assembly);
            return Outcome::Ignored;
        }

        log::warn!("Branch {} failed for '{}': {}", branch, assembly.label, reason);
        assembly.failures.push(format!("{}: {}", branch, reason));
        self.settle(key, assembly)
    }

    /// Abandon every entity that has not completed, e.g. when the crawl stops.
    pub fn abandon_all(&mut self, reason: &str) -> Vec<AbandonmentReport> {
        let entities = std::mem::take(&mut self.entities);
        for (key, assembly) in &entities {
            let state = match assembly.state {
                AssemblyState::Complete => AssemblyState::Complete,
                _ => AssemblyState::Abandoned,
            };
            self.settled.insert(*key, state);
        }

        entities
            .into_values()
            .filter(|assembly| assembly.state != AssemblyState::Complete)
            .map(|mut assembly| {
                assembly.state = AssemblyState::Abandoned;
                assembly.failures.push(reason.to_string());
                log::warn!(
                    "Abandoned {} '{}': missing {:?}",
                    assembly.record.schema().name,
                    assembly.label,
                    assembly.record.missing_required()
                );
                assembly.report()
            })
            .collect()
    }

    /// Current state of `key`, including entities that already completed or
    /// were abandoned. `None` only for keys this assembler never issued.
    pub fn state(&self, key: EntityKey) -> Option<AssemblyState> {
        self.entities
            .get(&key)
            .map(|assembly| assembly.state)
            .or_else(|| self.settled.get(&key).copied())
    }

    /// Entities that still expect at least one branch.
    pub fn in_flight(&self) -> usize {
        self.entities.len()
    }

    fn take_branch(&mut self, key: EntityKey, branch: Branch) -> Option<Assembly> {
        let Some(mut assembly) = self.entities.remove(&key) else {
            log::warn!("No entity {} for {} delivery", key, branch);
            return None;
        };
        if !assembly.pending.remove(&branch) {
            log::warn!("Unexpected {} delivery for '{}'", branch, assembly.label);
            self.entities.insert(key, assembly);
            return None;
        }
        Some(assembly)
    }

    /// Keep a settled entity only while branches are still out.
    fn park(&mut self, key: EntityKey, assembly: Assembly) {
        if assembly.pending.is_empty() {
            self.settled.insert(key, assembly.state);
        } else {
            self.entities.insert(key, assembly);
        }
    }

    fn settle(&mut self, key: EntityKey, mut assembly: Assembly) -> Outcome {
        if assembly.record.is_complete() {
            match CompletedRecord::from_partial(&assembly.record) {
                Ok(record) => {
                    log::info!("Completed {} '{}'", assembly.record.schema().name, assembly.label);
                    assembly.state = AssemblyState::Complete;
                    self.park(key, assembly);
                    return Outcome::Completed(record);
                }
                Err(e) => assembly.failures.push(e.to_string()),
            }
        } else if !assembly.pending.is_empty() {
            self.entities.insert(key, assembly);
            return Outcome::Pending;
        }

        assembly.state = AssemblyState::Abandoned;
        self.settled.insert(key, AssemblyState::Abandoned);
        log::warn!(
            "Abandoned {} '{}': missing {:?}",
            assembly.record.schema().name,
            assembly.label,
            assembly.record.missing_required()
        );
        Outcome::Abandoned(assembly.report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RawFragments;
    use crate::schema::{MOD_FILE_SCHEMA, MOD_SCHEMA};
    use url::Url;

    fn base() -> Url {
        Url::parse("http://foo.org/mc-mods/74072-tinkers-construct").unwrap()
    }

    fn mod_page() -> Extracted {
        let mut extracted = Extracted::new(&base());
        extracted
            .add_value("name", "Tinkers Construct")
            .add_value("mod_url", base().as_str())
            .add_value("downloads", "1,000");
        extracted
    }

    fn license_page() -> Extracted {
        let mut extracted = Extracted::new(&base());
        extracted.add_value("license", "<p>Creative Commons Full Text</p>");
        extracted
    }

    #[test]
    fn test_completes_when_required_fields_arrive() {
        let mut assembler = RecordAssembler::new();
        let (key, outcome) = assembler.start(
            &MOD_SCHEMA,
            "tinkers",
            &mod_page(),
            Fanout::new().awaiting(Branch::License),
        );
        assert_eq!(outcome, Outcome::Pending);
        assert_eq!(assembler.state(key), Some(AssemblyState::AwaitingFragments));

        let outcome = assembler.resume(key, Branch::License, &license_page());
        let Outcome::Completed(CompletedRecord::Mod(record)) = outcome else {
            panic!("expected a completed mod, got {:?}", outcome);
        };
        assert_eq!(record.name, "Tinkers Construct");
        assert_eq!(record.license, "Creative Commons Full Text");
        assert_eq!(record.downloads, Some(1000));
        assert_eq!(assembler.in_flight(), 0);
        assert_eq!(assembler.state(key), Some(AssemblyState::Complete));
    }

    #[test]
    fn test_missing_selection_abandons_with_report() {
        let mut assembler = RecordAssembler::new();
        let (key, outcome) = assembler.start(
            &MOD_SCHEMA,
            "tinkers",
            &mod_page(),
            Fanout::new().failed(Branch::License, "no license link"),
        );
        let Outcome::Abandoned(report) = outcome else {
            panic!("expected abandonment, got {:?}", outcome);
        };
        assert_eq!(assembler.state(key), Some(AssemblyState::Abandoned));
        assert_eq!(assembler.in_flight(), 0);
        assert_eq!(report.missing, vec!["license"]);
        assert_eq!(report.reasons, vec!["license: no license link".to_string()]);
        assert_eq!(report.partial.text("name"), Some("Tinkers Construct"));
    }

    #[test]
    fn test_transport_failure_abandons_only_that_entity() {
        let mut assembler = RecordAssembler::new();
        let fanout = || Fanout::new().awaiting(Branch::License);
        let (a, _) = assembler.start(&MOD_SCHEMA, "a", &mod_page(), fanout());
        let (b, _) = assembler.start(&MOD_SCHEMA, "b", &mod_page(), fanout());

        let failed = assembler.fail_branch(a, Branch::License, "HTTP status 500");
        assert!(matches!(failed, Outcome::Abandoned(_)));
        assert_eq!(assembler.state(a), Some(AssemblyState::Abandoned));
        assert_eq!(assembler.state(b), Some(AssemblyState::AwaitingFragments));
        assert!(matches!(
            assembler.resume(b, Branch::License, &license_page()),
            Outcome::Completed(_)
        ));
    }

    #[test]
    fn test_completion_does_not_wait_for_optional_branches() {
        let mut assembler = RecordAssembler::new();
        let mut row = Extracted::new(&base());
        row.add_value("mod", "Tinkers Construct")
            .add_value("name", "TConstruct-1.8.5.jar")
            .add_value("download_url", "/files/1/download")
            .add_value("md5", "d41d8cd98f00b204e9800998ecf8427e");

        let (key, outcome) = assembler.start(
            &MOD_FILE_SCHEMA,
            "TConstruct-1.8.5.jar",
            &row,
            Fanout::new().awaiting(Branch::FileDetails),
        );
        assert!(matches!(outcome, Outcome::Completed(_)));
        assert_eq!(assembler.state(key), Some(AssemblyState::Complete));

        let mut details = Extracted::new(&base());
        details.add("changelog", RawFragments::single("late"));
        assert_eq!(assembler.resume(key, Branch::FileDetails, &details), Outcome::Ignored);
        assert_eq!(assembler.in_flight(), 0);
    }

    #[test]
    fn test_license_arrival_order_does_not_change_output() {
        let page = |name: &str| {
            let mut extracted = Extracted::new(&base());
            extracted
                .add_value("name", name)
                .add_value("mod_url", base().as_str());
            extracted
        };
        let run = |reverse: bool| {
            let mut assembler = RecordAssembler::new();
            let fanout = || Fanout::new().awaiting(Branch::License);
            let (a, _) = assembler.start(&MOD_SCHEMA, "a", &page("Mantle"), fanout());
            let (b, _) = assembler.start(&MOD_SCHEMA, "b", &page("JEI"), fanout());

            let mut keys = vec![a, b];
            if reverse {
                keys.reverse();
            }
            let mut records: Vec<CompletedRecord> = keys
                .into_iter()
                .filter_map(|key| match assembler.resume(key, Branch::License, &license_page()) {
                    Outcome::Completed(record) => Some(record),
                    _ => None,
                })
                .collect();
            if reverse {
                records.reverse();
            }
            records
        };

        let forward = run(false);
        assert_eq!(forward.len(), 2);
        assert_eq!(forward, run(true));
    }

    #[test]
    fn test_duplicate_delivery_is_ignored() {
        let mut assembler = RecordAssembler::new();
        let (key, _) = assembler.start(
            &MOD_SCHEMA,
            "tinkers",
            &Extracted::new(&base()),
            Fanout::new().awaiting(Branch::License).awaiting(Branch::FileDetails),
        );
        assert_eq!(assembler.resume(key, Branch::License, &license_page()), Outcome::Pending);
        assert_eq!(assembler.resume(key, Branch::License, &license_page()), Outcome::Ignored);
    }

    #[test]
    fn test_abandon_all_reports_in_flight_entities() {
        let mut assembler = RecordAssembler::new();
        let (key, _) = assembler.start(
            &MOD_SCHEMA,
            "tinkers",
            &mod_page(),
            Fanout::new().awaiting(Branch::License),
        );
        let reports = assembler.abandon_all("crawl stopped");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].missing, vec!["license"]);
        assert_eq!(reports[0].reasons, vec!["crawl stopped".to_string()]);
        assert_eq!(assembler.in_flight(), 0);
        assert_eq!(assembler.state(key), Some(AssemblyState::Abandoned));
    }
}
