//! Duplicate resolution for records of the same logical match.
//!
//! The same match can show up several times in one fetch pass (fixtures,
//! results and live lists overlap). The most authoritative status wins:
//!
//! `cancelled (1) < finished (2) < live (3) < scheduled (4) < unknown (999)`
//!
//! Lower is more authoritative; ties keep the earliest record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Record, Snapshot};

/// Priority assigned to a missing or unrecognized status.
pub const UNKNOWN_STATUS_PRIORITY: u32 = 999;

/// Collapses a flat list of records into one snapshot, one record per id.
pub trait RecordMerger: Send + Sync {
    fn merge(&self, records: Vec<Record>) -> Snapshot;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Cancelled,
    Finished,
    Live,
    Scheduled,
}

impl MatchStatus {
    /// Most authoritative first.
    pub const PRIORITY_ASC: [Self; 4] = [
        Self::Cancelled,
        Self::Finished,
        Self::Live,
        Self::Scheduled,
    ];

    pub fn priority(self) -> u32 {
        match self {
            Self::Cancelled => 1,
            Self::Finished => 2,
            Self::Live => 3,
            Self::Scheduled => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Finished => "finished",
            Self::Live => "live",
            Self::Scheduled => "scheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::PRIORITY_ASC
            .into_iter()
            .find(|status| status.as_str() == s)
    }
}

/// Default merge collaborator.
///
/// The merged record keeps the first-seen record's payload, adopts the
/// authoritative record's `authoritative_fields`, and when any duplicate is
/// `scheduled` adopts that record's `schedule_fields` (the kickoff date is
/// only reliable on fixture listings).
#[derive(Debug, Clone)]
pub struct StatusPriorityMerge {
    status_field: String,
    authoritative_fields: Vec<String>,
    schedule_fields: Vec<String>,
}

impl Default for StatusPriorityMerge {
    fn default() -> Self {
        Self {
            status_field: "status".to_string(),
            authoritative_fields: vec![
                "status".to_string(),
                "home_score".to_string(),
                "away_score".to_string(),
            ],
            schedule_fields: vec!["date".to_string()],
        }
    }
}

impl StatusPriorityMerge {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_status_field(mut self, field: impl Into<String>) -> Self {
        self.status_field = field.into();
        self
    }

    #[must_use]
    pub fn with_authoritative_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authoritative_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_schedule_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schedule_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    fn status_of(&self, record: &Record) -> Option<MatchStatus> {
        record.str_field(&self.status_field).and_then(MatchStatus::parse)
    }

    fn priority_of(&self, record: &Record) -> u32 {
        self.status_of(record)
            .map_or(UNKNOWN_STATUS_PRIORITY, MatchStatus::priority)
    }

    fn merge_group(&self, mut group: Vec<Record>) -> Option<Record> {
        if group.len() <= 1 {
            return group.pop();
        }

        let mut best = 0;
        for (idx, record) in group.iter().enumerate().skip(1) {
            if self.priority_of(record) < self.priority_of(&group[best]) {
                best = idx;
            }
        }
        let scheduled = group
            .iter()
            .position(|r| self.status_of(r) == Some(MatchStatus::Scheduled));

        let mut merged = group[0].clone();
        let Value::Object(target) = &mut merged.data else {
            return Some(group.swap_remove(best));
        };
        copy_fields(target, &group[best].data, &self.authoritative_fields);
        if let Some(idx) = scheduled {
            copy_fields(target, &group[idx].data, &self.schedule_fields);
        }
        Some(merged)
    }
}

/// Overwrite `fields` in `target` with their values in `source`; a field the
/// source lacks is removed from the target.
fn copy_fields(target: &mut serde_json::Map<String, Value>, source: &Value, fields: &[String]) {
    for field in fields {
        match source.get(field) {
            Some(value) => {
                target.insert(field.clone(), value.clone());
            }
            None => {
                target.remove(field);
            }
        }
    }
}

impl RecordMerger for StatusPriorityMerge {
    fn merge(&self, records: Vec<Record>) -> Snapshot {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<Record>> = HashMap::new();

        for record in records {
            let group = groups.entry(record.id.clone()).or_insert_with(|| {
                order.push(record.id.clone());
                Vec::new()
            });
            group.push(record);
        }

        order
            .into_iter()
            .filter_map(|id| groups.remove(&id))
            .filter_map(|group| self.merge_group(group))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merge(records: Vec<Record>) -> Vec<Record> {
        StatusPriorityMerge::new().merge(records).into_records()
    }

    #[test]
    fn status_order_is_total() {
        let priorities: Vec<u32> = MatchStatus::PRIORITY_ASC
            .iter()
            .map(|s| s.priority())
            .collect();
        assert_eq!(priorities, vec![1, 2, 3, 4]);
        assert!(MatchStatus::Scheduled.priority() < UNKNOWN_STATUS_PRIORITY);
        assert_eq!(MatchStatus::parse("live"), Some(MatchStatus::Live));
        assert_eq!(MatchStatus::parse("postponed"), None);
    }

    #[test]
    fn singletons_pass_through_in_first_seen_order() {
        let out = merge(vec![
            Record::new("b", json!({"status": "live"})),
            Record::new("a", json!({"status": "scheduled"})),
        ]);
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn finished_beats_live_and_keeps_first_seen_ancillary_fields() {
        let out = merge(vec![
            Record::new(
                "m1",
                json!({"status": "live", "home_score": 1, "away_score": 0, "home_participant": "Alcaraz"}),
            ),
            Record::new(
                "m1",
                json!({"status": "finished", "home_score": 3, "away_score": 1, "home_participant": "C. Alcaraz"}),
            ),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data["status"], "finished");
        assert_eq!(out[0].data["home_score"], 3);
        assert_eq!(out[0].data["away_score"], 1);
        assert_eq!(out[0].data["home_participant"], "Alcaraz");
    }

    #[test]
    fn cancelled_wins_and_clears_scores_it_lacks() {
        let out = merge(vec![
            Record::new("m1", json!({"status": "live", "home_score": 2, "away_score": 2})),
            Record::new("m1", json!({"status": "cancelled"})),
        ]);
        assert_eq!(out[0].data["status"], "cancelled");
        assert!(out[0].data.get("home_score").is_none());
        assert!(out[0].data.get("away_score").is_none());
    }

    #[test]
    fn scheduled_duplicate_supplies_date() {
        let out = merge(vec![
            Record::new("m1", json!({"status": "live", "date": null})),
            Record::new("m1", json!({"status": "scheduled", "date": "2025-07-01T13:00:00Z"})),
        ]);
        assert_eq!(out[0].data["status"], "live");
        assert_eq!(out[0].data["date"], "2025-07-01T13:00:00Z");
    }

    #[test]
    fn unknown_status_loses_to_any_known_status() {
        let out = merge(vec![
            Record::new("m1", json!({"status": "postponed", "home_score": 9})),
            Record::new("m1", json!({"status": "scheduled", "home_score": null})),
        ]);
        assert_eq!(out[0].data["status"], "scheduled");
        assert_eq!(out[0].data["home_score"], serde_json::Value::Null);
    }

    #[test]
    fn ties_keep_earliest_authoritative_record() {
        let out = merge(vec![
            Record::new("m1", json!({"status": "live", "home_score": 1})),
            Record::new("m1", json!({"status": "live", "home_score": 2})),
        ]);
        assert_eq!(out[0].data["home_score"], 1);
    }

    #[test]
    fn custom_field_names() {
        let merger = StatusPriorityMerge::new()
            .with_status_field("state")
            .with_authoritative_fields(["state", "score"])
            .with_schedule_fields(["kickoff"]);
        let out = merger
            .merge(vec![
                Record::new("x", json!({"state": "scheduled", "kickoff": "18:00", "score": null})),
                Record::new("x", json!({"state": "live", "score": "1-0"})),
            ])
            .into_records();
        assert_eq!(out[0].data, json!({"state": "live", "score": "1-0", "kickoff": "18:00"}));
    }

    #[test]
    fn non_object_payload_falls_back_to_authoritative_record() {
        let out = merge(vec![
            Record::new("x", json!("raw")),
            Record::new("x", json!({"status": "live"})),
        ]);
        assert_eq!(out[0].data, json!({"status": "live"}));
    }
}
