//! Registry event consumer: logs change summaries and newly seen entities, and
//! optionally appends every change to a JSONL file.

use std::io::Write;
use std::path::Path;

use scorewatch_core::{ChangeKind, ChangeRecord, EntityCatalog};
use scorewatch_monitor::{MonitorUpdate, RegistryEvent};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// One line of the changes file.
#[derive(Debug, Serialize)]
pub struct RecordedChange<'a> {
    pub ts: String,
    pub monitor: &'a str,
    #[serde(flatten)]
    pub change: &'a ChangeRecord,
}

pub struct ChangeRecorder {
    writer: Option<std::fs::File>,
    rx: broadcast::Receiver<RegistryEvent>,
    cancel: CancellationToken,
    known: EntityCatalog,
}

impl ChangeRecorder {
    /// `changes_out` is opened in append mode.
    pub fn new(
        rx: broadcast::Receiver<RegistryEvent>,
        changes_out: Option<&Path>,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let writer = changes_out
            .map(|path| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
            })
            .transpose()?;
        Ok(Self {
            writer,
            rx,
            cancel,
            known: EntityCatalog::default(),
        })
    }

    /// Consume events until cancelled or the channel closes.
    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                result = self.rx.recv() => match result {
                    Ok(event) => self.handle(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "recorder lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("recorder: event channel closed");
                        break;
                    }
                },
                () = self.cancel.cancelled() => {
                    tracing::debug!("recorder: cancellation requested");
                    break;
                }
            }
        }
    }

    fn handle(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::MonitorUpdate { name, update } => self.record_update(&name, &update),
            RegistryEvent::MonitorError { name, error } => {
                tracing::error!(monitor = %name, "monitor gave up: {error}");
            }
            RegistryEvent::AllStarted { total, running } => {
                tracing::info!("{running}/{total} monitors running");
            }
            other => tracing::debug!(event = ?other, "registry event"),
        }
    }

    fn record_update(&mut self, monitor: &str, update: &MonitorUpdate) {
        let count = |kind: ChangeKind| update.changes.iter().filter(|c| c.kind() == kind).count();
        tracing::info!(
            monitor = %monitor,
            added = count(ChangeKind::Added),
            updated = count(ChangeKind::Updated),
            removed = count(ChangeKind::Removed),
            records = update.snapshot.len(),
            "snapshot updated"
        );

        let fresh = EntityCatalog::from_records(update.snapshot.iter()).difference(&self.known);
        if !fresh.is_empty() {
            tracing::info!(
                monitor = %monitor,
                sports = ?fresh.sports,
                leagues = fresh.leagues.len(),
                participants = fresh.participants.len(),
                "new entities seen"
            );
            self.known.absorb(fresh);
        }

        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let ts = update.timestamp.to_rfc3339();
        for change in &update.changes {
            let line = RecordedChange {
                ts: ts.clone(),
                monitor,
                change,
            };
            match serde_json::to_string(&line) {
                Ok(line) => {
                    if let Err(e) = writeln!(writer, "{line}") {
                        tracing::error!("recorder write failed: {e}");
                    }
                }
                Err(e) => tracing::error!("recorder serialization failed: {e}"),
            }
        }
        if let Err(e) = writer.flush() {
            tracing::error!("recorder flush failed: {e}");
        }
    }

    /// Entities seen so far.
    pub fn known(&self) -> &EntityCatalog {
        &self.known
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use scorewatch_core::{Record, Snapshot, detect_changes};
    use serde_json::json;

    fn update(old: &Snapshot, new: Snapshot) -> Arc<MonitorUpdate> {
        Arc::new(MonitorUpdate {
            changes: detect_changes(old, &new),
            snapshot: Arc::new(new),
            timestamp: Utc::now(),
        })
    }

    fn match_record(id: &str, status: &str, home: &str) -> Record {
        Record::new(
            id,
            json!({
                "status": status,
                "sport": "Tennis",
                "league": "Wimbledon",
                "home_participant": home,
            }),
        )
    }

    #[tokio::test]
    async fn writes_one_line_per_change_and_tracks_entities() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("changes.jsonl");
        let (tx, rx) = broadcast::channel(16);
        let mut recorder =
            ChangeRecorder::new(rx, Some(&path), CancellationToken::new()).expect("open");

        let first = Snapshot::new(vec![match_record("m1", "scheduled", "Sinner")]);
        let second = Snapshot::new(vec![
            match_record("m1", "live", "Sinner"),
            match_record("m2", "scheduled", "Alcaraz"),
        ]);
        tx.send(RegistryEvent::MonitorUpdate {
            name: "tennis".into(),
            update: update(&Snapshot::empty(), first.clone()),
        })
        .expect("send");
        tx.send(RegistryEvent::MonitorUpdate {
            name: "tennis".into(),
            update: update(&first, second),
        })
        .expect("send");
        drop(tx);

        recorder.run().await;

        let text = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "added");
        assert_eq!(lines[0]["monitor"], "tennis");
        assert_eq!(lines[1]["type"], "updated");
        assert_eq!(lines[1]["new_data"]["status"], "live");
        assert_eq!(lines[2]["id"], "m2");
        assert!(lines[2]["ts"].is_string());

        assert_eq!(recorder.known().sports, vec!["Tennis"]);
        assert_eq!(recorder.known().participants, vec!["Sinner", "Alcaraz"]);
    }

    #[tokio::test]
    async fn stops_on_cancel_without_output_file() {
        let (_tx, rx) = broadcast::channel(4);
        let cancel = CancellationToken::new();
        let mut recorder = ChangeRecorder::new(rx, None, cancel.clone()).expect("create");
        cancel.cancel();
        recorder.run().await;
        assert!(recorder.known().is_empty());
    }
}
