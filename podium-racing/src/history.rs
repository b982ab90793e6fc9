//! The feed of resolved events, from which priors are fitted and calibration datasets are built.

use std::path::Path;

use anyhow::{bail, Context};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use podium::bayes::belief::EntrantHistory;
use podium::bayes::EventOutcome;
use podium::calibrate::{CalibrationDataset, CalibrationEvent, CalibrationSample};
use podium::entrant::EntrantId;
use podium::file::read_json_opt;

use crate::context::TrackType;
use crate::registry::EntrantRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEvent {
    pub event_id: String,
    #[serde(default)]
    pub track_type: Option<TrackType>,
    /// Every classified entrant, winner first.
    pub finishing_order: Vec<EntrantId>,
    #[serde(default)]
    pub non_finishers: Vec<EntrantId>,
    /// Uncorrected win probabilities issued before the event, keyed by entrant.
    #[serde(default)]
    pub raw_predictions: FxHashMap<EntrantId, f64>,
}
impl HistoricalEvent {
    pub fn outcome(&self) -> EventOutcome {
        EventOutcome::new(self.event_id.clone(), self.finishing_order.clone())
            .with_non_finishers(self.non_finishers.clone())
    }

    /// The event as a calibration sample, or `None` if any classified entrant lacks a raw
    /// prediction.
    pub fn calibration_event(&self, registry: &EntrantRegistry) -> Option<CalibrationEvent> {
        let winner = self.finishing_order.first()?;
        let entrants = self
            .finishing_order
            .iter()
            .map(|entrant| {
                let raw_probability = *self.raw_predictions.get(entrant)?;
                let sample = CalibrationSample {
                    entrant: entrant.clone(),
                    group: registry.group(entrant).map(str::to_string),
                    raw_probability,
                };
                Some(sample)
            })
            .collect::<Option<Vec<_>>>()?;
        Some(CalibrationEvent {
            event_id: self.event_id.clone(),
            track_type: self.track_type.map(|track_type| track_type.to_string()),
            entrants,
            winner: winner.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalFeed {
    pub events: Vec<HistoricalEvent>,
}
impl HistoricalFeed {
    /// Loads the feed from `path`, or `None` if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, anyhow::Error> {
        let path = path.as_ref();
        let feed: Option<Self> = read_json_opt(path)
            .with_context(|| format!("reading historical feed from {}", path.display()))?;
        if let Some(feed) = &feed {
            feed.validate()?;
            debug!("loaded {} historical events from {}", feed.events.len(), path.display());
        }
        Ok(feed)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let mut event_ids = FxHashSet::default();
        for event in &self.events {
            if !event_ids.insert(event.event_id.as_str()) {
                bail!("duplicate event {}", event.event_id);
            }
            event
                .outcome()
                .validate()
                .with_context(|| format!("in historical event {}", event.event_id))?;
            for (entrant, &probability) in &event.raw_predictions {
                if !(0.0..=1.0).contains(&probability) {
                    bail!(
                        "raw prediction of {entrant} in event {} must be in [0, 1], got {probability}",
                        event.event_id
                    );
                }
            }
        }
        Ok(())
    }

    /// Per-entrant summaries over every event in the feed.
    pub fn histories(&self) -> FxHashMap<EntrantId, EntrantHistory> {
        let mut histories: FxHashMap<EntrantId, EntrantHistory> = FxHashMap::default();
        for event in &self.events {
            let outcome = event.outcome();
            for (index, entrant) in event.finishing_order.iter().enumerate() {
                histories
                    .entry(entrant.clone())
                    .or_default()
                    .record(index + 1, outcome.finished(entrant));
            }
        }
        histories
    }

    /// The events that carry raw predictions for every classified entrant. Events without are
    /// skipped and counted in the log.
    pub fn calibration_dataset(&self, registry: &EntrantRegistry) -> CalibrationDataset {
        let events: Vec<_> = self
            .events
            .iter()
            .filter_map(|event| event.calibration_event(registry))
            .collect();
        let skipped = self.events.len() - events.len();
        if skipped > 0 {
            warn!(
                "skipped {skipped} of {} historical events without complete raw predictions",
                self.events.len()
            );
        }
        CalibrationDataset { events }
    }
}
