//! ==============================================================================
//! overview.rs - the screen: owner of the timeline
//! ==============================================================================
//!
//! purpose:
//!     folds history batches and live readings into the one Timeline and
//!     derives what the two screen sections show:
//!     - Climate: the latest reading (temperature, humidity, time of day)
//!     - History: one ordered series per charted field (x = time)
//!
//! empty state:
//!     an empty screen shows the loading indicator until someone marks it
//!     complete; only then does it switch to the "no data" message.
//!
//! relationships:
//!     - owns: timeline.rs
//!     - fed by: dashboard.rs (the only writer)
//!     - read by: web.rs
//!
//! ==============================================================================

use crate::config::DisplayZone;
use crate::domain::{DeviceEvent, Reading, ReadingField};
use crate::history::Fetched;
use crate::stream::StreamStatus;
use crate::timeline::Timeline;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

/// fields drawn in the History section, in display order
pub const CHARTED_FIELDS: [ReadingField; 2] = [ReadingField::Temperature, ReadingField::Humidity];

// ==============================================================================
// panels
// ==============================================================================

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClimatePanel {
    Loading,
    NoData,
    Latest {
        temperature: String,
        humidity: String,
        time: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartPoint {
    pub time: DateTime<Utc>,
    pub value: f64,
}

/// what a chart renderer consumes: ordered points for one field selector
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartSeries {
    pub name: &'static str,
    pub field: ReadingField,
    pub suffix: &'static str,
    pub points: Vec<ChartPoint>,
}

impl ChartSeries {
    pub fn project(readings: &[Reading], field: ReadingField) -> Self {
        Self {
            name: field.label(),
            field,
            suffix: field.suffix(),
            points: readings
                .iter()
                .map(|r| ChartPoint {
                    time: r.time,
                    value: r.field(field),
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", content = "series", rename_all = "snake_case")]
pub enum HistoryPanel {
    Loading,
    NoData,
    Charts(Vec<ChartSeries>),
}

/// compact summary for the status endpoint
#[derive(Clone, Debug, Serialize)]
pub struct OverviewStatus {
    pub readings: usize,
    pub devices: usize,
    pub history_loading: bool,
    pub history_error: Option<String>,
    pub stream: StreamStatus,
    pub complete: bool,
    pub ordering_violations: usize,
}

// ==============================================================================
// formatting
// ==============================================================================

/// round to two decimals, print in shortest form: 71 -> "71°F", 71.256 -> "71.26°F"
pub fn format_value(value: f64, suffix: &str) -> String {
    let scaled = value * 100.0;
    // near f64::MAX there is nothing left to round
    let mut rounded = if scaled.is_finite() { scaled.round() / 100.0 } else { value };
    if rounded == 0.0 {
        rounded = 0.0; // no "-0"
    }
    format!("{}{}", rounded, suffix)
}

/// "hh:mmAM" / "hh:mmPM", no whitespace
pub fn format_time_of_day(time: DateTime<Utc>, zone: DisplayZone) -> String {
    const PATTERN: &str = "%I:%M%p";
    match zone {
        DisplayZone::Local => time.with_timezone(&Local).format(PATTERN).to_string(),
        DisplayZone::Utc => time.format(PATTERN).to_string(),
    }
}

// ==============================================================================
// overview
// ==============================================================================

#[derive(Debug)]
pub struct Overview {
    timeline: Timeline,
    devices: Vec<DeviceEvent>,
    history_generation: u64,
    devices_generation: u64,
    history_loading: bool,
    history_error: Option<String>,
    stream: StreamStatus,
    complete: bool,
    zone: DisplayZone,
}

impl Overview {
    pub fn new(zone: DisplayZone) -> Self {
        Self {
            timeline: Timeline::new(),
            devices: Vec::new(),
            history_generation: 0,
            devices_generation: 0,
            history_loading: false,
            history_error: None,
            stream: StreamStatus::Connecting,
            complete: false,
            zone,
        }
    }

    /// take in the fetcher state; a new batch is prepended in full.
    /// returns true when the timeline changed.
    pub fn apply_history(&mut self, fetched: &Fetched<Reading>) -> bool {
        self.history_loading = fetched.loading;
        self.history_error = fetched.error.clone();

        if fetched.generation == self.history_generation {
            return false;
        }
        self.history_generation = fetched.generation;
        self.timeline.prepend_batch(&fetched.data);
        !fetched.data.is_empty()
    }

    /// device events are kept as fetched, never merged with readings
    pub fn apply_devices(&mut self, fetched: &Fetched<DeviceEvent>) {
        if fetched.generation != self.devices_generation {
            self.devices_generation = fetched.generation;
            self.devices = fetched.data.clone();
        }
    }

    pub fn apply_live(&mut self, reading: Reading) {
        self.timeline.append(reading);
    }

    pub fn set_stream_status(&mut self, status: StreamStatus) {
        self.stream = status;
    }

    /// nothing more is expected for now; an empty screen may say so
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// loading indicator: no data yet and nobody declared the wait over
    pub fn is_loading(&self) -> bool {
        self.timeline.is_empty() && !self.complete
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.timeline.latest()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn devices(&self) -> &[DeviceEvent] {
        &self.devices
    }

    pub fn history_loading(&self) -> bool {
        self.history_loading
    }

    /// the history fetch finished at least once and nothing is in flight
    pub fn history_settled(&self) -> bool {
        self.history_generation > 0 && !self.history_loading
    }

    pub fn climate(&self) -> ClimatePanel {
        match self.latest() {
            Some(latest) => ClimatePanel::Latest {
                temperature: format_value(latest.temperature, ReadingField::Temperature.suffix()),
                humidity: format_value(latest.humidity, ReadingField::Humidity.suffix()),
                time: format_time_of_day(latest.time, self.zone),
            },
            None if self.complete => ClimatePanel::NoData,
            None => ClimatePanel::Loading,
        }
    }

    pub fn history(&self) -> HistoryPanel {
        if self.timeline.is_empty() {
            return if self.complete {
                HistoryPanel::NoData
            } else {
                HistoryPanel::Loading
            };
        }
        let readings = self.timeline.as_slice();
        HistoryPanel::Charts(
            CHARTED_FIELDS
                .iter()
                .map(|field| ChartSeries::project(readings, *field))
                .collect(),
        )
    }

    pub fn status(&self) -> OverviewStatus {
        OverviewStatus {
            readings: self.timeline.len(),
            devices: self.devices.len(),
            history_loading: self.history_loading,
            history_error: self.history_error.clone(),
            stream: self.stream.clone(),
            complete: self.complete,
            ordering_violations: self.timeline.ordering_violations(),
        }
    }
}
