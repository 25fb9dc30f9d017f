use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// one environmental measurement
///
/// all three fields are required. serde rejects a record with a missing or
/// wrongly typed field, and `time` must carry an offset to count as an
/// absolute instant (e.g. "2024-01-01T00:00:00Z").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// time of data capture
    pub time: DateTime<Utc>,
    /// recorded temperature (°F)
    pub temperature: f64,
    /// relative humidity (0-100%)
    pub humidity: f64,
}

impl Reading {
    pub fn new(time: DateTime<Utc>, temperature: f64, humidity: f64) -> Self {
        Self {
            time,
            temperature,
            humidity,
        }
    }

    /// value picked by a chart field selector
    pub fn field(&self, field: ReadingField) -> f64 {
        match field {
            ReadingField::Temperature => self.temperature,
            ReadingField::Humidity => self.humidity,
        }
    }
}

/// a device log entry (heater on, humidifier off, ...)
///
/// fetched alongside the readings but never merged into the timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// time that `event` occurred
    pub time: DateTime<Utc>,
    pub event: String,
    pub device: String,
}

/// y-axis selector for a chart series; the x-axis is always `time`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingField {
    Temperature,
    Humidity,
}

impl ReadingField {
    /// unit suffix shown next to values of this field
    pub fn suffix(self) -> &'static str {
        match self {
            ReadingField::Temperature => "°F",
            ReadingField::Humidity => "%",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReadingField::Temperature => "Temperature",
            ReadingField::Humidity => "Humidity",
        }
    }
}
