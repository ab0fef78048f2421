// Copyright © SixtyFPS GmbH <info@slint.dev>
// SPDX-License-Identifier: MIT

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::samples::error::SamplesError;

/// One reading reported by the sensor.
///
/// Gateway-only rows carry a timestamp but none of the measures, so every
/// measure is optional.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Sample {
    /// Observation time of the reading, UTC.
    pub observed: DateTime<Utc>,

    /// Temperature in degrees Fahrenheit.
    pub temperature: Option<f64>,

    /// Relative humidity in percent.
    pub humidity: Option<f64>,

    /// Barometric pressure in millibar.
    pub barometric_pressure: Option<f64>,
}

/// A series of samples ascending by observation time. The merge step that
/// produces it sorts but does not deduplicate.
pub type SampleSeries = Vec<Sample>;

/// The user-selectable dashboard window, always ending at now.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeWindow {
    #[default]
    LastThirtyMinutes,
    LastDay,
    LastWeek,
}

impl TimeWindow {
    /// Length of the window.
    pub fn duration(self) -> Duration {
        match self {
            Self::LastThirtyMinutes => Duration::minutes(30),
            Self::LastDay => Duration::days(1),
            Self::LastWeek => Duration::days(7),
        }
    }

    /// Short label for the window selector.
    pub fn label(self) -> &'static str {
        match self {
            Self::LastThirtyMinutes => "30 min",
            Self::LastDay => "24 h",
            Self::LastWeek => "7 days",
        }
    }
}

pub type SamplesControllerPointer = Box<dyn SamplesController + Send>;

/// The samples controller trait that provides the sensor data to the
/// dashboard.
pub trait SamplesController {
    /// The display name of the sensor resolved at startup.
    fn sensor_name(&self) -> Result<String, SamplesError>;

    /// All available readings with observation time in `[start, end]`,
    /// ascending by time. An empty series is a valid answer.
    fn samples_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SampleSeries, SamplesError>;
}

#[test]
fn test_window_durations() {
    assert_eq!(TimeWindow::default(), TimeWindow::LastThirtyMinutes);
    assert_eq!(TimeWindow::LastThirtyMinutes.duration(), Duration::minutes(30));
    assert_eq!(TimeWindow::LastDay.duration(), Duration::hours(24));
    assert_eq!(TimeWindow::LastWeek.duration(), Duration::days(7));
}

#[test]
fn test_window_labels() {
    assert_eq!(TimeWindow::LastThirtyMinutes.label(), "30 min");
    assert_eq!(TimeWindow::LastDay.label(), "24 h");
    assert_eq!(TimeWindow::LastWeek.label(), "7 days");
}
