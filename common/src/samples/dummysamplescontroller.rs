// Copyright © SixtyFPS GmbH <info@slint.dev>
// SPDX-License-Identifier: MIT

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::samples::error::SamplesError;
use crate::samples::samplescontroller::{Sample, SampleSeries, SamplesController};

/// Controller producing a deterministic synthetic series, so the dashboard
/// can run without SensorPush credentials.
#[derive(Default)]
pub struct DummySamplesController;

impl DummySamplesController {
    pub fn new() -> Self {
        Self
    }

    /// One synthetic reading: smooth daily swings for all three measures.
    fn sample_at(observed: DateTime<Utc>) -> Sample {
        let day_fraction = f64::from(observed.time().num_seconds_from_midnight()) / 86_400.0;
        let phase = day_fraction * std::f64::consts::TAU;
        Sample {
            observed,
            temperature: Some(68.0 + 6.0 * phase.sin()),
            humidity: Some(45.0 + 10.0 * (phase + 1.0).cos()),
            barometric_pressure: Some(1_013.0 + 4.0 * (phase / 2.0).sin()),
        }
    }
}

impl SamplesController for DummySamplesController {
    fn sensor_name(&self) -> Result<String, SamplesError> {
        Ok("Dummy Sensor".to_string())
    }

    fn samples_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SampleSeries, SamplesError> {
        let step = Duration::minutes(1);
        let mut series = SampleSeries::new();
        let mut observed = start;
        while observed <= end {
            series.push(Self::sample_at(observed));
            observed += step;
        }
        Ok(series)
    }
}

#[test]
fn test_dummy_samples_controller() {
    let controller = DummySamplesController::new();
    assert_eq!(controller.sensor_name().unwrap(), "Dummy Sensor");

    let end = Utc::now();
    let start = end - Duration::minutes(30);
    let series = controller.samples_between(start, end).unwrap();

    assert!(!series.is_empty());
    assert!(series.windows(2).all(|pair| pair[0].observed <= pair[1].observed));
    assert!(series
        .iter()
        .all(|sample| sample.observed >= start && sample.observed <= end));
    assert!(series.iter().all(|sample| sample.temperature.is_some()
        && sample.humidity.is_some()
        && sample.barometric_pressure.is_some()));
}

#[test]
fn test_dummy_series_is_deterministic() {
    use chrono::TimeZone;

    let controller = DummySamplesController::new();
    let start = Utc.with_ymd_and_hms(2023, 2, 27, 12, 0, 0).unwrap();
    let end = start + Duration::minutes(5);

    let first = controller.samples_between(start, end).unwrap();
    let second = controller.samples_between(start, end).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 6);
}
