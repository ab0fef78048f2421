// Copyright © SixtyFPS GmbH <info@slint.dev>
// SPDX-License-Identifier: MIT

mod samplescontroller;
mod dummysamplescontroller;
mod sensorpushcontroller;
mod error;

pub use samplescontroller::SamplesController;
pub use samplescontroller::SamplesControllerPointer;
pub use samplescontroller::{Sample, SampleSeries, TimeWindow};

pub use dummysamplescontroller::DummySamplesController;

pub use sensorpushcontroller::{Credentials, SensorPushClient, SensorPushController};

pub use error::{RequestError, SamplesError};
