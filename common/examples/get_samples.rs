use std::env;

use chrono::{Duration, Utc};
use sensor_dashboard_common::samples::{Credentials, SensorPushClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let email = env::var("SENSORPUSH_EMAIL")
        .expect("Environment variable 'SENSORPUSH_EMAIL' is not set.");
    let password = env::var("SENSORPUSH_PASSWORD")
        .expect("Environment variable 'SENSORPUSH_PASSWORD' is not set.");

    let client = SensorPushClient::connect(Credentials { email, password }).await?;
    println!("sensor: {}", client.sensor_name());

    let samples = client.get_samples_since(Utc::now() - Duration::days(1)).await?;
    println!("{} samples over the last 24 h", samples.len());
    for sample in samples.iter().rev().take(5) {
        println!("{:#?}", sample);
    }

    Ok(())
}
