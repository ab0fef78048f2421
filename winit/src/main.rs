// Prevent console window in addition to Slint window in Windows release builds when, e.g., starting the app via file manager. Ignored on other platforms.
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

slint::include_modules!();

use std::sync::mpsc;

use chrono::{DateTime, Local, Utc};
use sensor_dashboard_common::samples::{
    Credentials, DummySamplesController, Sample, SampleSeries, SamplesControllerPointer,
    SensorPushController, TimeWindow,
};
use sensor_dashboard_common::ValueStore;

/// Chart viewbox dimensions, matching the Path viewbox in appwindow.slint.
const CHART_WIDTH: f64 = 600.0;
const CHART_HEIGHT: f64 = 160.0;

/// One finished fetch, handed from the worker thread to the UI thread.
#[derive(Clone)]
struct FetchUpdate {
    sensor_name: String,
    window: TimeWindow,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    result: Result<SampleSeries, String>,
}

/// Our App struct that holds the UI, the timers and the channel to the
/// fetch worker.
///
/// The worker thread owns the samples controller, because fetching blocks
/// on network I/O. The UI thread only ever touches the `ValueStore` the
/// worker publishes finished fetches into.
struct App {
    ui: AppWindow,
    refresh_tx: mpsc::Sender<TimeWindow>,
    updates: ValueStore<FetchUpdate>,
    refresh_timer: slint::Timer,
    poll_timer: slint::Timer,
}

impl App {
    /// Dashboard refresh cadence.
    const REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

    /// How often the UI thread looks for finished fetches.
    const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

    /// Create a new App struct.
    ///
    /// Initializes the UI, spawns the fetch worker and wires the window
    /// selector buttons to it.
    fn new() -> anyhow::Result<Self> {
        let ui = AppWindow::new()?;

        let (refresh_tx, refresh_rx) = mpsc::channel();
        let updates: ValueStore<FetchUpdate> = ValueStore::default();

        let worker_updates = updates.clone();
        std::thread::spawn(move || worker_loop(&refresh_rx, &worker_updates));

        // Window buttons switch the window and request an immediate refresh.
        let tx = refresh_tx.clone();
        let ui_handle = ui.as_weak();
        ui.global::<ViewModel>().on_window_selected(move |index| {
            let ui = ui_handle.unwrap();
            let model = ui.global::<ViewModel>();
            model.set_selected_window(index);
            model.set_status_text("Loading…".into());
            let _ = tx.send(window_from_index(index));
        });

        Ok(Self {
            ui,
            refresh_tx,
            updates,
            refresh_timer: slint::Timer::default(),
            poll_timer: slint::Timer::default(),
        })
    }

    /// Run the App: start the timers, request the first fetch and enter the
    /// UI event loop.
    fn run(&mut self) -> anyhow::Result<()> {
        // Re-request the selected window at a fixed interval.
        let ui_handle = self.ui.as_weak();
        let tx = self.refresh_tx.clone();
        self.refresh_timer.start(
            slint::TimerMode::Repeated,
            Self::REFRESH_INTERVAL,
            move || {
                let ui = ui_handle.unwrap();
                let index = ui.global::<ViewModel>().get_selected_window();
                let _ = tx.send(window_from_index(index));
            },
        );

        // Apply finished fetches to the view model.
        let ui_handle = self.ui.as_weak();
        let updates = self.updates.clone();
        self.poll_timer.start(
            slint::TimerMode::Repeated,
            Self::POLL_INTERVAL,
            move || {
                if let Some(update) = updates.get() {
                    apply_update(&ui_handle.unwrap(), &update);
                }
            },
        );

        // Kick off the first fetch for the default window.
        let _ = self.refresh_tx.send(TimeWindow::default());

        // Run the UI (and map an error to an anyhow::Error).
        self.ui.run().map_err(|e| e.into())
    }
}

/// Fetch loop running off the UI thread. Connects once, then serves window
/// requests until the UI goes away and the channel closes.
fn worker_loop(requests: &mpsc::Receiver<TimeWindow>, updates: &ValueStore<FetchUpdate>) {
    let failure = |message: String| FetchUpdate {
        sensor_name: "No sensor".to_string(),
        window: TimeWindow::default(),
        start: Utc::now(),
        end: Utc::now(),
        result: Err(message),
    };

    let controller = match controller_from_env() {
        Ok(controller) => controller,
        Err(e) => {
            log::error!("could not set up a samples controller: {e:#}");
            updates.set(failure(format!("Connection failed: {e:#}")));
            return;
        }
    };

    let sensor_name = match controller.sensor_name() {
        Ok(name) => name,
        Err(e) => {
            updates.set(failure(format!("Connection failed: {e}")));
            return;
        }
    };
    log::info!("serving dashboard for sensor {sensor_name}");

    while let Ok(mut window) = requests.recv() {
        // Coalesce queued requests down to the most recent one.
        while let Ok(next) = requests.try_recv() {
            window = next;
        }

        let end = Utc::now();
        let start = end - window.duration();
        let result = controller
            .samples_between(start, end)
            .map_err(|e| format!("Fetch failed: {e}"));
        if let Err(message) = &result {
            log::warn!("{message}");
        }

        updates.set(FetchUpdate {
            sensor_name: sensor_name.clone(),
            window,
            start,
            end,
            result,
        });
    }
}

/// Use the real SensorPush API when credentials are in the environment,
/// otherwise fall back to the dummy controller.
fn controller_from_env() -> anyhow::Result<SamplesControllerPointer> {
    match (
        std::env::var("SENSORPUSH_EMAIL"),
        std::env::var("SENSORPUSH_PASSWORD"),
    ) {
        (Ok(email), Ok(password)) => {
            let controller = SensorPushController::connect(Credentials { email, password })?;
            Ok(Box::new(controller))
        }
        _ => {
            log::info!("SENSORPUSH_EMAIL/SENSORPUSH_PASSWORD not set, using dummy data");
            Ok(Box::new(DummySamplesController::new()))
        }
    }
}

/// Push one finished fetch into the view model. Series for a window the
/// user has already navigated away from are dropped.
fn apply_update(ui: &AppWindow, update: &FetchUpdate) {
    let model = ui.global::<ViewModel>();
    model.set_sensor_name(update.sensor_name.clone().into());

    match &update.result {
        Ok(series) => {
            if window_from_index(model.get_selected_window()) != update.window {
                return;
            }
            model.set_temperature(chart_data(series, |s| s.temperature, update.start, update.end));
            model.set_humidity(chart_data(series, |s| s.humidity, update.start, update.end));
            model.set_pressure(chart_data(
                series,
                |s| s.barometric_pressure,
                update.start,
                update.end,
            ));
            model.set_status_text(
                format!(
                    "{} samples over {}, updated {}",
                    series.len(),
                    update.window.label(),
                    Local::now().format("%H:%M:%S")
                )
                .into(),
            );
        }
        Err(message) => model.set_status_text(message.clone().into()),
    }
}

/// Map the selector button index to a window.
fn window_from_index(index: i32) -> TimeWindow {
    match index {
        1 => TimeWindow::LastDay,
        2 => TimeWindow::LastWeek,
        _ => TimeWindow::LastThirtyMinutes,
    }
}

/// Build the SVG path commands and the axis labels for one measure.
fn chart_data(
    series: &[Sample],
    measure: fn(&Sample) -> Option<f64>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ChartData {
    let span = (end - start).num_seconds().max(1) as f64;
    let points: Vec<(f64, f64)> = series
        .iter()
        .filter_map(|sample| {
            let value = measure(sample)?;
            let elapsed = (sample.observed - start).num_seconds() as f64;
            Some((elapsed / span, value))
        })
        .collect();

    if points.is_empty() {
        return ChartData {
            commands: "".into(),
            min_label: "".into(),
            max_label: "".into(),
            latest_label: "".into(),
        };
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for (_, value) in &points {
        min = min.min(*value);
        max = max.max(*value);
    }
    // A flat series still needs a visible span to draw into.
    if max - min < 1e-9 {
        min -= 1.0;
        max += 1.0;
    }

    let mut commands = String::new();
    for (i, (x, value)) in points.iter().enumerate() {
        let px = x * CHART_WIDTH;
        let py = CHART_HEIGHT - (value - min) / (max - min) * CHART_HEIGHT;
        let op = if i == 0 { 'M' } else { 'L' };
        commands.push_str(&format!("{op} {px:.1} {py:.1} "));
    }

    ChartData {
        commands: commands.trim_end().into(),
        min_label: format!("{min:.1}").into(),
        max_label: format!("{max:.1}").into(),
        latest_label: points
            .last()
            .map(|(_, value)| format!("{value:.1}"))
            .unwrap_or_default()
            .into(),
    }
}

/// A minimal main function that initializes the App and runs it.
fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut app = App::new()?;

    app.run()
}

#[test]
fn test_chart_data_scales_into_the_viewbox() {
    use chrono::TimeZone;

    let start = Utc.with_ymd_and_hms(2023, 2, 27, 0, 0, 0).unwrap();
    let end = start + chrono::Duration::minutes(30);
    let series = vec![
        Sample {
            observed: start,
            temperature: Some(60.0),
            ..Default::default()
        },
        Sample {
            observed: end,
            temperature: Some(70.0),
            ..Default::default()
        },
    ];

    let chart = chart_data(&series, |s| s.temperature, start, end);
    assert_eq!(chart.commands, "M 0.0 160.0 L 600.0 0.0");
    assert_eq!(chart.min_label, "60.0");
    assert_eq!(chart.max_label, "70.0");
    assert_eq!(chart.latest_label, "70.0");
}

#[test]
fn test_chart_data_skips_missing_measures() {
    use chrono::TimeZone;

    let start = Utc.with_ymd_and_hms(2023, 2, 27, 0, 0, 0).unwrap();
    let end = start + chrono::Duration::minutes(30);
    let series = vec![
        Sample {
            observed: start,
            temperature: Some(60.0),
            ..Default::default()
        },
        // Gateway-only row, no measures.
        Sample {
            observed: start + chrono::Duration::minutes(15),
            ..Default::default()
        },
        Sample {
            observed: end,
            temperature: Some(70.0),
            ..Default::default()
        },
    ];

    let chart = chart_data(&series, |s| s.temperature, start, end);
    assert_eq!(chart.commands, "M 0.0 160.0 L 600.0 0.0");

    let empty = chart_data(&series, |s| s.humidity, start, end);
    assert_eq!(empty.commands, "");
    assert_eq!(empty.latest_label, "");
}

#[test]
fn test_window_from_index_defaults_to_thirty_minutes() {
    assert_eq!(window_from_index(0), TimeWindow::LastThirtyMinutes);
    assert_eq!(window_from_index(1), TimeWindow::LastDay);
    assert_eq!(window_from_index(2), TimeWindow::LastWeek);
    assert_eq!(window_from_index(-3), TimeWindow::LastThirtyMinutes);
}
