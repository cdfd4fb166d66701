//! Periodic sensor polling
//!
//! A Tokio task samples the enabled sensors on a fixed schedule and publishes
//! a [`SensorObservation`] whenever at least one of them answered. Sampling
//! blocks on device I/O, so each tick runs on the blocking pool; the
//! transport guard is only held inside that work, never across the timer.

use crate::device::CommandTransport;
use async_channel::{Sender, TrySendError};
use protocol::{SensorKind, SensorObservation, SensorReading};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Delay before the first tick
pub const INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Something that can be asked for one sensor value
///
/// `None` means no reading this time; it is never an error.
pub trait SensorSource: Send + Sync + 'static {
    fn read_sensor(&self, kind: SensorKind) -> Option<f32>;
}

impl SensorSource for CommandTransport {
    fn read_sensor(&self, kind: SensorKind) -> Option<f32> {
        CommandTransport::read_sensor(self, kind)
    }
}

/// Poller schedule and sensor selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSettings {
    pub initial_delay: Duration,
    pub period: Duration,
    /// Sensors to sample; always polled in [`SensorKind::ALL`] order
    pub enabled: Vec<SensorKind>,
}

impl PollerSettings {
    pub fn new(period: Duration, temperature: bool, humidity: bool) -> Self {
        let enabled = SensorKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                SensorKind::Temperature => temperature,
                SensorKind::Humidity => humidity,
            })
            .collect();
        Self {
            initial_delay: INITIAL_DELAY,
            period,
            enabled,
        }
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Enabled sensors, deduplicated, temperature first
    fn sampling_order(&self) -> Vec<SensorKind> {
        SensorKind::ALL
            .into_iter()
            .filter(|kind| self.enabled.contains(kind))
            .collect()
    }
}

/// Sensor poller
pub struct SensorPoller {
    source: Arc<dyn SensorSource>,
    settings: PollerSettings,
    observations: Sender<SensorObservation>,
}

impl SensorPoller {
    pub fn new(
        source: Arc<dyn SensorSource>,
        settings: PollerSettings,
        observations: Sender<SensorObservation>,
    ) -> Self {
        Self {
            source,
            settings,
            observations,
        }
    }

    /// Start ticking; must be called from within a Tokio runtime
    ///
    /// With no sensors enabled nothing is scheduled and the returned handle
    /// reports not running.
    pub fn start(self) -> PollerHandle {
        let kinds = self.settings.sampling_order();
        let (stop_tx, stop_rx) = watch::channel(false);

        if kinds.is_empty() {
            info!("Sensor polling disabled");
            return PollerHandle {
                stop: stop_tx,
                task: None,
            };
        }

        let period = if self.settings.period.is_zero() {
            warn!("Sensor poll period is zero, using 1s");
            Duration::from_secs(1)
        } else {
            self.settings.period
        };

        info!(
            "Polling {:?} every {:?} after {:?}",
            kinds, period, self.settings.initial_delay
        );

        let start = Instant::now() + self.settings.initial_delay;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let task = tokio::spawn(run_ticks(
            self.source,
            kinds,
            self.observations,
            ticker,
            stop_rx,
        ));

        PollerHandle {
            stop: stop_tx,
            task: Some(task),
        }
    }
}

async fn run_ticks(
    source: Arc<dyn SensorSource>,
    kinds: Vec<SensorKind>,
    observations: Sender<SensorObservation>,
    mut ticker: tokio::time::Interval,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }

        let tick_source = source.clone();
        let tick_kinds = kinds.clone();
        let outcome =
            tokio::task::spawn_blocking(move || sample_once(tick_source.as_ref(), &tick_kinds))
                .await;

        match outcome {
            Ok(Some(observation)) => publish(&observations, observation),
            Ok(None) => debug!("No sensor data this tick"),
            Err(e) => error!("Sensor tick failed: {}", e),
        }

        if *stop.borrow() {
            break;
        }
    }
    debug!("Sensor poller stopped");
}

/// Sample every kind in order; `None` when nothing answered
fn sample_once(source: &dyn SensorSource, kinds: &[SensorKind]) -> Option<SensorObservation> {
    let mut readings = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        match source.read_sensor(kind) {
            Some(value) => readings.push(SensorReading { kind, value }),
            None => warn!("No {} reading this tick", kind),
        }
    }

    if readings.is_empty() {
        None
    } else {
        Some(SensorObservation {
            at: SystemTime::now(),
            readings,
        })
    }
}

fn publish(observations: &Sender<SensorObservation>, observation: SensorObservation) {
    match observations.try_send(observation) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!("Observer is behind, dropping sensor observation"),
        Err(TrySendError::Closed(_)) => debug!("No observer for sensor observations"),
    }
}

/// Control handle for a started poller
///
/// Dropping the handle stops the poller.
pub struct PollerHandle {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Cancel future ticks; a tick already sampling finishes first
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop and wait for the loop to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            error!("Sensor poller task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_flags() {
        let period = Duration::from_secs(10);
        assert_eq!(
            PollerSettings::new(period, true, true).enabled,
            vec![SensorKind::Temperature, SensorKind::Humidity]
        );
        assert_eq!(
            PollerSettings::new(period, false, true).enabled,
            vec![SensorKind::Humidity]
        );
        assert!(PollerSettings::new(period, false, false).enabled.is_empty());
        assert_eq!(PollerSettings::new(period, true, true).initial_delay, INITIAL_DELAY);
    }

    #[test]
    fn test_sampling_order_ignores_configured_order() {
        let settings = PollerSettings {
            initial_delay: Duration::ZERO,
            period: Duration::from_secs(1),
            enabled: vec![SensorKind::Humidity, SensorKind::Temperature, SensorKind::Humidity],
        };
        assert_eq!(
            settings.sampling_order(),
            vec![SensorKind::Temperature, SensorKind::Humidity]
        );
    }

    struct Fixed(Option<f32>, Option<f32>);

    impl SensorSource for Fixed {
        fn read_sensor(&self, kind: SensorKind) -> Option<f32> {
            match kind {
                SensorKind::Temperature => self.0,
                SensorKind::Humidity => self.1,
            }
        }
    }

    #[test]
    fn test_sample_once_partial() {
        let kinds = SensorKind::ALL;
        let obs = sample_once(&Fixed(None, Some(40.0)), &kinds).unwrap();
        assert_eq!(obs.readings.len(), 1);
        assert_eq!(obs.get(SensorKind::Humidity), Some(40.0));
        assert_eq!(obs.get(SensorKind::Temperature), None);

        assert!(sample_once(&Fixed(None, None), &kinds).is_none());
    }

    #[tokio::test]
    async fn test_disabled_poller_is_not_running() {
        let (tx, _rx) = async_channel::bounded(1);
        let handle = SensorPoller::new(
            Arc::new(Fixed(Some(1.0), None)),
            PollerSettings::new(Duration::from_secs(1), false, false),
            tx,
        )
        .start();

        assert!(!handle.is_running());
        handle.stop();
        handle.shutdown().await;
    }
}
