//! Estimator loop: consumes paired gyro/accel samples from the queues, runs
//! the complementary filter and publishes the attitude.

use embassy_time::{with_timeout, Duration, Instant};

use crate::filter::ComplementaryFilter;
use crate::shared::SharedState;
use crate::sources::{AlarmSink, TelemetryBus, Watchdog};
use crate::state::{
    AccelSample, Alarm, AlarmSeverity, AttitudeEstimate, GyroSample, SampleReceiver, WatchdogFlag,
};

/// Longest wait per queue receive before the step is abandoned.
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(10);

/// Guard range for the measured step interval (nominal 2 ms).
const DT_MIN: f32 = 0.0005;
const DT_MAX: f32 = 0.01;

pub struct AttitudeLoop<'a, B, L, W> {
    bus: B,
    alarms: L,
    watchdog: W,
    shared: &'a SharedState,
    gyro_rx: SampleReceiver<'a, GyroSample>,
    accel_rx: SampleReceiver<'a, AccelSample>,
    pub filter: ComplementaryFilter,
}

impl<'a, B, L, W> AttitudeLoop<'a, B, L, W>
where
    B: TelemetryBus,
    L: AlarmSink,
    W: Watchdog,
{
    pub fn new(
        bus: B,
        alarms: L,
        watchdog: W,
        shared: &'a SharedState,
        gyro_rx: SampleReceiver<'a, GyroSample>,
        accel_rx: SampleReceiver<'a, AccelSample>,
    ) -> Self {
        Self {
            bus,
            alarms,
            watchdog,
            shared,
            gyro_rx,
            accel_rx,
            filter: ComplementaryFilter::new(),
        }
    }

    /// Run the estimator task. Never returns.
    pub async fn run(mut self) -> ! {
        self.watchdog.register(WatchdogFlag::Attitude);
        self.alarms.clear(Alarm::Attitude);

        // Settings may not have been delivered yet; load them here so gains
        // and board rotation are populated before the first step
        let settings = self.bus.attitude_settings();
        self.shared.apply_settings(&settings);

        let mut last = Instant::now();
        loop {
            if let Some((gyro, accel)) = self.receive_pair().await {
                let now = Instant::now();
                let dt = ((now - last).as_micros() as f32 / 1_000_000.0).clamp(DT_MIN, DT_MAX);
                last = now;
                self.step(dt, &gyro, &accel);
            }
            self.watchdog.stroke(WatchdogFlag::Attitude);
        }
    }

    async fn receive_pair(&mut self) -> Option<(GyroSample, AccelSample)> {
        let gyro = with_timeout(RECEIVE_TIMEOUT, self.gyro_rx.receive()).await;
        let Ok(gyro) = gyro else {
            self.on_starved();
            return None;
        };
        let accel = with_timeout(RECEIVE_TIMEOUT, self.accel_rx.receive()).await;
        let Ok(accel) = accel else {
            self.on_starved();
            return None;
        };
        Some((gyro, accel))
    }

    /// A queue ran dry for a full timeout; the wait restarts afterwards.
    pub fn on_starved(&mut self) {
        self.alarms.set(Alarm::Attitude, AlarmSeverity::Error);
    }

    /// One estimator step over a paired sample.
    pub fn step(&mut self, dt: f32, gyro: &GyroSample, accel: &AccelSample) {
        let gains = self.shared.gains();
        let accel_err = self.filter.step(dt, gyro, accel, gains.accel_kp);

        // Integral feedback lands on the roll/pitch bias cells; the sensor
        // loop owns the z cell through the yaw leak
        self.shared
            .bias_xy
            .accumulate(accel_err[0] * gains.accel_ki, accel_err[1] * gains.accel_ki);

        let q = self.filter.q;
        let (roll, pitch, yaw) = q.to_rpy_deg();
        self.bus.publish_attitude(&AttitudeEstimate {
            q,
            roll,
            pitch,
            yaw,
        });
        self.alarms.clear(Alarm::Attitude);
    }
}
