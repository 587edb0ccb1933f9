//! Sensor acquisition loop: drains the accel/gyro FIFOs at 500 Hz, averages
//! and scales the readings, feeds the estimator queues and the telemetry bus.

use embassy_time::{Duration, Instant, Ticker, Timer};

use crate::math;
use crate::shared::SharedState;
use crate::sources::{AlarmSink, InertialSource, MagSource, TelemetryBus, Watchdog};
use crate::state::{
    AccelSample, Alarm, AlarmSeverity, FlightStatus, GyroSample, MagSample, SampleSender,
    WatchdogFlag,
};

/// Acquisition period: 500 Hz.
const SENSOR_PERIOD: Duration = Duration::from_millis(2);

/// Uptime window during which the accels pull the estimate hard to identify
/// the initial gyro bias.
const BOOTSTRAP_START_MS: u64 = 1000;
const BOOTSTRAP_END_MS: u64 = 7000;

/// Gains forced during bootstrap and arming recalibration.
const BOOTSTRAP_ACCEL_KP: f32 = 1.0;
const BOOTSTRAP_ACCEL_KI: f32 = 0.9;
const BOOTSTRAP_YAW_BIAS_RATE: f32 = 0.23;

/// Empty polls tolerated while waiting for the first FIFO sample of a tick.
const FIFO_SPIN_LIMIT: u32 = 1000;

/// A required sensor produced no samples this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorReadError;

// ── Task ─────────────────────────────────────────────────────────────────────

pub struct SensorLoop<'a, G, A, M, B, L, W> {
    gyro: G,
    accel: A,
    mag: M,
    bus: B,
    alarms: L,
    watchdog: W,
    shared: &'a SharedState,
    gyro_tx: SampleSender<'a, GyroSample>,
    accel_tx: SampleSender<'a, AccelSample>,
    init: bool,
}

impl<'a, G, A, M, B, L, W> SensorLoop<'a, G, A, M, B, L, W>
where
    G: InertialSource,
    A: InertialSource,
    M: MagSource,
    B: TelemetryBus,
    L: AlarmSink,
    W: Watchdog,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gyro: G,
        accel: A,
        mag: M,
        bus: B,
        alarms: L,
        watchdog: W,
        shared: &'a SharedState,
        gyro_tx: SampleSender<'a, GyroSample>,
        accel_tx: SampleSender<'a, AccelSample>,
    ) -> Self {
        Self {
            gyro,
            accel,
            mag,
            bus,
            alarms,
            watchdog,
            shared,
            gyro_tx,
            accel_tx,
            init: false,
        }
    }

    /// Run the acquisition task. Never returns.
    pub async fn run(mut self) -> ! {
        self.watchdog.register(WatchdogFlag::Sensors);
        self.alarms.clear(Alarm::Sensors);

        if !self.self_test() {
            // Sensors are gone. Keep the watchdog fed so the rest of the
            // controller stays alive; attitude never publishes.
            loop {
                self.watchdog.stroke(WatchdogFlag::Sensors);
                Timer::after(Duration::from_millis(1)).await;
            }
        }

        let mut ticker = Ticker::every(SENSOR_PERIOD);
        loop {
            ticker.next().await;
            self.tick(Instant::now().as_millis());
        }
    }

    /// Startup self tests; CRITICAL on any failure.
    pub fn self_test(&mut self) -> bool {
        let accel_ok = self.accel.self_test().is_ok();
        let gyro_ok = self.gyro.self_test().is_ok();
        let mag_ok = self.mag.self_test().is_ok();

        if accel_ok && gyro_ok && mag_ok {
            true
        } else {
            #[cfg(feature = "defmt")]
            defmt::error!(
                "sensor self-test failed (accel={} gyro={} mag={})",
                accel_ok,
                gyro_ok,
                mag_ok
            );
            self.alarms.set(Alarm::Sensors, AlarmSeverity::Critical);
            false
        }
    }

    /// One acquisition revolution at the given uptime.
    pub fn tick(&mut self, uptime_ms: u64) {
        if let Some(settings) = self.bus.poll_settings() {
            self.shared.apply_settings(&settings);
        }

        let status = self.bus.flight_status();
        self.update_gains(uptime_ms, status);

        if self.acquire().is_err() {
            self.alarms.set(Alarm::Attitude, AlarmSeverity::Error);
        }

        self.watchdog.stroke(WatchdogFlag::Sensors);
    }

    fn update_gains(&mut self, uptime_ms: u64, status: FlightStatus) {
        if uptime_ms > BOOTSTRAP_START_MS && uptime_ms < BOOTSTRAP_END_MS {
            // Early startup: use the accels to find the gyro bias
            self.shared.set_gains(
                BOOTSTRAP_ACCEL_KP,
                BOOTSTRAP_ACCEL_KI,
                BOOTSTRAP_YAW_BIAS_RATE,
            );
            self.init = false;
        } else if self.shared.zero_during_arming() && status == FlightStatus::Arming {
            self.shared.set_gains(
                BOOTSTRAP_ACCEL_KP,
                BOOTSTRAP_ACCEL_KI,
                BOOTSTRAP_YAW_BIAS_RATE,
            );
            self.init = false;
        } else if !self.init {
            // Reload the rates the override has been masking
            let settings = self.bus.attitude_settings();
            self.shared
                .set_gains(settings.accel_kp, settings.accel_ki, settings.yaw_bias_rate);
            self.init = true;
        }
    }

    fn acquire(&mut self) -> Result<(), SensorReadError> {
        let rotation = self.shared.rotation();

        // Accel: average, bias, scale
        let (avg, raw_temp) = drain_fifo(&mut self.accel).ok_or(SensorReadError)?;
        let scale = self.accel.scale();
        let bias = self.shared.accel_bias();
        let mut accel_v = [
            (avg[0] - bias[0]) * scale,
            (avg[1] - bias[1]) * scale,
            (avg[2] - bias[2]) * scale,
        ];
        if let Some(r) = rotation {
            accel_v = math::rotate(&r, accel_v);
        }
        let accel_out = AccelSample {
            x: accel_v[0],
            y: accel_v[1],
            z: accel_v[2],
            temperature: 25.0 + (raw_temp as f32 - 2.0) / 2.0,
        };
        self.bus.publish_accels(&accel_out);
        if self.accel_tx.try_send(accel_out).is_err() {
            self.alarms.set(Alarm::Attitude, AlarmSeverity::Warning);
        }

        // Gyro: the estimator integrates bias itself, so its queue copy
        // stays uncorrected
        let (avg, raw_temp) = drain_fifo(&mut self.gyro).ok_or(SensorReadError)?;
        let scale = self.gyro.scale();
        let mut gyro_v = [avg[0] * scale, avg[1] * scale, avg[2] * scale];
        if let Some(r) = rotation {
            gyro_v = math::rotate(&r, gyro_v);
        }
        let mut gyro_out = GyroSample {
            x: gyro_v[0],
            y: gyro_v[1],
            z: gyro_v[2],
            temperature: 35.0 + (raw_temp as f32 + 512.0) / 340.0,
        };
        if self.gyro_tx.try_send(gyro_out).is_err() {
            self.alarms.set(Alarm::Attitude, AlarmSeverity::Warning);
        }

        // Other modules want a clean rate
        if self.shared.bias_correct_gyro() {
            let [bx, by] = self.shared.bias_xy.get();
            gyro_out.x += bx;
            gyro_out.y += by;
            gyro_out.z += self.shared.bias_z.get();
        }
        self.bus.publish_gyros(&gyro_out);

        if self.mag.new_data_available() {
            let raw = self.mag.read();
            self.bus.publish_mag(&MagSample {
                x: -(raw[0] as f32),
                y: -(raw[1] as f32),
                z: -(raw[2] as f32),
            });
        }

        // Most craft never see enough gravity information to zero the yaw
        // gyro; leak its bias toward the observed mean rate instead
        let yaw_bias_rate = self.shared.gains().yaw_bias_rate;
        self.shared.bias_z.accumulate(-gyro_out.z * yaw_bias_rate);

        Ok(())
    }
}

/// Drain everything currently in the FIFO into 32-bit accumulators, spinning
/// (bounded) for the first sample. Returns per-tick averages with the axes
/// remapped to the board convention (x ← y, y ← x, z ← −z) and the last raw
/// temperature.
fn drain_fifo<S: InertialSource>(source: &mut S) -> Option<([f32; 3], i16)> {
    let mut accum = [0i32; 3];
    let mut count = 0u32;
    let mut temperature = 0i16;
    let mut spins = 0u32;

    loop {
        match source.read_fifo() {
            Some(sample) => {
                accum[0] += sample.x as i32;
                accum[1] += sample.y as i32;
                accum[2] += sample.z as i32;
                temperature = sample.temperature;
                count += 1;
            }
            None if count == 0 => {
                spins += 1;
                if spins >= FIFO_SPIN_LIMIT {
                    return None;
                }
            }
            None => break,
        }
    }

    let n = count as f32;
    Some((
        [
            accum[1] as f32 / n,
            accum[0] as f32 / n,
            -(accum[2] as f32) / n,
        ],
        temperature,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{RawInertial, SelfTestFailed};
    use std::collections::VecDeque;

    struct StubSource {
        // None entries model "no data yet" polls
        fifo: VecDeque<Option<RawInertial>>,
    }

    impl StubSource {
        fn new(entries: &[Option<RawInertial>]) -> Self {
            Self {
                fifo: entries.iter().copied().collect(),
            }
        }
    }

    impl InertialSource for StubSource {
        fn self_test(&mut self) -> Result<(), SelfTestFailed> {
            Ok(())
        }

        fn read_fifo(&mut self) -> Option<RawInertial> {
            self.fifo.pop_front().flatten()
        }

        fn scale(&self) -> f32 {
            1.0
        }
    }

    fn raw(x: i16, y: i16, z: i16, temperature: i16) -> Option<RawInertial> {
        Some(RawInertial {
            x,
            y,
            z,
            temperature,
        })
    }

    #[test]
    fn drain_averages_and_remaps() {
        let mut source = StubSource::new(&[raw(10, 20, 30, 4), raw(30, 40, 50, 6)]);
        let (avg, temp) = drain_fifo(&mut source).unwrap();
        // Averages (20, 30, 40) remapped to (y, x, -z)
        assert_eq!(avg, [30.0, 20.0, -40.0]);
        assert_eq!(temp, 6);
    }

    #[test]
    fn drain_spins_for_first_sample() {
        let mut source = StubSource::new(&[None, None, None, raw(8, -4, 2, 0)]);
        let (avg, _) = drain_fifo(&mut source).unwrap();
        assert_eq!(avg, [-4.0, 8.0, -2.0]);
    }

    #[test]
    fn drain_reports_dead_fifo() {
        let mut source = StubSource::new(&[]);
        assert!(drain_fifo(&mut source).is_none());
    }
}
