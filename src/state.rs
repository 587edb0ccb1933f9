//! Record types exchanged through the sample queues and the telemetry bus.
//!
//! All types are `Copy` to minimise overhead when sent through channels.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};

use crate::math::Quaternion;

/// Depth of the gyro and accel sample queues between the two loops.
pub const SENSOR_QUEUE_DEPTH: usize = 10;

pub type SampleQueue<T> = Channel<CriticalSectionRawMutex, T, SENSOR_QUEUE_DEPTH>;
pub type SampleSender<'a, T> = Sender<'a, CriticalSectionRawMutex, T, SENSOR_QUEUE_DEPTH>;
pub type SampleReceiver<'a, T> = Receiver<'a, CriticalSectionRawMutex, T, SENSOR_QUEUE_DEPTH>;

// ── Published records ─────────────────────────────────────────────────────────

/// Averaged accelerometer reading, body frame, bias- and scale-corrected.
#[derive(Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccelSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// °C
    pub temperature: f32,
}

/// Averaged gyro reading in deg/s. Queue copies carry the raw rate; the bus
/// copy is bias-corrected.
#[derive(Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GyroSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// °C
    pub temperature: f32,
}

/// Magnetometer reading in sensor counts, sign-inverted from raw.
#[derive(Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MagSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// The published attitude: quaternion plus derived Euler angles in degrees.
#[derive(Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttitudeEstimate {
    pub q: Quaternion,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

// ── Consumed records ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlightStatus {
    #[default]
    Disarmed,
    Arming,
    Armed,
}

/// Tuning record delivered over the telemetry bus.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttitudeSettings {
    pub accel_kp: f32,
    pub accel_ki: f32,
    pub yaw_bias_rate: f32,
    /// Carried for compatibility; the effective gyro scale is the driver's
    /// own and this field is never applied in the filter.
    pub gyro_gain: f32,
    /// Raw ADC counts, subtracted before scaling.
    pub accel_bias: [i16; 3],
    /// Persisted gyro bias in hundredths of a deg/s.
    pub gyro_bias: [i16; 3],
    /// Static mounting rotation, roll/pitch/yaw degrees.
    pub board_rotation: [f32; 3],
    pub zero_during_arming: bool,
    pub bias_correct_gyro: bool,
}

impl Default for AttitudeSettings {
    fn default() -> Self {
        Self {
            accel_kp: 0.05,
            accel_ki: 0.0001,
            yaw_bias_rate: 0.000_001,
            gyro_gain: 0.42,
            accel_bias: [0; 3],
            gyro_bias: [0; 3],
            board_rotation: [0.0; 3],
            zero_during_arming: false,
            bias_correct_gyro: true,
        }
    }
}

// ── Health signals ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Alarm {
    Sensors,
    Attitude,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmSeverity {
    Warning,
    Error,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WatchdogFlag {
    Sensors,
    Attitude,
}
