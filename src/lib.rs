#![cfg_attr(not(test), no_std)]

//! Attitude estimation core for a small UAV.
//!
//! Fuses gyro, accelerometer and magnetometer readings into a unit-quaternion
//! attitude (plus roll/pitch/yaw in degrees) with a complementary filter that
//! identifies gyro bias online. Two cooperating loops do the work:
//! [`tasks::sensors::SensorLoop`] drains the sensor FIFOs at 500 Hz and feeds
//! bounded queues, [`tasks::attitude::AttitudeLoop`] consumes them and
//! publishes the estimate. Sensor drivers, the telemetry bus and the
//! alarm/watchdog subsystems live outside the crate behind the traits in
//! [`sources`]; a firmware binary wires them up and spawns both `run()`
//! futures on its executor.

pub mod filter;
pub mod math;
pub mod shared;
pub mod sources;
pub mod state;
pub mod tasks;

pub use filter::ComplementaryFilter;
pub use math::Quaternion;
pub use shared::SharedState;
pub use state::{
    AccelSample, Alarm, AlarmSeverity, AttitudeEstimate, AttitudeSettings, FlightStatus,
    GyroSample, MagSample, SampleQueue, SampleReceiver, SampleSender, WatchdogFlag,
    SENSOR_QUEUE_DEPTH,
};
pub use tasks::attitude::AttitudeLoop;
pub use tasks::sensors::SensorLoop;
