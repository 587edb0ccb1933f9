//! External adapter contracts. The crate never talks to hardware or to the
//! rest of the system directly: sensor drivers, the object bus and the
//! alarm/watchdog subsystems all arrive behind these traits.

use crate::state::{
    AccelSample, Alarm, AlarmSeverity, AttitudeEstimate, AttitudeSettings, FlightStatus,
    GyroSample, MagSample, WatchdogFlag,
};

/// One FIFO entry from an inertial sensor, in sensor counts.
#[derive(Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawInertial {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub temperature: i16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SelfTestFailed;

/// A gyro or accelerometer driver with an on-chip FIFO.
pub trait InertialSource {
    /// Power-on self test. A failure is fatal for the whole subsystem.
    fn self_test(&mut self) -> Result<(), SelfTestFailed>;

    /// Pop one sample from the FIFO; `None` once drained.
    fn read_fifo(&mut self) -> Option<RawInertial>;

    /// Counts → engineering units (deg/s or m/s² per count).
    fn scale(&self) -> f32;
}

/// A magnetometer driver. No FIFO; polled for freshness instead.
pub trait MagSource {
    fn self_test(&mut self) -> Result<(), SelfTestFailed>;

    fn new_data_available(&mut self) -> bool;

    /// Raw field strength in counts.
    fn read(&mut self) -> [i16; 3];
}

/// The object broker connecting this subsystem to the rest of the vehicle.
/// Publishing hands a copy to other modules; the settings and flight-status
/// records are owned elsewhere and read here.
pub trait TelemetryBus {
    fn publish_attitude(&mut self, attitude: &AttitudeEstimate);
    fn publish_gyros(&mut self, sample: &GyroSample);
    fn publish_accels(&mut self, sample: &AccelSample);
    fn publish_mag(&mut self, sample: &MagSample);

    /// Current settings record.
    fn attitude_settings(&mut self) -> AttitudeSettings;

    /// The settings record, if it changed since the last poll.
    fn poll_settings(&mut self) -> Option<AttitudeSettings>;

    fn flight_status(&mut self) -> FlightStatus;
}

/// Thin sink for cross-module health severities.
pub trait AlarmSink {
    fn set(&mut self, alarm: Alarm, severity: AlarmSeverity);
    fn clear(&mut self, alarm: Alarm);
}

/// Thin sink proving task liveness to an external supervisor.
pub trait Watchdog {
    /// Announce the flag once at startup.
    fn register(&mut self, flag: WatchdogFlag);

    /// Stroke the flag; expected once per loop revolution.
    fn stroke(&mut self, flag: WatchdogFlag);
}
