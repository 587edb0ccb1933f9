//! Tuning state shared between the two loops and the settings callback.
//!
//! Every field is either a word-sized atomic (wait-free for both readers) or,
//! for the board-rotation matrix, a short critical section. Readers tolerate
//! a one-tick inconsistency across fields; no reader ever blocks the other
//! loop.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::CriticalSectionMutex;

use crate::math::Quaternion;
use crate::state::AttitudeSettings;

const IDENTITY_3X3: [[f32; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// f32 stored as its bit pattern in an `AtomicU32`. Relaxed ordering is
/// enough: each cell has a single writer and the readers tolerate staleness.
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub const fn zeroed() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Roll/pitch gyro-bias estimate in deg/s. Written by the estimator loop
/// (integral feedback) and by the settings callback (persisted bias); the
/// sensor loop only reads it when publishing bias-corrected rates.
pub struct BiasXy {
    x: AtomicF32,
    y: AtomicF32,
}

impl BiasXy {
    const fn zeroed() -> Self {
        Self {
            x: AtomicF32::zeroed(),
            y: AtomicF32::zeroed(),
        }
    }

    pub fn get(&self) -> [f32; 2] {
        [self.x.load(), self.y.load()]
    }

    pub fn set(&self, x: f32, y: f32) {
        self.x.store(x);
        self.y.store(y);
    }

    /// Integrate. Load/store is enough: one writer per cell.
    pub fn accumulate(&self, dx: f32, dy: f32) {
        self.x.store(self.x.load() + dx);
        self.y.store(self.y.load() + dy);
    }
}

/// Yaw gyro-bias estimate in deg/s. Written by the sensor loop (yaw-rate
/// leak) and by the settings callback; the estimator loop never applies it to
/// the rates it integrates.
pub struct BiasZ {
    z: AtomicF32,
}

impl BiasZ {
    const fn zeroed() -> Self {
        Self {
            z: AtomicF32::zeroed(),
        }
    }

    pub fn get(&self) -> f32 {
        self.z.load()
    }

    pub fn set(&self, z: f32) {
        self.z.store(z);
    }

    pub fn accumulate(&self, dz: f32) {
        self.z.store(self.z.load() + dz);
    }
}

/// Snapshot of the filter gains, read once per step.
#[derive(Clone, Copy, Debug)]
pub struct Gains {
    pub accel_kp: f32,
    pub accel_ki: f32,
    pub yaw_bias_rate: f32,
    pub gyro_gain: f32,
}

/// Shared tuning and bias state. One instance lives for the process lifetime
/// (typically a `static`) and is borrowed by both loops.
pub struct SharedState {
    accel_kp: AtomicF32,
    accel_ki: AtomicF32,
    yaw_bias_rate: AtomicF32,
    gyro_gain: AtomicF32,
    zero_during_arming: AtomicBool,
    bias_correct_gyro: AtomicBool,
    accel_bias: [AtomicI32; 3],
    pub bias_xy: BiasXy,
    pub bias_z: BiasZ,
    rotate: AtomicBool,
    board_rotation: CriticalSectionMutex<Cell<[[f32; 3]; 3]>>,
}

impl SharedState {
    pub const fn new() -> Self {
        Self {
            accel_kp: AtomicF32::zeroed(),
            accel_ki: AtomicF32::zeroed(),
            yaw_bias_rate: AtomicF32::zeroed(),
            gyro_gain: AtomicF32::zeroed(),
            zero_during_arming: AtomicBool::new(false),
            bias_correct_gyro: AtomicBool::new(true),
            accel_bias: [AtomicI32::new(0), AtomicI32::new(0), AtomicI32::new(0)],
            bias_xy: BiasXy::zeroed(),
            bias_z: BiasZ::zeroed(),
            rotate: AtomicBool::new(false),
            board_rotation: CriticalSectionMutex::new(Cell::new(IDENTITY_3X3)),
        }
    }

    /// The settings callback. Invoked by the sensor loop whenever the bus
    /// reports a changed record, by the estimator once at startup, or
    /// directly from a bus delivery context.
    pub fn apply_settings(&self, settings: &AttitudeSettings) {
        self.accel_kp.store(settings.accel_kp);
        self.accel_ki.store(settings.accel_ki);
        self.yaw_bias_rate.store(settings.yaw_bias_rate);
        self.gyro_gain.store(settings.gyro_gain);

        self.zero_during_arming
            .store(settings.zero_during_arming, Ordering::Relaxed);
        self.bias_correct_gyro
            .store(settings.bias_correct_gyro, Ordering::Relaxed);

        for (cell, &counts) in self.accel_bias.iter().zip(settings.accel_bias.iter()) {
            cell.store(counts as i32, Ordering::Relaxed);
        }

        // Persisted bias arrives in hundredths of a deg/s
        self.bias_xy.set(
            settings.gyro_bias[0] as f32 / 100.0,
            settings.gyro_bias[1] as f32 / 100.0,
        );
        self.bias_z.set(settings.gyro_bias[2] as f32 / 100.0);

        if settings.board_rotation == [0.0; 3] {
            // Identity mount: skip the per-sample multiply entirely
            self.board_rotation.lock(|cell| cell.set(IDENTITY_3X3));
            self.rotate.store(false, Ordering::Relaxed);
        } else {
            let r = Quaternion::from_rpy_deg(
                settings.board_rotation[0],
                settings.board_rotation[1],
                settings.board_rotation[2],
            )
            .to_rotation_matrix();
            self.board_rotation.lock(|cell| cell.set(r));
            self.rotate.store(true, Ordering::Relaxed);
        }
    }

    /// Override the three bootstrap-managed rates (startup and arming
    /// recalibration), leaving the rest of the record alone.
    pub fn set_gains(&self, accel_kp: f32, accel_ki: f32, yaw_bias_rate: f32) {
        self.accel_kp.store(accel_kp);
        self.accel_ki.store(accel_ki);
        self.yaw_bias_rate.store(yaw_bias_rate);
    }

    pub fn gains(&self) -> Gains {
        Gains {
            accel_kp: self.accel_kp.load(),
            accel_ki: self.accel_ki.load(),
            yaw_bias_rate: self.yaw_bias_rate.load(),
            gyro_gain: self.gyro_gain.load(),
        }
    }

    pub fn zero_during_arming(&self) -> bool {
        self.zero_during_arming.load(Ordering::Relaxed)
    }

    pub fn bias_correct_gyro(&self) -> bool {
        self.bias_correct_gyro.load(Ordering::Relaxed)
    }

    /// Accel bias in raw counts, as floats ready for subtraction.
    pub fn accel_bias(&self) -> [f32; 3] {
        [
            self.accel_bias[0].load(Ordering::Relaxed) as f32,
            self.accel_bias[1].load(Ordering::Relaxed) as f32,
            self.accel_bias[2].load(Ordering::Relaxed) as f32,
        ]
    }

    /// Mounting rotation, or `None` for an identity mount.
    pub fn rotation(&self) -> Option<[[f32; 3]; 3]> {
        if self.rotate.load(Ordering::Relaxed) {
            Some(self.board_rotation.lock(|cell| cell.get()))
        } else {
            None
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn apply_settings_is_idempotent() {
        let shared = SharedState::new();
        let settings = AttitudeSettings {
            accel_kp: 0.08,
            accel_ki: 0.002,
            yaw_bias_rate: 0.01,
            accel_bias: [7, -3, 12],
            gyro_bias: [150, -50, 25],
            board_rotation: [0.0, 0.0, 90.0],
            ..Default::default()
        };

        shared.apply_settings(&settings);
        let first = (
            shared.gains().accel_kp,
            shared.gains().accel_ki,
            shared.accel_bias(),
            shared.bias_xy.get(),
            shared.bias_z.get(),
            shared.rotation(),
        );

        shared.apply_settings(&settings);
        let second = (
            shared.gains().accel_kp,
            shared.gains().accel_ki,
            shared.accel_bias(),
            shared.bias_xy.get(),
            shared.bias_z.get(),
            shared.rotation(),
        );

        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
        assert_eq!(first.2, second.2);
        assert_eq!(first.3, second.3);
        assert_eq!(first.4, second.4);
        assert_eq!(first.5, second.5);
    }

    #[test]
    fn persisted_gyro_bias_is_hundredths() {
        let shared = SharedState::new();
        shared.apply_settings(&AttitudeSettings {
            gyro_bias: [150, -50, 25],
            ..Default::default()
        });
        let [bx, by] = shared.bias_xy.get();
        assert_abs_diff_eq!(bx, 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(by, -0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(shared.bias_z.get(), 0.25, epsilon = 1e-6);
    }

    #[test]
    fn identity_mount_skips_rotation() {
        let shared = SharedState::new();
        shared.apply_settings(&AttitudeSettings::default());
        assert!(shared.rotation().is_none());
    }

    #[test]
    fn yaw_mount_rotates_x_into_minus_y() {
        let shared = SharedState::new();
        shared.apply_settings(&AttitudeSettings {
            board_rotation: [0.0, 0.0, 90.0],
            ..Default::default()
        });
        let r = shared.rotation().expect("rotation flag set");
        let v = crate::math::rotate(&r, [1.0, 0.0, 0.0]);
        assert_abs_diff_eq!(v[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v[1], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn bias_cells_accumulate() {
        let shared = SharedState::new();
        shared.bias_xy.accumulate(0.5, -0.25);
        shared.bias_xy.accumulate(0.5, -0.25);
        assert_eq!(shared.bias_xy.get(), [1.0, -0.5]);
        shared.bias_z.accumulate(-0.1);
        assert_abs_diff_eq!(shared.bias_z.get(), -0.1, epsilon = 1e-6);
    }
}
