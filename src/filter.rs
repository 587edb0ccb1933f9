//! The complementary filter step: gyro integration pulled toward the
//! gravity direction implied by the accelerometer.

use core::f32::consts::PI;

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::math::{cross, Quaternion};
use crate::state::{AccelSample, GyroSample};

/// Below this accel magnitude the correction is skipped for the step (free
/// fall, or a dead axis, would otherwise divide the error by ~0).
const ACCEL_MIN_MAG: f32 = 1e-3;

/// Renormalization guard; below this the state is degenerate and reset.
const QMAG_MIN: f32 = 1e-3;

pub struct ComplementaryFilter {
    pub q: Quaternion,
}

impl ComplementaryFilter {
    pub fn new() -> Self {
        Self {
            q: Quaternion::IDENTITY,
        }
    }

    pub fn reset(&mut self) {
        self.q = Quaternion::IDENTITY;
    }

    /// One step over a paired sample. `gyro` is the raw (non-bias-corrected)
    /// rate in deg/s, `dt` the wall-clock interval in seconds. Returns the
    /// normalized accel error; integral feedback on it is the caller's.
    pub fn step(
        &mut self,
        dt: f32,
        gyro: &GyroSample,
        accel: &AccelSample,
        accel_kp: f32,
    ) -> [f32; 3] {
        let (q0, q1, q2, q3) = (self.q.w, self.q.x, self.q.y, self.q.z);

        // Rotate gravity to body frame and cross with accels
        let grot = [
            -(2.0 * (q1 * q3 - q0 * q2)),
            -(2.0 * (q2 * q3 + q0 * q1)),
            -(q0 * q0 - q1 * q1 - q2 * q2 + q3 * q3),
        ];
        let mut accel_err = cross([accel.x, accel.y, accel.z], grot);

        // Account for accel magnitude
        let accel_mag = (accel.x * accel.x + accel.y * accel.y + accel.z * accel.z).sqrt();
        if accel_mag < ACCEL_MIN_MAG {
            // Nothing to weigh the correction by; take a gyro-only step
            accel_err = [0.0; 3];
        } else {
            accel_err[0] /= accel_mag;
            accel_err[1] /= accel_mag;
            accel_err[2] /= accel_mag;
        }

        // Proportional correction, normalized by dt so the pull-in time does
        // not depend on the step size
        let wx = gyro.x + accel_err[0] * accel_kp / dt;
        let wy = gyro.y + accel_err[1] * accel_kp / dt;
        let wz = gyro.z + accel_err[2] * accel_kp / dt;

        // Quaternion kinematics, Euler step. Rates are deg/s, so the half
        // factor of qdot folds into PI / 360.
        let k = dt * PI / 360.0;
        let mut nq0 = q0 + (-q1 * wx - q2 * wy - q3 * wz) * k;
        let mut nq1 = q1 + (q0 * wx - q3 * wy + q2 * wz) * k;
        let mut nq2 = q2 + (q3 * wx + q0 * wy - q1 * wz) * k;
        let mut nq3 = q3 + (-q2 * wx + q1 * wy + q0 * wz) * k;

        // Keep the canonical hemisphere
        if nq0 < 0.0 {
            nq0 = -nq0;
            nq1 = -nq1;
            nq2 = -nq2;
            nq3 = -nq3;
        }

        let qmag = (nq0 * nq0 + nq1 * nq1 + nq2 * nq2 + nq3 * nq3).sqrt();
        self.q = if qmag < QMAG_MIN || qmag.is_nan() {
            // Degenerate or NaN state; unreachable in normal operation
            Quaternion::IDENTITY
        } else {
            Quaternion {
                w: nq0 / qmag,
                x: nq1 / qmag,
                y: nq2 / qmag,
                z: nq3 / qmag,
            }
        };

        accel_err
    }
}

impl Default for ComplementaryFilter {
    fn default() -> Self {
        Self::new()
    }
}
