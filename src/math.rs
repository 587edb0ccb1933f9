//! Quaternion and small-vector helpers. Degrees on every interface; radians
//! stay internal to the trig.

#[allow(unused_imports)]
use micromath::F32Ext;

/// Unit quaternion giving the rotation from the NED world frame to the body
/// frame.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Build from roll/pitch/yaw in degrees (aerospace RPY order). The result
    /// is on the canonical hemisphere (`w >= 0`).
    pub fn from_rpy_deg(roll: f32, pitch: f32, yaw: f32) -> Self {
        let phi = roll.to_radians() / 2.0;
        let theta = pitch.to_radians() / 2.0;
        let psi = yaw.to_radians() / 2.0;

        let (sphi, cphi) = (phi.sin(), phi.cos());
        let (stheta, ctheta) = (theta.sin(), theta.cos());
        let (spsi, cpsi) = (psi.sin(), psi.cos());

        let mut q = Self {
            w: cphi * ctheta * cpsi + sphi * stheta * spsi,
            x: sphi * ctheta * cpsi - cphi * stheta * spsi,
            y: cphi * stheta * cpsi + sphi * ctheta * spsi,
            z: cphi * ctheta * spsi - sphi * stheta * cpsi,
        };
        if q.w < 0.0 {
            q.w = -q.w;
            q.x = -q.x;
            q.y = -q.y;
            q.z = -q.z;
        }
        q
    }

    /// Roll/pitch/yaw in degrees. Pitch is clamped to ±90° when the matrix
    /// element leaves the asin domain through rounding.
    pub fn to_rpy_deg(&self) -> (f32, f32, f32) {
        let (q0, q1, q2, q3) = (self.w, self.x, self.y, self.z);

        let r11 = q0 * q0 + q1 * q1 - q2 * q2 - q3 * q3;
        let r12 = 2.0 * (q1 * q2 + q0 * q3);
        let r13 = 2.0 * (q1 * q3 - q0 * q2);
        let r23 = 2.0 * (q2 * q3 + q0 * q1);
        let r33 = q0 * q0 - q1 * q1 - q2 * q2 + q3 * q3;

        let pitch = if r13.abs() >= 1.0 {
            core::f32::consts::FRAC_PI_2.copysign(-r13)
        } else {
            (-r13).asin()
        };
        let roll = r23.atan2(r33);
        let yaw = r12.atan2(r11);

        (roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
    }

    /// Direction-cosine matrix rotating world-frame vectors into the body
    /// frame (`body = R * world`).
    pub fn to_rotation_matrix(&self) -> [[f32; 3]; 3] {
        let (q0, q1, q2, q3) = (self.w, self.x, self.y, self.z);
        let (q0s, q1s, q2s, q3s) = (q0 * q0, q1 * q1, q2 * q2, q3 * q3);

        [
            [
                q0s + q1s - q2s - q3s,
                2.0 * (q1 * q2 + q0 * q3),
                2.0 * (q1 * q3 - q0 * q2),
            ],
            [
                2.0 * (q1 * q2 - q0 * q3),
                q0s - q1s + q2s - q3s,
                2.0 * (q2 * q3 + q0 * q1),
            ],
            [
                2.0 * (q1 * q3 + q0 * q2),
                2.0 * (q2 * q3 - q0 * q1),
                q0s - q1s - q2s + q3s,
            ],
        ]
    }

    pub fn norm(&self) -> f32 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// 3D cross product `a × b`.
pub fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Matrix-vector multiply `r * v`.
pub fn rotate(r: &[[f32; 3]; 3], v: [f32; 3]) -> [f32; 3] {
    [
        r[0][0] * v[0] + r[0][1] * v[1] + r[0][2] * v[2],
        r[1][0] * v[0] + r[1][1] * v[1] + r[1][2] * v[2],
        r[2][0] * v[0] + r[2][1] * v[1] + r[2][2] * v[2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn identity_round_trips() {
        let q = Quaternion::IDENTITY;
        let (roll, pitch, yaw) = q.to_rpy_deg();
        assert_abs_diff_eq!(roll, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(pitch, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(yaw, 0.0, epsilon = 1e-6);

        let r = q.to_rotation_matrix();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(r[i][j], expected, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn rpy_round_trip() {
        for &(roll, pitch, yaw) in &[
            (30.0, -20.0, 45.0),
            (-75.0, 10.0, -130.0),
            (1.5, 60.0, 0.0),
            (179.0, -5.0, 179.0),
        ] {
            let q = Quaternion::from_rpy_deg(roll, pitch, yaw);
            assert!(q.w >= 0.0);
            assert_abs_diff_eq!(q.norm(), 1.0, epsilon = 1e-5);

            let (r, p, y) = q.to_rpy_deg();
            assert_abs_diff_eq!(r, roll, epsilon = 1e-2);
            assert_abs_diff_eq!(p, pitch, epsilon = 1e-2);
            assert_abs_diff_eq!(y, yaw, epsilon = 1e-2);
        }
    }

    #[test]
    fn rotation_matrix_is_orthonormal() {
        let r = Quaternion::from_rpy_deg(25.0, -40.0, 110.0).to_rotation_matrix();
        // Rows are unit length and mutually orthogonal.
        for i in 0..3 {
            let dot = r[i][0] * r[i][0] + r[i][1] * r[i][1] + r[i][2] * r[i][2];
            assert_abs_diff_eq!(dot, 1.0, epsilon = 1e-5);
            let j = (i + 1) % 3;
            let dot = r[i][0] * r[j][0] + r[i][1] * r[j][1] + r[i][2] * r[j][2];
            assert_abs_diff_eq!(dot, 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn yaw_rotation_maps_north_to_body() {
        // Nose pointing east: world north shows up along body -y.
        let r = Quaternion::from_rpy_deg(0.0, 0.0, 90.0).to_rotation_matrix();
        let v = rotate(&r, [1.0, 0.0, 0.0]);
        assert_abs_diff_eq!(v[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v[1], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn roll_rotation_moves_gravity() {
        // Right wing down 90°: gravity reads along body -y.
        let r = Quaternion::from_rpy_deg(90.0, 0.0, 0.0).to_rotation_matrix();
        let g = rotate(&r, [0.0, 0.0, -1.0]);
        assert_abs_diff_eq!(g[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(g[1], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(g[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn cross_product_basis() {
        let z = cross([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        assert_eq!(z, [0.0, 0.0, 1.0]);
        let zero = cross([2.0, -3.0, 4.0], [2.0, -3.0, 4.0]);
        assert_eq!(zero, [0.0, 0.0, 0.0]);
    }
}
