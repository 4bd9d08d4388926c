use std::ops::{Add, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn normalize(self) -> Self {
        let len = self.length();
        if len <= f32::EPSILON {
            return Self::ZERO;
        }
        self * (1.0 / len)
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// World-to-camera transform in row-vector convention: a point is the row
/// `[x, y, z, 1]` multiplied on the left, so rows 0..2 hold the rotation and
/// row 3 holds the translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewMatrix {
    pub rows: [[f32; 4]; 4],
}

impl ViewMatrix {
    pub const IDENTITY: Self = Self {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub const fn from_rows(rows: [[f32; 4]; 4]) -> Self {
        Self { rows }
    }

    pub fn translation(offset: Vec3) -> Self {
        let mut m = Self::IDENTITY;
        m.rows[3] = [offset.x, offset.y, offset.z, 1.0];
        m
    }

    /// Right-handed look-at; the camera looks down its own -Z axis.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Self {
        let forward = (eye - target).normalize();
        let right = up.cross(forward).normalize();
        let true_up = forward.cross(right);

        Self {
            rows: [
                [right.x, true_up.x, forward.x, 0.0],
                [right.y, true_up.y, forward.y, 0.0],
                [right.z, true_up.z, forward.z, 0.0],
                [-right.dot(eye), -true_up.dot(eye), -forward.dot(eye), 1.0],
            ],
        }
    }

    /// Third column of the rotation plus the Z translation, the only terms
    /// needed for camera-space depth.
    pub fn depth_axis(&self) -> [f32; 4] {
        [
            self.rows[0][2],
            self.rows[1][2],
            self.rows[2][2],
            self.rows[3][2],
        ]
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let m = &self.rows;
        Vec3::new(
            p.x * m[0][0] + p.y * m[1][0] + p.z * m[2][0] + m[3][0],
            p.x * m[0][1] + p.y * m[1][1] + p.z * m[2][1] + m[3][1],
            p.x * m[0][2] + p.y * m[1][2] + p.z * m[2][2] + m[3][2],
        )
    }
}

impl Default for ViewMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}
