//! Vector, quaternion and matrix payload types.
//!
//! Every type travels as a length-prefixed sequence of `f32` in a fixed order.
//! Decoding is lenient about length: missing trailing elements read as zero
//! and extra trailing elements are consumed and dropped. A nil in place of a
//! required value is rejected; wrap the field in `Option` for nullable slots.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// Rotation quaternion. Encoded as `[x, y, z, w]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// 4x4 matrix addressed as `m[row][column]`.
///
/// The wire order is column-major: M11, M21, M31, M41, M12, ... M44.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix4x4 {
    pub m: [[f32; 4]; 4],
}

impl Vector2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Vector3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Vector4 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Unit-length copy. A degenerate quaternion normalizes to identity.
    pub fn normalized(&self) -> Self {
        let len = self.length();
        if !len.is_finite() || len <= f32::EPSILON {
            return Self::IDENTITY;
        }
        Self {
            x: self.x / len,
            y: self.y / len,
            z: self.z / len,
            w: self.w / len,
        }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix4x4 {
    pub const IDENTITY: Self = Self {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub const fn from_rows(m: [[f32; 4]; 4]) -> Self {
        Self { m }
    }

    /// Elements in wire order.
    pub fn to_column_major(&self) -> [f32; 16] {
        let mut out = [0.0; 16];
        for c in 0..4 {
            for r in 0..4 {
                out[c * 4 + r] = self.m[r][c];
            }
        }
        out
    }

    pub fn from_column_major(values: [f32; 16]) -> Self {
        let mut m = [[0.0; 4]; 4];
        for c in 0..4 {
            for r in 0..4 {
                m[r][c] = values[c * 4 + r];
            }
        }
        Self { m }
    }
}

impl Default for Matrix4x4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

fn serialize_floats<S: Serializer>(values: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(values.len()))?;
    for v in values {
        seq.serialize_element(v)?;
    }
    seq.end()
}

struct FloatArrayVisitor<const N: usize> {
    name: &'static str,
    _marker: PhantomData<[f32; N]>,
}

impl<const N: usize> FloatArrayVisitor<N> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }
}

impl<'de, const N: usize> Visitor<'de> for FloatArrayVisitor<N> {
    type Value = [f32; N];

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "an array of up to {} floats for {}", N, self.name)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut out = [0.0f32; N];
        for slot in out.iter_mut() {
            match seq.next_element::<f32>()? {
                Some(v) => *slot = v,
                None => return Ok(out),
            }
        }
        // Length-prefixed formats need the tail drained to stay aligned.
        while seq.next_element::<f32>()?.is_some() {}
        Ok(out)
    }
}

fn deserialize_floats<'de, D, const N: usize>(
    deserializer: D,
    name: &'static str,
) -> Result<[f32; N], D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_seq(FloatArrayVisitor::<N>::new(name))
}

impl Serialize for Vector2 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_floats(&[self.x, self.y], serializer)
    }
}

impl<'de> Deserialize<'de> for Vector2 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [x, y] = deserialize_floats::<D, 2>(deserializer, "Vector2")?;
        Ok(Self { x, y })
    }
}

impl Serialize for Vector3 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_floats(&[self.x, self.y, self.z], serializer)
    }
}

impl<'de> Deserialize<'de> for Vector3 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [x, y, z] = deserialize_floats::<D, 3>(deserializer, "Vector3")?;
        Ok(Self { x, y, z })
    }
}

impl Serialize for Vector4 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_floats(&[self.x, self.y, self.z, self.w], serializer)
    }
}

impl<'de> Deserialize<'de> for Vector4 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [x, y, z, w] = deserialize_floats::<D, 4>(deserializer, "Vector4")?;
        Ok(Self { x, y, z, w })
    }
}

impl Serialize for Quaternion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_floats(&[self.x, self.y, self.z, self.w], serializer)
    }
}

impl<'de> Deserialize<'de> for Quaternion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [x, y, z, w] = deserialize_floats::<D, 4>(deserializer, "Quaternion")?;
        Ok(Self { x, y, z, w })
    }
}

impl Serialize for Matrix4x4 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_floats(&self.to_column_major(), serializer)
    }
}

impl<'de> Deserialize<'de> for Matrix4x4 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = deserialize_floats::<D, 16>(deserializer, "Matrix4x4")?;
        Ok(Self::from_column_major(values))
    }
}

impl From<[f32; 3]> for Vector3 {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Vector3> for [f32; 3] {
    fn from(v: Vector3) -> Self {
        [v.x, v.y, v.z]
    }
}

impl From<[f32; 4]> for Quaternion {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Quaternion> for [f32; 4] {
    fn from(q: Quaternion) -> Self {
        [q.x, q.y, q.z, q.w]
    }
}
