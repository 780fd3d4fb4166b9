//! 30-bit Morton codes (10 bits per axis).

use crate::util::{Aabb, Vec3};

/// Bits of resolution per axis.
pub const BITS_PER_AXIS: u32 = 10;

const AXIS_CELLS: f32 = (1u32 << BITS_PER_AXIS) as f32;

/// Spread the low 10 bits of `v` so two zero bits sit between each.
#[inline]
pub fn expand_bits(v: u32) -> u32 {
    let mut x = v & 0x3ff;
    x = x.wrapping_mul(0x0001_0001) & 0xff00_00ff;
    x = x.wrapping_mul(0x0000_0101) & 0x0f00_f00f;
    x = x.wrapping_mul(0x0000_0011) & 0xc30c_30c3;
    x = x.wrapping_mul(0x0000_0005) & 0x4924_9249;
    x
}

/// Morton code of a point in the unit cube.
///
/// Coordinates outside `[0, 1]` are clamped and NaN maps to 0, so any input is
/// accepted. x occupies the highest bit of each triple.
#[inline]
pub fn encode(p: Vec3) -> u32 {
    let q = |c: f32| -> u32 { (c.max(0.0).min(1.0) * AXIS_CELLS).min(AXIS_CELLS - 1.0) as u32 };
    (expand_bits(q(p.x)) << 2) | (expand_bits(q(p.y)) << 1) | expand_bits(q(p.z))
}

/// Morton code of `p` after normalizing it into `bounds`.
///
/// Flat axes (zero extent) collapse to 0 instead of dividing by zero.
#[inline]
pub fn encode_in(p: Vec3, bounds: &Aabb) -> u32 {
    let extent = bounds.size();
    let rel = p - bounds.min;
    let norm = Vec3::new(
        if extent.x > 0.0 { rel.x / extent.x } else { 0.0 },
        if extent.y > 0.0 { rel.y / extent.y } else { 0.0 },
        if extent.z > 0.0 { rel.z / extent.z } else { 0.0 },
    );
    encode(norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_bits() {
        assert_eq!(expand_bits(0), 0);
        assert_eq!(expand_bits(1), 1);
        assert_eq!(expand_bits(0b11), 0b1001);
        assert_eq!(expand_bits(0x3ff), 0x0924_9249);
        // bits above the 10th are ignored
        assert_eq!(expand_bits(0x400), 0);
    }

    #[test]
    fn test_corners() {
        assert_eq!(encode(Vec3::ZERO), 0);
        assert_eq!(encode(Vec3::ONE), (1 << 30) - 1);
        assert_eq!(encode(Vec3::new(1.0, 0.0, 0.0)), 0x2492_4924);
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(encode(Vec3::splat(-5.0)), 0);
        assert_eq!(encode(Vec3::splat(7.0)), encode(Vec3::ONE));
        assert_eq!(encode(Vec3::new(f32::NAN, 0.0, 0.0)), 0);
    }

    #[test]
    fn test_locality() {
        // Neighbours in the same octant share a longer prefix than far points
        let a = encode(Vec3::new(0.10, 0.10, 0.10));
        let b = encode(Vec3::new(0.11, 0.10, 0.10));
        let c = encode(Vec3::new(0.90, 0.90, 0.90));
        assert!((a ^ b).leading_zeros() > (a ^ c).leading_zeros());
    }

    #[test]
    fn test_encode_in_flat_bounds() {
        let bounds = Aabb::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(4.0, 2.0, 4.0));
        let code = encode_in(Vec3::new(4.0, 2.0, 4.0), &bounds);
        assert_eq!(code, encode(Vec3::new(1.0, 0.0, 1.0)));
    }
}
