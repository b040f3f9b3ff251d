//! Well-known binary points

/// Encoded size of a little-endian 2D point
pub const POINT_SIZE: usize = 21;

/// Little-endian WKB `Point(x y)`
pub fn point(x: f64, y: f64) -> [u8; POINT_SIZE] {
    let mut item = [0_u8; POINT_SIZE];
    item[0] = 0x01;
    item[1..5].copy_from_slice(1_u32.to_le_bytes().as_slice());
    item[5..13].copy_from_slice(x.to_le_bytes().as_slice());
    item[13..21].copy_from_slice(y.to_le_bytes().as_slice());
    item
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_layout() {
        let wkb = point(12.5, -1.25);
        assert_eq!(wkb[0], 1);
        assert_eq!(&wkb[1..5], &[1, 0, 0, 0]);
        assert_eq!(f64::from_le_bytes(wkb[5..13].try_into().unwrap()), 12.5);
        assert_eq!(f64::from_le_bytes(wkb[13..21].try_into().unwrap()), -1.25);
    }
}
