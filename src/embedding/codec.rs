// src/embedding/codec.rs
//! Binary form of a cached vector: a little-endian `u32` element count
//! followed by that many little-endian `f32` values. Round trips are exact.

use bytes::{Buf, BufMut, BytesMut};

use crate::models::matching::Vector;

const HEADER_LEN: usize = 4;
const ELEMENT_LEN: usize = 4;

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + vector.len() * ELEMENT_LEN);
    buf.put_u32_le(vector.len() as u32);
    for value in vector {
        buf.put_f32_le(*value);
    }
    buf.to_vec()
}

/// Decodes a blob written by [`encode_vector`]. The error string says what
/// was wrong with the blob.
pub fn decode_vector(blob: &[u8]) -> Result<Vector, String> {
    if blob.len() < HEADER_LEN {
        return Err(format!("blob of {} byte(s) has no length header", blob.len()));
    }
    let mut buf = blob;
    let declared = buf.get_u32_le() as usize;
    let expected_len = declared
        .checked_mul(ELEMENT_LEN)
        .ok_or_else(|| format!("declared length {} overflows", declared))?;
    if buf.remaining() != expected_len {
        return Err(format!(
            "header declares {} value(s) ({} bytes) but {} byte(s) follow",
            declared,
            expected_len,
            buf.remaining()
        ));
    }

    let mut vector = Vec::with_capacity(declared);
    for idx in 0..declared {
        let value = buf.get_f32_le();
        if !value.is_finite() {
            return Err(format!("value {} at index {} is not finite", value, idx));
        }
        vector.push(value);
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_is_bit_exact() {
        let vector = vec![0.1f32, -3.4028235e38, 1.0e-45, 0.333_333_34, 0.0, -0.0];
        let decoded = decode_vector(&encode_vector(&vector)).unwrap();
        assert_eq!(decoded.len(), vector.len());
        for (a, b) in vector.iter().zip(decoded.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_layout() {
        let blob = encode_vector(&[1.0]);
        assert_eq!(blob, vec![1, 0, 0, 0, 0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_empty_vector() {
        let blob = encode_vector(&[]);
        assert_eq!(blob.len(), 4);
        assert!(decode_vector(&blob).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_corrupt_blobs() {
        assert!(decode_vector(&[]).is_err());
        assert!(decode_vector(&[1, 0]).is_err());

        let mut truncated = encode_vector(&[1.0, 2.0]);
        truncated.pop();
        assert!(decode_vector(&truncated).is_err());

        let mut trailing = encode_vector(&[1.0]);
        trailing.push(0);
        assert!(decode_vector(&trailing).is_err());

        let nan = encode_vector(&[f32::NAN]);
        assert!(decode_vector(&nan).is_err());
    }
}
