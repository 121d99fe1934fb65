//! Host implementations of the packing kernels.
//!
//! Pure functions over borrowed spans; callers derive the spans from
//! [`crate::TensorHandle`]s and guarantee the size relations. The loops are
//! written block-per-compressed-word (quantize) and element-wise
//! (dequantize) so they decompose exactly like the accelerator launches.

use super::{one_bit_words, two_bit_words, BIT_MASKS, NEG_BITS, POS_BITS};

/// One-bit quantize, threshold-charging form.
///
/// For each element the incoming gradient enters the accumulator damped by
/// the momentum factor, the bit records `r > threshold`, and the emitted
/// magnitude `threshold` is charged back. Sub-threshold gradients are never
/// dropped: they stay in the residual until enough energy accumulates to
/// flip the bit.
pub fn quantize_one_bit(
    grad: &[f32],
    compressed: &mut [u8],
    residual: &mut [f32],
    threshold: f32,
    alpha: f32,
) {
    let n = grad.len();
    debug_assert_eq!(residual.len(), n);
    debug_assert!(compressed.len() >= one_bit_words(n) * 4);
    for block in 0..one_bit_words(n) {
        let start = block * 32;
        let end = usize::min(start + 32, n);
        let word = &mut compressed[block * 4..block * 4 + 4];
        word.fill(0);
        for i in start..end {
            let mut r = residual[i] + alpha * grad[i];
            if r > threshold {
                word[(i - start) >> 3] |= BIT_MASKS[i & 7];
                r -= threshold;
            } else {
                r += threshold;
            }
            residual[i] = r;
        }
    }
}

/// One-bit quantize, fused unit-charging form.
///
/// Same bit rule as [`quantize_one_bit`], but the charge matches the ±1
/// symbol the decoder emits rather than the threshold.
pub fn quantize_one_bit_fused(
    grad: &[f32],
    compressed: &mut [u8],
    residual: &mut [f32],
    threshold: f32,
    alpha: f32,
) {
    let n = grad.len();
    debug_assert_eq!(residual.len(), n);
    debug_assert!(compressed.len() >= one_bit_words(n) * 4);
    for block in 0..one_bit_words(n) {
        let start = block * 32;
        let end = usize::min(start + 32, n);
        let word = &mut compressed[block * 4..block * 4 + 4];
        word.fill(0);
        for i in start..end {
            let mut r = residual[i] + alpha * grad[i];
            if r > threshold {
                word[(i - start) >> 3] |= BIT_MASKS[i & 7];
                r -= 1.0;
            } else {
                r += 1.0;
            }
            residual[i] = r;
        }
    }
}

/// One-bit sign pack. Reads the residual only; the momentum update has
/// already run as a separate pre-pass.
pub fn pack_one_bit_sign(residual: &[f32], compressed: &mut [u8], threshold: f32) {
    let n = residual.len();
    debug_assert!(compressed.len() >= one_bit_words(n) * 4);
    for block in 0..one_bit_words(n) {
        let start = block * 32;
        let end = usize::min(start + 32, n);
        let word = &mut compressed[block * 4..block * 4 + 4];
        word.fill(0);
        for i in start..end {
            if residual[i] >= threshold {
                word[(i - start) >> 3] |= BIT_MASKS[i & 7];
            }
        }
    }
}

/// One-bit dequantize: set bit decodes to `+1`, clear bit to `-1`.
pub fn dequantize_one_bit(compressed: &[u8], out: &mut [f32]) {
    debug_assert!(compressed.len() >= one_bit_words(out.len()) * 4);
    for (i, g) in out.iter_mut().enumerate() {
        *g = if compressed[i >> 3] & BIT_MASKS[i & 7] != 0 {
            1.0
        } else {
            -1.0
        };
    }
}

/// One-bit dequantize-and-add: decoded symbols are summed into `acc`
/// instead of overwriting it. Used by aggregating servers.
pub fn dequantize_one_bit_add(compressed: &[u8], acc: &mut [f32]) {
    debug_assert!(compressed.len() >= one_bit_words(acc.len()) * 4);
    for (i, g) in acc.iter_mut().enumerate() {
        if compressed[i >> 3] & BIT_MASKS[i & 7] != 0 {
            *g += 1.0;
        } else {
            *g -= 1.0;
        }
    }
}

/// Two-bit quantize, threshold-charging form with a zero band.
///
/// `r >= threshold` emits code `11` and charges `-threshold`;
/// `r <= -threshold` emits `10` and charges `+threshold`; the band in
/// between emits `00` and leaves the residual to keep accumulating.
pub fn quantize_two_bit(
    grad: &[f32],
    compressed: &mut [u8],
    residual: &mut [f32],
    threshold: f32,
    alpha: f32,
) {
    let n = grad.len();
    debug_assert_eq!(residual.len(), n);
    debug_assert!(compressed.len() >= two_bit_words(n) * 4);
    for block in 0..two_bit_words(n) {
        let start = block * 16;
        let end = usize::min(start + 16, n);
        let word = &mut compressed[block * 4..block * 4 + 4];
        word.fill(0);
        for i in start..end {
            let mut r = residual[i] + alpha * grad[i];
            if r >= threshold {
                word[(i - start) >> 2] |= POS_BITS[i & 3];
                r -= threshold;
            } else if r <= -threshold {
                word[(i - start) >> 2] |= NEG_BITS[i & 3];
                r += threshold;
            }
            residual[i] = r;
        }
    }
}

/// Two-bit sign pack. Reads the residual only; no charging.
pub fn pack_two_bit_sign(residual: &[f32], compressed: &mut [u8], threshold: f32) {
    let n = residual.len();
    debug_assert!(compressed.len() >= two_bit_words(n) * 4);
    for block in 0..two_bit_words(n) {
        let start = block * 16;
        let end = usize::min(start + 16, n);
        let word = &mut compressed[block * 4..block * 4 + 4];
        word.fill(0);
        for i in start..end {
            if residual[i] >= threshold {
                word[(i - start) >> 2] |= POS_BITS[i & 3];
            } else if residual[i] <= -threshold {
                word[(i - start) >> 2] |= NEG_BITS[i & 3];
            }
        }
    }
}

/// Two-bit dequantize: `11` decodes to `+threshold`, `10` to `-threshold`,
/// `00` to zero. Code `01` is unreachable from the packers and decodes to
/// zero as well.
pub fn dequantize_two_bit(compressed: &[u8], out: &mut [f32], threshold: f32) {
    debug_assert!(compressed.len() >= two_bit_words(out.len()) * 4);
    for (i, g) in out.iter_mut().enumerate() {
        let posmask = POS_BITS[i & 3];
        let negmask = NEG_BITS[i & 3];
        let masked = compressed[i >> 2] & posmask;
        *g = if masked == posmask {
            threshold
        } else if masked == negmask {
            -threshold
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_pack_symbol_bits() {
        // x = [-2, -0.5, 0.5, 2], threshold 0, alpha 1: residual equals the
        // gradient after the pre-pass, bits are the signs MSB-first.
        let residual = [-2.0f32, -0.5, 0.5, 2.0];
        let mut compressed = [0u8; 4];
        pack_one_bit_sign(&residual, &mut compressed, 0.0);
        assert_eq!(compressed[0], 0b0011_0000);

        let mut out = [0.0f32; 4];
        dequantize_one_bit(&compressed, &mut out);
        assert_eq!(out, [-1.0, -1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_one_bit_charging_residual_trajectory() {
        // Repeated x = 0.3 with threshold 1: the residual climbs by 1.3
        // while below the threshold, then is charged back down by 2 on the
        // step where the bit fires.
        let grad = [0.3f32; 8];
        let mut residual = [0.0f32; 8];
        let mut compressed = [0u8; 4];

        quantize_one_bit(&grad, &mut compressed, &mut residual, 1.0, 1.0);
        assert_eq!(compressed, [0u8; 4]);
        for r in residual {
            assert!((r - 1.3).abs() < 1e-6);
        }

        quantize_one_bit(&grad, &mut compressed, &mut residual, 1.0, 1.0);
        assert_eq!(compressed, [0xff, 0, 0, 0]);
        for r in residual {
            assert!((r - 0.6).abs() < 1e-6);
        }

        quantize_one_bit(&grad, &mut compressed, &mut residual, 1.0, 1.0);
        assert_eq!(compressed, [0u8; 4]);
        for r in residual {
            assert!((r - 1.9).abs() < 1e-6);
        }
    }

    #[test]
    fn test_one_bit_charging_zero_threshold_round_trip() {
        let grad = [3.0f32, -1.0, 0.5, -0.25, 2.0];
        let mut residual = [0.0f32; 5];
        let mut compressed = [0u8; 4];
        quantize_one_bit(&grad, &mut compressed, &mut residual, 0.0, 1.0);

        let mut out = [0.0f32; 5];
        dequantize_one_bit(&compressed, &mut out);
        assert_eq!(out, [1.0, -1.0, 1.0, -1.0, 1.0]);
        // Zero charge: the residual carries the full gradient forward.
        assert_eq!(residual, grad);
    }

    #[test]
    fn test_one_bit_fused_unit_charge() {
        let grad = [2.5f32, -2.5];
        let mut residual = [0.0f32; 2];
        let mut compressed = [0u8; 4];
        quantize_one_bit_fused(&grad, &mut compressed, &mut residual, 0.0, 1.0);
        assert_eq!(compressed[0], 0b1000_0000);
        assert!((residual[0] - 1.5).abs() < 1e-6);
        assert!((residual[1] - -1.5).abs() < 1e-6);
    }

    #[test]
    fn test_two_bit_zero_band() {
        // x = [0.1, 0.6, -0.6, -0.1], threshold 0.5: codes 00, 11, 10, 00.
        let grad = [0.1f32, 0.6, -0.6, -0.1];
        let mut residual = [0.0f32; 4];
        let mut compressed = [0u8; 4];
        quantize_two_bit(&grad, &mut compressed, &mut residual, 0.5, 1.0);
        assert_eq!(compressed[0], 0b0011_1000);

        let mut out = [0.0f32; 4];
        dequantize_two_bit(&compressed, &mut out, 0.5);
        assert_eq!(out, [0.0, 0.5, -0.5, 0.0]);

        let expected_residual = [0.1f32, 0.1, -0.1, -0.1];
        for (r, e) in residual.iter().zip(expected_residual.iter()) {
            assert!((r - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_two_bit_sign_pack_leaves_residual() {
        let residual = [0.7f32, -0.7, 0.2, -0.2];
        let mut compressed = [0u8; 4];
        pack_two_bit_sign(&residual, &mut compressed, 0.5);
        assert_eq!(compressed[0], 0b1110_0000);

        let mut out = [0.0f32; 4];
        dequantize_two_bit(&compressed, &mut out, 0.5);
        assert_eq!(out, [0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_two_bit_unreachable_code_decodes_to_zero() {
        // Byte 0b0101_0101 holds code 01 in every lane.
        let compressed = [0b0101_0101u8, 0, 0, 0];
        let mut out = [9.0f32; 4];
        dequantize_two_bit(&compressed, &mut out, 0.5);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn test_partial_block_trailing_bits_zeroed() {
        let grad = [5.0f32; 5];
        let mut residual = [0.0f32; 5];
        let mut compressed = [0xffu8; 4];
        quantize_one_bit(&grad, &mut compressed, &mut residual, 0.0, 1.0);
        // First five bits set, everything past the logical end cleared.
        assert_eq!(compressed, [0b1111_1000, 0, 0, 0]);
    }

    #[test]
    fn test_fast_aggregate_matches_decompress_plus_add() {
        let grad = [1.0f32, -1.0, 1.0, -1.0, -1.0, 1.0];
        let mut residual = [0.0f32; 6];
        let mut c1 = [0u8; 4];
        quantize_one_bit_fused(&grad, &mut c1, &mut residual, 0.0, 1.0);

        let mut acc = [0.5f32; 6];
        let mut via_add = acc;
        dequantize_one_bit_add(&c1, &mut via_add);

        let mut dense = [0.0f32; 6];
        dequantize_one_bit(&c1, &mut dense);
        for (a, d) in acc.iter_mut().zip(dense.iter()) {
            *a += d;
        }
        assert_eq!(via_add, acc);
    }

    #[test]
    fn test_deterministic_packing() {
        let grad: Vec<f32> = (0..100).map(|i| (i as f32) * 0.37 - 18.0).collect();
        let mut c1 = vec![0u8; one_bit_words(100) * 4];
        let mut c2 = vec![0u8; one_bit_words(100) * 4];
        let mut r1 = vec![0.0f32; 100];
        let mut r2 = vec![0.0f32; 100];
        quantize_one_bit(&grad, &mut c1, &mut r1, 0.5, 0.9);
        quantize_one_bit(&grad, &mut c2, &mut r2, 0.5, 0.9);
        assert_eq!(c1, c2);
        assert_eq!(r1, r2);
    }
}
