//! Host-side reference algorithms: matrix generation, bit packing, and the
//! XNOR-popcount GEMM the GPU kernel is validated against.
//!
//! # Bit layout
//!
//! A sign matrix packs along its contracted dimension into little-endian
//! 32-bit words, one bit per element: bit `k & 31` of word `k >> 5` holds
//! element `k`, where `value >= 0.0` packs as 1. Each packed row occupies
//! `K_words = ceil(K_bits / 32)` contiguous words, and the unused high bits
//! of the final word are zero.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::DeviceError;
use crate::types::{DataDomain, MatrixOrder};

/// Storage width in 32-bit words of one packed row of `k_bits` elements.
pub fn k_words(k_bits: u32) -> u32 {
    k_bits.div_ceil(32)
}

/// Mask selecting the valid bits of the final word of a packed row.
pub fn tail_mask(k_bits: u32) -> u32 {
    let rem = k_bits & 31;
    if rem == 0 {
        u32::MAX
    } else {
        (1u32 << rem) - 1
    }
}

/// Generate a `rows * cols` float matrix with values drawn from `domain`.
///
/// Every domain draws from a ChaCha stream seeded by `seed`, so the output
/// is a pure function of `(domain, rows, cols, seed)`.
pub fn random_matrix(
    domain: DataDomain,
    rows: u32,
    cols: u32,
    seed: u32,
) -> Result<Vec<f32>, DeviceError> {
    if rows == 0 || cols == 0 {
        return Err(DeviceError::LaunchFailed(format!(
            "cannot generate a {rows}x{cols} matrix"
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(u64::from(seed));
    let len = rows as usize * cols as usize;
    let mut out = Vec::with_capacity(len);

    for _ in 0..len {
        let value = match domain {
            DataDomain::PmOne => {
                if rng.random_range(0..2u32) == 1 {
                    1.0
                } else {
                    -1.0
                }
            }
            DataDomain::ZeroOne => rng.random_range(0.0f32..1.0),
            DataDomain::FullRange => rng.random_range(-1.0e6f32..=1.0e6),
            DataDomain::Trinary => (rng.random_range(-1i32..=1)) as f32,
        };
        out.push(value);
    }

    Ok(out)
}

/// Pack a matrix of signs into bit words along its contracted dimension.
///
/// `RowMajor`: `input` is `[rows x k_bits]` row-major and each row packs into
/// one output row. `ColMajor`: `input` is `[k_bits x rows]` row-major and
/// each original *column* becomes one packed row. Either way the output is
/// `[rows x k_words]`.
pub fn pack_bits(
    order: MatrixOrder,
    input: &[f32],
    rows: u32,
    k_bits: u32,
) -> Result<Vec<u32>, DeviceError> {
    match order {
        MatrixOrder::RowMajor => pack_row_major(input, rows, k_bits),
        MatrixOrder::ColMajor => pack_col_major(input, rows, k_bits),
    }
}

/// Pack a `[rows x k_bits]` row-major matrix into `[rows x k_words]`.
pub fn pack_row_major(input: &[f32], rows: u32, k_bits: u32) -> Result<Vec<u32>, DeviceError> {
    let words = k_words(k_bits) as usize;
    let expected = rows as usize * k_bits as usize;
    if input.len() != expected {
        return Err(DeviceError::LaunchFailed(format!(
            "row-major pack expected {expected} elements, got {}",
            input.len()
        )));
    }

    let mut out = vec![0u32; rows as usize * words];
    for r in 0..rows as usize {
        let row_in = r * k_bits as usize;
        let row_out = r * words;
        for k in 0..k_bits as usize {
            let bit = u32::from(input[row_in + k] >= 0.0);
            out[row_out + (k >> 5)] |= bit << (k & 31);
        }
    }
    Ok(out)
}

/// Pack a `[k_bits x cols]` row-major matrix column-wise into
/// `[cols x k_words]`, so each original column becomes one packed row.
pub fn pack_col_major(input: &[f32], cols: u32, k_bits: u32) -> Result<Vec<u32>, DeviceError> {
    let words = k_words(k_bits) as usize;
    let expected = k_bits as usize * cols as usize;
    if input.len() != expected {
        return Err(DeviceError::LaunchFailed(format!(
            "column-major pack expected {expected} elements, got {}",
            input.len()
        )));
    }

    let mut out = vec![0u32; cols as usize * words];
    for c in 0..cols as usize {
        let row_out = c * words;
        for k in 0..k_bits as usize {
            let bit = u32::from(input[k * cols as usize + c] >= 0.0);
            out[row_out + (k >> 5)] |= bit << (k & 31);
        }
    }
    Ok(out)
}

/// Reference binary GEMM over packed operands.
///
/// `a_bits` is `[m x k_words]`, `b_bits` is `[n x k_words]` (columns packed
/// as rows). Each output element is the ±1 inner product recovered from an
/// XNOR-popcount: `2 * matches - k_bits`.
pub fn binmatmul_reference(
    a_bits: &[u32],
    b_bits: &[u32],
    m: u32,
    n: u32,
    k_bits: u32,
) -> Result<Vec<i32>, DeviceError> {
    let words = k_words(k_bits) as usize;
    let a_needed = m as usize * words;
    let b_needed = n as usize * words;
    if a_bits.len() != a_needed || b_bits.len() != b_needed {
        return Err(DeviceError::LaunchFailed(format!(
            "binmatmul operand sizes {}/{} do not match m={m} n={n} k_bits={k_bits}",
            a_bits.len(),
            b_bits.len()
        )));
    }

    let mask = tail_mask(k_bits);
    let mut c = vec![0i32; m as usize * n as usize];

    for r in 0..m as usize {
        let a_row = &a_bits[r * words..(r + 1) * words];
        for col in 0..n as usize {
            let b_row = &b_bits[col * words..(col + 1) * words];

            let mut matches = 0u32;
            for kw in 0..words {
                let mut x = !(a_row[kw] ^ b_row[kw]);
                if kw + 1 == words {
                    x &= mask;
                }
                matches += x.count_ones();
            }

            c[r * n as usize + col] = matches as i32 * 2 - k_bits as i32;
        }
    }

    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_matrix_rejects_zero_dimensions() {
        assert!(random_matrix(DataDomain::PmOne, 0, 8, 1).is_err());
        assert!(random_matrix(DataDomain::PmOne, 8, 0, 1).is_err());
    }

    #[test]
    fn random_matrix_is_deterministic_per_seed() {
        let a = random_matrix(DataDomain::PmOne, 16, 16, 123).unwrap();
        let b = random_matrix(DataDomain::PmOne, 16, 16, 123).unwrap();
        let c = random_matrix(DataDomain::PmOne, 16, 16, 124).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn random_matrix_respects_domains() {
        let pm = random_matrix(DataDomain::PmOne, 8, 8, 7).unwrap();
        assert!(pm.iter().all(|&v| v == 1.0 || v == -1.0));

        let zo = random_matrix(DataDomain::ZeroOne, 8, 8, 7).unwrap();
        assert!(zo.iter().all(|&v| (0.0..1.0).contains(&v)));

        let fr = random_matrix(DataDomain::FullRange, 8, 8, 7).unwrap();
        assert!(fr.iter().all(|&v| (-1.0e6..=1.0e6).contains(&v)));

        let tr = random_matrix(DataDomain::Trinary, 8, 8, 7).unwrap();
        assert!(tr.iter().all(|&v| v == -1.0 || v == 0.0 || v == 1.0));
    }

    #[test]
    fn pack_row_major_bit_positions() {
        // Row of 33 bits: bit 0 and bit 32 set, everything else clear.
        let mut row = vec![-1.0f32; 33];
        row[0] = 1.0;
        row[32] = 1.0;
        let packed = pack_row_major(&row, 1, 33).unwrap();
        assert_eq!(packed, vec![0x0000_0001, 0x0000_0001]);
    }

    #[test]
    fn pack_row_major_zero_counts_as_positive() {
        let packed = pack_row_major(&[0.0, -1.0, 1.0], 1, 3).unwrap();
        assert_eq!(packed, vec![0b101]);
    }

    #[test]
    fn pack_rejects_size_mismatch() {
        assert!(pack_row_major(&[1.0; 8], 1, 9).is_err());
        assert!(pack_col_major(&[1.0; 8], 3, 3).is_err());
    }

    #[test]
    fn tail_bits_of_last_word_are_zero() {
        for k_bits in [1u32, 31, 32, 33, 63, 64] {
            let input = vec![1.0f32; 2 * k_bits as usize];
            let packed = pack_row_major(&input, 2, k_bits).unwrap();
            let words = k_words(k_bits) as usize;
            for r in 0..2 {
                let last = packed[r * words + words - 1];
                assert_eq!(
                    last & !tail_mask(k_bits),
                    0,
                    "k_bits={k_bits} leaked tail bits"
                );
            }
        }
    }

    #[test]
    fn pack_col_major_transposes_columns_into_rows() {
        // B is [k_bits=2 x cols=3] row-major:
        //   row k=0: +1 -1 +1
        //   row k=1: -1 -1 +1
        let b = [1.0, -1.0, 1.0, -1.0, -1.0, 1.0];
        let packed = pack_col_major(&b, 3, 2).unwrap();
        // Column 0 = (+1, -1) -> 0b01; column 1 = (-1, -1) -> 0b00;
        // column 2 = (+1, +1) -> 0b11.
        assert_eq!(packed, vec![0b01, 0b00, 0b11]);
    }

    #[test]
    fn pack_is_stable_over_repacking() {
        let a = random_matrix(DataDomain::PmOne, 4, 48, 99).unwrap();
        let once = pack_row_major(&a, 4, 48).unwrap();
        // Unpack to signs, pack again: fixed point after one round.
        let mut signs = Vec::with_capacity(a.len());
        let words = k_words(48) as usize;
        for r in 0..4usize {
            for k in 0..48usize {
                let bit = (once[r * words + (k >> 5)] >> (k & 31)) & 1;
                signs.push(if bit == 1 { 1.0 } else { -1.0 });
            }
        }
        let twice = pack_row_major(&signs, 4, 48).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn reference_gemm_all_matching_bits() {
        for k_bits in [1u32, 31, 32, 33, 63, 64] {
            let words = k_words(k_bits) as usize;
            let a: Vec<u32> = (0..words)
                .map(|kw| tail_mask_last(words, k_bits, kw))
                .collect();
            let b = a.clone();
            let c = binmatmul_reference(&a, &b, 1, 1, k_bits).unwrap();
            assert_eq!(c, vec![k_bits as i32], "k_bits={k_bits}");
        }
    }

    // All-ones packed row with the tail masked on the final word.
    fn tail_mask_last(words: usize, k_bits: u32, kw: usize) -> u32 {
        if kw + 1 == words {
            tail_mask(k_bits)
        } else {
            u32::MAX
        }
    }

    #[test]
    fn reference_gemm_known_small_case() {
        // Every row of A is (+1, -1, +1); every column of B is (+1, +1, +1).
        // Each dot product is 1 - 1 + 1 = 1.
        let m = 4;
        let n = 4;
        let k_bits = 3;
        let a: Vec<f32> = (0..m).flat_map(|_| [1.0, -1.0, 1.0]).collect();
        let b = vec![1.0f32; (k_bits * n) as usize];

        let a_bits = pack_row_major(&a, m, k_bits).unwrap();
        let b_bits = pack_col_major(&b, n, k_bits).unwrap();
        let c = binmatmul_reference(&a_bits, &b_bits, m, n, k_bits).unwrap();
        assert_eq!(c, vec![1i32; (m * n) as usize]);
    }

    #[test]
    fn reference_gemm_range_and_parity() {
        for k_bits in [3u32, 16, 33, 64] {
            let a = random_matrix(DataDomain::PmOne, 8, k_bits, 11).unwrap();
            let b = random_matrix(DataDomain::PmOne, k_bits, 8, 22).unwrap();
            let a_bits = pack_row_major(&a, 8, k_bits).unwrap();
            let b_bits = pack_col_major(&b, 8, k_bits).unwrap();
            let c = binmatmul_reference(&a_bits, &b_bits, 8, 8, k_bits).unwrap();
            for &v in &c {
                assert!(v.unsigned_abs() <= k_bits);
                assert_eq!(
                    v.rem_euclid(2),
                    (k_bits as i32).rem_euclid(2),
                    "k_bits={k_bits} value={v}"
                );
            }
        }
    }

    #[test]
    fn reference_gemm_transpose_symmetry() {
        let m = 6u32;
        let n = 10u32;
        let k_bits = 33u32;

        let a = random_matrix(DataDomain::PmOne, m, k_bits, 5).unwrap();
        let b = random_matrix(DataDomain::PmOne, k_bits, n, 6).unwrap();

        let c = binmatmul_reference(
            &pack_row_major(&a, m, k_bits).unwrap(),
            &pack_col_major(&b, n, k_bits).unwrap(),
            m,
            n,
            k_bits,
        )
        .unwrap();

        // Transposed problem: Bᵀ is [n x k_bits] row-major, Aᵀ is
        // [k_bits x m] row-major.
        let b_t: Vec<f32> = (0..n as usize)
            .flat_map(|c_| (0..k_bits as usize).map(move |k| (c_, k)))
            .map(|(c_, k)| b[k * n as usize + c_])
            .collect();
        let a_t: Vec<f32> = (0..k_bits as usize)
            .flat_map(|k| (0..m as usize).map(move |r| (k, r)))
            .map(|(k, r)| a[r * k_bits as usize + k])
            .collect();

        let c_t = binmatmul_reference(
            &pack_row_major(&b_t, n, k_bits).unwrap(),
            &pack_col_major(&a_t, m, k_bits).unwrap(),
            n,
            m,
            k_bits,
        )
        .unwrap();

        for r in 0..m as usize {
            for col in 0..n as usize {
                assert_eq!(c[r * n as usize + col], c_t[col * m as usize + r]);
            }
        }
    }

    #[test]
    fn reference_gemm_rejects_size_mismatch() {
        let err = binmatmul_reference(&[0; 3], &[0; 4], 2, 2, 33).unwrap_err();
        assert!(matches!(err, DeviceError::LaunchFailed(_)));
    }
}
