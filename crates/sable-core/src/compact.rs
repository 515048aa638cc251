//! Compact-bits target encoding and chain work.
//!
//! `bits` is Bitcoin's 32-bit floating-point target form: the top byte is
//! a base-256 exponent, the low 23 bits a mantissa. The sign bit
//! (0x00800000) must be clear; a set sign bit or an encoding whose value
//! exceeds 256 bits is non-canonical and rejected.

use primitive_types::U256;

use crate::error::BlockError;
use crate::types::Hash256;

/// Decode compact bits into a full 256-bit target.
pub fn target_from_bits(bits: u32) -> Result<U256, BlockError> {
    // Negative targets are meaningless; reject the sign bit outright.
    if bits & 0x0080_0000 != 0 {
        return Err(BlockError::BadBits(bits));
    }

    let exponent = (bits >> 24) as usize;
    let mantissa = u64::from(bits & 0x007F_FFFF);

    if mantissa == 0 {
        return Ok(U256::zero());
    }

    // Overflow: the value must fit in 256 bits.
    if exponent > 34
        || (exponent == 34 && mantissa > 0xFF)
        || (exponent == 33 && mantissa > 0xFFFF)
    {
        return Err(BlockError::BadBits(bits));
    }

    let target = if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from(mantissa) << (8 * (exponent - 3))
    };
    Ok(target)
}

/// Encode a target into canonical compact bits.
///
/// The mantissa is shifted so its high bit (the sign position) is clear;
/// `target_from_bits(bits_from_target(t))` loses at most precision below
/// the top 23 bits, and the composition is idempotent.
pub fn bits_from_target(target: U256) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut size = (target.bits() + 7) / 8;
    let mut compact: u32 = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).low_u64() as u32
    };

    // Keep the sign bit clear by sliding the mantissa down a byte.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | ((size as u32) << 24)
}

/// The display-order integer of a block or share hash, as compared
/// against targets.
pub fn hash_to_u256(hash: &Hash256) -> U256 {
    U256::from_little_endian(hash.as_bytes())
}

/// Expected hashes to find a block at `target`: ⌊2²⁵⁶ / (target + 1)⌋.
pub fn block_work(target: U256) -> U256 {
    if target.is_zero() {
        return U256::zero();
    }
    if target == U256::MAX {
        return U256::one();
    }
    // 2^256 / (target+1) == (~target / (target+1)) + 1 in 256-bit space.
    (!target) / (target + U256::one()) + U256::one()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bitcoin_genesis_bits() {
        let target = target_from_bits(0x1D00_FFFF).unwrap();
        let expected = U256::from_big_endian(
            &hex::decode("00000000ffff0000000000000000000000000000000000000000000000000000")
                .unwrap(),
        );
        assert_eq!(target, expected);
    }

    #[test]
    fn regtest_bits_near_max() {
        let target = target_from_bits(0x207F_FFFF).unwrap();
        // 0x7fffff shifted into the top bytes: just below 2^255.
        assert_eq!(target, U256::from(0x7F_FFFFu64) << (8 * 29));
        assert!(target > U256::one() << 254);
    }

    #[test]
    fn sign_bit_rejected() {
        assert_eq!(
            target_from_bits(0x1D80_0000),
            Err(BlockError::BadBits(0x1D80_0000))
        );
    }

    #[test]
    fn overflow_rejected() {
        assert!(target_from_bits(0x2300_FFFF).is_err());
        assert!(target_from_bits(0x2201_0000).is_err());
    }

    #[test]
    fn zero_mantissa_is_zero_target() {
        assert_eq!(target_from_bits(0x1D00_0000).unwrap(), U256::zero());
        assert_eq!(bits_from_target(U256::zero()), 0);
    }

    #[test]
    fn small_exponents() {
        assert_eq!(target_from_bits(0x0100_0012).unwrap(), U256::from(0x12 >> 16));
        assert_eq!(target_from_bits(0x0200_1234).unwrap(), U256::from(0x1234 >> 8));
        assert_eq!(target_from_bits(0x0312_3456).unwrap(), U256::from(0x12_3456u64));
    }

    #[test]
    fn canonical_round_trip() {
        for bits in [0x1D00_FFFFu32, 0x207F_FFFF, 0x1E0F_FFFF, 0x1A00_FFFF, 0x0312_3456] {
            let target = target_from_bits(bits).unwrap();
            assert_eq!(bits_from_target(target), bits, "bits={bits:#010x}");
        }
    }

    #[test]
    fn encode_avoids_sign_bit() {
        // A target whose top mantissa byte has the high bit set must be
        // re-normalized with a larger exponent.
        let target = U256::from(0x80_0000u64);
        let bits = bits_from_target(target);
        assert_eq!(bits & 0x0080_0000, 0);
        assert_eq!(target_from_bits(bits).unwrap(), target);
    }

    #[test]
    fn hash_to_u256_uses_display_order() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0x01; // most significant in display order
        let value = hash_to_u256(&Hash256(bytes));
        assert_eq!(value, U256::one() << 248);
    }

    #[test]
    fn work_is_inverse_in_target() {
        let easy = target_from_bits(0x207F_FFFF).unwrap();
        let hard = target_from_bits(0x1D00_FFFF).unwrap();
        assert!(block_work(hard) > block_work(easy));
    }

    #[test]
    fn work_of_max_target_is_one() {
        assert_eq!(block_work(U256::MAX), U256::one());
    }

    #[test]
    fn work_known_value() {
        // target+1 = 2^224 * 0x10000 → work = 2^256/2^240 = 2^32... for
        // the Bitcoin genesis target: 2^256 / (0xffff * 2^208 + 1) ≈ 2^32.
        let target = target_from_bits(0x1D00_FFFF).unwrap();
        let work = block_work(target);
        assert!(work > U256::from(1u64) << 32);
        assert!(work < U256::from(1u64) << 33);
    }

    proptest! {
        #[test]
        fn decode_encode_idempotent(exp in 4u32..=32, mantissa in 1u32..0x7F_FFFF) {
            let bits = (exp << 24) | mantissa;
            if let Ok(target) = target_from_bits(bits) {
                let re = bits_from_target(target);
                prop_assert_eq!(target_from_bits(re).unwrap(), target);
                // Idempotence of the canonical direction.
                prop_assert_eq!(bits_from_target(target_from_bits(re).unwrap()), re);
            }
        }
    }
}
