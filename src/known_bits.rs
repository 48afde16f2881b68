//! The known-bits algebra.
//!
//! A [KnownBits] tracks, for every bit position of a fixed-width value,
//! whether that position is known to be zero, known to be one, or unknown:
//!
//! | zero | one | meaning  |
//! |------|-----|----------|
//! | 0    | 0   | ?        |
//! | 1    | 0   | 0        |
//! | 0    | 1   | 1        |
//! | 1    | 1   | illegal  |
//!
//! `illegal` indicates a bug in the caller or in this module: every operation
//! asserts it never produces one. All binary operators require both operands
//! to have the same bit width.
//!
//! The operators here are pure: they neither know nor care where the masks
//! came from. Tying them to an instruction graph is the job of
//! [crate::analysis].

use crate::bitint::BitInt;

/// Which bit positions of a `bitw()`-bit value are known zero / known one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnownBits {
    zero: BitInt,
    one: BitInt,
}

impl KnownBits {
    /// Construct from the two masks.
    ///
    /// # Panics
    ///
    /// If the masks differ in width or claim a bit both zero and one.
    pub fn new(zero: BitInt, one: BitInt) -> Self {
        assert_eq!(zero.bitw(), one.bitw());
        let kb = Self { zero, one };
        assert!(!kb.has_conflict(), "bit claimed both zero and one");
        kb
    }

    /// A `bitw`-bit value about which nothing is known.
    pub fn unknown(bitw: u32) -> Self {
        Self {
            zero: BitInt::zero(bitw),
            one: BitInt::zero(bitw),
        }
    }

    /// A fully-known value.
    pub fn from_const(val: &BitInt) -> Self {
        Self {
            zero: val.bitnot(),
            one: val.clone(),
        }
    }

    /// The mask of positions known to be zero.
    pub fn zeros(&self) -> &BitInt {
        &self.zero
    }

    /// The mask of positions known to be one.
    pub fn ones(&self) -> &BitInt {
        &self.one
    }

    /// How many bits wide is the underlying value?
    ///
    /// # Panics
    ///
    /// If the two masks disagree on the width.
    pub fn bitw(&self) -> u32 {
        debug_assert_eq!(self.zero.bitw(), self.one.bitw());
        self.zero.bitw()
    }

    /// Is some position claimed to be both zero and one?
    pub fn has_conflict(&self) -> bool {
        !self.zero.bitand(&self.one).is_zero()
    }

    /// Is nothing known about any position?
    pub fn is_unknown(&self) -> bool {
        self.zero.is_zero() && self.one.is_zero()
    }

    /// Is every position known?
    pub fn is_constant(&self) -> bool {
        self.zero.bitor(&self.one).count_ones() == self.bitw()
    }

    /// The constant value this represents.
    ///
    /// # Panics
    ///
    /// If not all bits are known.
    pub fn to_const(&self) -> BitInt {
        assert!(self.is_constant());
        self.one.clone()
    }

    /// Is the value known to be negative (sign bit known one)?
    pub fn is_negative(&self) -> bool {
        self.one.bit(self.bitw() - 1)
    }

    /// Is the value known to be non-negative (sign bit known zero)?
    pub fn is_non_negative(&self) -> bool {
        self.zero.bit(self.bitw() - 1)
    }

    /// The smallest unsigned value consistent with the known bits.
    pub fn min_value(&self) -> BitInt {
        self.one.clone()
    }

    /// The largest unsigned value consistent with the known bits.
    pub fn max_value(&self) -> BitInt {
        self.zero.bitnot()
    }

    /// How many low bits are known to be zero?
    pub fn min_trailing_zeros(&self) -> u32 {
        self.zero.trailing_ones()
    }

    /// How many high bits are known to be zero?
    pub fn min_leading_zeros(&self) -> u32 {
        self.zero.leading_ones()
    }

    /// Force the sign bit to known zero.
    pub fn make_non_negative(&self) -> Self {
        let sign = self.bitw() - 1;
        Self {
            zero: self.zero.with_bit(sign, true),
            one: self.one.clone(),
        }
    }

    /// Force the sign bit to known one.
    pub fn make_negative(&self) -> Self {
        let sign = self.bitw() - 1;
        Self {
            zero: self.zero.clone(),
            one: self.one.with_bit(sign, true),
        }
    }

    /// Keep only the positions known identically in both `self` and `other`.
    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            zero: self.zero.bitand(&other.zero),
            one: self.one.bitand(&other.one),
        }
    }

    /// `self & other`.
    pub fn and(&self, other: &Self) -> Self {
        Self {
            zero: self.zero.bitor(&other.zero),
            one: self.one.bitand(&other.one),
        }
    }

    /// `self | other`.
    pub fn or(&self, other: &Self) -> Self {
        Self {
            zero: self.zero.bitand(&other.zero),
            one: self.one.bitor(&other.one),
        }
    }

    /// `self ^ other`.
    pub fn xor(&self, other: &Self) -> Self {
        Self {
            zero: self
                .zero
                .bitand(&other.zero)
                .bitor(&self.one.bitand(&other.one)),
            one: self
                .zero
                .bitand(&other.one)
                .bitor(&self.one.bitand(&other.zero)),
        }
    }

    /// Zero extend to `bitw` bits: the new high positions are known zero.
    pub fn zext(&self, bitw: u32) -> Self {
        let new = bitw - self.bitw();
        Self {
            zero: self
                .zero
                .zero_extend(bitw)
                .bitor(&BitInt::high_ones(bitw, new)),
            one: self.one.zero_extend(bitw),
        }
    }

    /// Sign extend to `bitw` bits: the new high positions inherit whatever is
    /// known about the sign bit. Sign-extending both masks does exactly that:
    /// a known-zero (-one) sign bit sets the top of `zero` (`one`), an
    /// unknown sign bit leaves both tops clear.
    pub fn sext(&self, bitw: u32) -> Self {
        Self {
            zero: self.zero.sign_extend(bitw),
            one: self.one.sign_extend(bitw),
        }
    }

    /// Extend to `bitw` bits with unknown high positions.
    pub fn anyext(&self, bitw: u32) -> Self {
        Self {
            zero: self.zero.zero_extend(bitw),
            one: self.one.zero_extend(bitw),
        }
    }

    /// Truncate to `bitw` bits.
    pub fn trunc(&self, bitw: u32) -> Self {
        Self {
            zero: self.zero.truncate(bitw),
            one: self.one.truncate(bitw),
        }
    }

    /// Zero extend or truncate to `bitw` bits, whichever applies.
    pub fn zext_or_trunc(&self, bitw: u32) -> Self {
        if bitw < self.bitw() {
            self.trunc(bitw)
        } else if bitw > self.bitw() {
            self.zext(bitw)
        } else {
            self.clone()
        }
    }

    /// Mark every position at and above `pos` as known zero, discarding
    /// anything previously known there.
    pub fn with_known_zero_from(&self, pos: u32) -> Self {
        let bitw = self.bitw();
        let high = BitInt::high_ones(bitw, bitw - pos);
        Self {
            zero: self.zero.bitor(&high),
            one: self.one.bitand(&high.bitnot()),
        }
    }

    /// Known bits of `lhs + rhs + carry`, where the carry is a 1-bit prior:
    /// `carry_zero`/`carry_one` assert it definitely is 0/1; both false means
    /// it is unknown.
    ///
    /// The carry is never propagated bit-serially. The maximum and minimum
    /// possible sums are computed in two machine additions and the per-bit
    /// carry knowledge is recovered by XORing them against the operands'
    /// masks; where all of lhs, rhs and incoming carry are known, the two
    /// possible sums agree and their bits are the result's bits.
    fn add_carry(lhs: &Self, rhs: &Self, carry_zero: bool, carry_one: bool) -> Self {
        assert!(
            !(carry_zero && carry_one),
            "carry can't be zero and one at the same time"
        );
        let bitw = lhs.bitw();
        let possible_sum_max = lhs
            .max_value()
            .wrapping_add(&rhs.max_value())
            .wrapping_add(&BitInt::from_u64(bitw, !carry_zero as u64));
        let possible_sum_min = lhs
            .min_value()
            .wrapping_add(&rhs.min_value())
            .wrapping_add(&BitInt::from_u64(bitw, carry_one as u64));

        let carry_known_zero = possible_sum_max
            .bitxor(&lhs.zero)
            .bitxor(&rhs.zero)
            .bitnot();
        let carry_known_one = possible_sum_min.bitxor(&lhs.one).bitxor(&rhs.one);

        let known = lhs
            .zero
            .bitor(&lhs.one)
            .bitand(&rhs.zero.bitor(&rhs.one))
            .bitand(&carry_known_zero.bitor(&carry_known_one));

        debug_assert_eq!(
            possible_sum_max.bitand(&known),
            possible_sum_min.bitand(&known),
            "known bits of sum differ"
        );

        Self {
            zero: possible_sum_max.bitnot().bitand(&known),
            one: possible_sum_min.bitand(&known),
        }
    }

    /// Known bits of `lhs + rhs` (`is_add`) or `lhs - rhs` (`!is_add`).
    /// `no_signed_wrap` lets a sign bit be recovered when both operands'
    /// signs are known and wrapping is excluded.
    pub fn add_sub(is_add: bool, no_signed_wrap: bool, lhs: &Self, rhs: &Self) -> Self {
        let out = if is_add {
            Self::add_carry(lhs, rhs, true, false)
        } else {
            // lhs - rhs == lhs + ~rhs + 1.
            let flipped = Self {
                zero: rhs.one.clone(),
                one: rhs.zero.clone(),
            };
            Self::add_carry(lhs, &flipped, false, true)
        };

        if no_signed_wrap && !out.is_negative() && !out.is_non_negative() {
            // Adding two non-negatives (or subtracting a negative from a
            // non-negative) can't wrap into negative, and vice versa.
            if lhs.is_non_negative() && rhs.is_non_negative() {
                return out.make_non_negative();
            } else if lhs.is_negative() && rhs.is_negative() {
                return out.make_negative();
            }
        }
        out
    }

    /// Known bits of `lhs * rhs`.
    ///
    /// Two separate estimates are merged. High end: the product of values
    /// with `m` and `n` leading zeros has at least `m + n - bitw` of them.
    /// Low end: the contiguous runs of known low bits multiply exactly, and
    /// known trailing zeros shift that exact product up, so
    /// `min(smallest known-run + total trailing zeros, bitw)` low bits of the
    /// result can be read off `lo(lhs.one) * lo(rhs.one)`.
    pub fn mul(lhs: &Self, rhs: &Self) -> Self {
        assert!(!lhs.has_conflict() && !rhs.has_conflict());
        let bitw = lhs.bitw();
        let lead_z = (lhs.min_leading_zeros() + rhs.min_leading_zeros())
            .saturating_sub(bitw)
            .min(bitw);

        let trail_bits_known0 = lhs.zero.bitor(&lhs.one).trailing_ones();
        let trail_bits_known1 = rhs.zero.bitor(&rhs.one).trailing_ones();
        let trail_zero0 = lhs.min_trailing_zeros();
        let trail_zero1 = rhs.min_trailing_zeros();
        let trail_z = trail_zero0 + trail_zero1;

        let smallest =
            (trail_bits_known0 - trail_zero0).min(trail_bits_known1 - trail_zero1);
        let result_bits_known = (smallest + trail_z).min(bitw);

        let bottom_known = lhs
            .one
            .lo_bits(trail_bits_known0)
            .wrapping_mul(&rhs.one.lo_bits(trail_bits_known1));

        Self {
            zero: BitInt::high_ones(bitw, lead_z)
                .bitor(&bottom_known.bitnot().lo_bits(result_bits_known)),
            one: bottom_known.lo_bits(result_bits_known),
        }
    }

    /// Shift both masks left by the constant `s` and mark the vacated low
    /// positions known zero.
    ///
    /// # Panics
    ///
    /// If `s >= self.bitw()`.
    pub fn shl_by(&self, s: u32) -> Self {
        let bitw = self.bitw();
        Self {
            zero: self
                .zero
                .checked_shl(s)
                .unwrap()
                .bitor(&BitInt::low_ones(bitw, s)),
            one: self.one.checked_shl(s).unwrap(),
        }
    }

    /// Shift both masks logically right by the constant `s` and mark the
    /// vacated high positions known zero.
    ///
    /// # Panics
    ///
    /// If `s >= self.bitw()`.
    pub fn lshr_by(&self, s: u32) -> Self {
        let bitw = self.bitw();
        Self {
            zero: self
                .zero
                .checked_lshr(s)
                .unwrap()
                .bitor(&BitInt::high_ones(bitw, s)),
            one: self.one.checked_lshr(s).unwrap(),
        }
    }

    /// Shift both masks arithmetically right by the constant `s`: knowledge
    /// about the sign bit smears across the vacated high positions.
    ///
    /// # Panics
    ///
    /// If `s >= self.bitw()`.
    pub fn ashr_by(&self, s: u32) -> Self {
        Self {
            zero: self.zero.checked_ashr(s).unwrap(),
            one: self.one.checked_ashr(s).unwrap(),
        }
    }

    /// Known bits of `lhs << rhs` for an abstract shift amount.
    pub fn shl(lhs: &Self, rhs: &Self) -> Self {
        let bitw = lhs.bitw();
        if rhs.is_constant()
            && let Some(s) = rhs.to_const().to_zero_ext_u32()
            && s < bitw
        {
            return lhs.shl_by(s);
        }

        // However far the value moves, at least min-shift low bits and the
        // operand's trailing zeros end up zero.
        let mut low = lhs.min_trailing_zeros();
        if rhs.min_value().to_zero_ext_u64() < u64::from(bitw) {
            low = low.max(rhs.min_value().to_zero_ext_u64() as u32);
        }
        Self {
            zero: BitInt::low_ones(bitw, low.min(bitw)),
            one: BitInt::zero(bitw),
        }
    }

    /// Known bits of `lhs >> rhs` (logical) for an abstract shift amount.
    pub fn lshr(lhs: &Self, rhs: &Self) -> Self {
        let bitw = lhs.bitw();
        if rhs.is_constant()
            && let Some(s) = rhs.to_const().to_zero_ext_u32()
            && s < bitw
        {
            return lhs.lshr_by(s);
        }

        let mut high = lhs.min_leading_zeros();
        if rhs.min_value().to_zero_ext_u64() < u64::from(bitw) {
            high = high.max(rhs.min_value().to_zero_ext_u64() as u32);
        }
        Self {
            zero: BitInt::high_ones(bitw, high.min(bitw)),
            one: BitInt::zero(bitw),
        }
    }

    /// Known bits of `lhs >> rhs` (arithmetic) for an abstract shift amount.
    /// Only the constant-amount case produces information.
    pub fn ashr(lhs: &Self, rhs: &Self) -> Self {
        let bitw = lhs.bitw();
        if rhs.is_constant()
            && let Some(s) = rhs.to_const().to_zero_ext_u32()
            && s < bitw
        {
            return lhs.ashr_by(s);
        }
        // TODO: leading sign bits survive any shift amount and could be
        // recovered here.
        Self::unknown(bitw)
    }

    /// Refine `self` under the assumption that the value is unsigned-`>= v`.
    ///
    /// Over the longest high prefix where the value is already known `<= v`,
    /// every one bit of `v` is forced into the result.
    fn make_ge(&self, v: &BitInt) -> Self {
        let bitw = self.bitw();
        let n = self.zero.bitor(v).leading_ones();
        let masked_v = v.bitand(&BitInt::high_ones(bitw, n));
        Self {
            zero: self.zero.clone(),
            one: self.one.bitor(&masked_v),
        }
    }

    /// Known bits of `umax(lhs, rhs)`.
    pub fn umax(lhs: &Self, rhs: &Self) -> Self {
        // One side may already dominate the other.
        if lhs.min_value().to_zero_ext_u64() >= rhs.max_value().to_zero_ext_u64() {
            return lhs.clone();
        }
        if rhs.min_value().to_zero_ext_u64() >= lhs.max_value().to_zero_ext_u64() {
            return rhs.clone();
        }

        // The result is >= both minimums, whichever side wins.
        let l = lhs.make_ge(&rhs.min_value());
        let r = rhs.make_ge(&lhs.min_value());
        l.intersect(&r)
    }

    /// Known bits of `umin(lhs, rhs)`.
    pub fn umin(lhs: &Self, rhs: &Self) -> Self {
        // Swapping the masks maps [0, MAX] onto [MAX, 0], turning min into
        // max.
        let flip = |x: &Self| Self {
            zero: x.one.clone(),
            one: x.zero.clone(),
        };
        flip(&Self::umax(&flip(lhs), &flip(rhs)))
    }

    /// Known bits of `smax(lhs, rhs)`.
    pub fn smax(lhs: &Self, rhs: &Self) -> Self {
        // Swapping what is known about the sign bit biases the signed range
        // onto the unsigned one.
        let flip = |x: &Self| {
            let sign = x.bitw() - 1;
            Self {
                zero: x.zero.with_bit(sign, x.one.bit(sign)),
                one: x.one.with_bit(sign, x.zero.bit(sign)),
            }
        };
        flip(&Self::umax(&flip(lhs), &flip(rhs)))
    }

    /// Known bits of `smin(lhs, rhs)`.
    pub fn smin(lhs: &Self, rhs: &Self) -> Self {
        // The umin flip and the smax flip composed.
        let flip = |x: &Self| {
            let sign = x.bitw() - 1;
            Self {
                zero: x.one.with_bit(sign, x.zero.bit(sign)),
                one: x.zero.with_bit(sign, x.one.bit(sign)),
            }
        };
        flip(&Self::umax(&flip(lhs), &flip(rhs)))
    }

    /// Known bits of `|self|` (two's complement absolute value).
    pub fn abs(&self) -> Self {
        if self.is_non_negative() {
            return self.clone();
        }
        let bitw = self.bitw();
        let mut out = Self::unknown(bitw);
        // The result's sign bit is zero iff some bit other than the sign bit
        // is set: only INT_MIN maps to a negative absolute value.
        if !self.one.with_bit(bitw - 1, false).is_zero() {
            out = out.make_non_negative();
        }
        out
    }

    /// Apply a byte swap to the value.
    pub fn byte_swap(&self) -> Self {
        Self {
            zero: self.zero.byte_swap(),
            one: self.one.byte_swap(),
        }
    }

    /// Apply a bit reversal to the value.
    pub fn reverse_bits(&self) -> Self {
        Self {
            zero: self.zero.reverse_bits(),
            one: self.one.reverse_bits(),
        }
    }

    /// Overwrite the `sub.bitw()`-bit slice at `offset` with `sub`.
    pub fn insert_bits(&self, sub: &Self, offset: u32) -> Self {
        Self {
            zero: self.zero.insert_bits(&sub.zero, offset),
            one: self.one.insert_bits(&sub.one, offset),
        }
    }

    /// Extract the `bitw`-bit slice at `offset`.
    pub fn extract_bits(&self, bitw: u32, offset: u32) -> Self {
        Self {
            zero: self.zero.extract_bits(bitw, offset),
            one: self.one.extract_bits(bitw, offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Build a [KnownBits] from a pattern such as `"?01?"`, most significant
    /// bit first.
    fn kb(s: &str) -> KnownBits {
        let bitw = u32::try_from(s.len()).unwrap();
        let mut zero = BitInt::zero(bitw);
        let mut one = BitInt::zero(bitw);
        for (i, c) in s.chars().rev().enumerate() {
            match c {
                '0' => zero = zero.with_bit(i as u32, true),
                '1' => one = one.with_bit(i as u32, true),
                '?' => (),
                _ => panic!("bad pattern char {c}"),
            }
        }
        KnownBits::new(zero, one)
    }

    /// Does the concrete value `x` fall within the set `kb` describes?
    fn matches(kb: &KnownBits, x: u64) -> bool {
        let x = BitInt::from_u64(kb.bitw(), x);
        x.bitand(kb.zeros()).is_zero() && x.bitnot().bitand(kb.ones()).is_zero()
    }

    /// Does `fine` know everything `coarse` knows, identically?
    fn refines(fine: &KnownBits, coarse: &KnownBits) -> bool {
        coarse.zeros().bitand(&fine.zeros().bitnot()).is_zero()
            && coarse.ones().bitand(&fine.ones().bitnot()).is_zero()
    }

    /// A random `KnownBits` of width `bitw` together with a concrete value
    /// matching it.
    fn kb_with_val(bitw: u32) -> impl Strategy<Value = (KnownBits, u64)> {
        (any::<u64>(), any::<u64>()).prop_map(move |(v, unknown)| {
            let v = BitInt::from_u64(bitw, v);
            let known = BitInt::from_u64(bitw, unknown).bitnot();
            let kb = KnownBits::new(v.bitnot().bitand(&known), v.bitand(&known));
            (kb, v.to_zero_ext_u64())
        })
    }

    #[test]
    fn and_patterns() {
        // ?0101?01 & 1??????0: every known zero on either side survives,
        // while the single shared-one candidate (bit 0) is killed by the
        // RHS's known zero.
        assert_eq!(kb("?0101?01").and(&kb("1??????0")), kb("?0?0??00"));
        // A fully-known mask against a fully-unknown value only pins the
        // zeros.
        assert_eq!(
            kb("????????").and(&KnownBits::from_const(&BitInt::from_u64(8, 12))),
            kb("0000??00")
        );
    }

    #[test]
    fn or_xor_patterns() {
        assert_eq!(kb("?01?").or(&kb("??11")), kb("??11"));
        assert_eq!(kb("1100").xor(&kb("1010")), kb("0110"));
        assert_eq!(kb("?100").xor(&kb("1010")), kb("?110"));
    }

    #[test]
    fn extend_patterns() {
        // Sign bit known one: the new high bits are known one.
        assert_eq!(kb("1?01").sext(8), kb("11111?01"));
        // Sign bit known zero: known zero.
        assert_eq!(kb("0?01").sext(8), kb("00000?01"));
        // Sign bit unknown: unknown.
        assert_eq!(kb("??01").sext(8), kb("??????01"));
        assert_eq!(kb("1?01").zext(8), kb("00001?01"));
        assert_eq!(kb("1?01").anyext(8), kb("????1?01"));
        assert_eq!(kb("10?1?01?").trunc(4), kb("?01?"));
    }

    #[test]
    fn mul_trailing_bits() {
        // ????1100 * ????1110: three trailing zeros, then the low product
        // bits 12 * 14 = 168 = 0b10101000 shine through.
        assert_eq!(
            KnownBits::mul(&kb("????1100"), &kb("????1110")),
            kb("???01000")
        );
        // No information, no result.
        assert!(KnownBits::mul(&kb("????????"), &kb("????????")).is_unknown());
    }

    #[test]
    fn shift_patterns() {
        // Constant shift: input bits slide up, vacated bits are zero.
        assert_eq!(
            KnownBits::shl(&kb("????????"), &KnownBits::from_const(&BitInt::from_u64(8, 3))),
            kb("?????000")
        );
        assert_eq!(
            KnownBits::shl(&kb("?10?1101"), &KnownBits::from_const(&BitInt::from_u64(8, 3))),
            kb("?1101000")
        );
        assert_eq!(
            KnownBits::lshr(&kb("1101????"), &KnownBits::from_const(&BitInt::from_u64(8, 4))),
            kb("00001101")
        );
        assert_eq!(
            KnownBits::ashr(&kb("1101????"), &KnownBits::from_const(&BitInt::from_u64(8, 4))),
            kb("11111101")
        );
        // Unknown shift of a value with two trailing zeros: they survive.
        assert_eq!(
            KnownBits::shl(&kb("??????00"), &kb("????????")),
            kb("??????00")
        );
        // Non-constant ashr gives up.
        assert!(KnownBits::ashr(&kb("11??????"), &kb("??????0?")).is_unknown());
    }

    #[test]
    fn oversized_shift_constant_is_unknown_ashr() {
        // An oversized constant falls off the constant path; for ashr that
        // means no information at all.
        let big = KnownBits::from_const(&BitInt::from_u64(8, 9));
        assert!(KnownBits::ashr(&kb("11000000"), &big).is_unknown());
    }

    #[test]
    fn abs_patterns() {
        assert_eq!(kb("0?1?").abs(), kb("0?1?"));
        // Negative with a low bit set: cannot be INT_MIN, so |x| is
        // non-negative.
        assert_eq!(kb("1??1").abs(), kb("0???"));
        // Could be INT_MIN: nothing known.
        assert!(kb("1???").abs().is_unknown());
    }

    #[test]
    fn minmax_patterns() {
        // Disjoint ranges resolve to one side entirely.
        assert_eq!(
            KnownBits::umax(&kb("0000??"), &kb("01????")),
            kb("01????")
        );
        assert_eq!(
            KnownBits::umin(&kb("0000??"), &kb("01????")),
            kb("0000??")
        );
        // Overlapping ranges still pin the shared high prefix.
        assert_eq!(
            KnownBits::umax(&kb("1???"), &kb("?0??")),
            kb("1???")
        );
    }

    #[test]
    fn slice_patterns() {
        let merged = KnownBits::unknown(16)
            .insert_bits(&kb("01?0"), 0)
            .insert_bits(&kb("1111"), 8);
        assert_eq!(merged, kb("????1111????01?0"));
        assert_eq!(merged.extract_bits(4, 8), kb("1111"));
        assert_eq!(kb("10??01?0").byte_swap().bitw(), 8);
        assert_eq!(kb("10??01?0").reverse_bits(), kb("0?10??01"));
        assert_eq!(kb("10??01?011110000").byte_swap(), kb("1111000010??01?0"));
    }

    proptest! {
        // Abstract results stay consistent with any matching concrete
        // computation and never conflict.
        #[test]
        fn consistency_bitwise(
            (a, x) in kb_with_val(8),
            (b, y) in kb_with_val(8),
        ) {
            for (abs, conc) in [
                (a.and(&b), x & y),
                (a.or(&b), x | y),
                (a.xor(&b), x ^ y),
                (KnownBits::add_sub(true, false, &a, &b), x.wrapping_add(y)),
                (KnownBits::add_sub(false, false, &a, &b), x.wrapping_sub(y)),
                (KnownBits::mul(&a, &b), x.wrapping_mul(y)),
                (KnownBits::umax(&a, &b), x.max(y)),
                (KnownBits::umin(&a, &b), x.min(y)),
            ] {
                prop_assert!(!abs.has_conflict());
                prop_assert!(matches(&abs, conc & 0xff));
            }
        }

        #[test]
        fn consistency_signed(
            (a, x) in kb_with_val(8),
            (b, y) in kb_with_val(8),
        ) {
            let (sx, sy) = (x as u8 as i8, y as u8 as i8);
            let smax = KnownBits::smax(&a, &b);
            let smin = KnownBits::smin(&a, &b);
            let abs = a.abs();
            prop_assert!(!smax.has_conflict());
            prop_assert!(!smin.has_conflict());
            prop_assert!(!abs.has_conflict());
            prop_assert!(matches(&smax, sx.max(sy) as u8 as u64));
            prop_assert!(matches(&smin, sx.min(sy) as u8 as u64));
            prop_assert!(matches(&abs, sx.wrapping_abs() as u8 as u64));
        }

        #[test]
        fn consistency_shifts((a, x) in kb_with_val(8), s in 0u32..8) {
            let amt = KnownBits::from_const(&BitInt::from_u64(8, s as u64));
            prop_assert!(matches(&KnownBits::shl(&a, &amt), (x << s) & 0xff));
            prop_assert!(matches(&KnownBits::lshr(&a, &amt), (x & 0xff) >> s));
            prop_assert!(matches(
                &KnownBits::ashr(&a, &amt),
                ((x as u8 as i8) >> s) as u8 as u64
            ));
        }

        #[test]
        fn consistency_resize((a, x) in kb_with_val(8)) {
            prop_assert!(matches(&a.zext(16), x & 0xff));
            prop_assert!(matches(&a.sext(16), (x as u8 as i8) as i16 as u16 as u64));
            prop_assert!(matches(&a.anyext(16), x & 0xff));
            prop_assert!(matches(&a.trunc(4), x & 0xf));
            prop_assert!(matches(&a.byte_swap().zext(16).byte_swap(), (x & 0xff) << 8));
            prop_assert!(matches(
                &a.reverse_bits(),
                ((x as u8).reverse_bits()) as u64
            ));
        }

        // Fully-known inputs produce the exact bit pattern.
        #[test]
        fn constants_are_exact(x in any::<u8>(), y in any::<u8>()) {
            let a = KnownBits::from_const(&BitInt::from_u64(8, x as u64));
            let b = KnownBits::from_const(&BitInt::from_u64(8, y as u64));
            for (abs, conc) in [
                (a.and(&b), x & y),
                (a.or(&b), x | y),
                (a.xor(&b), x ^ y),
                (KnownBits::add_sub(true, false, &a, &b), x.wrapping_add(y)),
                (KnownBits::add_sub(false, false, &a, &b), x.wrapping_sub(y)),
                (KnownBits::mul(&a, &b), x.wrapping_mul(y)),
                (KnownBits::umax(&a, &b), x.max(y)),
                (KnownBits::smin(&a, &b), (x as i8).min(y as i8) as u8),
            ] {
                prop_assert!(abs.is_constant());
                prop_assert_eq!(abs.to_const().to_zero_ext_u64(), conc as u64);
            }
        }

        // Refining an input never loses output knowledge.
        #[test]
        fn monotonicity(
            (a, x) in kb_with_val(8),
            (b, y) in kb_with_val(8),
        ) {
            // Fix every unknown bit of the inputs to the matching concrete
            // value: the sharpest refinements possible.
            let fa = KnownBits::from_const(&BitInt::from_u64(8, x));
            let fb = KnownBits::from_const(&BitInt::from_u64(8, y));
            prop_assert!(refines(&fa, &a));
            let pairs = [
                (fa.and(&fb), a.and(&b)),
                (fa.or(&fb), a.or(&b)),
                (fa.xor(&fb), a.xor(&b)),
                (
                    KnownBits::add_sub(true, false, &fa, &fb),
                    KnownBits::add_sub(true, false, &a, &b),
                ),
                (KnownBits::mul(&fa, &fb), KnownBits::mul(&a, &b)),
                (KnownBits::umax(&fa, &fb), KnownBits::umax(&a, &b)),
                (KnownBits::smin(&fa, &fb), KnownBits::smin(&a, &b)),
            ];
            for (fine, coarse) in pairs {
                prop_assert!(refines(&fine, &coarse));
            }
        }

        // The min/max family mirrors through mask and sign-bit flips.
        #[test]
        fn minmax_duality((a, _) in kb_with_val(8), (b, _) in kb_with_val(8)) {
            let flip = |x: &KnownBits| KnownBits::new(x.ones().clone(), x.zeros().clone());
            prop_assert_eq!(
                KnownBits::umin(&a, &b),
                flip(&KnownBits::umax(&flip(&a), &flip(&b)))
            );
            let sflip = |x: &KnownBits| {
                let s = x.bitw() - 1;
                KnownBits::new(
                    x.zeros().with_bit(s, x.ones().bit(s)),
                    x.ones().with_bit(s, x.zeros().bit(s)),
                )
            };
            prop_assert_eq!(
                KnownBits::smax(&a, &b),
                sflip(&KnownBits::umax(&sflip(&a), &sflip(&b)))
            );
        }

        // Subtracting an addend back agrees with the pre-add value
        // wherever both are known.
        #[test]
        fn add_sub_inverse((a, _) in kb_with_val(8), (b, _) in kb_with_val(8)) {
            let sum = KnownBits::add_sub(true, false, &a, &b);
            let back = KnownBits::add_sub(false, false, &sum, &b);
            let both = a
                .zeros()
                .bitor(a.ones())
                .bitand(&back.zeros().bitor(back.ones()));
            prop_assert_eq!(a.ones().bitand(&both), back.ones().bitand(&both));
            prop_assert_eq!(a.zeros().bitand(&both), back.zeros().bitand(&both));
        }

    }

    #[test]
    fn nsw_add_recovers_sign() {
        // Adding two non-negatives can carry into the sign bit, so the plain
        // add learns nothing about it; with no-signed-wrap promised, the
        // sign comes back known.
        let a = kb("0???????");
        let plain = KnownBits::add_sub(true, false, &a, &a);
        assert!(!plain.is_non_negative() && !plain.is_negative());
        let nsw = KnownBits::add_sub(true, true, &a, &a);
        assert!(nsw.is_non_negative());

        let c = kb("1???????");
        let nsw = KnownBits::add_sub(true, true, &c, &c);
        assert!(nsw.is_negative());

        // A mixed-sign pair leaves the sign unresolved even under nsw.
        let nsw = KnownBits::add_sub(true, true, &a, &c);
        assert!(!nsw.is_non_negative() && !nsw.is_negative());
    }
}
