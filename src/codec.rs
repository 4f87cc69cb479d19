//! # Value Codec
//!
//! Stateless conversions a consumer applies to raw blocks from a
//! [`crate::PollResult`].
//!
//! | Function | Input | Output |
//! |----------|-------|--------|
//! | [`signed_from_unsigned16`] | raw register | two's-complement value |
//! | [`scaled_tenth`] | raw register in 0.1 units | value rounded to whole units |
//! | [`bits_to_mask`] | bools, MSB first | packed integer |
//! | [`mask_to_bits`] | packed integer | bools, MSB first |
//!
//! ```rust
//! use heru_modbus::codec::{scaled_tenth, signed_from_unsigned16};
//!
//! assert_eq!(signed_from_unsigned16(0xFFFF), -1);
//! assert_eq!(scaled_tenth(205), 21);
//! ```

use chrono::Weekday;

/// Recover a signed value from a 16-bit register.
///
/// Bit 15 set yields `-((raw ^ 0xFFFF) + 1)`, otherwise `raw`.
#[inline]
pub fn signed_from_unsigned16(raw: u16) -> i32 {
    raw as i16 as i32
}

/// Divide a tenths register by ten, rounding half toward positive infinity.
///
/// `205 -> 21`, `-25 -> -2`, `0xFFFF (-1) -> 0`.
#[inline]
pub fn scaled_tenth(raw: u16) -> i32 {
    (signed_from_unsigned16(raw) + 5).div_euclid(10)
}

fn low_mask(length: usize) -> u32 {
    if length >= 32 {
        u32::MAX
    } else {
        (1u32 << length) - 1
    }
}

/// Pack booleans into an integer, first element most significant.
///
/// Shorter inputs are right-aligned; only the low `length` bits are kept.
pub fn bits_to_mask(bits: &[bool], length: usize) -> u32 {
    let packed = bits
        .iter()
        .fold(0u32, |acc, &bit| (acc << 1) | u32::from(bit));
    packed & low_mask(length)
}

/// Unpack the low `length` bits of `mask`, most significant first.
pub fn mask_to_bits(mask: u32, length: usize) -> Vec<bool> {
    let length = length.min(32);
    (0..length)
        .map(|i| mask & (1 << (length - 1 - i)) != 0)
        .collect()
}

/// Number of days in a week timer program
pub const WEEKDAY_BITS: usize = 7;

/// Weekday selection of a week timer program.
///
/// Stored as a 7-bit register; as bits MSB first the order is
/// `[sun, sat, fri, thu, wed, tue, mon]`, so Monday is bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WeekdayMask(u16);

impl WeekdayMask {
    /// Every day selected
    pub const ALL: WeekdayMask = WeekdayMask(0x7F);

    /// Mask from a raw holding register value
    pub fn from_register(raw: u16) -> Self {
        Self(raw & 0x7F)
    }

    /// Raw register value to write back
    pub fn to_register(self) -> u16 {
        self.0
    }

    /// Mask from `[sun, sat, fri, thu, wed, tue, mon]`
    pub fn from_bits(bits: &[bool]) -> Self {
        Self(bits_to_mask(bits, WEEKDAY_BITS) as u16)
    }

    /// `[sun, sat, fri, thu, wed, tue, mon]`
    pub fn to_bits(self) -> Vec<bool> {
        mask_to_bits(self.0 as u32, WEEKDAY_BITS)
    }

    fn bit(day: Weekday) -> u16 {
        1 << day.num_days_from_monday()
    }

    pub fn is_set(self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    pub fn set(&mut self, day: Weekday, enabled: bool) {
        if enabled {
            self.0 |= Self::bit(day);
        } else {
            self.0 &= !Self::bit(day);
        }
    }

    /// Selected days, Monday first
    pub fn days(self) -> Vec<Weekday> {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .filter(|&day| self.is_set(day))
        .collect()
    }
}

impl FromIterator<Weekday> for WeekdayMask {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut mask = WeekdayMask::default();
        for day in iter {
            mask.set(day, true);
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_signed_recovery_fixed_points() {
        assert_eq!(signed_from_unsigned16(0x8000), -32768);
        assert_eq!(signed_from_unsigned16(0xFFFF), -1);
        assert_eq!(signed_from_unsigned16(0x0001), 1);
        assert_eq!(signed_from_unsigned16(0x7FFF), 32767);
    }

    #[test]
    fn test_scaled_tenth_rounding() {
        assert_eq!(scaled_tenth(205), 21);
        assert_eq!(scaled_tenth(0xFFFF), 0);
        assert_eq!(scaled_tenth(204), 20);
        // -2.5 rounds toward +inf
        assert_eq!(scaled_tenth((-25i16) as u16), -2);
        assert_eq!(scaled_tenth((-26i16) as u16), -3);
        assert_eq!(scaled_tenth((-5i16) as u16), 0);
        assert_eq!(scaled_tenth((-6i16) as u16), -1);
    }

    #[test]
    fn test_mask_bit_order() {
        // sunday only
        assert_eq!(
            bits_to_mask(&[true, false, false, false, false, false, false], 7),
            0b100_0000
        );
        assert_eq!(mask_to_bits(0b000_0001, 7), vec![false, false, false, false, false, false, true]);
        // short input is right-aligned
        assert_eq!(bits_to_mask(&[true, true], 7), 0b11);
        // high bits beyond length are ignored
        assert!(mask_to_bits(0b1000_0001, 7)[6]);
        assert!(!mask_to_bits(0b1000_0001, 7)[0]);
    }

    #[test]
    fn test_weekday_mask() {
        let mut mask = WeekdayMask::from_bits(&[true, false, false, false, false, false, true]);
        assert!(mask.is_set(Weekday::Sun));
        assert!(mask.is_set(Weekday::Mon));
        assert!(!mask.is_set(Weekday::Wed));
        assert_eq!(mask.to_register(), 0b100_0001);

        mask.set(Weekday::Wed, true);
        mask.set(Weekday::Sun, false);
        assert_eq!(mask.days(), vec![Weekday::Mon, Weekday::Wed]);

        let workdays: WeekdayMask = [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
            .into_iter()
            .collect();
        assert_eq!(workdays.to_register(), 0b001_1111);
        assert_eq!(WeekdayMask::from_register(0xFF), WeekdayMask::ALL);
    }

    proptest! {
        #[test]
        fn prop_negative_when_bit15_set(raw in 0x8000u16..=0xFFFF) {
            prop_assert!(signed_from_unsigned16(raw) < 0);
            prop_assert_eq!(signed_from_unsigned16(raw), -(((raw ^ 0xFFFF) as i32) + 1));
        }

        #[test]
        fn prop_identity_when_bit15_clear(raw in 0u16..0x8000) {
            prop_assert_eq!(signed_from_unsigned16(raw), raw as i32);
        }

        #[test]
        fn prop_scaled_tenth_matches_half_up(raw in any::<u16>()) {
            let expected = (signed_from_unsigned16(raw) as f64 / 10.0 + 0.5).floor() as i32;
            prop_assert_eq!(scaled_tenth(raw), expected);
        }

        #[test]
        fn prop_mask_round_trip(bits in proptest::collection::vec(any::<bool>(), 7)) {
            prop_assert_eq!(mask_to_bits(bits_to_mask(&bits, 7), 7), bits);
        }

        #[test]
        fn prop_weekday_register_round_trip(raw in 0u16..0x80) {
            let mask = WeekdayMask::from_register(raw);
            prop_assert_eq!(WeekdayMask::from_bits(&mask.to_bits()), mask);
        }
    }
}
