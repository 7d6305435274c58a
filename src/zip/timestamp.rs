//! MS-DOS date/time fields and the clock that stamps written entries.
//!
//! Time word: bits 0-4 seconds/2, bits 5-10 minutes, bits 11-15 hours.
//! Date word: bits 0-4 day, bits 5-8 month, bits 9-15 years since 1980.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Suffix of compiled-code entries, which get a distinct normalized time.
pub const CODE_FILE_SUFFIX: &str = ".class";

const MIN_YEAR: i32 = 1980;
const MAX_YEAR: i32 = 2107;

/// A packed DOS timestamp as stored in local and central headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    pub const EPOCH: DosDateTime = DosDateTime { date: 33, time: 0 };

    /// Pack calendar fields. Odd seconds round down. Returns `None` outside
    /// 1980-01-01 00:00:00 ..= 2107-12-31 23:59:58 or for nonsensical fields.
    pub fn from_parts(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Option<Self> {
        let in_range = (MIN_YEAR..=MAX_YEAR).contains(&i32::from(year))
            && (1..=12).contains(&month)
            && (1..=31).contains(&day)
            && hour < 24
            && minute < 60
            && second < 60;
        if !in_range {
            return None;
        }
        let date = ((year - 1980) << 9) | (u16::from(month) << 5) | u16::from(day);
        let time = (u16::from(hour) << 11) | (u16::from(minute) << 5) | u16::from(second / 2);
        Some(Self { date, time })
    }

    /// Unpack to `(year, month, day)`.
    pub fn date_parts(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Unpack to `(hour, minute, second)`.
    pub fn time_parts(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// Pack a calendar time, clamping to the representable range.
    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        if dt.year() < MIN_YEAR {
            return Self::EPOCH;
        }
        if dt.year() > MAX_YEAR {
            return Self {
                date: (127 << 9) | (12 << 5) | 31,
                time: (23 << 11) | (59 << 5) | 29,
            };
        }
        Self::from_parts(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second().min(59) as u8,
        )
        .unwrap_or(Self::EPOCH)
    }

    /// Calendar time this value denotes, if its fields form a real date.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let (year, month, day) = self.date_parts();
        let (hour, minute, second) = self.time_parts();
        NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))?.and_hms_opt(
            u32::from(hour),
            u32::from(minute),
            u32::from(second),
        )
    }
}

/// Decides the timestamp of every entry written in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationClock {
    /// Fixed 1980-01-01 stamps; code entries get 00:00:02, the rest 00:00:00.
    Normalized,
    /// Every entry gets the run's start time.
    WallClock(DosDateTime),
}

impl NormalizationClock {
    /// `started` is the run's start time in local time.
    pub fn new(normalize: bool, started: NaiveDateTime) -> Self {
        if normalize {
            Self::Normalized
        } else {
            Self::WallClock(DosDateTime::from_naive(&started))
        }
    }

    pub fn stamp(&self, path: &str) -> DosDateTime {
        match self {
            Self::Normalized if path.ends_with(CODE_FILE_SUFFIX) => DosDateTime {
                date: DosDateTime::EPOCH.date,
                time: 1,
            },
            Self::Normalized => DosDateTime::EPOCH,
            Self::WallClock(stamp) => *stamp,
        }
    }

    pub fn is_normalized(&self) -> bool {
        matches!(self, Self::Normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn epoch_packs_to_33_and_0() {
        assert_eq!(DosDateTime::from_parts(1980, 1, 1, 0, 0, 0), Some(DosDateTime::EPOCH));
    }

    #[test]
    fn parts_round_trip_at_range_limits() {
        for (y, mo, d, h, mi, s) in [(1980, 1, 1, 0, 0, 0), (2107, 12, 31, 23, 59, 58), (2024, 2, 29, 13, 7, 44)] {
            let packed = DosDateTime::from_parts(y, mo, d, h, mi, s).unwrap();
            assert_eq!(packed.date_parts(), (y, mo, d));
            assert_eq!(packed.time_parts(), (h, mi, s));
        }
    }

    #[test]
    fn odd_seconds_round_down() {
        let packed = DosDateTime::from_parts(2001, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(packed.time_parts(), (7, 8, 8));
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert!(DosDateTime::from_parts(1979, 12, 31, 23, 59, 58).is_none());
        assert!(DosDateTime::from_parts(2108, 1, 1, 0, 0, 0).is_none());
        assert!(DosDateTime::from_parts(2000, 13, 1, 0, 0, 0).is_none());
    }

    #[test]
    fn from_naive_clamps() {
        assert_eq!(DosDateTime::from_naive(&naive(1970, 1, 1, 0, 0, 0)), DosDateTime::EPOCH);
        let late = DosDateTime::from_naive(&naive(2200, 6, 1, 0, 0, 0));
        assert_eq!(late.date_parts(), (2107, 12, 31));
        assert_eq!(late.time_parts(), (23, 59, 58));
    }

    #[test]
    fn to_naive_inverts_from_naive_on_even_seconds() {
        let dt = naive(2019, 10, 3, 18, 45, 32);
        assert_eq!(DosDateTime::from_naive(&dt).to_naive(), Some(dt));
    }

    #[test]
    fn normalized_clock_distinguishes_code_entries() {
        let clock = NormalizationClock::new(true, naive(2020, 1, 1, 12, 0, 0));
        assert_eq!(clock.stamp("com/x/Main.class"), DosDateTime { date: 33, time: 1 });
        assert_eq!(clock.stamp("com/x/res.txt"), DosDateTime { date: 33, time: 0 });
        assert_eq!(clock.stamp("com/x/"), DosDateTime { date: 33, time: 0 });
    }

    #[test]
    fn wall_clock_uses_start_time_for_all_entries() {
        let clock = NormalizationClock::new(false, naive(2020, 1, 1, 12, 0, 3));
        let stamp = clock.stamp("A.class");
        assert_eq!(stamp, clock.stamp("b.txt"));
        assert_eq!(stamp.time_parts(), (12, 0, 2));
    }
}
