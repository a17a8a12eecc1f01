//! S7 DATE_AND_TIME value (BCD encoded)

use crate::error::{S7Error, S7Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encode a value 0..=99 as packed BCD
pub fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Decode a packed BCD byte
pub fn from_bcd(byte: u8) -> S7Result<u8> {
    let high = byte >> 4;
    let low = byte & 0x0F;
    if high > 9 || low > 9 {
        return Err(S7Error::InvalidData(format!("Invalid BCD byte 0x{:02X}", byte)));
    }
    Ok(high * 10 + low)
}

/// Date and time as kept by the controller clock
///
/// Years are limited to 1990..=2089, the range of the two-digit BCD year.
/// The weekday runs from 1 (Sunday) to 7 (Saturday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlcDateTime {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    millisecond: u16,
    weekday: u8,
}

impl PlcDateTime {
    pub const LENGTH: usize = 8;

    /// Constructs a PLC date/time, deriving the weekday from the date
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidData` if any field is out of range or the date
    /// does not exist.
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        millisecond: u16,
    ) -> S7Result<Self> {
        if !(1990..=2089).contains(&year) {
            return Err(S7Error::InvalidData(format!(
                "Year is out of range [1990, 2089], got {}",
                year
            )));
        }
        let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32).ok_or_else(|| {
            S7Error::InvalidData(format!("Invalid date {}-{:02}-{:02}", year, month, day))
        })?;
        if hour > 23 || minute > 59 || second > 59 || millisecond > 999 {
            return Err(S7Error::InvalidData(format!(
                "Invalid time {:02}:{:02}:{:02}.{:03}",
                hour, minute, second, millisecond
            )));
        }
        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millisecond,
            weekday: date.weekday().num_days_from_sunday() as u8 + 1,
        })
    }

    /// Decode from the 8-byte wire form
    pub fn decode(bytes: &[u8]) -> S7Result<Self> {
        if bytes.len() != Self::LENGTH {
            return Err(S7Error::InvalidData(format!(
                "Array has an invalid length. Expected {}, got {}",
                Self::LENGTH,
                bytes.len()
            )));
        }
        let yy = from_bcd(bytes[0])? as u16;
        let year = if yy >= 90 { 1900 + yy } else { 2000 + yy };
        let ms_high = from_bcd(bytes[6])? as u16;
        let ms_low = bytes[7] >> 4;
        if ms_low > 9 {
            return Err(S7Error::InvalidData(format!(
                "Invalid BCD millisecond digit in 0x{:02X}",
                bytes[7]
            )));
        }
        Self::new(
            year,
            from_bcd(bytes[1])?,
            from_bcd(bytes[2])?,
            from_bcd(bytes[3])?,
            from_bcd(bytes[4])?,
            from_bcd(bytes[5])?,
            ms_high * 10 + ms_low as u16,
        )
    }

    /// Encode into the 8-byte wire form
    pub fn encode(&self) -> [u8; Self::LENGTH] {
        [
            to_bcd((self.year % 100) as u8),
            to_bcd(self.month),
            to_bcd(self.day),
            to_bcd(self.hour),
            to_bcd(self.minute),
            to_bcd(self.second),
            to_bcd((self.millisecond / 10) as u8),
            (((self.millisecond % 10) as u8) << 4) | self.weekday,
        ]
    }

    /// Convert to a chrono timestamp
    pub fn to_naive(&self) -> S7Result<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)
            .and_then(|d| {
                d.and_hms_milli_opt(
                    self.hour as u32,
                    self.minute as u32,
                    self.second as u32,
                    self.millisecond as u32,
                )
            })
            .ok_or_else(|| S7Error::InvalidData(format!("Unrepresentable date/time {}", self)))
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn day(&self) -> u8 {
        self.day
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn second(&self) -> u8 {
        self.second
    }

    pub fn millisecond(&self) -> u16 {
        self.millisecond
    }

    /// Weekday, 1 = Sunday
    pub fn weekday(&self) -> u8 {
        self.weekday
    }
}

impl TryFrom<NaiveDateTime> for PlcDateTime {
    type Error = S7Error;

    fn try_from(value: NaiveDateTime) -> Result<Self, Self::Error> {
        let year = u16::try_from(value.year())
            .map_err(|_| S7Error::InvalidData(format!("Year {} out of range", value.year())))?;
        Self::new(
            year,
            value.month() as u8,
            value.day() as u8,
            value.hour() as u8,
            value.minute() as u8,
            value.second() as u8,
            // leap second nanos above 999ms are clamped
            (value.nanosecond() / 1_000_000).min(999) as u16,
        )
    }
}

impl fmt::Display for PlcDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.millisecond
        )
    }
}
