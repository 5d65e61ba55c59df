// FAT date/time decoding
// Dates count years from 1980; times have two-second resolution, refined by the
// creation-time tenths byte.

use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Decode a FAT date word; 0 means "not recorded"
pub fn parse_date(date: u16) -> Option<NaiveDate> {
    if date == 0 {
        return None;
    }

    let year = 1980 + ((date >> 9) & 0x7F) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Decode a FAT date and time pair
pub fn parse_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    let hour = ((time >> 11) & 0x1F) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;

    parse_date(date)?.and_hms_opt(hour, minute, second)
}

/// Creation timestamps carry an extra 0..=199 count of 10ms units
pub fn parse_creation_time(date: u16, time: u16, tenths: u8) -> Option<NaiveDateTime> {
    let base = parse_datetime(date, time)?;
    if tenths > 199 {
        return Some(base);
    }
    Some(base + Duration::milliseconds(tenths as i64 * 10))
}
