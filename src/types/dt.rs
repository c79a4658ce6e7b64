//! Date and time codecs.
//!
//! Binary date and timestamp values count from 2000-01-01 (the PostgreSQL
//! epoch). `i32::MAX`/`i32::MIN` (dates) and `i64::MAX`/`i64::MIN`
//! (timestamps) are the `infinity`/`-infinity` sentinels and must never be
//! taken for real instants. Wire values outside chrono's representable range
//! decode to the canonical ISO string the server would have printed,
//! including the year-0 correction and " BC" suffix.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::{Error, Result};
use crate::protocol::codec::as_utf8;
use crate::types::SessionContext;
use crate::value::Value;

pub const USECS_PER_SEC: i64 = 1_000_000;
pub const USECS_PER_MINUTE: i64 = 60 * USECS_PER_SEC;
pub const USECS_PER_HOUR: i64 = 60 * USECS_PER_MINUTE;
pub const USECS_PER_DAY: i64 = 24 * USECS_PER_HOUR;

/// Days between 0001-01-01 (proleptic ordinal 1) and 2000-01-01.
pub const DATE_OFFSET: i32 = 730_120;

fn fixed<const N: usize>(raw: &[u8], what: &str) -> Result<[u8; N]> {
    raw.try_into()
        .map_err(|_| Error::Decode(format!("invalid {what} length: {}", raw.len())))
}

/// Proleptic-Gregorian `(year, month, day)` for a day count since
/// 2000-01-01, valid far outside the host date range. Julian day juggling
/// from the server's own calendar code; year ≤ 0 means BC.
fn date_parts_from_pg_days(pg_days: i64) -> (i64, u32, u32) {
    let mut julian = pg_days + 2_483_589;
    let quad = julian.div_euclid(146_097);
    let extra = julian.rem_euclid(146_097) * 4 + 3;
    julian += 60 + quad * 3 + extra.div_euclid(146_097);
    let quad2 = julian.div_euclid(1461);
    let mut j = julian.rem_euclid(1461);
    let mut year = j * 4 / 1461;
    j = if year != 0 {
        (j + 305).rem_euclid(365)
    } else {
        (j + 306).rem_euclid(366)
    } + 123;
    year += quad2 * 4;
    let quad3 = j * 2141 / 65536;
    (
        year - 4800,
        ((quad3 + 10) % 12 + 1) as u32,
        (j - 7834 * quad3 / 256) as u32,
    )
}

fn format_out_of_range_date(pg_days: i64) -> String {
    let (year, month, day) = date_parts_from_pg_days(pg_days);
    if year > 0 {
        format!("{year}-{month:02}-{day:02}")
    } else {
        // there is no year zero
        format!("{:04}-{month:02}-{day:02} BC", -(year - 1))
    }
}

fn format_usecs(usec: i64) -> String {
    if usec == 0 {
        String::new()
    } else {
        let mut s = format!(".{usec:06}");
        while s.ends_with('0') {
            s.pop();
        }
        s
    }
}

// === date ===

pub fn txt_date(ctx: &SessionContext, raw: &[u8]) -> Result<Value> {
    let s = as_utf8(raw)?;
    if ctx.iso_dates && s.len() == 10 {
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Value::Date(date));
        }
    }
    // out-of-range dates, BC dates and the infinity sentinels stay textual
    Ok(Value::Text(s.to_string()))
}

pub fn bin_date(raw: &[u8]) -> Result<Value> {
    let pg_days = i32::from_be_bytes(fixed(raw, "date")?);
    if pg_days == i32::MAX {
        return Ok(Value::Text("infinity".into()));
    }
    if pg_days == i32::MIN {
        return Ok(Value::Text("-infinity".into()));
    }
    match NaiveDate::from_num_days_from_ce_opt(pg_days.saturating_add(DATE_OFFSET)) {
        Some(date) if (pg_days as i64 + DATE_OFFSET as i64) == date.num_days_from_ce() as i64 => {
            Ok(Value::Date(date))
        }
        _ => Ok(Value::Text(format_out_of_range_date(pg_days as i64))),
    }
}

pub fn encode_date(date: &NaiveDate) -> Result<[u8; 4]> {
    Ok((date.num_days_from_ce() - DATE_OFFSET).to_be_bytes())
}

// === time ===

/// Parse `HH:MM:SS[.ffffff]`, tolerating hour 24 (wraps to 0).
fn parse_hms(s: &str) -> Result<(u32, u32, u32, u32)> {
    let invalid = || Error::Decode(format!("invalid time value: {s:?}"));

    let (hms, usec) = match s.split_once('.') {
        Some((hms, frac)) => {
            if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            let padded = format!("{frac:0<6}");
            (hms, padded.parse::<u32>().map_err(|_| invalid())?)
        }
        None => (s, 0),
    };

    let mut parts = hms.split(':');
    let mut next = |max| -> Result<u32> {
        let part = parts.next().ok_or_else(invalid)?;
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let v: u32 = part.parse().map_err(|_| invalid())?;
        if v > max { Err(invalid()) } else { Ok(v) }
    };

    let hour = next(24)?;
    let minute = next(59)?;
    let second = next(59)?;
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok((hour % 24, minute, second, usec))
}

pub fn txt_time(raw: &[u8]) -> Result<Value> {
    let s = as_utf8(raw)?;
    let (hour, minute, second, usec) = parse_hms(s)?;
    NaiveTime::from_hms_micro_opt(hour, minute, second, usec)
        .map(Value::Time)
        .ok_or_else(|| Error::Decode(format!("invalid time value: {s:?}")))
}

fn time_from_usecs(mut value: i64) -> Result<NaiveTime> {
    let hour = value.div_euclid(USECS_PER_HOUR);
    if value < 0 || hour > 24 {
        return Err(Error::Decode("invalid time value".into()));
    }
    value = value.rem_euclid(USECS_PER_HOUR);
    let minute = value / USECS_PER_MINUTE;
    let second = (value % USECS_PER_MINUTE) / USECS_PER_SEC;
    let usec = value % USECS_PER_SEC;
    NaiveTime::from_hms_micro_opt((hour % 24) as u32, minute as u32, second as u32, usec as u32)
        .ok_or_else(|| Error::Decode("invalid time value".into()))
}

pub fn bin_time(raw: &[u8]) -> Result<Value> {
    let usecs = i64::from_be_bytes(fixed(raw, "time")?);
    Ok(Value::Time(time_from_usecs(usecs)?))
}

pub fn encode_time(time: &NaiveTime) -> [u8; 8] {
    let usecs = time.num_seconds_from_midnight() as i64 * USECS_PER_SEC
        + (time.nanosecond() as i64) / 1000;
    usecs.to_be_bytes()
}

// === timetz ===

/// Parse `±HH[:MM[:SS]]` into offset seconds, east positive.
fn parse_tz_offset(s: &str) -> Result<i32> {
    let invalid = || Error::Decode(format!("invalid timezone offset: {s:?}"));
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(invalid()),
    };
    let mut secs = 0_i64;
    for (i, part) in rest.split(':').enumerate() {
        if i > 2 || part.len() != 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let v: i64 = part.parse().map_err(|_| invalid())?;
        secs += v * [3600, 60, 1][i];
    }
    Ok((sign * secs) as i32)
}

/// Split a value like `12:30:45.5+02:30` into time text and offset text.
fn split_time_offset(s: &str) -> Result<(&str, &str)> {
    match s.rfind(['+', '-']) {
        Some(pos) if pos > 0 => Ok((&s[..pos], &s[pos..])),
        _ => Err(Error::Decode(format!("invalid timetz value: {s:?}"))),
    }
}

pub fn txt_timetz(raw: &[u8]) -> Result<Value> {
    let s = as_utf8(raw)?;
    let (time_str, offset_str) = split_time_offset(s)?;
    let (hour, minute, second, usec) = parse_hms(time_str)?;
    let time = NaiveTime::from_hms_micro_opt(hour, minute, second, usec)
        .ok_or_else(|| Error::Decode(format!("invalid timetz value: {s:?}")))?;
    Ok(Value::TimeTz {
        time,
        offset_secs: parse_tz_offset(offset_str)?,
    })
}

pub fn bin_timetz(raw: &[u8]) -> Result<Value> {
    let arr: [u8; 12] = fixed(raw, "timetz")?;
    let usecs = i64::from_be_bytes(arr[..8].try_into().expect("slice length"));
    let tz = i32::from_be_bytes(arr[8..].try_into().expect("slice length"));
    Ok(Value::TimeTz {
        time: time_from_usecs(usecs)?,
        // the wire carries the offset negated (west positive)
        offset_secs: -tz,
    })
}

// === timestamp / timestamptz ===

fn timestamp_parts(value: i64) -> Result<(i64, NaiveTime)> {
    let pg_days = value.div_euclid(USECS_PER_DAY);
    let time = time_from_usecs(value.rem_euclid(USECS_PER_DAY))?;
    Ok((pg_days, time))
}

fn format_out_of_range_timestamp(pg_days: i64, time: NaiveTime, utc_suffix: bool) -> String {
    let (year, month, day) = date_parts_from_pg_days(pg_days);
    let (disp_year, bc) = if year < 1 { (-(year - 1), " BC") } else { (year, "") };
    let usec = format_usecs((time.nanosecond() / 1000) as i64);
    let tz = if utc_suffix { "+00" } else { "" };
    format!(
        "{disp_year:04}-{month:02}-{day:02} {:02}:{:02}:{:02}{usec}{tz}{bc}",
        time.hour(),
        time.minute(),
        time.second(),
    )
}

pub fn txt_timestamp(ctx: &SessionContext, raw: &[u8]) -> Result<Value> {
    let s = as_utf8(raw)?;
    if ctx.iso_dates {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
            return Ok(Value::Timestamp(ts));
        }
    }
    Ok(Value::Text(s.to_string()))
}

pub fn txt_timestamptz(ctx: &SessionContext, raw: &[u8]) -> Result<Value> {
    let s = as_utf8(raw)?;
    if ctx.iso_dates {
        for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
            if let Ok(ts) = chrono::DateTime::parse_from_str(s, format) {
                return Ok(Value::TimestampTz(ts));
            }
        }
    }
    Ok(Value::Text(s.to_string()))
}

pub fn bin_timestamp(raw: &[u8]) -> Result<Value> {
    let value = i64::from_be_bytes(fixed(raw, "timestamp")?);
    if value == i64::MAX {
        return Ok(Value::Text("infinity".into()));
    }
    if value == i64::MIN {
        return Ok(Value::Text("-infinity".into()));
    }
    let (pg_days, time) = timestamp_parts(value)?;
    let ordinal = pg_days + DATE_OFFSET as i64;
    match i32::try_from(ordinal)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
    {
        Some(date) => Ok(Value::Timestamp(date.and_time(time))),
        None => Ok(Value::Text(format_out_of_range_timestamp(
            pg_days, time, false,
        ))),
    }
}

pub fn bin_timestamptz(raw: &[u8]) -> Result<Value> {
    let value = i64::from_be_bytes(fixed(raw, "timestamptz")?);
    if value == i64::MAX {
        return Ok(Value::Text("infinity".into()));
    }
    if value == i64::MIN {
        return Ok(Value::Text("-infinity".into()));
    }
    let (pg_days, time) = timestamp_parts(value)?;
    let ordinal = pg_days + DATE_OFFSET as i64;
    match i32::try_from(ordinal)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
    {
        Some(date) => {
            let utc = date.and_time(time).and_utc();
            Ok(Value::TimestampTz(utc.fixed_offset()))
        }
        None => Ok(Value::Text(format_out_of_range_timestamp(
            pg_days, time, true,
        ))),
    }
}

pub fn encode_timestamp(ts: &NaiveDateTime) -> Result<[u8; 8]> {
    let pg_days = (ts.date().num_days_from_ce() - DATE_OFFSET) as i64;
    let time = ts.time();
    let time_usecs =
        time.num_seconds_from_midnight() as i64 * USECS_PER_SEC + (time.nanosecond() / 1000) as i64;
    let usecs = pg_days
        .checked_mul(USECS_PER_DAY)
        .and_then(|v| v.checked_add(time_usecs))
        .ok_or_else(|| Error::Encode("timestamp out of range".into()))?;
    Ok(usecs.to_be_bytes())
}

// === interval ===

pub fn txt_interval(ctx: &SessionContext, raw: &[u8]) -> Result<Value> {
    let s = as_utf8(raw)?;
    if !ctx.postgres_intervals {
        return Ok(Value::Text(s.to_string()));
    }

    let parts: Vec<&str> = s.split(' ').collect();
    let mut usecs = 0_i64;
    let unit_parts = if parts.len() % 2 == 1 {
        // odd part count: the last element is the time-of-day component
        let time_str = parts[parts.len() - 1];
        let (sign, time_str) = match time_str.as_bytes().first() {
            Some(b'-') => (-1, &time_str[1..]),
            Some(b'+') => (1, &time_str[1..]),
            _ => (1, time_str),
        };
        let (hour, minute, second, usec) = parse_hms(time_str)?;
        usecs = sign
            * (hour as i64 * USECS_PER_HOUR
                + minute as i64 * USECS_PER_MINUTE
                + second as i64 * USECS_PER_SEC
                + usec as i64);
        &parts[..parts.len() - 1]
    } else {
        &parts[..]
    };

    let mut years = 0_i64;
    let mut months = 0_i64;
    let mut days = 0_i64;
    for pair in unit_parts.chunks_exact(2) {
        let num: i64 = pair[0]
            .parse()
            .map_err(|e| Error::Decode(format!("invalid interval: {e}")))?;
        let unit = pair[1];
        if unit.starts_with("mo") {
            months = num;
        } else if unit.starts_with('y') {
            years = num;
        } else if unit.starts_with('d') {
            days = num;
        } else {
            return Err(Error::Decode(format!("invalid interval unit: {unit:?}")));
        }
    }

    Ok(Value::Interval {
        months: (years * 12 + months) as i32,
        days: days as i32,
        usecs,
    })
}

pub fn bin_interval(raw: &[u8]) -> Result<Value> {
    let arr: [u8; 16] = fixed(raw, "interval")?;
    Ok(Value::Interval {
        usecs: i64::from_be_bytes(arr[..8].try_into().expect("slice length")),
        days: i32::from_be_bytes(arr[8..12].try_into().expect("slice length")),
        months: i32::from_be_bytes(arr[12..].try_into().expect("slice length")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionContext {
        SessionContext::default()
    }

    #[test]
    fn test_date_roundtrip() {
        for (y, m, d) in [(2000, 1, 1), (1970, 1, 1), (2024, 2, 29), (1, 1, 1)] {
            let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
            let wire = encode_date(&date).unwrap();
            assert_eq!(bin_date(&wire).unwrap(), Value::Date(date));
        }
    }

    #[test]
    fn test_date_epoch_is_zero() {
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert_eq!(encode_date(&epoch).unwrap(), 0_i32.to_be_bytes());
    }

    #[test]
    fn test_date_infinity_sentinels() {
        assert_eq!(
            bin_date(&i32::MAX.to_be_bytes()).unwrap(),
            Value::Text("infinity".into())
        );
        assert_eq!(
            bin_date(&i32::MIN.to_be_bytes()).unwrap(),
            Value::Text("-infinity".into())
        );
        // near-sentinel values must not be mistaken for infinity
        assert!(matches!(
            bin_date(&(i32::MAX - 1).to_be_bytes()).unwrap(),
            Value::Text(_)
        ));
    }

    #[test]
    fn test_date_bc_fallback() {
        // 4714-11-24 BC is pg day -2451507
        let value = bin_date(&(-2_451_507_i32).to_be_bytes()).unwrap();
        assert_eq!(value, Value::Text("4714-11-24 BC".into()));
    }

    #[test]
    fn test_txt_date() {
        assert_eq!(
            txt_date(&ctx(), b"2023-06-15").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2023, 6, 15).unwrap())
        );
        assert_eq!(
            txt_date(&ctx(), b"infinity").unwrap(),
            Value::Text("infinity".into())
        );
    }

    #[test]
    fn test_time_roundtrip() {
        let time = NaiveTime::from_hms_micro_opt(13, 45, 6, 123456).unwrap();
        let wire = encode_time(&time);
        assert_eq!(bin_time(&wire).unwrap(), Value::Time(time));
        assert_eq!(txt_time(b"13:45:06.123456").unwrap(), Value::Time(time));
    }

    #[test]
    fn test_time_hour_24_wraps() {
        assert_eq!(
            txt_time(b"24:00:00").unwrap(),
            Value::Time(NaiveTime::from_hms_opt(0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_timetz_offset_negated_on_wire() {
        // 05:00:00 at +02:00: wire offset is -7200
        let mut raw = (5 * USECS_PER_HOUR).to_be_bytes().to_vec();
        raw.extend_from_slice(&(-7200_i32).to_be_bytes());
        assert_eq!(
            bin_timetz(&raw).unwrap(),
            Value::TimeTz {
                time: NaiveTime::from_hms_opt(5, 0, 0).unwrap(),
                offset_secs: 7200,
            }
        );
        assert_eq!(
            txt_timetz(b"05:00:00+02").unwrap(),
            bin_timetz(&raw).unwrap()
        );
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = NaiveDate::from_ymd_opt(2023, 6, 15)
            .unwrap()
            .and_hms_micro_opt(13, 45, 6, 1)
            .unwrap();
        let wire = encode_timestamp(&ts).unwrap();
        assert_eq!(bin_timestamp(&wire).unwrap(), Value::Timestamp(ts));
    }

    #[test]
    fn test_timestamp_sentinels() {
        assert_eq!(
            bin_timestamp(&i64::MAX.to_be_bytes()).unwrap(),
            Value::Text("infinity".into())
        );
        assert_eq!(
            bin_timestamptz(&i64::MIN.to_be_bytes()).unwrap(),
            Value::Text("-infinity".into())
        );
    }

    #[test]
    fn test_txt_timestamp_parses_iso() {
        let v = txt_timestamp(&ctx(), b"2023-06-15 13:45:06.5").unwrap();
        assert_eq!(
            v,
            Value::Timestamp(
                NaiveDate::from_ymd_opt(2023, 6, 15)
                    .unwrap()
                    .and_hms_micro_opt(13, 45, 6, 500_000)
                    .unwrap()
            )
        );
        // BC timestamps stay textual
        assert_eq!(
            txt_timestamp(&ctx(), b"0099-06-15 13:45:06 BC").unwrap(),
            Value::Text("0099-06-15 13:45:06 BC".into())
        );
    }

    #[test]
    fn test_txt_timestamptz_offset() {
        let v = txt_timestamptz(&ctx(), b"2023-06-15 13:45:06+02").unwrap();
        let Value::TimestampTz(ts) = v else {
            panic!("expected timestamptz");
        };
        assert_eq!(ts.offset().local_minus_utc(), 7200);
    }

    #[test]
    fn test_interval_text_postgres_style() {
        let v = txt_interval(&ctx(), b"1 year 2 mons 3 days 04:05:06").unwrap();
        assert_eq!(
            v,
            Value::Interval {
                months: 14,
                days: 3,
                usecs: 4 * USECS_PER_HOUR + 5 * USECS_PER_MINUTE + 6 * USECS_PER_SEC,
            }
        );
        let v = txt_interval(&ctx(), b"-1 days -02:00:00").unwrap();
        assert_eq!(
            v,
            Value::Interval {
                months: 0,
                days: -1,
                usecs: -2 * USECS_PER_HOUR,
            }
        );
    }

    #[test]
    fn test_interval_binary() {
        let mut raw = (90_i64 * USECS_PER_MINUTE).to_be_bytes().to_vec();
        raw.extend_from_slice(&5_i32.to_be_bytes());
        raw.extend_from_slice(&13_i32.to_be_bytes());
        assert_eq!(
            bin_interval(&raw).unwrap(),
            Value::Interval {
                months: 13,
                days: 5,
                usecs: 90 * USECS_PER_MINUTE,
            }
        );
    }
}
