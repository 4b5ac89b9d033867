//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

//! Temporal scalar math: dates as days since 2000-01-01, timestamps and
//! times as microseconds, intervals as an unnormalized (months, days, µs)
//! triple. Pure integer arithmetic, Julian-day based, no timezone
//! database — timestamptz is always UTC.

pub const USEC_PER_SEC: i64 = 1_000_000;
pub const USEC_PER_MIN: i64 = 60 * USEC_PER_SEC;
pub const USEC_PER_HOUR: i64 = 3600 * USEC_PER_SEC;
pub const USEC_PER_DAY: i64 = 86_400 * USEC_PER_SEC;

/// PG epoch (2000-01-01) as a Unix timestamp in seconds.
pub const PG_EPOCH_UNIX: i64 = 946_684_800;

/// Julian day number of 2000-01-01.
const PG_EPOCH_JDAY: i64 = 2_451_545;

/// SQL INTERVAL: months, days and microseconds are kept separate and are
/// never normalized across units (PostgreSQL semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub usec: i64,
}

impl Interval {
    pub const ZERO: Interval = Interval {
        months: 0,
        days: 0,
        usec: 0,
    };

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// Approximate value for ordering: 1 month = 30 days.
    pub fn approx_usec(self) -> i64 {
        self.months as i64 * 30 * USEC_PER_DAY + self.days as i64 * USEC_PER_DAY + self.usec
    }

    pub fn negate(self) -> Interval {
        Interval {
            months: -self.months,
            days: -self.days,
            usec: -self.usec,
        }
    }

    pub fn add(self, other: Interval) -> Interval {
        Interval {
            months: self.months + other.months,
            days: self.days + other.days,
            usec: self.usec + other.usec,
        }
    }

    pub fn sub(self, other: Interval) -> Interval {
        self.add(other.negate())
    }
}

// ---------------------------------------------------------------------------
// Calendar conversion
// ---------------------------------------------------------------------------

fn is_leap_year(y: i32) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

fn days_in_month(y: i32, m: i32) -> i32 {
    const DIM: [i32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    if !(1..=12).contains(&m) {
        return 30;
    }
    if m == 2 && is_leap_year(y) {
        29
    } else {
        DIM[(m - 1) as usize]
    }
}

/// Days since 2000-01-01 → (year, month, day), via the Julian day number.
pub fn days_to_ymd(days: i32) -> (i32, i32, i32) {
    let jd = days as i64 + PG_EPOCH_JDAY;

    let mut l = jd + 68_569;
    let n = 4 * l / 146_097;
    l -= (146_097 * n + 3) / 4;
    let i = 4000 * (l + 1) / 1_461_001;
    l = l - 1461 * i / 4 + 31;
    let j = 80 * l / 2447;
    let d = l - 2447 * j / 80;
    l = j / 11;
    let m = j + 2 - 12 * l;
    let y = 100 * (n - 49) + i + l;

    (y as i32, m as i32, d as i32)
}

/// (year, month, day) → days since 2000-01-01.
pub fn ymd_to_days(y: i32, m: i32, d: i32) -> i32 {
    let a = (14 - m) / 12;
    let yy = (y + 4800 - a) as i64;
    let mm = (m + 12 * a - 3) as i64;
    let jd = d as i64 + (153 * mm + 2) / 5 + 365 * yy + yy / 4 - yy / 100 + yy / 400 - 32_045;
    (jd - PG_EPOCH_JDAY) as i32
}

/// Split a timestamp into whole days (floor) and the µs within the day.
pub fn timestamp_split(usec: i64) -> (i32, i64) {
    if usec >= 0 {
        ((usec / USEC_PER_DAY) as i32, usec % USEC_PER_DAY)
    } else {
        let days = (usec - USEC_PER_DAY + 1) / USEC_PER_DAY;
        (days as i32, usec - days * USEC_PER_DAY)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_fixed_digits(s: &[u8], n: usize) -> Option<i32> {
    if s.len() < n {
        return None;
    }
    let mut v = 0i32;
    for &b in &s[..n] {
        if !b.is_ascii_digit() {
            return None;
        }
        v = v * 10 + (b - b'0') as i32;
    }
    Some(v)
}

/// Parse `[-]YYYY-MM-DD` into days since 2000-01-01.
pub fn date_from_str(s: &str) -> Option<i32> {
    let s = s.trim();
    let bytes = s.as_bytes();
    let (neg, rest) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        _ => (false, bytes),
    };

    let dash = rest.iter().position(|&b| b == b'-')?;
    if dash == 0 || !rest[..dash].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let mut y: i32 = std::str::from_utf8(&rest[..dash]).ok()?.parse().ok()?;
    let rest = &rest[dash + 1..];

    let m = parse_fixed_digits(rest, 2)?;
    if rest.get(2) != Some(&b'-') {
        return None;
    }
    let rest = &rest[3..];
    let d = parse_fixed_digits(rest, 2)?;

    if neg {
        y = -y;
    }
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return None;
    }
    Some(ymd_to_days(y, m, d))
}

/// Parse `YYYY-MM-DD[ HH[:MM[:SS]]]` into µs since 2000-01-01 00:00:00.
pub fn timestamp_from_str(s: &str) -> Option<i64> {
    let s = s.trim();
    let date_end = {
        // date part ends at the first space or 'T' after the year sign
        let body = s.strip_prefix('-').unwrap_or(s);
        let offset = s.len() - body.len();
        body.find([' ', 'T', 't']).map(|i| i + offset)
    };

    let (date_part, time_part) = match date_end {
        Some(i) => (&s[..i], s[i + 1..].trim()),
        None => (s, ""),
    };

    let days = date_from_str(date_part)? as i64;
    let mut usec = days * USEC_PER_DAY;
    if time_part.is_empty() {
        return Some(usec);
    }

    // tolerate a trailing UTC offset marker on timestamptz text
    let time_part = time_part
        .trim_end_matches("+00")
        .trim_end_matches('Z')
        .trim_end_matches('z');

    let tb = time_part.as_bytes();
    let hh = parse_fixed_digits(tb, 2)?;
    usec += hh as i64 * USEC_PER_HOUR;
    if tb.get(2) == Some(&b':') {
        if let Some(mm) = parse_fixed_digits(&tb[3..], 2) {
            usec += mm as i64 * USEC_PER_MIN;
            if tb.get(5) == Some(&b':') {
                if let Some(ss) = parse_fixed_digits(&tb[6..], 2) {
                    usec += ss as i64 * USEC_PER_SEC;
                }
            }
        }
    }
    Some(usec)
}

/// Parse `HH:MM[:SS]` into µs since midnight.
pub fn time_from_str(s: &str) -> Option<i64> {
    let tb = s.trim().as_bytes();
    let hh = parse_fixed_digits(tb, 2)?;
    if tb.get(2) != Some(&b':') {
        return None;
    }
    let mm = parse_fixed_digits(&tb[3..], 2)?;
    let mut ss = 0;
    if tb.get(5) == Some(&b':') {
        ss = parse_fixed_digits(&tb[6..], 2).unwrap_or(0);
    }
    Some(hh as i64 * USEC_PER_HOUR + mm as i64 * USEC_PER_MIN + ss as i64 * USEC_PER_SEC)
}

/// Parse a PostgreSQL-style interval literal: a sequence of `N unit`
/// fragments and/or an `HH:MM:SS` fragment. Bare numbers count as
/// seconds. Never fails — unparseable fragments are skipped.
pub fn interval_from_str(s: &str) -> Interval {
    let mut iv = Interval::ZERO;
    let mut tokens = s.split_whitespace().peekable();

    while let Some(tok) = tokens.next() {
        let (neg, body) = match tok.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, tok),
        };
        let b = body.as_bytes();

        // HH:MM[:SS] fragment
        if b.len() >= 3 && b[0].is_ascii_digit() && b[1].is_ascii_digit() && b[2] == b':' {
            let hh = ((b[0] - b'0') * 10 + (b[1] - b'0')) as i64;
            let mut mm = 0i64;
            let mut ss = 0i64;
            if let Some(v) = parse_fixed_digits(&b[3..], 2) {
                mm = v as i64;
                if b.get(5) == Some(&b':') {
                    if let Some(v) = parse_fixed_digits(&b[6..], 2) {
                        ss = v as i64;
                    }
                }
            }
            let t = hh * USEC_PER_HOUR + mm * USEC_PER_MIN + ss * USEC_PER_SEC;
            iv.usec += if neg { -t } else { t };
            continue;
        }

        // numeric value, unit either attached ("2years") or the next token
        let num_len = body
            .bytes()
            .take_while(|c| c.is_ascii_digit() || *c == b'.')
            .count();
        if num_len == 0 || !body.bytes().any(|c| c.is_ascii_digit()) {
            continue;
        }
        let mut val: f64 = body[..num_len].parse().unwrap_or(0.0);
        if neg {
            val = -val;
        }

        let attached = &body[num_len..];
        let unit = if !attached.is_empty() {
            attached.to_ascii_lowercase()
        } else {
            match tokens.peek() {
                Some(next) if next.chars().all(|c| c.is_ascii_alphabetic()) => {
                    tokens.next().unwrap_or_default().to_ascii_lowercase()
                }
                _ => String::new(),
            }
        };

        if unit.starts_with("year") {
            iv.months += (val * 12.0) as i32;
        } else if unit.starts_with("mon") {
            iv.months += val as i32;
        } else if unit.starts_with("day") {
            iv.days += val as i32;
        } else if unit.starts_with("hour") {
            iv.usec += (val * USEC_PER_HOUR as f64) as i64;
        } else if unit.starts_with("min") {
            iv.usec += (val * USEC_PER_MIN as f64) as i64;
        } else {
            // "sec", unknown units and bare numbers all land in seconds
            iv.usec += (val * USEC_PER_SEC as f64) as i64;
        }
    }
    iv
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

pub fn date_to_string(days: i32) -> String {
    let (y, m, d) = days_to_ymd(days);
    if y < 0 {
        format!("-{:04}-{:02}-{:02}", -y, m, d)
    } else {
        format!("{y:04}-{m:02}-{d:02}")
    }
}

pub fn timestamp_to_string(usec: i64) -> String {
    let (days, time_usec) = timestamp_split(usec);
    let (y, mo, d) = days_to_ymd(days);
    let hh = time_usec / USEC_PER_HOUR;
    let mm = time_usec % USEC_PER_HOUR / USEC_PER_MIN;
    let ss = time_usec % USEC_PER_MIN / USEC_PER_SEC;
    if y < 0 {
        format!("-{:04}-{:02}-{:02} {:02}:{:02}:{:02}", -y, mo, d, hh, mm, ss)
    } else {
        format!("{y:04}-{mo:02}-{d:02} {hh:02}:{mm:02}:{ss:02}")
    }
}

pub fn timestamptz_to_string(usec: i64) -> String {
    format!("{}+00", timestamp_to_string(usec))
}

pub fn time_to_string(usec: i64) -> String {
    let usec = usec.max(0);
    let hh = usec / USEC_PER_HOUR;
    let mm = usec % USEC_PER_HOUR / USEC_PER_MIN;
    let ss = usec % USEC_PER_MIN / USEC_PER_SEC;
    format!("{hh:02}:{mm:02}:{ss:02}")
}

/// PostgreSQL-style interval rendering: years/months/days in words,
/// time as HH:MM:SS, single bare time components in words.
pub fn interval_to_string(iv: Interval) -> String {
    let mut months = iv.months;
    let mut days = iv.days;
    let mut usec = iv.usec;

    // borrow between days and usec when signs differ
    if days > 0 && usec < 0 {
        days -= 1;
        usec += USEC_PER_DAY;
    } else if days < 0 && usec > 0 {
        days += 1;
        usec -= USEC_PER_DAY;
    }

    let neg_time = usec < 0;
    if neg_time {
        usec = -usec;
    }

    let mut years = months / 12;
    months %= 12;
    if months < 0 && years > 0 {
        years -= 1;
        months += 12;
    }
    if months > 0 && years < 0 {
        years += 1;
        months -= 12;
    }

    let mut out = String::new();
    let mut wrote = false;
    let plural = |v: i32| if v.abs() == 1 { "" } else { "s" };
    if years != 0 {
        out.push_str(&format!("{years} year{} ", plural(years)));
        wrote = true;
    }
    if months != 0 {
        out.push_str(&format!("{months} mon{} ", plural(months)));
        wrote = true;
    }
    if days != 0 {
        out.push_str(&format!("{days} day{} ", plural(days)));
        wrote = true;
    }

    let total_sec = usec / USEC_PER_SEC;
    let hh = (total_sec / 3600) as i32;
    let mm = (total_sec % 3600 / 60) as i32;
    let ss = (total_sec % 60) as i32;

    if hh != 0 || mm != 0 || ss != 0 {
        let nparts = (hh != 0) as i32 + (mm != 0) as i32 + (ss != 0) as i32;
        if nparts == 1 && !wrote {
            let sign = if neg_time { -1 } else { 1 };
            if hh != 0 {
                let v = sign * hh;
                out.push_str(&format!("{v} hour{}", plural(v)));
            } else if mm != 0 {
                let v = sign * mm;
                out.push_str(&format!("{v} minute{}", plural(v)));
            } else {
                let v = sign * ss;
                out.push_str(&format!("{v} sec{}", plural(v)));
            }
        } else if neg_time {
            out.push_str(&format!("-{hh:02}:{mm:02}:{ss:02}"));
        } else {
            out.push_str(&format!("{hh:02}:{mm:02}:{ss:02}"));
        }
    } else if !wrote {
        out.push_str("00:00:00");
    } else if out.ends_with(' ') {
        out.pop();
    }
    out
}

// ---------------------------------------------------------------------------
// EXTRACT / DATE_TRUNC
// ---------------------------------------------------------------------------

pub fn date_extract(days: i32, field: &str) -> Option<f64> {
    let (y, m, d) = days_to_ymd(days);
    match field {
        "year" => Some(y as f64),
        "month" => Some(m as f64),
        "day" => Some(d as f64),
        "quarter" => Some(((m - 1) / 3 + 1) as f64),
        "epoch" => Some(days as f64 * 86_400.0 + PG_EPOCH_UNIX as f64),
        // 2000-01-01 is a Saturday (dow = 6)
        "dow" => Some((((days % 7) + 6) % 7) as f64),
        "doy" => {
            let jan1 = ymd_to_days(y, 1, 1);
            Some((days - jan1 + 1) as f64)
        }
        "week" => {
            let jan1 = ymd_to_days(y, 1, 1);
            Some(((days - jan1) / 7 + 1) as f64)
        }
        _ => None,
    }
}

pub fn timestamp_extract(usec: i64, field: &str) -> Option<f64> {
    let (days, time_usec) = timestamp_split(usec);
    match field {
        "hour" => Some((time_usec / USEC_PER_HOUR) as f64),
        "minute" => Some((time_usec % USEC_PER_HOUR / USEC_PER_MIN) as f64),
        "second" => Some((time_usec % USEC_PER_MIN / USEC_PER_SEC) as f64),
        "epoch" => Some(usec as f64 / USEC_PER_SEC as f64 + PG_EPOCH_UNIX as f64),
        _ => date_extract(days, field),
    }
}

pub fn date_trunc_days(days: i32, field: &str) -> i32 {
    let (y, m, _) = days_to_ymd(days);
    match field {
        "year" => ymd_to_days(y, 1, 1),
        "quarter" => ymd_to_days(y, (m - 1) / 3 * 3 + 1, 1),
        "month" => ymd_to_days(y, m, 1),
        "week" => {
            let dow = ((days % 7) + 6) % 7; // 0=Sun..6=Sat
            let since_monday = if dow == 0 { 6 } else { dow - 1 };
            days - since_monday
        }
        _ => days,
    }
}

pub fn timestamp_trunc_usec(usec: i64, field: &str) -> i64 {
    let floor_to = |unit: i64| {
        if usec >= 0 {
            usec - usec % unit
        } else {
            usec - ((usec % unit) + unit) % unit
        }
    };
    match field {
        "hour" => floor_to(USEC_PER_HOUR),
        "minute" => floor_to(USEC_PER_MIN),
        "second" => floor_to(USEC_PER_SEC),
        "day" => floor_to(USEC_PER_DAY),
        _ => {
            let (days, _) = timestamp_split(usec);
            date_trunc_days(days, field) as i64 * USEC_PER_DAY
        }
    }
}

// ---------------------------------------------------------------------------
// Interval arithmetic
// ---------------------------------------------------------------------------

/// Add months calendar-aware, clamping the day to the end of the month.
fn add_months_to_date(y: i32, m: i32, d: i32, add: i32) -> i32 {
    let total = y * 12 + (m - 1) + add;
    let mut ny = total / 12;
    let mut nm = total % 12 + 1;
    if nm <= 0 {
        nm += 12;
        ny -= 1;
    }
    let max_d = days_in_month(ny, nm);
    ymd_to_days(ny, nm, d.min(max_d))
}

pub fn date_add_interval(mut days: i32, iv: Interval) -> i32 {
    if iv.months != 0 {
        let (y, m, d) = days_to_ymd(days);
        days = add_months_to_date(y, m, d, iv.months);
    }
    days += iv.days;
    if iv.usec != 0 {
        days += (iv.usec / USEC_PER_DAY) as i32;
    }
    days
}

pub fn timestamp_add_interval(mut usec: i64, iv: Interval) -> i64 {
    if iv.months != 0 {
        let (days, time_part) = timestamp_split(usec);
        let (y, m, d) = days_to_ymd(days);
        let days = add_months_to_date(y, m, d, iv.months);
        usec = days as i64 * USEC_PER_DAY + time_part;
    }
    usec + iv.days as i64 * USEC_PER_DAY + iv.usec
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ymd_round_trip() {
        for &(y, m, d) in &[
            (2000, 1, 1),
            (1999, 12, 31),
            (2024, 2, 29),
            (1970, 1, 1),
            (2100, 3, 1),
        ] {
            let days = ymd_to_days(y, m, d);
            assert_eq!(days_to_ymd(days), (y, m, d));
        }
        assert_eq!(ymd_to_days(2000, 1, 1), 0);
        assert_eq!(ymd_to_days(2000, 1, 2), 1);
        assert_eq!(ymd_to_days(1999, 12, 31), -1);
    }

    #[test]
    fn date_parse_format_round_trip() {
        for s in ["2024-02-29", "2000-01-01", "1987-06-05"] {
            let d = date_from_str(s).unwrap();
            assert_eq!(date_to_string(d), s);
            assert_eq!(date_from_str(&date_to_string(d)), Some(d));
        }
        assert!(date_from_str("2024-13-01").is_none());
        assert!(date_from_str("not a date").is_none());
    }

    #[test]
    fn timestamp_parse_format_round_trip() {
        let ts = timestamp_from_str("2024-05-06 07:08:09").unwrap();
        assert_eq!(timestamp_to_string(ts), "2024-05-06 07:08:09");
        let date_only = timestamp_from_str("2024-05-06").unwrap();
        assert_eq!(timestamp_to_string(date_only), "2024-05-06 00:00:00");
        // negative timestamps floor-divide into the previous day
        let before_epoch = timestamp_from_str("1999-12-31 23:00:00").unwrap();
        assert!(before_epoch < 0);
        assert_eq!(timestamp_to_string(before_epoch), "1999-12-31 23:00:00");
    }

    #[test]
    fn time_parse_format() {
        assert_eq!(time_from_str("13:45:11"), Some(13 * USEC_PER_HOUR + 45 * USEC_PER_MIN + 11 * USEC_PER_SEC));
        assert_eq!(time_to_string(time_from_str("13:45").unwrap()), "13:45:00");
    }

    #[test]
    fn interval_parse_and_format() {
        let iv = interval_from_str("1 year 2 mons 3 days 04:05:06");
        assert_eq!(iv.months, 14);
        assert_eq!(iv.days, 3);
        assert_eq!(iv.usec, 4 * USEC_PER_HOUR + 5 * USEC_PER_MIN + 6 * USEC_PER_SEC);
        assert_eq!(interval_to_string(iv), "1 year 2 mons 3 days 04:05:06");

        assert_eq!(interval_to_string(interval_from_str("2 hours")), "2 hours");
        assert_eq!(interval_to_string(Interval::ZERO), "00:00:00");
        // re-parsing the canonical form is idempotent
        let canon = interval_to_string(iv);
        assert_eq!(interval_from_str(&canon), iv);
    }

    #[test]
    fn extract_fields() {
        let d = ymd_to_days(2024, 5, 6);
        assert_eq!(date_extract(d, "year"), Some(2024.0));
        assert_eq!(date_extract(d, "month"), Some(5.0));
        assert_eq!(date_extract(d, "quarter"), Some(2.0));
        // 2024-05-06 is a Monday
        assert_eq!(date_extract(d, "dow"), Some(1.0));

        let ts = d as i64 * USEC_PER_DAY + 3 * USEC_PER_HOUR + 20 * USEC_PER_MIN;
        assert_eq!(timestamp_extract(ts, "hour"), Some(3.0));
        assert_eq!(timestamp_extract(ts, "year"), Some(2024.0));
    }

    #[test]
    fn trunc_fields() {
        let d = ymd_to_days(2024, 5, 6);
        assert_eq!(date_trunc_days(d, "month"), ymd_to_days(2024, 5, 1));
        assert_eq!(date_trunc_days(d, "year"), ymd_to_days(2024, 1, 1));
        let ts = d as i64 * USEC_PER_DAY + 3 * USEC_PER_HOUR + 21 * USEC_PER_MIN;
        assert_eq!(timestamp_trunc_usec(ts, "hour"), d as i64 * USEC_PER_DAY + 3 * USEC_PER_HOUR);
        assert_eq!(timestamp_trunc_usec(ts, "day"), d as i64 * USEC_PER_DAY);
    }

    #[test]
    fn calendar_aware_month_addition() {
        // Jan 31 + 1 month clamps to Feb 29 in a leap year
        let d = ymd_to_days(2024, 1, 31);
        let iv = Interval { months: 1, days: 0, usec: 0 };
        assert_eq!(date_to_string(date_add_interval(d, iv)), "2024-02-29");

        let ts = ymd_to_days(2023, 1, 31) as i64 * USEC_PER_DAY + USEC_PER_HOUR;
        let out = timestamp_add_interval(ts, iv);
        assert_eq!(timestamp_to_string(out), "2023-02-28 01:00:00");
    }
}
