//! Time-of-day and time-zone helpers used when a caller asks for the default
//! fire time.
//!
//! Zones are resolved on demand from their configured string; nothing is
//! cached, so changing the configured zone takes effect on the next call.

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::config::DefaultsConfig;
use crate::error::{OncebuildError, Result};

/// Accepted spellings for a configured start time, tried in order.
const START_TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

/// A resolved time zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Zone {
    Utc,
    /// The host's zone, including its DST rules.
    Local,
    Fixed(FixedOffset),
    /// An IANA zone such as `Europe/Berlin`.
    Named(Tz),
}

impl Zone {
    /// Wall-clock reading of `now` in this zone.
    pub fn wall_clock(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Utc => now.naive_utc(),
            Zone::Local => now.with_timezone(&Local).naive_local(),
            Zone::Fixed(offset) => now.with_timezone(offset).naive_local(),
            Zone::Named(tz) => now.with_timezone(tz).naive_local(),
        }
    }

    /// The instant at which wall clocks in this zone show `naive`.
    pub fn localize(&self, naive: NaiveDateTime) -> DateTime<FixedOffset> {
        match self {
            Zone::Utc => localize_in(&Utc, naive),
            Zone::Local => localize_in(&Local, naive),
            Zone::Fixed(offset) => localize_in(offset, naive),
            Zone::Named(tz) => localize_in(tz, naive),
        }
    }
}

/// Ambiguous times take the earlier instant; times inside a DST gap move
/// forward by an hour.
fn localize_in<T: TimeZone>(tz: &T, naive: NaiveDateTime) -> DateTime<FixedOffset> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            naive
                .checked_add_signed(Duration::hours(1))
                .and_then(|later| tz.from_local_datetime(&later).earliest())
        })
        .map(|at| at.fixed_offset())
        .unwrap_or_else(|| tz.from_utc_datetime(&naive).fixed_offset())
}

/// Parse a fixed offset of the form `+HH:MM`, `-HHMM` or `+H`.
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    // ASCII only from here on, so byte offsets are char boundaries.
    if !rest.bytes().all(|b| b.is_ascii_digit() || b == b':') {
        return None;
    }
    let (hours, minutes) = match rest.split_once(':') {
        Some(parts) => parts,
        None if rest.len() == 4 => rest.split_at(2),
        None if (1..=2).contains(&rest.len()) => (rest, "0"),
        None => return None,
    };
    if hours.is_empty() || minutes.is_empty() || minutes.contains(':') {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Validate a configured zone string without falling back.
pub fn validate_zone(zone: &str) -> Result<Zone> {
    let zone = zone.trim();
    if zone.is_empty() {
        return Err(OncebuildError::InvalidTimeZone(
            "time zone cannot be empty or whitespace".to_string(),
        ));
    }
    if ["utc", "z", "gmt"].contains(&zone.to_ascii_lowercase().as_str()) {
        return Ok(Zone::Utc);
    }
    if zone.eq_ignore_ascii_case("local") {
        return Ok(Zone::Local);
    }
    if zone.starts_with('+') || zone.starts_with('-') {
        return parse_offset(zone)
            .map(Zone::Fixed)
            .ok_or_else(|| OncebuildError::InvalidTimeZone(zone.to_string()));
    }
    zone.parse::<Tz>()
        .map(Zone::Named)
        .map_err(|_| OncebuildError::InvalidTimeZone(zone.to_string()))
}

/// Resolve a zone string, falling back to the host's local zone when the
/// value is not recognised.
pub fn resolve_zone(zone: &str) -> Zone {
    match validate_zone(zone) {
        Ok(zone) => zone,
        Err(e) => {
            warn!(error = %e, "falling back to local time zone");
            Zone::Local
        }
    }
}

/// Parse a time of day such as `22:00:00`, `7:5`, or `10:30 pm`.
pub fn parse_start_time(value: &str) -> Result<NaiveTime> {
    let normalized = value.trim().to_ascii_uppercase();
    for fmt in START_TIME_FORMATS {
        match NaiveTime::parse_from_str(&normalized, fmt) {
            Ok(t) => return Ok(t),
            Err(e) => debug!(value = %normalized, format = fmt, error = %e, "start time format did not match"),
        }
    }
    Err(OncebuildError::InvalidStartTime(value.trim().to_string()))
}

/// Next occurrence of `start` in `zone`, counted from `now`.
///
/// Today's slot is used while it is not yet behind `now`; otherwise the
/// same time tomorrow, under tomorrow's offset.
pub fn next_occurrence(now: DateTime<Utc>, start: NaiveTime, zone: Zone) -> DateTime<FixedOffset> {
    let today = zone.wall_clock(now).date();
    let candidate = zone.localize(today.and_time(start));
    if candidate.with_timezone(&Utc) < now {
        let tomorrow = today.succ_opt().unwrap_or(today);
        zone.localize(tomorrow.and_time(start))
    } else {
        candidate
    }
}

/// `YYYY-MM-DD HH:MM:SS +HH:MM` in the instant's own offset.
pub fn format_fire_time(at: &DateTime<FixedOffset>) -> String {
    at.format("%Y-%m-%d %H:%M:%S %:z").to_string()
}

/// Validated form of [`DefaultsConfig`].
#[derive(Debug, Clone)]
pub struct ScheduleDefaults {
    pub start_time: NaiveTime,
    pub time_zone: String,
}

impl ScheduleDefaults {
    pub fn from_config(cfg: &DefaultsConfig) -> Result<Self> {
        Ok(Self {
            start_time: parse_start_time(&cfg.start_time)?,
            time_zone: cfg.time_zone.trim().to_string(),
        })
    }

    pub fn zone(&self) -> Zone {
        resolve_zone(&self.time_zone)
    }

    pub fn default_fire_at(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        next_occurrence(now, self.start_time, self.zone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn fixed(secs: i32) -> Zone {
        Zone::Fixed(FixedOffset::east_opt(secs).unwrap())
    }

    fn ten_pm() -> NaiveTime {
        NaiveTime::from_hms_opt(22, 0, 0).unwrap()
    }

    #[test]
    fn offsets_in_all_spellings() {
        assert_eq!(validate_zone("+02:00").unwrap(), fixed(7200));
        assert_eq!(validate_zone("-0530").unwrap(), fixed(-(5 * 3600 + 30 * 60)));
        assert_eq!(validate_zone("+9").unwrap(), fixed(9 * 3600));
        assert_eq!(validate_zone(" utc ").unwrap(), Zone::Utc);
        assert_eq!(validate_zone("Z").unwrap(), Zone::Utc);
        assert_eq!(validate_zone("LOCAL").unwrap(), Zone::Local);
    }

    #[test]
    fn named_zones_resolve() {
        assert_eq!(validate_zone("Europe/Berlin").unwrap(), Zone::Named(chrono_tz::Europe::Berlin));
        assert_eq!(resolve_zone("America/New_York"), Zone::Named(chrono_tz::America::New_York));
    }

    #[test]
    fn rejects_bad_zones() {
        assert!(matches!(validate_zone("   "), Err(OncebuildError::InvalidTimeZone(_))));
        assert!(validate_zone("Mars/Olympus").is_err());
        assert!(validate_zone("+25:00").is_err());
        assert!(validate_zone("+02:75").is_err());
        assert!(validate_zone("++2").is_err());
        assert!(validate_zone("+1:2:3").is_err());
    }

    #[test]
    fn non_ascii_offsets_are_rejected_not_panicking() {
        assert!(validate_zone("+1é1").is_err());
        assert!(validate_zone("-é").is_err());
        assert_eq!(resolve_zone("+1é1"), Zone::Local);
    }

    #[test]
    fn resolve_falls_back_instead_of_failing() {
        assert_eq!(resolve_zone("Not/AZone"), Zone::Local);
        assert_eq!(resolve_zone("+01:00"), fixed(3600));
    }

    #[test]
    fn start_time_formats() {
        assert_eq!(parse_start_time("22:00:00").unwrap(), ten_pm());
        assert_eq!(parse_start_time("7:5").unwrap(), NaiveTime::from_hms_opt(7, 5, 0).unwrap());
        assert_eq!(parse_start_time("10:30 pm").unwrap(), NaiveTime::from_hms_opt(22, 30, 0).unwrap());
        assert_eq!(parse_start_time(" 1:02:03 AM ").unwrap(), NaiveTime::from_hms_opt(1, 2, 3).unwrap());
        assert!(parse_start_time("noonish").is_err());
    }

    #[test]
    fn next_occurrence_today_when_still_ahead() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let at = next_occurrence(now, ten_pm(), fixed(7200));
        assert_eq!(at.to_rfc3339(), "2026-03-10T22:00:00+02:00");
    }

    #[test]
    fn next_occurrence_rolls_to_tomorrow() {
        // 21:30 UTC is 23:30 at +02:00, past the 22:00 slot.
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 21, 30, 0).unwrap();
        let at = next_occurrence(now, ten_pm(), fixed(7200));
        assert_eq!(at.to_rfc3339(), "2026-03-11T22:00:00+02:00");
    }

    #[test]
    fn next_occurrence_exactly_now_stays_today() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 22, 0, 0).unwrap();
        let at = next_occurrence(now, ten_pm(), Zone::Utc);
        assert_eq!(at.with_timezone(&Utc), now);
    }

    #[test]
    fn named_zone_follows_daylight_saving() {
        let berlin = Zone::Named(chrono_tz::Europe::Berlin);
        let winter = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let summer = Utc.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap();
        assert_eq!(next_occurrence(winter, ten_pm(), berlin).to_rfc3339(), "2026-01-15T22:00:00+01:00");
        assert_eq!(next_occurrence(summer, ten_pm(), berlin).to_rfc3339(), "2026-07-15T22:00:00+02:00");
    }

    #[test]
    fn rollover_uses_next_days_offset() {
        // Berlin switches to summer time early on 2026-03-29.
        let berlin = Zone::Named(chrono_tz::Europe::Berlin);
        let now = Utc.with_ymd_and_hms(2026, 3, 28, 22, 0, 0).unwrap();
        assert_eq!(next_occurrence(now, ten_pm(), berlin).to_rfc3339(), "2026-03-29T22:00:00+02:00");
    }

    #[test]
    fn time_in_spring_gap_moves_forward() {
        let berlin = Zone::Named(chrono_tz::Europe::Berlin);
        let now = Utc.with_ymd_and_hms(2026, 3, 28, 12, 0, 0).unwrap();
        let half_past_two = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        assert_eq!(
            next_occurrence(now, half_past_two, berlin).to_rfc3339(),
            "2026-03-29T03:30:00+02:00"
        );
    }

    #[test]
    fn ambiguous_autumn_time_takes_earlier_instant() {
        let berlin = Zone::Named(chrono_tz::Europe::Berlin);
        let now = Utc.with_ymd_and_hms(2026, 10, 24, 12, 0, 0).unwrap();
        let half_past_two = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        assert_eq!(
            next_occurrence(now, half_past_two, berlin).to_rfc3339(),
            "2026-10-25T02:30:00+02:00"
        );
    }

    #[test]
    fn defaults_follow_zone_changes_without_caching() {
        let mut defaults = ScheduleDefaults::from_config(&DefaultsConfig::default()).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(defaults.default_fire_at(now).hour(), 22);
        assert_eq!(defaults.default_fire_at(now).offset().local_minus_utc(), 0);

        defaults.time_zone = "-05:00".to_string();
        assert_eq!(defaults.default_fire_at(now).offset().local_minus_utc(), -5 * 3600);

        defaults.time_zone = "Asia/Tokyo".to_string();
        assert_eq!(defaults.default_fire_at(now).offset().local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn formatted_time_keeps_offset() {
        let at = DateTime::parse_from_rfc3339("2026-03-10T22:00:05+02:00").unwrap();
        assert_eq!(format_fire_time(&at), "2026-03-10 22:00:05 +02:00");
    }
}
