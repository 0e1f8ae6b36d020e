//! 5-field cron evaluation (minute hour day month weekday).
//!
//! Fields support `*`, `N`, `N-M`, comma lists, `*/step`, and
//! `base/step`. Minute granularity; the next-occurrence search walks up
//! to one year ahead, evaluated in a configurable timezone.

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Parse a timezone string, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

/// Check one field against a value.
fn field_matches(field: &str, value: u32) -> bool {
    for part in field.split(',') {
        if part_matches(part, value) {
            return true;
        }
    }
    false
}

fn part_matches(part: &str, value: u32) -> bool {
    // step suffix: `*/5`, `2-10/2`, `7/15`.
    let (base, step) = match part.split_once('/') {
        Some((base, step_s)) => match step_s.parse::<u32>() {
            Ok(step) if step > 0 => (base, Some(step)),
            _ => return false,
        },
        None => (part, None),
    };

    match (base, step) {
        ("*", None) => true,
        ("*", Some(step)) => value % step == 0,
        (base, step) => {
            if let Some((start_s, end_s)) = base.split_once('-') {
                let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>())
                else {
                    return false;
                };
                if value < start || value > end {
                    return false;
                }
                match step {
                    Some(step) => (value - start) % step == 0,
                    None => true,
                }
            } else {
                let Ok(start) = base.parse::<u32>() else {
                    return false;
                };
                match step {
                    // `base/step`: every `step` starting at `base`.
                    Some(step) => value >= start && (value - start) % step == 0,
                    None => value == start,
                }
            }
        }
    }
}

fn matches_naive(expr: &str, dt: &chrono::NaiveDateTime) -> bool {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    field_matches(fields[0], dt.minute())
        && field_matches(fields[1], dt.hour())
        && field_matches(fields[2], dt.day())
        && field_matches(fields[3], dt.month())
        && field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

/// Whether a UTC instant matches the expression in the given timezone.
pub fn cron_matches(expr: &str, at: &DateTime<Utc>, tz: chrono_tz::Tz) -> bool {
    matches_naive(expr, &at.with_timezone(&tz).naive_local())
}

/// Next occurrence strictly after `after`, searching up to one year of
/// minutes. DST gaps are skipped; fall-back overlaps take the earlier
/// mapping.
pub fn cron_next(expr: &str, after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
    use chrono::TimeZone;

    let local_after = after.with_timezone(&tz).naive_local();
    let to_next_minute = 60 - local_after.second() as i64;
    let mut candidate = local_after + chrono::Duration::seconds(to_next_minute);
    candidate = candidate.with_second(0).unwrap_or(candidate);

    let max_checks = 366 * 24 * 60;
    for _ in 0..max_checks {
        if matches_naive(expr, &candidate) {
            match tz.from_local_datetime(&candidate) {
                chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    return Some(earliest.with_timezone(&Utc));
                }
                chrono::LocalResult::None => {}
            }
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, h, m, 0).unwrap()
    }

    #[test]
    fn wildcard_and_exact() {
        assert!(cron_matches("* * * * *", &at(10, 30), chrono_tz::UTC));
        assert!(cron_matches("30 10 * * *", &at(10, 30), chrono_tz::UTC));
        assert!(!cron_matches("31 10 * * *", &at(10, 30), chrono_tz::UTC));
    }

    #[test]
    fn step_on_hours_yields_expected_set() {
        // `*/7` on hours → {0, 7, 14, 21}.
        let matching: Vec<u32> = (0..24)
            .filter(|h| cron_matches("0 */7 * * *", &at(*h, 0), chrono_tz::UTC))
            .collect();
        assert_eq!(matching, vec![0, 7, 14, 21]);
    }

    #[test]
    fn base_step_starts_at_base() {
        // `5/15` on minutes → 5, 20, 35, 50.
        let matching: Vec<u32> = (0..60)
            .filter(|m| cron_matches("5/15 * * * *", &at(10, *m), chrono_tz::UTC))
            .collect();
        assert_eq!(matching, vec![5, 20, 35, 50]);
    }

    #[test]
    fn range_with_step() {
        // `10-30/10` → 10, 20, 30.
        let matching: Vec<u32> = (0..60)
            .filter(|m| cron_matches("10-30/10 * * * *", &at(9, *m), chrono_tz::UTC))
            .collect();
        assert_eq!(matching, vec![10, 20, 30]);
    }

    #[test]
    fn comma_list_and_range() {
        assert!(cron_matches("0,15,45 * * * *", &at(9, 45), chrono_tz::UTC));
        assert!(!cron_matches("0,15,45 * * * *", &at(9, 30), chrono_tz::UTC));
        assert!(cron_matches("0 9-17 * * *", &at(12, 0), chrono_tz::UTC));
        assert!(!cron_matches("0 9-17 * * *", &at(20, 0), chrono_tz::UTC));
    }

    #[test]
    fn weekday_field() {
        // 2026-06-15 is a Monday (1 in days-from-Sunday numbering).
        assert!(cron_matches("0 9 * * 1", &at(9, 0), chrono_tz::UTC));
        assert!(!cron_matches("0 9 * * 0", &at(9, 0), chrono_tz::UTC));
    }

    #[test]
    fn next_advances_to_following_match() {
        let next = cron_next("30 * * * *", &at(10, 0), chrono_tz::UTC).unwrap();
        assert_eq!(next.minute(), 30);
        assert_eq!(next.hour(), 10);

        // Strictly after: asking at the match time advances an hour.
        let next = cron_next("30 * * * *", &at(10, 30), chrono_tz::UTC).unwrap();
        assert_eq!(next.hour(), 11);
    }

    #[test]
    fn next_in_timezone() {
        let after = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();
        let tz = parse_tz("Asia/Tokyo");
        let next = cron_next("0 9 * * *", &after, tz).unwrap();
        // 9:00 JST == 0:00 UTC.
        assert_eq!(next.hour(), 0);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn malformed_expressions_never_match() {
        assert!(!cron_matches("* * * *", &at(10, 0), chrono_tz::UTC));
        assert!(!cron_matches("x * * * *", &at(10, 0), chrono_tz::UTC));
        assert!(cron_next("bad expr here now x", &at(10, 0), chrono_tz::UTC).is_none());
    }
}
