use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use core_model::is_loading_text;

// Unresolved is a first-class result, not an error; it must never be
// coerced to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedDate {
    Resolved(DateTime<Utc>),
    Unresolved,
}

impl ResolvedDate {
    pub fn resolved(&self) -> Option<DateTime<Utc>> {
        match self {
            ResolvedDate::Resolved(ts) => Some(*ts),
            ResolvedDate::Unresolved => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, ResolvedDate::Unresolved)
    }
}

const TODAY_WORDS: &[&str] = &["today", "hoy", "hoje", "heute", "aujourd'hui"];
const YESTERDAY_WORDS: &[&str] = &["yesterday", "ayer", "ontem", "gestern", "hier"];

const WEEKDAYS: &[(&str, Weekday)] = &[
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
    ("lunes", Weekday::Mon),
    ("martes", Weekday::Tue),
    ("miércoles", Weekday::Wed),
    ("miercoles", Weekday::Wed),
    ("jueves", Weekday::Thu),
    ("viernes", Weekday::Fri),
    ("sábado", Weekday::Sat),
    ("sabado", Weekday::Sat),
    ("domingo", Weekday::Sun),
    ("segunda-feira", Weekday::Mon),
    ("terça-feira", Weekday::Tue),
    ("quarta-feira", Weekday::Wed),
    ("quinta-feira", Weekday::Thu),
    ("sexta-feira", Weekday::Fri),
    ("montag", Weekday::Mon),
    ("dienstag", Weekday::Tue),
    ("mittwoch", Weekday::Wed),
    ("donnerstag", Weekday::Thu),
    ("freitag", Weekday::Fri),
    ("samstag", Weekday::Sat),
    ("sonntag", Weekday::Sun),
    ("lundi", Weekday::Mon),
    ("mardi", Weekday::Tue),
    ("mercredi", Weekday::Wed),
    ("jeudi", Weekday::Thu),
    ("vendredi", Weekday::Fri),
    ("samedi", Weekday::Sat),
    ("dimanche", Weekday::Sun),
];

// Rules, in order: empty or loading placeholder is Unresolved; bare H:MM
// (optional am/pm) is today at that time; a today/yesterday word is that
// day; a weekday name is the most recent prior occurrence (a same-named
// weekday means a week boundary was crossed, so 7 days back, never today);
// dd/mm[/yyyy] is the absolute date; anything else is Unresolved.
pub fn parse(label: &str, now: DateTime<Utc>) -> ResolvedDate {
    let trimmed = label.trim();
    if trimmed.is_empty() || is_loading_text(trimmed) {
        return ResolvedDate::Unresolved;
    }
    let lower = trimmed.to_lowercase();

    if let Some(time) = parse_bare_time(&lower) {
        return ResolvedDate::Resolved(now.date_naive().and_time(time).and_utc());
    }
    if TODAY_WORDS.contains(&lower.as_str()) {
        return ResolvedDate::Resolved(midnight(now.date_naive()));
    }
    if YESTERDAY_WORDS.contains(&lower.as_str()) {
        return ResolvedDate::Resolved(midnight(now.date_naive() - Duration::days(1)));
    }
    if let Some((_, weekday)) = WEEKDAYS.iter().find(|(name, _)| *name == lower) {
        let today = now.weekday().num_days_from_monday() as i64;
        let target = weekday.num_days_from_monday() as i64;
        let mut back = (today - target).rem_euclid(7);
        if back == 0 {
            back = 7;
        }
        return ResolvedDate::Resolved(midnight(now.date_naive() - Duration::days(back)));
    }
    if let Some(date) = parse_numeric_date(&lower, now) {
        return ResolvedDate::Resolved(midnight(date));
    }

    tracing::debug!(label, "unrecognized time label");
    ResolvedDate::Unresolved
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn parse_bare_time(label: &str) -> Option<NaiveTime> {
    let compact: String = label.chars().filter(|c| *c != '.').collect();
    let compact = compact.trim();
    let (time_part, pm) = if let Some(rest) = compact.strip_suffix("am") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = compact.strip_suffix("pm") {
        (rest.trim_end(), Some(true))
    } else {
        (compact, None)
    };
    let (h, m) = time_part.split_once(':')?;
    let hour: u32 = h.trim().parse().ok()?;
    let minute: u32 = m.trim().parse().ok()?;
    if minute > 59 {
        return None;
    }
    let hour = match pm {
        None if hour <= 23 => hour,
        // 12-hour clock: 12am is midnight, 12pm is noon.
        Some(false) if (1..=12).contains(&hour) => hour % 12,
        Some(true) if (1..=12).contains(&hour) => hour % 12 + 12,
        _ => return None,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn parse_numeric_date(label: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    let parts: Vec<&str> = label.split(['/', '.', '-']).collect();
    if parts.len() != 2 && parts.len() != 3 {
        return None;
    }
    let day: u32 = parts[0].trim().parse().ok()?;
    let month: u32 = parts[1].trim().parse().ok()?;
    match parts.get(2) {
        Some(raw) => {
            let raw = raw.trim();
            let year: i32 = raw.parse().ok()?;
            let year = if raw.len() <= 2 { 2000 + year } else { year };
            NaiveDate::from_ymd_opt(year, month, day)
        }
        None => {
            // A label never describes the future; a yearless date past today
            // belongs to the previous year.
            let candidate = NaiveDate::from_ymd_opt(now.year(), month, day)?;
            if candidate > now.date_naive() {
                NaiveDate::from_ymd_opt(now.year() - 1, month, day)
            } else {
                Some(candidate)
            }
        }
    }
}
