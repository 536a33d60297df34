//! Business-hours calendar — pure functions over a settings snapshot and an
//! explicit instant. All weekday/clock math happens in the company timezone,
//! never the caller's.

use chrono::{DateTime, Datelike, LocalResult, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use pestflow_core::types::BusinessHoursSettings;

/// Result of a forward scan for the next valid send slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextSlot {
    pub at: DateTime<Utc>,
    /// True when the 14-day search bound was exhausted. The returned instant
    /// is then the input unchanged; callers must treat this as "scheduling
    /// indeterminate", not "safe to send".
    pub indeterminate: bool,
}

/// Whether `at` falls inside the company's configured business hours.
/// Always true when enforcement is off. Window bounds are inclusive.
pub fn is_business_hours(settings: &BusinessHoursSettings, at: DateTime<Utc>) -> bool {
    if !settings.enforced {
        return true;
    }
    let local = at.with_timezone(&settings.tz());
    let day = settings.day_hours(local.weekday());
    if !day.enabled {
        return false;
    }
    let t = local.time();
    t >= day.start_time() && t <= day.end_time()
}

/// Whether `at` falls on an enabled weekday, independent of clock time.
pub fn is_working_day(settings: &BusinessHoursSettings, at: DateTime<Utc>) -> bool {
    let local = at.with_timezone(&settings.tz());
    settings.day_hours(local.weekday()).enabled
}

/// Whether `at` falls on a Saturday or Sunday in company-local time.
pub fn is_weekend(settings: &BusinessHoursSettings, at: DateTime<Utc>) -> bool {
    let local = at.with_timezone(&settings.tz());
    matches!(local.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Next instant at which sending is allowed, scanning forward day by day.
///
/// Bounded to 14 iterations so a pathological all-days-disabled configuration
/// still terminates; the fallback returns `from` flagged indeterminate.
pub fn next_business_hour_slot(settings: &BusinessHoursSettings, from: DateTime<Utc>) -> NextSlot {
    if !settings.enforced {
        return NextSlot {
            at: from,
            indeterminate: false,
        };
    }

    let tz = settings.tz();
    let mut local = from.with_timezone(&tz);

    for iteration in 0..14 {
        let day = settings.day_hours(local.weekday());
        if day.enabled {
            let t = local.time();
            if t < day.start_time() {
                if let Some(slot) =
                    resolve_local(&tz, local.date_naive().and_time(day.start_time()))
                {
                    return NextSlot {
                        at: slot.with_timezone(&Utc),
                        indeterminate: false,
                    };
                }
            } else if t <= day.end_time() {
                // Within the window. On the first iteration this is the
                // original instant unchanged.
                let at = if iteration == 0 {
                    from
                } else {
                    local.with_timezone(&Utc)
                };
                return NextSlot {
                    at,
                    indeterminate: false,
                };
            }
            // After hours: fall through to the next day.
        }

        let next_midnight = local
            .date_naive()
            .succ_opt()
            .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or(d.and_time(local.time())));
        match next_midnight.and_then(|naive| resolve_local(&tz, naive)) {
            Some(next) => local = next,
            None => break,
        }
    }

    NextSlot {
        at: from,
        indeterminate: true,
    }
}

/// Count of calendar days in `[start, end]` (inclusive) whose company-local
/// weekday is enabled.
pub fn working_days_between(
    settings: &BusinessHoursSettings,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> u32 {
    let tz = settings.tz();
    let mut current = start.with_timezone(&tz).date_naive();
    let last = end.with_timezone(&tz).date_naive();
    let mut working = 0;
    while current <= last {
        if settings.day_hours(current.weekday()).enabled {
            working += 1;
        }
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    working
}

/// Conservative estimate of calendar days a campaign needs.
///
/// Without business-hour enforcement: `ceil(total / daily_limit)`. With it:
/// the smaller of the week-padded calendar figure and the raw work-day count
/// — never an overestimate. Zero working days per week falls back to the
/// unconstrained calculation.
pub fn estimated_campaign_days(
    settings: &BusinessHoursSettings,
    total_contacts: u32,
    daily_limit: u32,
    respect_business_hours: bool,
) -> u32 {
    if daily_limit == 0 {
        return 0;
    }
    let work_days_needed = total_contacts.div_ceil(daily_limit);
    if !respect_business_hours {
        return work_days_needed;
    }
    let working_days_per_week = settings.working_days_per_week();
    if working_days_per_week == 0 {
        return work_days_needed;
    }
    let weeks_needed = work_days_needed.div_ceil(working_days_per_week);
    let calendar_days = weeks_needed * 7;
    calendar_days.min(work_days_needed)
}

/// Resolve a company-local wall-clock time to an instant. Ambiguous times
/// (DST fall-back) take the earlier offset; nonexistent times (DST gap)
/// slide forward one hour.
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(earlier, _) => Some(earlier),
        LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest(),
    }
}
