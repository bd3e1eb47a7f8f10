/// Fixed daily fetch slots for slow-moving external prices
use chrono::{DateTime, TimeZone, Timelike, Utc};
use chrono_tz::Asia::Kolkata;

/// IST hours at which IBJA publishes fresh gold rates
pub const GOLD_PRICE_FETCH_HOURS: [u32; 2] = [13, 20];

/// Decides whether a nested price fetch is due.
///
/// A fetch is due when nothing was fetched yet, when the last fetch happened on
/// an earlier IST date, or when the last fetch predates the most recent slot that
/// has already started today. Comparing against the slot start (rather than the
/// hour of the last fetch) keeps one fetch per slot across restarts.
#[derive(Debug, Clone)]
pub struct DailySchedule {
    hours: Vec<u32>,
}

impl DailySchedule {
    pub fn new(hours: &[u32]) -> Self {
        let mut hours: Vec<u32> = hours.iter().copied().filter(|h| *h < 24).collect();
        hours.sort_unstable();
        hours.dedup();
        DailySchedule { hours }
    }

    pub fn gold_prices() -> Self {
        Self::new(&GOLD_PRICE_FETCH_HOURS)
    }

    pub fn hours(&self) -> &[u32] {
        &self.hours
    }

    /// Start of the latest slot at or before `now`, on the same IST day
    pub fn latest_slot_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let now_ist = now.with_timezone(&Kolkata);
        let hour = self
            .hours
            .iter()
            .rev()
            .find(|h| **h <= now_ist.hour())?;
        let date = now_ist.date_naive();
        Kolkata
            .from_local_datetime(&date.and_hms_opt(*hour, 0, 0)?)
            .single()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn is_due(&self, last_fetch: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last_fetch else {
            return true;
        };

        let today = now.with_timezone(&Kolkata).date_naive();
        if last.with_timezone(&Kolkata).date_naive() != today {
            return true;
        }

        match self.latest_slot_start(now) {
            Some(slot) => last < slot,
            None => false,
        }
    }

    pub fn describe(&self) -> String {
        self.hours
            .iter()
            .map(|h| format!("{}:00", h))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ist(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(2025, 1, d, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_never_fetched_is_due() {
        assert!(DailySchedule::gold_prices().is_due(None, ist(15, 10, 0)));
    }

    #[test]
    fn test_new_day_is_due() {
        let schedule = DailySchedule::gold_prices();
        assert!(schedule.is_due(Some(ist(14, 21, 0)), ist(15, 9, 0)));
    }

    #[test]
    fn test_same_day_before_first_slot_is_not_due() {
        let schedule = DailySchedule::gold_prices();
        assert!(!schedule.is_due(Some(ist(15, 9, 0)), ist(15, 11, 0)));
    }

    #[test]
    fn test_slot_start_makes_fetch_due_once() {
        let schedule = DailySchedule::gold_prices();
        // Fetched in the morning, 13:00 slot has started
        assert!(schedule.is_due(Some(ist(15, 9, 0)), ist(15, 13, 5)));
        // Already fetched inside the 13:00 slot
        assert!(!schedule.is_due(Some(ist(15, 13, 5)), ist(15, 13, 50)));
        assert!(!schedule.is_due(Some(ist(15, 13, 5)), ist(15, 19, 59)));
        // 20:00 slot
        assert!(schedule.is_due(Some(ist(15, 13, 5)), ist(15, 20, 1)));
    }

    #[test]
    fn test_late_fetch_after_missed_slot_is_not_repeated() {
        let schedule = DailySchedule::gold_prices();
        // Process restarted at 14:30 and fetched; no second fetch before 20:00
        assert!(!schedule.is_due(Some(ist(15, 14, 30)), ist(15, 15, 0)));
    }

    #[test]
    fn test_describe() {
        assert_eq!(DailySchedule::gold_prices().describe(), "13:00, 20:00");
    }
}
