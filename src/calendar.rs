//! Service-calendar expansion: weekly rules plus dated exceptions become
//! a plain `date -> {service_id}` map queried by the feed facade.

use chrono::{Datelike, NaiveDate};
use hashbrown::{HashMap, HashSet};

use crate::Error;

/// One `calendar.txt` row: a weekly template valid over an inclusive
/// date range.
#[derive(Debug, Clone)]
pub struct CalendarRule {
    pub service_id: String,
    /// Monday through Sunday.
    pub weekdays: [bool; 7],
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// One `calendar_dates.txt` row.
#[derive(Debug, Clone)]
pub struct CalendarException {
    pub service_id: String,
    pub date: NaiveDate,
    pub kind: ExceptionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Added,
    Removed,
}

impl TryFrom<u8> for ExceptionKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(Self::Added),
            2 => Ok(Self::Removed),
            other => Err(Error::MalformedFeed(format!(
                "calendar exception_type {other} is not 1 or 2"
            ))),
        }
    }
}

/// Which services run on which dates.
#[derive(Debug, Clone, Default)]
pub struct ServiceCalendar {
    days: HashMap<NaiveDate, HashSet<String>>,
}

impl ServiceCalendar {
    /// Expand weekly rules over their date ranges, then apply dated
    /// exceptions. Removing a service that was never scheduled is a
    /// no-op.
    #[must_use]
    pub fn expand(rules: &[CalendarRule], exceptions: &[CalendarException]) -> Self {
        let mut days: HashMap<NaiveDate, HashSet<String>> = HashMap::new();

        for rule in rules {
            let mut date = rule.start_date;
            while date <= rule.end_date {
                if rule.weekdays[date.weekday().num_days_from_monday() as usize] {
                    days.entry(date)
                        .or_default()
                        .insert(rule.service_id.clone());
                }
                match date.succ_opt() {
                    Some(next) => date = next,
                    None => break,
                }
            }
        }

        for exception in exceptions {
            match exception.kind {
                ExceptionKind::Added => {
                    days.entry(exception.date)
                        .or_default()
                        .insert(exception.service_id.clone());
                }
                ExceptionKind::Removed => {
                    if let Some(services) = days.get_mut(&exception.date) {
                        services.remove(&exception.service_id);
                    }
                }
            }
        }

        Self { days }
    }

    #[must_use]
    pub fn services_on(&self, date: NaiveDate) -> Option<&HashSet<String>> {
        self.days.get(&date)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, &HashSet<String>)> {
        self.days.iter().map(|(date, services)| (*date, services))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}
