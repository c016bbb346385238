/*!
The feed facade: stop-pattern grouping, timetable assembly, and
time-of-day event queries against a whole GTFS feed.

Construction canonicalizes every trip by its exact stop sequence, interns
service ids, and materializes one [`Timetable`] per `(pattern, service)`
pair. Afterwards the feed is immutable and answers
"next departure at or after `t` at stop `s`" (or the arrival mirror) for
absolute, timezone-aware timestamps; the conversion between wall-clock
datetimes and seconds-since-midnight happens only at this boundary.
*/

use std::collections::BTreeSet;
use std::io::{Read, Seek};
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;
use geo::Point;
use hashbrown::HashMap;
use tracing::{debug, info};

use crate::calendar::ServiceCalendar;
use crate::graph::Vertex;
use crate::timetable::{PatternId, ServiceId, Timetable};
use crate::{loaders, Error};

pub const SECONDS_PER_DAY: u32 = 86_400;

/// A transit stop as ingested: opaque id, display name, geographic point
/// (longitude, latitude).
#[derive(Debug, Clone)]
pub struct Stop {
    pub id: String,
    pub name: String,
    pub point: Point,
}

/// A route's display identity, kept from `routes.txt`.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
}

/// One visit of a trip to a stop, in seconds since midnight. Hours past
/// 23 denote early-morning next-day events.
#[derive(Debug, Clone)]
pub struct TripStopTime {
    pub stop_id: String,
    pub arrival: u32,
    pub departure: u32,
}

/// A trip as ingested: its stop visits in stop-sequence order.
#[derive(Debug, Clone)]
pub struct TripRecord {
    pub trip_id: String,
    pub service_id: String,
    pub stop_times: Vec<TripStopTime>,
}

/// One timetable event resolved to an absolute timestamp in the feed's
/// timezone. `row`/`col` address the cell inside the
/// `(pattern, service)` timetable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopEvent {
    pub pattern: PatternId,
    pub service: ServiceId,
    pub row: u32,
    pub col: u32,
    pub time: DateTime<Tz>,
}

/// Immutable index over one GTFS feed.
#[derive(Debug, Clone)]
pub struct Feed {
    stops: HashMap<String, Stop>,
    routes: Vec<Route>,
    /// `pattern_id -> ordered stop ids`.
    patterns: Vec<Vec<String>>,
    patterns_at_stop: HashMap<String, BTreeSet<PatternId>>,
    /// Interned service ids; the index is the [`ServiceId`].
    services: Vec<String>,
    calendar: HashMap<NaiveDate, BTreeSet<ServiceId>>,
    timetables: HashMap<(PatternId, ServiceId), Timetable>,
    tz: Tz,
    /// Latest departure anywhere in the feed, in seconds since midnight.
    day_end: u32,
}

impl Feed {
    /// Read a feed from an already-opened zip archive.
    pub fn from_zip<R: Read + Seek>(reader: R) -> Result<Self, Error> {
        loaders::load_feed(reader)
    }

    /// Read a feed from a zip file on disk.
    pub fn from_zip_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        loaders::load_feed(file)
    }

    /// Assemble a feed from already-parsed records. Trips are grouped by
    /// their exact stop sequence; trips sharing a sequence share a dense
    /// pattern id, and each `(pattern, service)` group becomes one
    /// verified [`Timetable`].
    pub fn from_parts(
        stops: Vec<Stop>,
        routes: Vec<Route>,
        mut trips: Vec<TripRecord>,
        calendar: &ServiceCalendar,
        tz: Tz,
    ) -> Result<Self, Error> {
        let mut stop_map = HashMap::with_capacity(stops.len());
        for stop in stops {
            if stop_map.insert(stop.id.clone(), stop).is_some() {
                debug!("duplicate stop_id in feed, keeping the last row");
            }
        }

        // Deterministic pattern and row numbering.
        trips.sort_by(|a, b| a.trip_id.cmp(&b.trip_id));
        trips.retain(|trip| {
            if trip.stop_times.is_empty() {
                debug!(trip = %trip.trip_id, "dropping trip without stop times");
                return false;
            }
            true
        });

        // Intern service ids over the union of trips and calendar rows so
        // both sides resolve to the same dense index.
        let mut service_names: BTreeSet<String> = trips
            .iter()
            .map(|trip| trip.service_id.clone())
            .collect();
        for (_, services) in calendar.iter() {
            service_names.extend(services.iter().cloned());
        }
        let services: Vec<String> = service_names.into_iter().collect();
        let service_lookup: HashMap<&str, ServiceId> = services
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx as ServiceId))
            .collect();

        let mut patterns: Vec<Vec<String>> = Vec::new();
        let mut pattern_lookup: HashMap<Vec<String>, PatternId> = HashMap::new();
        let mut groups: HashMap<(PatternId, ServiceId), Vec<(String, Vec<(u32, u32)>)>> =
            HashMap::new();

        for trip in trips {
            let sequence: Vec<String> = trip
                .stop_times
                .iter()
                .map(|visit| visit.stop_id.clone())
                .collect();
            let pattern = *pattern_lookup.entry(sequence).or_insert_with_key(|key| {
                patterns.push(key.clone());
                (patterns.len() - 1) as PatternId
            });
            let service = service_lookup[trip.service_id.as_str()];

            let times = trip
                .stop_times
                .iter()
                .map(|visit| (visit.arrival, visit.departure))
                .collect();
            groups
                .entry((pattern, service))
                .or_default()
                .push((trip.trip_id, times));
        }

        let mut timetables = HashMap::with_capacity(groups.len());
        let mut day_end = 0;
        for ((pattern, service), rows) in groups {
            let timetable = Timetable::new(patterns[pattern as usize].clone(), rows)?;
            day_end = day_end.max(timetable.max_departure());
            timetables.insert((pattern, service), timetable);
        }

        let mut patterns_at_stop: HashMap<String, BTreeSet<PatternId>> = HashMap::new();
        for (pattern, stop_ids) in patterns.iter().enumerate() {
            for stop_id in stop_ids {
                patterns_at_stop
                    .entry(stop_id.clone())
                    .or_default()
                    .insert(pattern as PatternId);
            }
        }

        let calendar = calendar
            .iter()
            .map(|(date, names)| {
                let ids: BTreeSet<ServiceId> = names
                    .iter()
                    .filter_map(|name| service_lookup.get(name.as_str()).copied())
                    .collect();
                (date, ids)
            })
            .collect();
        drop(service_lookup);

        info!(
            stops = stop_map.len(),
            patterns = patterns.len(),
            timetables = timetables.len(),
            "feed indexed"
        );

        Ok(Self {
            stops: stop_map,
            routes,
            patterns,
            patterns_at_stop,
            services,
            calendar,
            timetables,
            tz,
            day_end,
        })
    }

    /// Timetable events at a stop around an absolute timestamp.
    ///
    /// With `find_departures` the result is every pattern's next
    /// departure at or after the query instant; without it, every
    /// pattern's previous arrival at or before it. Early-morning queries
    /// whose shifted clock still falls inside the previous service date's
    /// schedule (`seconds + 86 400 < day_end`) consult that date instead,
    /// which is how times past `24:00:00` in the feed are reached.
    ///
    /// Events are ordered by pattern id, then service id, then column.
    pub fn find_stop_events(
        &self,
        stop_id: &str,
        time: DateTime<Tz>,
        find_departures: bool,
    ) -> Result<Vec<StopEvent>, Error> {
        let mut events = Vec::new();

        let mut query_secs = time.num_seconds_from_midnight();
        let mut service_date = time.date_naive();
        if query_secs + SECONDS_PER_DAY < self.day_end {
            query_secs += SECONDS_PER_DAY;
            service_date = service_date
                .pred_opt()
                .ok_or_else(|| Error::OutOfRange(format!("no day before {service_date}")))?;
        }

        let Some(patterns) = self.patterns_at_stop.get(stop_id) else {
            return Ok(events);
        };
        let Some(services) = self.calendar.get(&service_date) else {
            return Ok(events);
        };
        let midnight = self.local_midnight(service_date)?;

        for &pattern in patterns {
            for &service in services {
                let Some(timetable) = self.timetables.get(&(pattern, service)) else {
                    continue;
                };
                for (row, col, secs) in timetable.events_at(stop_id, query_secs, find_departures)
                {
                    events.push(StopEvent {
                        pattern,
                        service,
                        row: row as u32,
                        col: col as u32,
                        time: midnight + Duration::seconds(i64::from(secs)),
                    });
                }
            }
        }

        Ok(events)
    }

    /// Midnight of `date` on the feed's wall clock.
    fn local_midnight(&self, date: NaiveDate) -> Result<DateTime<Tz>, Error> {
        self.tz
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .earliest()
            .ok_or_else(|| Error::LocalTime(format!("midnight of {date} in {}", self.tz)))
    }

    /// Raw departure seconds for an event's timetable cell.
    pub fn departure_seconds(&self, event: &StopEvent) -> Result<u32, Error> {
        self.timetable(event.pattern, event.service)?
            .departure(event.row as usize, event.col as usize)
    }

    /// Raw arrival seconds for an event's timetable cell.
    pub fn arrival_seconds(&self, event: &StopEvent) -> Result<u32, Error> {
        self.timetable(event.pattern, event.service)?
            .arrival(event.row as usize, event.col as usize)
    }

    pub fn timetable(&self, pattern: PatternId, service: ServiceId) -> Result<&Timetable, Error> {
        self.timetables
            .get(&(pattern, service))
            .ok_or_else(|| Error::NotFound(format!("timetable ({pattern}, {service})")))
    }

    pub fn stop(&self, stop_id: &str) -> Result<&Stop, Error> {
        self.stops
            .get(stop_id)
            .ok_or_else(|| Error::NotFound(format!("stop {stop_id}")))
    }

    pub fn get_stop_point(&self, stop_id: &str) -> Result<Point, Error> {
        Ok(self.stop(stop_id)?.point)
    }

    pub fn stops(&self) -> impl Iterator<Item = &Stop> {
        self.stops.values()
    }

    /// Every stop whose display name contains `name`.
    #[must_use]
    pub fn stops_with_name(&self, name: &str) -> Vec<&Stop> {
        let mut matches: Vec<&Stop> = self
            .stops
            .values()
            .filter(|stop| stop.name.contains(name))
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    /// The first stop (by id) whose display name contains `name`.
    pub fn stop_named(&self, name: &str) -> Result<&Stop, Error> {
        self.stops_with_name(name)
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("stop named {name}")))
    }

    /// An `AtStop` start vertex for the stop matched by `name`.
    pub fn stop_vertex(&self, name: &str, time: DateTime<Tz>) -> Result<Vertex, Error> {
        let stop = self.stop_named(name)?;
        Ok(Vertex::AtStop {
            stop: stop.id.clone(),
            time,
        })
    }

    /// Raw service ids active on `date`, sorted.
    #[must_use]
    pub fn service_ids_on(&self, date: NaiveDate) -> Vec<&str> {
        self.calendar
            .get(&date)
            .map(|ids| {
                ids.iter()
                    .map(|&id| self.services[id as usize].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn service_name(&self, service: ServiceId) -> Result<&str, Error> {
        self.services
            .get(service as usize)
            .map(String::as_str)
            .ok_or_else(|| Error::OutOfRange(format!("service id {service}")))
    }

    pub fn pattern(&self, pattern: PatternId) -> Result<&[String], Error> {
        self.patterns
            .get(pattern as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::OutOfRange(format!("pattern id {pattern}")))
    }

    #[must_use]
    pub fn patterns_serving(&self, stop_id: &str) -> Option<&BTreeSet<PatternId>> {
        self.patterns_at_stop.get(stop_id)
    }

    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Latest departure anywhere in the feed, in seconds since midnight.
    #[must_use]
    pub fn day_end(&self) -> u32 {
        self.day_end
    }
}
