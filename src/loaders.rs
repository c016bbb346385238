/*!
Zipped GTFS feed ingest.

The archive is validated for the required files, rows are decoded with
serde straight off the zip entries, and the per-file tables are joined
into [`TripRecord`]s before [`Feed::from_parts`] builds the indices.
`HH:MM:SS` times keep hours past 23 (next-day events stay on the previous
service date's clock).
*/

use std::io::{Read, Seek};

use chrono::NaiveDate;
use chrono_tz::Tz;
use geo::Point;
use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use zip::ZipArchive;

use crate::calendar::{CalendarException, CalendarRule, ServiceCalendar};
use crate::feed::{Feed, Route, Stop, TripRecord, TripStopTime};
use crate::Error;

const REQUIRED_FILES: [&str; 4] = ["stops.txt", "routes.txt", "trips.txt", "stop_times.txt"];

#[derive(Debug, Deserialize)]
struct RawStop {
    stop_id: String,
    stop_name: Option<String>,
    stop_lat: f64,
    stop_lon: f64,
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    route_id: String,
    route_short_name: Option<String>,
    route_long_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTrip {
    trip_id: String,
    service_id: String,
}

#[derive(Debug, Deserialize)]
struct RawStopTime {
    trip_id: String,
    arrival_time: String,
    departure_time: String,
    stop_id: String,
    stop_sequence: u32,
}

#[derive(Debug, Deserialize)]
struct RawCalendar {
    service_id: String,
    monday: u8,
    tuesday: u8,
    wednesday: u8,
    thursday: u8,
    friday: u8,
    saturday: u8,
    sunday: u8,
    start_date: String,
    end_date: String,
}

#[derive(Debug, Deserialize)]
struct RawCalendarDate {
    service_id: String,
    date: String,
    exception_type: u8,
}

#[derive(Debug, Deserialize)]
struct RawAgency {
    agency_timezone: Option<String>,
}

/// Load a feed from an open zip archive.
pub(crate) fn load_feed<R: Read + Seek>(reader: R) -> Result<Feed, Error> {
    let mut archive = ZipArchive::new(reader)?;

    for name in REQUIRED_FILES {
        if !has_file(&archive, name) {
            return Err(Error::MalformedFeed(format!("archive is missing {name}")));
        }
    }

    let raw_stops: Vec<RawStop> = read_rows(&mut archive, "stops.txt")?;
    let raw_routes: Vec<RawRoute> = read_rows(&mut archive, "routes.txt")?;
    let raw_trips: Vec<RawTrip> = read_rows(&mut archive, "trips.txt")?;
    let raw_stop_times: Vec<RawStopTime> = read_rows(&mut archive, "stop_times.txt")?;
    debug!(
        stops = raw_stops.len(),
        trips = raw_trips.len(),
        stop_times = raw_stop_times.len(),
        "feed tables read"
    );

    let rules = if has_file(&archive, "calendar.txt") {
        read_rows::<RawCalendar, _>(&mut archive, "calendar.txt")?
            .into_iter()
            .map(calendar_rule)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        Vec::new()
    };
    let exceptions = if has_file(&archive, "calendar_dates.txt") {
        read_rows::<RawCalendarDate, _>(&mut archive, "calendar_dates.txt")?
            .into_iter()
            .map(calendar_exception)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        Vec::new()
    };
    let calendar = ServiceCalendar::expand(&rules, &exceptions);

    let tz = read_timezone(&mut archive)?;

    let stops = raw_stops
        .into_iter()
        .map(|raw| Stop {
            name: raw.stop_name.unwrap_or_default(),
            point: Point::new(raw.stop_lon, raw.stop_lat),
            id: raw.stop_id,
        })
        .collect();
    let routes = raw_routes
        .into_iter()
        .map(|raw| Route {
            id: raw.route_id,
            short_name: raw.route_short_name,
            long_name: raw.route_long_name,
        })
        .collect();

    let trips = join_trips(raw_trips, raw_stop_times)?;

    Feed::from_parts(stops, routes, trips, &calendar, tz)
}

/// Group stop-time rows by trip and attach each trip's service id.
/// Rows whose trip is absent from `trips.txt` are dropped, matching
/// inner-join semantics.
fn join_trips(
    raw_trips: Vec<RawTrip>,
    raw_stop_times: Vec<RawStopTime>,
) -> Result<Vec<TripRecord>, Error> {
    let service_by_trip: HashMap<String, String> = raw_trips
        .into_iter()
        .map(|trip| (trip.trip_id, trip.service_id))
        .collect();

    let mut visits: HashMap<String, Vec<RawStopTime>> = HashMap::new();
    let mut orphaned = 0usize;
    for row in raw_stop_times {
        if service_by_trip.contains_key(&row.trip_id) {
            visits.entry(row.trip_id.clone()).or_default().push(row);
        } else {
            orphaned += 1;
        }
    }
    if orphaned > 0 {
        debug!(orphaned, "stop_times rows without a trips.txt entry dropped");
    }

    let mut trips = Vec::with_capacity(visits.len());
    for (trip_id, mut rows) in visits {
        rows.sort_by_key(|row| row.stop_sequence);
        let stop_times = rows
            .into_iter()
            .map(|row| {
                Ok(TripStopTime {
                    arrival: parse_gtfs_time(&row.arrival_time)?,
                    departure: parse_gtfs_time(&row.departure_time)?,
                    stop_id: row.stop_id,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let service_id = service_by_trip[&trip_id].clone();
        trips.push(TripRecord {
            trip_id,
            service_id,
            stop_times,
        });
    }
    Ok(trips)
}

fn calendar_rule(raw: RawCalendar) -> Result<CalendarRule, Error> {
    Ok(CalendarRule {
        weekdays: [
            raw.monday == 1,
            raw.tuesday == 1,
            raw.wednesday == 1,
            raw.thursday == 1,
            raw.friday == 1,
            raw.saturday == 1,
            raw.sunday == 1,
        ],
        start_date: parse_gtfs_date(&raw.start_date)?,
        end_date: parse_gtfs_date(&raw.end_date)?,
        service_id: raw.service_id,
    })
}

fn calendar_exception(raw: RawCalendarDate) -> Result<CalendarException, Error> {
    Ok(CalendarException {
        date: parse_gtfs_date(&raw.date)?,
        kind: raw.exception_type.try_into()?,
        service_id: raw.service_id,
    })
}

/// The feed's wall clock, read from `agency.txt` when present.
fn read_timezone<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Tz, Error> {
    if !has_file(archive, "agency.txt") {
        return Ok(Tz::UTC);
    }
    let agencies: Vec<RawAgency> = read_rows(archive, "agency.txt")?;
    let Some(name) = agencies.into_iter().find_map(|agency| agency.agency_timezone) else {
        return Ok(Tz::UTC);
    };
    match name.parse::<Tz>() {
        Ok(tz) => Ok(tz),
        Err(_) => {
            debug!(timezone = %name, "unknown agency timezone, falling back to UTC");
            Ok(Tz::UTC)
        }
    }
}

fn has_file<R: Read + Seek>(archive: &ZipArchive<R>, name: &str) -> bool {
    archive.file_names().any(|entry| entry == name)
}

fn read_rows<T: DeserializeOwned, R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<T>, Error> {
    let file = archive.by_name(name)?;
    let mut reader = csv::Reader::from_reader(file);
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Parse a GTFS `HH:MM:SS` value into seconds since midnight. Hours may
/// exceed 23.
pub(crate) fn parse_gtfs_time(value: &str) -> Result<u32, Error> {
    let mut parts = value.trim().splitn(3, ':');
    let (Some(h), Some(m), Some(s)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::MalformedFeed(format!("bad time {value:?}")));
    };

    let hours: u32 = h
        .parse()
        .map_err(|_| Error::MalformedFeed(format!("bad time {value:?}")))?;
    let minutes: u32 = m
        .parse()
        .map_err(|_| Error::MalformedFeed(format!("bad time {value:?}")))?;
    let seconds: u32 = s
        .parse()
        .map_err(|_| Error::MalformedFeed(format!("bad time {value:?}")))?;
    if minutes > 59 || seconds > 59 {
        return Err(Error::MalformedFeed(format!("bad time {value:?}")));
    }

    Ok(hours * 3600 + minutes * 60 + seconds)
}

/// Parse a GTFS `YYYYMMDD` date.
pub(crate) fn parse_gtfs_date(value: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(value.trim(), "%Y%m%d")
        .map_err(|_| Error::MalformedFeed(format!("bad date {value:?}")))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use chrono::TimeZone;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    fn feed_zip(files: &[(&str, &str)]) -> Cursor<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in files {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap()
    }

    fn minimal_files() -> Vec<(&'static str, &'static str)> {
        vec![
            (
                "stops.txt",
                "stop_id,stop_name,stop_lat,stop_lon\n\
                 A,Alpha,50.0,10.0\n\
                 B,Beta,50.0,10.01\n",
            ),
            ("routes.txt", "route_id,route_short_name\nr1,1\n"),
            (
                "trips.txt",
                "route_id,service_id,trip_id\nr1,wk,t1\n",
            ),
            (
                "stop_times.txt",
                "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                 t1,08:00:00,08:00:00,A,1\n\
                 t1,08:10:00,08:10:00,B,2\n",
            ),
            (
                "calendar.txt",
                "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
                 wk,1,1,1,1,1,0,0,20240301,20240331\n",
            ),
        ]
    }

    #[test]
    fn minimal_feed_loads_and_answers_queries() {
        let feed = Feed::from_zip(feed_zip(&minimal_files())).unwrap();

        assert_eq!(feed.timezone(), Tz::UTC);
        assert_eq!(feed.day_end(), 8 * 3600 + 600);
        assert_eq!(feed.stop_named("Alpha").unwrap().id, "A");

        let query = Tz::UTC.with_ymd_and_hms(2024, 3, 4, 7, 0, 0).unwrap();
        let events = feed.find_stop_events("A", query, true).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].time,
            Tz::UTC.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn missing_required_file_is_rejected() {
        let mut files = minimal_files();
        files.retain(|(name, _)| *name != "routes.txt");
        let err = Feed::from_zip(feed_zip(&files)).unwrap_err();
        assert!(matches!(err, Error::MalformedFeed(message) if message.contains("routes.txt")));
    }

    #[test]
    fn agency_timezone_is_carried_through() {
        let mut files = minimal_files();
        files.push((
            "agency.txt",
            "agency_id,agency_name,agency_url,agency_timezone\n\
             ag,Agency,https://example.com,Europe/Berlin\n",
        ));
        let feed = Feed::from_zip(feed_zip(&files)).unwrap();
        assert_eq!(feed.timezone(), Tz::Europe__Berlin);
    }

    #[test]
    fn calendar_dates_exceptions_apply() {
        let mut files = minimal_files();
        files.push((
            "calendar_dates.txt",
            "service_id,date,exception_type\n\
             wk,20240302,1\n\
             wk,20240304,2\n",
        ));
        let feed = Feed::from_zip(feed_zip(&files)).unwrap();

        // Saturday the 2nd was added, Monday the 4th removed.
        assert_eq!(
            feed.service_ids_on(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()),
            vec!["wk"]
        );
        assert!(feed
            .service_ids_on(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())
            .is_empty());
    }

    #[test]
    fn times_past_midnight_parse() {
        assert_eq!(parse_gtfs_time("25:30:00").unwrap(), 91_800);
        assert_eq!(parse_gtfs_time("00:00:01").unwrap(), 1);
        assert!(parse_gtfs_time("7:61:00").is_err());
        assert!(parse_gtfs_time("seven").is_err());
        assert!(parse_gtfs_time("07:00").is_err());
    }

    #[test]
    fn unparseable_stop_time_is_fatal() {
        let mut files = minimal_files();
        files.retain(|(name, _)| *name != "stop_times.txt");
        files.push((
            "stop_times.txt",
            "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
             t1,08:00:00,soon,A,1\n",
        ));
        assert!(matches!(
            Feed::from_zip(feed_zip(&files)),
            Err(Error::MalformedFeed(_))
        ));
    }
}
