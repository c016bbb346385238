//! Transit edge provider: boarding, riding, dwelling, alighting.
//!
//! Platform vertices board every future departure at their stop; onboard
//! vertices ride to the next stop, wait out the dwell, or alight back
//! onto the platform against a fixed penalty. All weights come straight
//! off the timetable matrices, in utils (seconds of in-vehicle time).

use std::sync::Arc;

use chrono::{DateTime, Duration};
use chrono_tz::Tz;

use crate::feed::Feed;
use crate::graph::{CostModel, Edge, EdgeProvider, Vertex};
use crate::timetable::{PatternId, ServiceId};
use crate::Error;

pub struct TransitEdges {
    feed: Arc<Feed>,
    costs: CostModel,
}

impl TransitEdges {
    #[must_use]
    pub fn new(feed: Arc<Feed>, costs: CostModel) -> Self {
        Self { feed, costs }
    }

    /// One boarding edge per future departure event at the stop,
    /// ordered by pattern id then service id. The weight is the wait in
    /// seconds.
    fn board_edges(&self, stop: &str, time: DateTime<Tz>) -> Result<Vec<Edge>, Error> {
        let events = self.feed.find_stop_events(stop, time, true)?;
        Ok(events
            .into_iter()
            .map(|event| Edge {
                weight: (event.time - time).num_seconds() as f64,
                target: Vertex::Departure {
                    pattern: event.pattern,
                    service: event.service,
                    row: event.row,
                    col: event.col,
                    time: event.time,
                },
            })
            .collect())
    }

    /// Exactly one edge: ride to the arrival at the next stop.
    fn ride_edges(
        &self,
        pattern: PatternId,
        service: ServiceId,
        row: u32,
        col: u32,
        time: DateTime<Tz>,
    ) -> Result<Vec<Edge>, Error> {
        let timetable = self.feed.timetable(pattern, service)?;
        let (row_idx, col_idx) = (row as usize, col as usize);
        if col_idx + 1 >= timetable.cols() {
            return Ok(Vec::new());
        }

        let hop = timetable.arrival(row_idx, col_idx + 1)? - timetable.departure(row_idx, col_idx)?;
        Ok(vec![Edge {
            weight: f64::from(hop),
            target: Vertex::Arrival {
                pattern,
                service,
                row,
                col: col + 1,
                time: time + Duration::seconds(i64::from(hop)),
            },
        }])
    }

    /// Wait out the dwell, then the alight edge, in that order. At the
    /// terminal column only alighting remains.
    fn arrival_edges(
        &self,
        pattern: PatternId,
        service: ServiceId,
        row: u32,
        col: u32,
        time: DateTime<Tz>,
    ) -> Result<Vec<Edge>, Error> {
        let timetable = self.feed.timetable(pattern, service)?;
        let (row_idx, col_idx) = (row as usize, col as usize);

        let mut edges = Vec::with_capacity(2);
        if col_idx + 1 < timetable.cols() {
            let dwell =
                timetable.departure(row_idx, col_idx)? - timetable.arrival(row_idx, col_idx)?;
            edges.push(Edge {
                weight: f64::from(dwell),
                target: Vertex::Departure {
                    pattern,
                    service,
                    row,
                    col,
                    time: time + Duration::seconds(i64::from(dwell)),
                },
            });
        }

        let stop = timetable.stop_id(col_idx)?.to_string();
        edges.push(Edge {
            weight: self.costs.alighting_penalty,
            target: Vertex::AtStop { stop, time },
        });
        Ok(edges)
    }
}

impl EdgeProvider for TransitEdges {
    fn outgoing(&self, vertex: &Vertex) -> Result<Vec<Edge>, Error> {
        match vertex {
            Vertex::AtStop { stop, time } => self.board_edges(stop, *time),
            Vertex::Departure {
                pattern,
                service,
                row,
                col,
                time,
            } => self.ride_edges(*pattern, *service, *row, *col, *time),
            Vertex::Arrival {
                pattern,
                service,
                row,
                col,
                time,
            } => self.arrival_edges(*pattern, *service, *row, *col, *time),
            Vertex::OnEarth { .. } | Vertex::Midstreet { .. } | Vertex::StreetNode { .. } => {
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};
    use geo::Point;

    use super::*;
    use crate::calendar::{CalendarRule, ServiceCalendar};
    use crate::feed::{Stop, TripRecord, TripStopTime};

    fn minimal_feed() -> Arc<Feed> {
        let calendar = ServiceCalendar::expand(
            &[CalendarRule {
                service_id: "wk".to_string(),
                weekdays: [true; 7],
                start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            }],
            &[],
        );
        let stops = ["A", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, id)| Stop {
                id: (*id).to_string(),
                name: (*id).to_string(),
                point: Point::new(10.0 + i as f64 * 0.01, 50.0),
            })
            .collect();
        let trips = vec![TripRecord {
            trip_id: "t1".to_string(),
            service_id: "wk".to_string(),
            stop_times: vec![
                TripStopTime {
                    stop_id: "A".to_string(),
                    arrival: 100,
                    departure: 100,
                },
                TripStopTime {
                    stop_id: "B".to_string(),
                    arrival: 200,
                    departure: 210,
                },
                TripStopTime {
                    stop_id: "C".to_string(),
                    arrival: 300,
                    departure: 300,
                },
            ],
        }];
        Arc::new(
            Feed::from_parts(stops, Vec::new(), trips, &calendar, chrono_tz::Tz::UTC).unwrap(),
        )
    }

    fn midnight() -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
    }

    fn at(seconds: i64) -> DateTime<Tz> {
        midnight() + Duration::seconds(seconds)
    }

    #[test]
    fn boarding_waits_for_the_departure() {
        let provider = TransitEdges::new(minimal_feed(), CostModel::default());

        let edges = provider
            .outgoing(&Vertex::AtStop {
                stop: "A".to_string(),
                time: at(50),
            })
            .unwrap();

        assert_eq!(edges.len(), 1);
        assert!((edges[0].weight - 50.0).abs() < f64::EPSILON);
        assert_eq!(
            edges[0].target,
            Vertex::Departure {
                pattern: 0,
                service: 0,
                row: 0,
                col: 0,
                time: at(100),
            }
        );
    }

    #[test]
    fn departing_rides_to_the_next_arrival() {
        let provider = TransitEdges::new(minimal_feed(), CostModel::default());

        let edges = provider
            .outgoing(&Vertex::Departure {
                pattern: 0,
                service: 0,
                row: 0,
                col: 0,
                time: at(100),
            })
            .unwrap();

        assert_eq!(edges.len(), 1);
        assert!((edges[0].weight - 100.0).abs() < f64::EPSILON);
        assert_eq!(
            edges[0].target,
            Vertex::Arrival {
                pattern: 0,
                service: 0,
                row: 0,
                col: 1,
                time: at(200),
            }
        );
    }

    #[test]
    fn arriving_waits_then_alights_in_order() {
        let provider = TransitEdges::new(minimal_feed(), CostModel::default());

        let edges = provider
            .outgoing(&Vertex::Arrival {
                pattern: 0,
                service: 0,
                row: 0,
                col: 1,
                time: at(200),
            })
            .unwrap();

        assert_eq!(edges.len(), 2);
        assert!((edges[0].weight - 10.0).abs() < f64::EPSILON);
        assert_eq!(
            edges[0].target,
            Vertex::Departure {
                pattern: 0,
                service: 0,
                row: 0,
                col: 1,
                time: at(210),
            }
        );
        assert!((edges[1].weight - 60.0).abs() < f64::EPSILON);
        assert_eq!(
            edges[1].target,
            Vertex::AtStop {
                stop: "B".to_string(),
                time: at(200),
            }
        );
    }

    #[test]
    fn terminal_arrival_only_alights() {
        let provider = TransitEdges::new(minimal_feed(), CostModel::default());

        let edges = provider
            .outgoing(&Vertex::Arrival {
                pattern: 0,
                service: 0,
                row: 0,
                col: 2,
                time: at(300),
            })
            .unwrap();

        assert_eq!(edges.len(), 1);
        assert_eq!(
            edges[0].target,
            Vertex::AtStop {
                stop: "C".to_string(),
                time: at(300),
            }
        );
    }

    #[test]
    fn departing_at_the_terminal_column_is_a_dead_end() {
        let provider = TransitEdges::new(minimal_feed(), CostModel::default());

        let edges = provider
            .outgoing(&Vertex::Departure {
                pattern: 0,
                service: 0,
                row: 0,
                col: 2,
                time: at(300),
            })
            .unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn street_vertices_are_foreign() {
        let provider = TransitEdges::new(minimal_feed(), CostModel::default());
        let vertex = Vertex::on_earth(10.0, 50.0, at(0)).unwrap();
        assert!(provider.outgoing(&vertex).unwrap().is_empty());
    }

    #[test]
    fn incoming_is_unsupported() {
        let provider = TransitEdges::new(minimal_feed(), CostModel::default());
        let vertex = Vertex::AtStop {
            stop: "A".to_string(),
            time: at(0),
        };
        assert!(matches!(
            provider.incoming(&vertex),
            Err(Error::Unsupported(_))
        ));
    }
}
