/*!
The implicit routing graph: a heterogeneous vertex set and the provider
seam through which edges are generated on demand.

Vertices are transient values describing a rider state at an instant:
on open ground, partway along a street segment, at a junction, on a
platform, or onboard at the moment of departure or arrival. Nothing is
stored per vertex; an [`EdgeProvider`] derives the outgoing transitions
from the prebuilt indices, and the search driver owns all frontier and
visited state, memoizing by vertex equality.

Equality and hashing are variant-qualified: two vertices of different
kinds never compare equal even when their fields coincide.
*/

use std::hash::{Hash, Hasher};
use std::mem;
use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;

use crate::connectors::ConnectorEdges;
use crate::feed::Feed;
use crate::spatial::{check_coordinate, SegmentIndex};
use crate::streets::{MidSegmentRef, NodeId, StreetNetwork};
use crate::timetable::{PatternId, ServiceId};
use crate::transit::TransitEdges;
use crate::walk::WalkEdges;
use crate::{Error, ALIGHTING_PENALTY, SEARCH_RADIUS, WALKING_RELUCTANCE, WALKING_SPEED};

/// A rider state. Every variant carries the absolute instant at which
/// the rider occupies it, in the feed's timezone.
#[derive(Debug, Clone, PartialEq)]
pub enum Vertex {
    /// A free geographic position, not yet attached to the network.
    OnEarth {
        lon: f64,
        lat: f64,
        time: DateTime<Tz>,
    },
    /// A pedestrian partway along a street segment.
    Midstreet {
        at: MidSegmentRef,
        time: DateTime<Tz>,
    },
    /// A pedestrian at a street junction.
    StreetNode {
        node: NodeId,
        time: DateTime<Tz>,
    },
    /// A rider on a transit platform.
    AtStop {
        stop: String,
        time: DateTime<Tz>,
    },
    /// Onboard, at the instant of departing the stop at `(row, col)` of
    /// a timetable.
    Departure {
        pattern: PatternId,
        service: ServiceId,
        row: u32,
        col: u32,
        time: DateTime<Tz>,
    },
    /// Onboard, at the instant of arriving at the stop at `(row, col)`.
    Arrival {
        pattern: PatternId,
        service: ServiceId,
        row: u32,
        col: u32,
        time: DateTime<Tz>,
    },
}

impl Vertex {
    /// A free-position start vertex. The coordinate is validated once
    /// here so providers can trust it.
    pub fn on_earth(lon: f64, lat: f64, time: DateTime<Tz>) -> Result<Self, Error> {
        check_coordinate(lon, lat)?;
        Ok(Self::OnEarth { lon, lat, time })
    }

    /// The instant this state is occupied.
    #[must_use]
    pub fn time(&self) -> DateTime<Tz> {
        match self {
            Self::OnEarth { time, .. }
            | Self::Midstreet { time, .. }
            | Self::StreetNode { time, .. }
            | Self::AtStop { time, .. }
            | Self::Departure { time, .. }
            | Self::Arrival { time, .. } => *time,
        }
    }
}

// Coordinates are validated on construction and never NaN, so the
// float fields are totally ordered for equality purposes.
impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            Self::OnEarth { lon, lat, time } => {
                lon.to_bits().hash(state);
                lat.to_bits().hash(state);
                time.hash(state);
            }
            Self::Midstreet { at, time } => {
                at.hash(state);
                time.hash(state);
            }
            Self::StreetNode { node, time } => {
                node.hash(state);
                time.hash(state);
            }
            Self::AtStop { stop, time } => {
                stop.hash(state);
                time.hash(state);
            }
            Self::Departure {
                pattern,
                service,
                row,
                col,
                time,
            }
            | Self::Arrival {
                pattern,
                service,
                row,
                col,
                time,
            } => {
                pattern.hash(state);
                service.hash(state);
                row.hash(state);
                col.hash(state);
                time.hash(state);
            }
        }
    }
}

/// An outgoing transition: the state reached and its cost in utils.
/// One util is one second of in-vehicle travel time.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub target: Vertex,
    pub weight: f64,
}

/// Tunable weights and search parameters, defaulting to the crate
/// constants.
#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    /// Pedestrian speed in meters per second.
    pub walking_speed: f64,
    /// Utils per second of walking.
    pub walking_reluctance: f64,
    /// Utils charged for leaving a vehicle.
    pub alighting_penalty: f64,
    /// Nearest-segment buffer radius in planar degrees.
    pub search_radius: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            walking_speed: WALKING_SPEED,
            walking_reluctance: WALKING_RELUCTANCE,
            alighting_penalty: ALIGHTING_PENALTY,
            search_radius: SEARCH_RADIUS,
        }
    }
}

impl CostModel {
    /// Seconds spent walking `meters`.
    #[must_use]
    pub fn walk_seconds(&self, meters: f64) -> f64 {
        meters / self.walking_speed
    }

    /// Utils charged for walking `meters`.
    #[must_use]
    pub fn walk_cost(&self, meters: f64) -> f64 {
        self.walk_seconds(meters) * self.walking_reluctance
    }
}

/// Advance a vertex timestamp by a possibly fractional number of
/// seconds, at millisecond resolution.
pub(crate) fn advance(time: DateTime<Tz>, seconds: f64) -> DateTime<Tz> {
    time + chrono::Duration::milliseconds((seconds * 1000.0).round() as i64)
}

/// A strategy generating the edges of the implicit graph for the vertex
/// variants it understands. Providers return an empty list both for
/// foreign variants and for "no transition exists"; structural problems
/// surface as errors.
pub trait EdgeProvider {
    fn outgoing(&self, vertex: &Vertex) -> Result<Vec<Edge>, Error>;

    /// Reverse edge generation is not implemented by any provider.
    fn incoming(&self, _vertex: &Vertex) -> Result<Vec<Edge>, Error> {
        Err(Error::Unsupported("incoming edge generation"))
    }
}

/// The composite graph a search driver talks to: every provider's edges
/// for a vertex, concatenated in provider order (transit, walk,
/// connectors).
pub struct RoutingGraph {
    providers: Vec<Box<dyn EdgeProvider + Send + Sync>>,
}

impl RoutingGraph {
    /// Wire the three standard providers over a feed and a street
    /// network, building the segment index and the stop connectors.
    pub fn from_parts(
        feed: Feed,
        streets: StreetNetwork,
        costs: CostModel,
    ) -> Result<Self, Error> {
        let feed = Arc::new(feed);
        let streets = Arc::new(streets);
        let segments = Arc::new(SegmentIndex::build(&streets));
        let connectors = ConnectorEdges::new(
            Arc::clone(&feed),
            Arc::clone(&streets),
            &segments,
            costs,
        )?;

        Ok(Self {
            providers: vec![
                Box::new(TransitEdges::new(feed, costs)),
                Box::new(WalkEdges::new(streets, segments, costs)),
                Box::new(connectors),
            ],
        })
    }

    /// Compose an arbitrary provider stack.
    #[must_use]
    pub fn from_providers(providers: Vec<Box<dyn EdgeProvider + Send + Sync>>) -> Self {
        Self { providers }
    }
}

impl EdgeProvider for RoutingGraph {
    fn outgoing(&self, vertex: &Vertex) -> Result<Vec<Edge>, Error> {
        let mut edges = Vec::new();
        for provider in &self.providers {
            edges.extend(provider.outgoing(vertex)?);
        }
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use chrono::TimeZone;

    use super::*;
    use crate::streets::SegmentRef;

    fn noon() -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    fn hash_of(vertex: &Vertex) -> u64 {
        let mut hasher = DefaultHasher::new();
        vertex.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equality_is_variant_qualified() {
        let departure = Vertex::Departure {
            pattern: 0,
            service: 0,
            row: 0,
            col: 0,
            time: noon(),
        };
        let arrival = Vertex::Arrival {
            pattern: 0,
            service: 0,
            row: 0,
            col: 0,
            time: noon(),
        };

        assert_ne!(departure, arrival);
        assert_ne!(hash_of(&departure), hash_of(&arrival));
    }

    #[test]
    fn quantized_midstreet_vertices_collide_as_keys() {
        let segment = SegmentRef { way: 5, index: 2 };
        let a = Vertex::Midstreet {
            at: MidSegmentRef::new(segment, 0.5000001),
            time: noon(),
        };
        let b = Vertex::Midstreet {
            at: MidSegmentRef::new(segment, 0.4999999),
            time: noon(),
        };

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn on_earth_rejects_bad_coordinates() {
        assert!(Vertex::on_earth(10.0, 50.0, noon()).is_ok());
        assert!(matches!(
            Vertex::on_earth(190.0, 50.0, noon()),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            Vertex::on_earth(10.0, 91.0, noon()),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn cost_model_defaults_match_crate_constants() {
        let costs = CostModel::default();
        assert!((costs.walk_seconds(1.2) - 1.0).abs() < 1e-12);
        assert!((costs.walk_cost(1.2) - 1.0).abs() < 1e-12);
        assert!((costs.alighting_penalty - ALIGHTING_PENALTY).abs() < f64::EPSILON);
    }

    #[test]
    fn advance_keeps_fractional_seconds() {
        let later = advance(noon(), 1.5);
        assert_eq!((later - noon()).num_milliseconds(), 1500);
    }
}
