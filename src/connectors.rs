/*!
Connective fabric between transit platforms and the street network.

At startup every stop is snapped to its nearest street segment (a
parallel sweep over the spatial index), and the snaps are inverted into
lookup tables: mid-segment position to stops, segment to positions, and
segment endpoint nodes to positions. The provider then serves platform
to street and junction to street transitions on demand.

Stops with no segment inside the search radius get no connector; their
platforms stay reachable through transit only. The mid-segment to
platform direction is intentionally not generated: the reverse tables
exist and are exposed read-only, but boarding the network from a segment
interior goes through a junction first.
*/

use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use hashbrown::HashMap;
use rayon::prelude::*;
use tracing::info;

use crate::feed::Feed;
use crate::graph::{advance, CostModel, Edge, EdgeProvider, Vertex};
use crate::spatial::SegmentIndex;
use crate::streets::{geodesic_meters, MidSegmentRef, NodeId, SegmentRef, StreetNetwork};
use crate::Error;

pub struct ConnectorEdges {
    feed: Arc<Feed>,
    streets: Arc<StreetNetwork>,
    costs: CostModel,
    /// Where each stop meets the street.
    stop_links: HashMap<String, MidSegmentRef>,
    /// Mid-segment positions adjacent to each segment endpoint node.
    node_links: HashMap<NodeId, Vec<MidSegmentRef>>,
    /// Stops reachable at each mid-segment position.
    midseg_stops: HashMap<MidSegmentRef, Vec<String>>,
    /// Snap positions on each segment.
    segment_links: HashMap<SegmentRef, Vec<MidSegmentRef>>,
}

impl ConnectorEdges {
    /// Snap every stop and build the link tables.
    pub fn new(
        feed: Arc<Feed>,
        streets: Arc<StreetNetwork>,
        segments: &SegmentIndex,
        costs: CostModel,
    ) -> Result<Self, Error> {
        let mut stops: Vec<_> = feed.stops().collect();
        stops.sort_by(|a, b| a.id.cmp(&b.id));

        let snapped: Vec<(String, MidSegmentRef)> = stops
            .par_iter()
            .map(|stop| {
                Ok(segments
                    .nearest_segment(stop.point, costs.search_radius)?
                    .map(|mid| (stop.id.clone(), mid)))
            })
            .collect::<Result<Vec<Option<(String, MidSegmentRef)>>, Error>>()?
            .into_iter()
            .flatten()
            .collect();

        let mut stop_links = HashMap::with_capacity(snapped.len());
        let mut midseg_stops: HashMap<MidSegmentRef, Vec<String>> = HashMap::new();
        for (stop_id, mid) in snapped {
            midseg_stops.entry(mid).or_default().push(stop_id.clone());
            stop_links.insert(stop_id, mid);
        }

        let mut segment_links: HashMap<SegmentRef, Vec<MidSegmentRef>> = HashMap::new();
        let mut node_links: HashMap<NodeId, Vec<MidSegmentRef>> = HashMap::new();
        for &mid in midseg_stops.keys() {
            segment_links.entry(mid.segment).or_default().push(mid);

            let way = streets.way(mid.segment.way)?;
            let index = mid.segment.index as usize;
            for node_id in [way.nodes[index], way.nodes[index + 1]] {
                node_links.entry(node_id).or_default().push(mid);
            }
        }

        for links in node_links.values_mut() {
            links.sort();
            links.dedup();
        }
        for links in segment_links.values_mut() {
            links.sort();
        }
        for stop_ids in midseg_stops.values_mut() {
            stop_ids.sort();
        }

        info!(
            snapped = stop_links.len(),
            stops = feed.stops().count(),
            "stop connectors built"
        );

        Ok(Self {
            feed,
            streets,
            costs,
            stop_links,
            node_links,
            midseg_stops,
            segment_links,
        })
    }

    /// Where a stop meets the street, if it snapped at all.
    #[must_use]
    pub fn stop_link(&self, stop_id: &str) -> Option<&MidSegmentRef> {
        self.stop_links.get(stop_id)
    }

    /// Stops whose snap lands on this mid-segment position.
    #[must_use]
    pub fn stops_at(&self, mid: &MidSegmentRef) -> &[String] {
        self.midseg_stops.get(mid).map_or(&[], Vec::as_slice)
    }

    /// Snap positions on a segment.
    #[must_use]
    pub fn segment_midsegments(&self, segment: &SegmentRef) -> &[MidSegmentRef] {
        self.segment_links.get(segment).map_or(&[], Vec::as_slice)
    }

    /// Snap positions adjacent to a street node.
    #[must_use]
    pub fn node_midsegments(&self, node: NodeId) -> &[MidSegmentRef] {
        self.node_links.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Platform onto the street: walk from the stop to its snap point.
    fn at_stop_edges(&self, stop: &str, time: DateTime<Tz>) -> Result<Vec<Edge>, Error> {
        let Some(&at) = self.stop_links.get(stop) else {
            return Ok(Vec::new());
        };

        let origin = self.feed.get_stop_point(stop)?;
        let meters = geodesic_meters(origin, self.streets.point_on(&at)?);
        Ok(vec![Edge {
            weight: self.costs.walk_cost(meters),
            target: Vertex::Midstreet {
                at,
                time: advance(time, self.costs.walk_seconds(meters)),
            },
        }])
    }

    /// Junction toward every adjacent snap position.
    fn street_node_edges(&self, node: NodeId, time: DateTime<Tz>) -> Result<Vec<Edge>, Error> {
        let Some(links) = self.node_links.get(&node) else {
            return Ok(Vec::new());
        };

        let origin = self.streets.node(node)?.point;
        links
            .iter()
            .map(|&at| {
                let meters = geodesic_meters(origin, self.streets.point_on(&at)?);
                Ok(Edge {
                    weight: self.costs.walk_cost(meters),
                    target: Vertex::Midstreet {
                        at,
                        time: advance(time, self.costs.walk_seconds(meters)),
                    },
                })
            })
            .collect()
    }
}

impl EdgeProvider for ConnectorEdges {
    fn outgoing(&self, vertex: &Vertex) -> Result<Vec<Edge>, Error> {
        match vertex {
            Vertex::AtStop { stop, time } => self.at_stop_edges(stop, *time),
            Vertex::StreetNode { node, time } => self.street_node_edges(*node, *time),
            // Segment interiors do not board platforms directly.
            Vertex::Midstreet { .. }
            | Vertex::OnEarth { .. }
            | Vertex::Departure { .. }
            | Vertex::Arrival { .. } => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use geo::Point;

    use super::*;
    use crate::calendar::ServiceCalendar;
    use crate::feed::Stop;
    use crate::streets::tests::crossing_network;

    fn stop(id: &str, lon: f64, lat: f64) -> Stop {
        Stop {
            id: id.to_string(),
            name: id.to_string(),
            point: Point::new(lon, lat),
        }
    }

    fn connectors() -> ConnectorEdges {
        let streets = Arc::new(crossing_network());
        let segments = SegmentIndex::build(&streets);
        let calendar = ServiceCalendar::expand(&[], &[]);
        let feed = Arc::new(
            Feed::from_parts(
                vec![
                    stop("alpha", 0.0005, 0.0002),
                    stop("beta", 0.0025, 0.0001),
                    stop("faraway", 10.0, 10.0),
                ],
                Vec::new(),
                Vec::new(),
                &calendar,
                chrono_tz::Tz::UTC,
            )
            .unwrap(),
        );
        ConnectorEdges::new(feed, streets, &segments, CostModel::default()).unwrap()
    }

    fn noon() -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    #[test]
    fn stops_snap_to_their_nearest_segment_at_startup() {
        let connectors = connectors();

        let alpha = connectors.stop_link("alpha").unwrap();
        assert_eq!((alpha.segment.way, alpha.segment.index), (1, 0));
        let beta = connectors.stop_link("beta").unwrap();
        assert_eq!((beta.segment.way, beta.segment.index), (1, 2));

        // Out of radius: no connector at all.
        assert!(connectors.stop_link("faraway").is_none());
    }

    #[test]
    fn reverse_tables_are_consistent() {
        let connectors = connectors();
        let alpha = *connectors.stop_link("alpha").unwrap();

        assert_eq!(connectors.stops_at(&alpha), ["alpha"]);
        assert_eq!(connectors.segment_midsegments(&alpha.segment), [alpha]);
        // Both endpoints of the snapped segment know the position.
        assert_eq!(connectors.node_midsegments(1), [alpha]);
        assert_eq!(connectors.node_midsegments(2), [alpha]);
        assert!(connectors.node_midsegments(10).is_empty());
    }

    #[test]
    fn platform_walks_onto_the_street() {
        let connectors = connectors();

        let edges = connectors
            .outgoing(&Vertex::AtStop {
                stop: "alpha".to_string(),
                time: noon(),
            })
            .unwrap();
        assert_eq!(edges.len(), 1);

        let Vertex::Midstreet { at, time } = &edges[0].target else {
            panic!("expected a midstreet target");
        };
        assert_eq!(at.segment.way, 1);
        assert!(edges[0].weight > 0.0);
        assert!(*time > noon());
    }

    #[test]
    fn unsnapped_platform_stays_on_transit() {
        let connectors = connectors();
        let edges = connectors
            .outgoing(&Vertex::AtStop {
                stop: "faraway".to_string(),
                time: noon(),
            })
            .unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn junction_reaches_adjacent_snap_positions() {
        let connectors = connectors();

        let edges = connectors
            .outgoing(&Vertex::StreetNode {
                node: 2,
                time: noon(),
            })
            .unwrap();
        assert_eq!(edges.len(), 1);
        let Vertex::Midstreet { at, .. } = &edges[0].target else {
            panic!("expected a midstreet target");
        };
        assert_eq!(*at, *connectors.stop_link("alpha").unwrap());
    }

    #[test]
    fn midstreet_does_not_board_platforms() {
        let connectors = connectors();
        let alpha = *connectors.stop_link("alpha").unwrap();

        let edges = connectors
            .outgoing(&Vertex::Midstreet {
                at: alpha,
                time: noon(),
            })
            .unwrap();
        assert!(edges.is_empty());
    }
}
