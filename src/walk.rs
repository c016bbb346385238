//! Pedestrian edge provider over the street network.
//!
//! Free positions snap onto the nearest segment; positions on a segment
//! walk to the nearest junction in each permitted direction; junctions
//! walk whole blocks (the run of shape nodes up to the next junction) of
//! every way referencing them. Geometry is traversed node by node and
//! lengths are haversine sums, so curves cost what they measure.

use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use geo::Point;
use itertools::Itertools;

use crate::graph::{advance, CostModel, Edge, EdgeProvider, Vertex};
use crate::spatial::SegmentIndex;
use crate::streets::{geodesic_meters, MidSegmentRef, NodeId, StreetNetwork, WayId};
use crate::Error;

pub struct WalkEdges {
    streets: Arc<StreetNetwork>,
    segments: Arc<SegmentIndex>,
    costs: CostModel,
}

impl WalkEdges {
    #[must_use]
    pub fn new(streets: Arc<StreetNetwork>, segments: Arc<SegmentIndex>, costs: CostModel) -> Self {
        Self {
            streets,
            segments,
            costs,
        }
    }

    /// Snap a free position onto the nearest segment within the search
    /// radius. No street nearby means no edges.
    fn on_earth_edges(
        &self,
        lon: f64,
        lat: f64,
        time: DateTime<Tz>,
    ) -> Result<Vec<Edge>, Error> {
        let point = Point::new(lon, lat);
        let Some(at) = self
            .segments
            .nearest_segment(point, self.costs.search_radius)?
        else {
            return Ok(Vec::new());
        };

        let snapped = self.streets.point_on(&at)?;
        let meters = geodesic_meters(point, snapped);
        Ok(vec![Edge {
            weight: self.costs.walk_cost(meters),
            target: Vertex::Midstreet {
                at,
                time: advance(time, self.costs.walk_seconds(meters)),
            },
        }])
    }

    /// Walk from a mid-segment position to the nearest junction ahead,
    /// and behind when the way allows it. Forward comes first.
    fn midstreet_edges(&self, at: &MidSegmentRef, time: DateTime<Tz>) -> Result<Vec<Edge>, Error> {
        let way_id = at.segment.way;
        let seg_index = at.segment.index as usize;
        let midpoint = self.streets.point_on(at)?;

        let mut edges = Vec::with_capacity(2);

        let end = self.streets.next_vertex_index(way_id, seg_index + 1, true)?;
        edges.push(self.block_edge(way_id, midpoint, seg_index + 1, end, time)?);

        if !self.streets.is_oneway(way_id)? {
            let start = self.streets.next_vertex_index(way_id, seg_index, false)?;
            edges.push(self.block_edge(way_id, midpoint, seg_index, start, time)?);
        }

        Ok(edges)
    }

    /// From a junction, walk one block along every way referencing it:
    /// forward to the next vertex node, and backward when the way is not
    /// one-way.
    fn street_node_edges(&self, node: NodeId, time: DateTime<Tz>) -> Result<Vec<Edge>, Error> {
        let origin = self.streets.node(node)?.point;
        let refs = self.streets.node_refs(node)?.to_vec();

        let mut edges = Vec::new();
        for (way_id, position) in refs {
            let way_len = self.streets.way(way_id)?.nodes.len();

            if position + 1 < way_len {
                let end = self.streets.next_vertex_index(way_id, position + 1, true)?;
                edges.push(self.block_edge(way_id, origin, position + 1, end, time)?);
            }

            if position > 0 && !self.streets.is_oneway(way_id)? {
                let start = self.streets.next_vertex_index(way_id, position - 1, false)?;
                edges.push(self.block_edge(way_id, origin, position - 1, start, time)?);
            }
        }
        Ok(edges)
    }

    /// One edge traversing the way geometry from `origin` through the
    /// node positions `first..=last` (in either direction), ending on
    /// the street node at `last`.
    fn block_edge(
        &self,
        way_id: WayId,
        origin: Point,
        first: usize,
        last: usize,
        time: DateTime<Tz>,
    ) -> Result<Edge, Error> {
        let mut points = vec![origin];
        if first <= last {
            for position in first..=last {
                points.push(self.streets.way_point(way_id, position)?);
            }
        } else {
            for position in (last..=first).rev() {
                points.push(self.streets.way_point(way_id, position)?);
            }
        }

        let meters = path_meters(&points);
        let node = self.streets.way(way_id)?.nodes[last];
        Ok(Edge {
            weight: self.costs.walk_cost(meters),
            target: Vertex::StreetNode {
                node,
                time: advance(time, self.costs.walk_seconds(meters)),
            },
        })
    }
}

impl EdgeProvider for WalkEdges {
    fn outgoing(&self, vertex: &Vertex) -> Result<Vec<Edge>, Error> {
        match vertex {
            Vertex::OnEarth { lon, lat, time } => self.on_earth_edges(*lon, *lat, *time),
            Vertex::Midstreet { at, time } => self.midstreet_edges(at, *time),
            Vertex::StreetNode { node, time } => self.street_node_edges(*node, *time),
            Vertex::AtStop { .. } | Vertex::Departure { .. } | Vertex::Arrival { .. } => {
                Ok(Vec::new())
            }
        }
    }
}

/// Haversine length of a point chain, in meters.
fn path_meters(points: &[Point]) -> f64 {
    points
        .iter()
        .copied()
        .tuple_windows()
        .map(|(a, b)| geodesic_meters(a, b))
        .sum()
}
