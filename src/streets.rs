/*!
OSM-derived street topology.

Only ways carrying a `highway` tag survive ingest (motorways excluded),
and only nodes referenced by a surviving way are kept. The model
distinguishes *vertex nodes* (way nodes that are terminal or shared with
another way position, the granularity at which a turn is possible) from
shape nodes that contribute geometry only. Positions along a segment are
addressed by [`MidSegmentRef`] with a quantized normalized offset so they
stay usable as map keys.
*/

use std::path::Path;

use geo::{Distance, Haversine, Point};
use hashbrown::{HashMap, HashSet};
use osmpbf::{Element, ElementReader};
use tracing::{debug, info};

use crate::elevation::ElevationSampler;
use crate::Error;

pub type NodeId = i64;
pub type WayId = i64;

/// Normalized segment offsets are quantized to this many steps for
/// identity and hashing; geometry keeps the full float.
pub(crate) const OFFSET_SCALE: f64 = 100_000.0;

/// A street node: coordinate plus optional sampled elevation.
#[derive(Debug, Clone)]
pub struct StreetNode {
    pub id: NodeId,
    pub point: Point,
    pub elevation: Option<f64>,
}

/// A retained highway way: ordered node references and the raw tag map.
#[derive(Debug, Clone)]
pub struct Way {
    pub id: WayId,
    pub nodes: Vec<NodeId>,
    pub tags: HashMap<String, String>,
}

/// The segment between `nds[index]` and `nds[index + 1]` of a way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentRef {
    pub way: WayId,
    pub index: u32,
}

/// A fractional position along a segment. The offset is normalized to
/// `[0, 1]` and quantized on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MidSegmentRef {
    pub segment: SegmentRef,
    offset_q: u32,
}

impl MidSegmentRef {
    #[must_use]
    pub fn new(segment: SegmentRef, offset: f64) -> Self {
        let offset_q = (offset.clamp(0.0, 1.0) * OFFSET_SCALE).round() as u32;
        Self { segment, offset_q }
    }

    #[must_use]
    pub fn offset(&self) -> f64 {
        f64::from(self.offset_q) / OFFSET_SCALE
    }
}

/// Immutable index over the retained street network.
#[derive(Debug, Clone)]
pub struct StreetNetwork {
    nodes: HashMap<NodeId, StreetNode>,
    ways: HashMap<WayId, Way>,
    /// Every `(way, position)` pair referencing a node.
    node_refs: HashMap<NodeId, Vec<(WayId, usize)>>,
    /// Per way, the sorted node positions at which a turn is possible.
    vertex_nodes: HashMap<WayId, Vec<usize>>,
}

impl StreetNetwork {
    /// Read a network from an OSM pbf file in two passes: first the
    /// qualifying ways, then coordinates for exactly the nodes those
    /// ways reference.
    pub fn from_pbf(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let mut ways: Vec<Way> = Vec::new();
        ElementReader::from_path(path)?.for_each(|element| {
            if let Element::Way(way) = element {
                let tags: HashMap<String, String> = way
                    .tags()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect();
                if !retain_way(&tags) {
                    return;
                }
                ways.push(Way {
                    id: way.id(),
                    nodes: way.refs().collect(),
                    tags,
                });
            }
        })?;

        let wanted: HashSet<NodeId> = ways.iter().flat_map(|way| way.nodes.iter().copied()).collect();

        let mut nodes: Vec<StreetNode> = Vec::with_capacity(wanted.len());
        let mut push_node = |id: NodeId, lon: f64, lat: f64| {
            if wanted.contains(&id) {
                nodes.push(StreetNode {
                    id,
                    point: Point::new(lon, lat),
                    elevation: None,
                });
            }
        };
        ElementReader::from_path(path)?.for_each(|element| match element {
            Element::Node(node) => push_node(node.id(), node.lon(), node.lat()),
            Element::DenseNode(node) => push_node(node.id(), node.lon(), node.lat()),
            Element::Way(_) | Element::Relation(_) => {}
        })?;

        Self::from_parts(nodes, ways)
    }

    /// Build the topology indices from already-collected nodes and ways.
    /// Ways without a usable highway tag or with fewer than two nodes
    /// are dropped; a way node with no coordinate is fatal.
    pub fn from_parts(nodes: Vec<StreetNode>, ways: Vec<Way>) -> Result<Self, Error> {
        let node_map: HashMap<NodeId, StreetNode> =
            nodes.into_iter().map(|node| (node.id, node)).collect();

        let mut retained: Vec<Way> = Vec::with_capacity(ways.len());
        let mut dropped = 0usize;
        for way in ways {
            if !retain_way(&way.tags) {
                dropped += 1;
                continue;
            }
            if way.nodes.len() < 2 {
                debug!(way = way.id, "skipping way with fewer than 2 nodes");
                continue;
            }
            retained.push(way);
        }
        if dropped > 0 {
            debug!(dropped, "ways without a routable highway tag dropped");
        }
        // Deterministic reference order regardless of input order.
        retained.sort_by_key(|way| way.id);

        let mut node_refs: HashMap<NodeId, Vec<(WayId, usize)>> = HashMap::new();
        for way in &retained {
            for (position, node_id) in way.nodes.iter().enumerate() {
                if !node_map.contains_key(node_id) {
                    return Err(Error::MalformedOsm(format!(
                        "way {} references unknown node {node_id}",
                        way.id
                    )));
                }
                node_refs.entry(*node_id).or_default().push((way.id, position));
            }
        }

        let mut vertex_nodes = HashMap::with_capacity(retained.len());
        for way in &retained {
            let last = way.nodes.len() - 1;
            let indices: Vec<usize> = way
                .nodes
                .iter()
                .enumerate()
                .filter(|(position, node_id)| {
                    *position == 0 || *position == last || node_refs[*node_id].len() > 1
                })
                .map(|(position, _)| position)
                .collect();
            vertex_nodes.insert(way.id, indices);
        }

        let ways: HashMap<WayId, Way> = retained.into_iter().map(|way| (way.id, way)).collect();
        info!(
            nodes = node_map.len(),
            ways = ways.len(),
            "street network indexed"
        );

        Ok(Self {
            nodes: node_map,
            ways,
            node_refs,
            vertex_nodes,
        })
    }

    pub fn node(&self, id: NodeId) -> Result<&StreetNode, Error> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("street node {id}")))
    }

    pub fn way(&self, id: WayId) -> Result<&Way, Error> {
        self.ways
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("way {id}")))
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn way_count(&self) -> usize {
        self.ways.len()
    }

    /// Every `(way, position)` pair referencing a node, in ascending
    /// way/position order.
    pub fn node_refs(&self, id: NodeId) -> Result<&[(WayId, usize)], Error> {
        self.node_refs
            .get(&id)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::NotFound(format!("street node {id}")))
    }

    /// Sorted node positions of a way at which a turn is possible.
    pub fn vertex_nodes(&self, way: WayId) -> Result<&[usize], Error> {
        self.vertex_nodes
            .get(&way)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::NotFound(format!("way {way}")))
    }

    /// Nearest vertex-node position at or after `index` (forward) or at
    /// or before it (reverse).
    pub fn next_vertex_index(
        &self,
        way_id: WayId,
        index: usize,
        forward: bool,
    ) -> Result<usize, Error> {
        let way = self.way(way_id)?;
        if index >= way.nodes.len() {
            return Err(Error::OutOfRange(format!(
                "node index {index} on way {way_id} with {} nodes",
                way.nodes.len()
            )));
        }

        let vertex_nodes = self.vertex_nodes(way_id)?;
        if forward {
            let at = vertex_nodes.partition_point(|&position| position < index);
            vertex_nodes.get(at).copied().ok_or_else(|| {
                Error::OutOfRange(format!("no vertex node at or after {index} on way {way_id}"))
            })
        } else {
            let after = vertex_nodes.partition_point(|&position| position <= index);
            if after == 0 {
                return Err(Error::OutOfRange(format!(
                    "no vertex node at or before {index} on way {way_id}"
                )));
            }
            Ok(vertex_nodes[after - 1])
        }
    }

    /// Whether a way may only be traversed in node order.
    pub fn is_oneway(&self, way: WayId) -> Result<bool, Error> {
        let way = self.way(way)?;
        Ok(way
            .tags
            .get("oneway")
            .is_some_and(|value| matches!(value.as_str(), "yes" | "true" | "1")))
    }

    /// Coordinate of the node at `index` of a way.
    pub fn way_point(&self, way_id: WayId, index: usize) -> Result<Point, Error> {
        let way = self.way(way_id)?;
        let node_id = way.nodes.get(index).ok_or_else(|| {
            Error::OutOfRange(format!(
                "node index {index} on way {way_id} with {} nodes",
                way.nodes.len()
            ))
        })?;
        Ok(self.node(*node_id)?.point)
    }

    /// Endpoints of a segment; the index must lie in `[0, nodes - 2]`.
    pub fn segment_endpoints(&self, segment: &SegmentRef) -> Result<(Point, Point), Error> {
        let way = self.way(segment.way)?;
        let index = segment.index as usize;
        if index + 1 >= way.nodes.len() {
            return Err(Error::OutOfRange(format!(
                "segment index {index} on way {} with {} nodes",
                segment.way,
                way.nodes.len()
            )));
        }
        Ok((
            self.node(way.nodes[index])?.point,
            self.node(way.nodes[index + 1])?.point,
        ))
    }

    /// Coordinate of a fractional position along a segment.
    pub fn point_on(&self, mid: &MidSegmentRef) -> Result<Point, Error> {
        let (start, end) = self.segment_endpoints(&mid.segment)?;
        let t = mid.offset();
        Ok(Point::new(
            start.x() + (end.x() - start.x()) * t,
            start.y() + (end.y() - start.y()) * t,
        ))
    }

    /// All segments with their endpoint coordinates.
    pub fn segments(&self) -> impl Iterator<Item = (SegmentRef, Point, Point)> + '_ {
        self.ways.values().flat_map(move |way| {
            way.nodes.windows(2).enumerate().filter_map(move |(index, pair)| {
                let start = self.nodes.get(&pair[0])?.point;
                let end = self.nodes.get(&pair[1])?.point;
                Some((
                    SegmentRef {
                        way: way.id,
                        index: index as u32,
                    },
                    start,
                    end,
                ))
            })
        })
    }

    /// Sample an elevation for every node. Non-finite samples (outside
    /// the raster) leave the node without an elevation.
    pub fn attach_elevation(&mut self, sampler: &ElevationSampler) -> Result<(), Error> {
        for node in self.nodes.values_mut() {
            let value = sampler.sample(node.point.x(), node.point.y())?;
            node.elevation = value.is_finite().then_some(value);
        }
        Ok(())
    }
}

fn retain_way(tags: &HashMap<String, String>) -> bool {
    match tags.get("highway") {
        Some(class) => class != "motorway" && class != "motorway_link",
        None => false,
    }
}

/// Geodesic distance between two points, in meters.
pub(crate) fn geodesic_meters(a: Point, b: Point) -> f64 {
    Haversine::distance(a, b)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn node(id: NodeId, lon: f64, lat: f64) -> StreetNode {
        StreetNode {
            id,
            point: Point::new(lon, lat),
            elevation: None,
        }
    }

    pub(crate) fn highway(id: WayId, nodes: &[NodeId]) -> Way {
        tagged_way(id, nodes, &[("highway", "residential")])
    }

    pub(crate) fn tagged_way(id: WayId, nodes: &[NodeId], tags: &[(&str, &str)]) -> Way {
        Way {
            id,
            nodes: nodes.to_vec(),
            tags: tags
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    /// Way 1 runs 1-2-3-4; way 2 runs 10-3-11 and crosses it at node 3.
    pub(crate) fn crossing_network() -> StreetNetwork {
        StreetNetwork::from_parts(
            vec![
                node(1, 0.000, 0.0),
                node(2, 0.001, 0.0),
                node(3, 0.002, 0.0),
                node(4, 0.003, 0.0),
                node(10, 0.002, 0.001),
                node(11, 0.002, -0.001),
            ],
            vec![highway(1, &[1, 2, 3, 4]), highway(2, &[10, 3, 11])],
        )
        .unwrap()
    }

    #[test]
    fn vertex_nodes_are_terminals_and_shared_positions() {
        let network = crossing_network();
        assert_eq!(network.vertex_nodes(1).unwrap(), &[0, 2, 3]);
        assert_eq!(network.vertex_nodes(2).unwrap(), &[0, 1, 2]);
    }

    #[test]
    fn next_vertex_index_is_inclusive_in_both_directions() {
        let network = crossing_network();

        assert_eq!(network.next_vertex_index(1, 1, true).unwrap(), 2);
        assert_eq!(network.next_vertex_index(1, 2, true).unwrap(), 2);
        assert_eq!(network.next_vertex_index(1, 3, true).unwrap(), 3);
        assert_eq!(network.next_vertex_index(1, 1, false).unwrap(), 0);
        assert_eq!(network.next_vertex_index(1, 2, false).unwrap(), 2);

        assert!(matches!(
            network.next_vertex_index(1, 4, true),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn node_refs_collect_every_position() {
        let network = crossing_network();
        assert_eq!(network.node_refs(3).unwrap(), &[(1, 2), (2, 1)]);
        assert_eq!(network.node_refs(1).unwrap(), &[(1, 0)]);
        assert!(network.node_refs(99).is_err());
    }

    #[test]
    fn oneway_tag_values() {
        let nodes = vec![node(1, 0.0, 0.0), node(2, 0.001, 0.0)];
        for (value, expected) in [
            ("yes", true),
            ("true", true),
            ("1", true),
            ("no", false),
            ("-1", false),
        ] {
            let network = StreetNetwork::from_parts(
                nodes.clone(),
                vec![tagged_way(7, &[1, 2], &[("highway", "residential"), ("oneway", value)])],
            )
            .unwrap();
            assert_eq!(network.is_oneway(7).unwrap(), expected, "oneway={value}");
        }

        let untagged =
            StreetNetwork::from_parts(nodes, vec![highway(7, &[1, 2])]).unwrap();
        assert!(!untagged.is_oneway(7).unwrap());
    }

    #[test]
    fn unroutable_ways_are_dropped() {
        let network = StreetNetwork::from_parts(
            vec![node(1, 0.0, 0.0), node(2, 0.001, 0.0)],
            vec![
                highway(1, &[1, 2]),
                tagged_way(2, &[1, 2], &[("highway", "motorway")]),
                tagged_way(3, &[1, 2], &[("highway", "motorway_link")]),
                tagged_way(4, &[1, 2], &[("waterway", "river")]),
                highway(5, &[1]),
            ],
        )
        .unwrap();

        assert_eq!(network.way_count(), 1);
        assert!(network.way(1).is_ok());
    }

    #[test]
    fn missing_node_reference_is_fatal() {
        let err = StreetNetwork::from_parts(
            vec![node(1, 0.0, 0.0)],
            vec![highway(1, &[1, 2])],
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedOsm(_)));
    }

    #[test]
    fn segment_geometry_is_interpolated() {
        let network = crossing_network();
        let segment = SegmentRef { way: 1, index: 1 };
        let mid = MidSegmentRef::new(segment, 0.5);

        let point = network.point_on(&mid).unwrap();
        assert!((point.x() - 0.0015).abs() < 1e-9);
        assert!((point.y() - 0.0).abs() < 1e-9);

        assert!(matches!(
            network.segment_endpoints(&SegmentRef { way: 1, index: 3 }),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(network.way_point(1, 9), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn offsets_are_quantized_for_identity() {
        let segment = SegmentRef { way: 1, index: 0 };
        let a = MidSegmentRef::new(segment, 0.123_456_789);
        let b = MidSegmentRef::new(segment, 0.123_460_001);
        assert_eq!(a, b);
        assert!((a.offset() - 0.123_46).abs() < 1e-9);

        let clamped = MidSegmentRef::new(segment, 1.5);
        assert!((clamped.offset() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn segments_enumerate_consecutive_pairs() {
        let network = crossing_network();
        let mut refs: Vec<SegmentRef> = network.segments().map(|(segment, _, _)| segment).collect();
        refs.sort();
        assert_eq!(
            refs,
            vec![
                SegmentRef { way: 1, index: 0 },
                SegmentRef { way: 1, index: 1 },
                SegmentRef { way: 1, index: 2 },
                SegmentRef { way: 2, index: 0 },
                SegmentRef { way: 2, index: 1 },
            ]
        );
    }
}
