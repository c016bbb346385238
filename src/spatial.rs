//! Spatial index over street segments.
//!
//! Every consecutive node pair of every way goes into an R-tree as a
//! 2-D line keyed by its [`SegmentRef`]. Nearest-segment queries buffer
//! the query point by a radius in planar degrees, collect the candidate
//! segments whose envelopes intersect the buffer, and pick the one with
//! the smallest planar distance.

use geo::Point;
use rstar::primitives::{GeomWithData, Line};
use rstar::{PointDistance, RTree, AABB};
use tracing::info;

use crate::streets::{MidSegmentRef, SegmentRef, StreetNetwork};
use crate::Error;

type IndexedSegment = GeomWithData<Line<[f64; 2]>, SegmentRef>;

/// Read-only R-tree over the street network's segments.
#[derive(Debug)]
pub struct SegmentIndex {
    tree: RTree<IndexedSegment>,
}

impl SegmentIndex {
    #[must_use]
    pub fn build(streets: &StreetNetwork) -> Self {
        let segments: Vec<IndexedSegment> = streets
            .segments()
            .map(|(segment, start, end)| {
                GeomWithData::new(
                    Line::new([start.x(), start.y()], [end.x(), end.y()]),
                    segment,
                )
            })
            .collect();
        info!(segments = segments.len(), "segment index built");
        Self {
            tree: RTree::bulk_load(segments),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// The closest segment within `radius` degrees of `point`, as a
    /// fractional position. `None` when nothing lies inside the buffer.
    pub fn nearest_segment(
        &self,
        point: Point,
        radius: f64,
    ) -> Result<Option<MidSegmentRef>, Error> {
        check_coordinate(point.x(), point.y())?;

        let query = [point.x(), point.y()];
        let envelope = AABB::from_corners(
            [point.x() - radius, point.y() - radius],
            [point.x() + radius, point.y() + radius],
        );

        let mut best: Option<(f64, &IndexedSegment)> = None;
        for candidate in self.tree.locate_in_envelope_intersecting(&envelope) {
            let distance = candidate.distance_2(&query);
            let better = match best {
                None => true,
                // Ties resolve to the lowest segment ref so results do
                // not depend on tree order.
                Some((best_distance, best_segment)) => {
                    distance < best_distance
                        || (distance == best_distance && candidate.data < best_segment.data)
                }
            };
            if better {
                best = Some((distance, candidate));
            }
        }

        Ok(best.map(|(_, segment)| {
            MidSegmentRef::new(segment.data, line_offset(segment.geom(), query))
        }))
    }
}

/// Normalized position of the projection of `point` onto `line`,
/// clamped to the segment.
fn line_offset(line: &Line<[f64; 2]>, point: [f64; 2]) -> f64 {
    let dx = line.to[0] - line.from[0];
    let dy = line.to[1] - line.from[1];
    let length_2 = dx * dx + dy * dy;
    if length_2 == 0.0 {
        return 0.0;
    }
    let t = ((point[0] - line.from[0]) * dx + (point[1] - line.from[1]) * dy) / length_2;
    t.clamp(0.0, 1.0)
}

pub(crate) fn check_coordinate(lon: f64, lat: f64) -> Result<(), Error> {
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(Error::OutOfRange(format!("coordinate ({lon}, {lat})")));
    }
    Ok(())
}
