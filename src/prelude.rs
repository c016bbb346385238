//! Convenience re-exports for library consumers.

pub use crate::calendar::{CalendarException, CalendarRule, ExceptionKind, ServiceCalendar};
pub use crate::connectors::ConnectorEdges;
pub use crate::elevation::{ElevationSampler, RasterGrid};
pub use crate::feed::{Feed, Route, Stop, StopEvent, TripRecord, TripStopTime};
pub use crate::graph::{CostModel, Edge, EdgeProvider, RoutingGraph, Vertex};
pub use crate::spatial::SegmentIndex;
pub use crate::streets::{MidSegmentRef, SegmentRef, StreetNetwork, StreetNode, Way};
pub use crate::timetable::{PatternId, ServiceId, Timetable};
pub use crate::transit::TransitEdges;
pub use crate::walk::WalkEdges;
pub use crate::Error;
