/*!
# Gondola

**Gondola** is a library for time-dependent multimodal routing over a
combined bicycle/pedestrian and scheduled-transit network. A zipped GTFS
feed and an OSM street network are indexed once at startup; afterwards the
network is exposed as an *implicit* state-space graph whose edges are
generated on demand, so no product-of-time graph is ever materialized.
A shortest-path driver (Dijkstra or similar) supplies the frontier and
visited structures and walks the graph through [`graph::EdgeProvider`].

The vertex set is heterogeneous: free geographic points, positions on a
street segment, street junctions, transit platforms, and onboard states at
the instant of departure or arrival. Three providers generate the typed
transitions between them:

- [`transit::TransitEdges`]: boarding, riding, dwelling, alighting,
  backed by per-(stop-pattern, service) timetable matrices with
  logarithmic event lookup.
- [`walk::WalkEdges`]: pedestrian traversal of street geometry between
  junction nodes, one-way aware.
- [`connectors::ConnectorEdges`]: the fabric linking transit platforms
  to positions on nearby street segments.

# Example
```ignore
use gondola::prelude::*;

let feed = Feed::from_zip_path("files/city_gtfs.zip")?;
let streets = StreetNetwork::from_pbf("files/city_highways.osm.pbf")?;

let graph = RoutingGraph::from_parts(feed.clone(), streets, CostModel::default())?;

let origin = Vertex::on_earth(30.3202, 59.8759, departure_time)?;
for edge in graph.outgoing(&origin)? {
    println!("{:?} costs {}", edge.target, edge.weight);
}
```

## OSM pbf files with the street network can be prepared with [`osmium`](https://osmcode.org/osmium-tool/)

### clip data by boundary

```bash
osmium extract --polygon=/border.geojson /source_file.pbf -o /target_file.pbf
```

### extract highways only

```bash
osmium tags-filter -o highways.osm.pbf input.pbf w/highway
```
*/

use thiserror::Error;

pub mod calendar;
pub mod connectors;
pub mod elevation;
pub mod feed;
pub mod graph;
pub mod loaders;
pub mod prelude;
pub mod spatial;
pub mod streets;
pub mod timetable;
pub mod transit;
pub mod walk;

/// Pedestrian speed in meters per second.
pub const WALKING_SPEED: f64 = 1.2;
/// Cost multiplier applied to a second of walking, in utils per second.
/// One util is one second of in-vehicle travel time.
pub const WALKING_RELUCTANCE: f64 = 1.0;
/// Fixed cost of leaving a vehicle onto the platform, in utils.
pub const ALIGHTING_PENALTY: f64 = 60.0;
/// Radius of the nearest-segment search buffer, in planar degrees.
pub const SEARCH_RADIUS: f64 = 0.001;

/// Error type shared by every fallible operation in the crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed feed: {0}")]
    MalformedFeed(String),
    #[error("malformed street data: {0}")]
    MalformedOsm(String),
    #[error("out of range: {0}")]
    OutOfRange(String),
    #[error("{0} is not supported")]
    Unsupported(&'static str),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("elevation raster queried outside its open scope")]
    RasterClosed,
    #[error("no unambiguous local time for {0}")]
    LocalTime(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("pbf error: {0}")]
    Pbf(#[from] osmpbf::Error),
}
