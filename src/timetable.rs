/*!
Timetable matrices and event lookup.

Trips that share the exact same stop sequence (a *stop pattern*) and the
same service are collapsed into one [`Timetable`]: two `R x C` matrices of
arrival and departure times, one row per trip and one column per stop.
Rows are sorted by first-stop departure and verified to never overtake one
another, so a "next departure at or after `t`" query is a single binary
search over one column.
*/

use crate::Error;

/// Dense identifier of a stop pattern.
pub type PatternId = u32;
/// Dense identifier of an interned `service_id`.
pub type ServiceId = u32;

/// Arrival/departure matrices for one `(pattern, service)` pair.
///
/// Times are seconds since midnight of the service date and may exceed
/// 86 400 for early-morning next-day events. The matrices are stored
/// column-major so the departure column of one stop is a contiguous
/// slice for binary search.
#[derive(Debug, Clone)]
pub struct Timetable {
    trip_ids: Vec<String>,
    stop_ids: Vec<String>,
    rows: usize,
    /// `arrivals[col * rows + row]`
    arrivals: Vec<u32>,
    /// `departures[col * rows + row]`
    departures: Vec<u32>,
}

impl Timetable {
    /// Build a timetable from one `(trip_id, [(arrival, departure); C])`
    /// row per trip. Rows are sorted by first-stop departure; the
    /// construction fails on any invariant violation:
    ///
    /// - `arrival <= departure` in every cell,
    /// - `departure[c] < arrival[c + 1]` along every trip,
    /// - no trip overtakes another at any column (FIFO).
    pub fn new(
        stop_ids: Vec<String>,
        mut trips: Vec<(String, Vec<(u32, u32)>)>,
    ) -> Result<Self, Error> {
        let cols = stop_ids.len();
        if cols == 0 {
            return Err(Error::MalformedFeed("empty stop pattern".to_string()));
        }

        for (trip_id, times) in &trips {
            if times.len() != cols {
                return Err(Error::MalformedFeed(format!(
                    "trip {trip_id} has {} stop times, pattern has {cols} stops",
                    times.len()
                )));
            }
        }

        trips.sort_by_key(|(_, times)| times[0].1);

        let rows = trips.len();
        let mut trip_ids = Vec::with_capacity(rows);
        let mut arrivals = vec![0u32; rows * cols];
        let mut departures = vec![0u32; rows * cols];

        for (row, (trip_id, times)) in trips.into_iter().enumerate() {
            for (col, (arrival, departure)) in times.into_iter().enumerate() {
                if arrival > departure {
                    return Err(Error::MalformedFeed(format!(
                        "trip {trip_id} arrives after it departs at stop {}",
                        stop_ids[col]
                    )));
                }
                arrivals[col * rows + row] = arrival;
                departures[col * rows + row] = departure;
            }
            trip_ids.push(trip_id);
        }

        let timetable = Self {
            trip_ids,
            stop_ids,
            rows,
            arrivals,
            departures,
        };
        timetable.verify_progression()?;
        timetable.verify_fifo()?;
        Ok(timetable)
    }

    /// `departure[c] < arrival[c + 1]` for every trip: hops take time.
    fn verify_progression(&self) -> Result<(), Error> {
        for row in 0..self.rows {
            for col in 0..self.cols().saturating_sub(1) {
                let departure = self.departures[col * self.rows + row];
                let next_arrival = self.arrivals[(col + 1) * self.rows + row];
                if departure >= next_arrival {
                    return Err(Error::MalformedFeed(format!(
                        "trip {} departs {} but arrives at the next stop {}",
                        self.trip_ids[row], departure, next_arrival
                    )));
                }
            }
        }
        Ok(())
    }

    /// No row overtakes its successor at any column. Adjacent-row checks
    /// suffice since the ordering is transitive.
    fn verify_fifo(&self) -> Result<(), Error> {
        for col in 0..self.cols() {
            let departures = self.departure_column(col);
            let arrivals = self.arrival_column(col);
            for row in 0..self.rows.saturating_sub(1) {
                if departures[row] > departures[row + 1] || arrivals[row] > arrivals[row + 1] {
                    return Err(Error::MalformedFeed(format!(
                        "trip {} overtakes trip {} at stop {}",
                        self.trip_ids[row + 1],
                        self.trip_ids[row],
                        self.stop_ids[col]
                    )));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.stop_ids.len()
    }

    #[must_use]
    pub fn stop_ids(&self) -> &[String] {
        &self.stop_ids
    }

    pub fn trip_id(&self, row: usize) -> Result<&str, Error> {
        self.trip_ids
            .get(row)
            .map(String::as_str)
            .ok_or_else(|| Error::OutOfRange(format!("trip row {row} of {}", self.rows)))
    }

    pub fn stop_id(&self, col: usize) -> Result<&str, Error> {
        self.stop_ids
            .get(col)
            .map(String::as_str)
            .ok_or_else(|| Error::OutOfRange(format!("stop column {col} of {}", self.cols())))
    }

    pub fn arrival(&self, row: usize, col: usize) -> Result<u32, Error> {
        self.check_cell(row, col)?;
        Ok(self.arrivals[col * self.rows + row])
    }

    pub fn departure(&self, row: usize, col: usize) -> Result<u32, Error> {
        self.check_cell(row, col)?;
        Ok(self.departures[col * self.rows + row])
    }

    fn check_cell(&self, row: usize, col: usize) -> Result<(), Error> {
        if row >= self.rows || col >= self.cols() {
            return Err(Error::OutOfRange(format!(
                "cell ({row}, {col}) of a {}x{} timetable",
                self.rows,
                self.cols()
            )));
        }
        Ok(())
    }

    /// Latest departure anywhere in the matrix.
    #[must_use]
    pub fn max_departure(&self) -> u32 {
        self.departures.iter().copied().max().unwrap_or(0)
    }

    fn departure_column(&self, col: usize) -> &[u32] {
        &self.departures[col * self.rows..(col + 1) * self.rows]
    }

    fn arrival_column(&self, col: usize) -> &[u32] {
        &self.arrivals[col * self.rows..(col + 1) * self.rows]
    }

    /// First trip departing from column `col` at or after `query`.
    /// The terminal stop has no departures.
    #[must_use]
    pub fn next_departure(&self, col: usize, query: u32) -> Option<(usize, u32)> {
        if col + 1 >= self.cols() {
            return None;
        }

        let column = self.departure_column(col);
        let row = column.partition_point(|&departure| departure < query);
        (row < self.rows).then(|| (row, column[row]))
    }

    /// Last trip arriving at column `col` at or before `query`.
    /// The first stop has no arrivals.
    ///
    /// The search runs over the *departure* column: it is the sorted
    /// column shared with [`Self::next_departure`], and the FIFO ordering
    /// makes its answer valid for arrivals too.
    #[must_use]
    pub fn prev_arrival(&self, col: usize, query: u32) -> Option<(usize, u32)> {
        if col == 0 || col >= self.cols() {
            return None;
        }

        let column = self.departure_column(col);
        let after = column.partition_point(|&departure| departure <= query);
        if after == 0 {
            return None;
        }
        let row = after - 1;
        Some((row, self.arrival_column(col)[row]))
    }

    /// Events for one stop id against this timetable. A stop may appear
    /// in the pattern more than once (loops), so each matching column is
    /// looked up independently; results are `(row, col, seconds)`.
    #[must_use]
    pub fn events_at(
        &self,
        stop_id: &str,
        query: u32,
        find_departures: bool,
    ) -> Vec<(usize, usize, u32)> {
        let mut events = Vec::new();
        for (col, id) in self.stop_ids.iter().enumerate() {
            if id != stop_id {
                continue;
            }

            let event = if find_departures {
                self.next_departure(col, query)
            } else {
                self.prev_arrival(col, query)
            };
            if let Some((row, time)) = event {
                events.push((row, col, time));
            }
        }
        events
    }
}
