/*!
Raster-backed elevation sampling.

The raster arrives as an in-memory single-band grid with a GDAL-style
geotransform (decoding the file itself is a collaborator's job). A query
inverse-transforms a lon/lat to fractional raster coordinates and
bilinearly interpolates the surrounding 2x2 neighborhood; anything
outside the grid samples as NaN.

Sampling is only allowed inside a [`ElevationSampler::with_open`] scope.
The scope mirrors the open/close lifecycle of the backing dataset: the
raster is acquired on entry, released on exit, and a query against a
closed sampler is a usage error.
*/

use std::cell::Cell;

use crate::Error;

/// A single-band raster grid, row-major, with a six-element
/// geotransform: `x = t[0] + col*t[1] + row*t[2]`,
/// `y = t[3] + col*t[4] + row*t[5]`.
#[derive(Debug, Clone)]
pub struct RasterGrid {
    width: usize,
    height: usize,
    transform: [f64; 6],
    values: Vec<f64>,
}

impl RasterGrid {
    pub fn new(
        width: usize,
        height: usize,
        transform: [f64; 6],
        values: Vec<f64>,
    ) -> Result<Self, Error> {
        if width < 2 || height < 2 {
            return Err(Error::OutOfRange(format!(
                "raster must be at least 2x2, got {width}x{height}"
            )));
        }
        if values.len() != width * height {
            return Err(Error::OutOfRange(format!(
                "raster holds {} values for a {width}x{height} grid",
                values.len()
            )));
        }
        let det = transform[1] * transform[5] - transform[2] * transform[4];
        if det == 0.0 {
            return Err(Error::OutOfRange(
                "raster geotransform is not invertible".to_string(),
            ));
        }
        Ok(Self {
            width,
            height,
            transform,
            values,
        })
    }

    /// Fractional `(row, col)` for a geographic coordinate.
    fn invert(&self, x: f64, y: f64) -> (f64, f64) {
        let [x0, col_dx, row_dx, y0, col_dy, row_dy] = self.transform;
        let det = col_dx * row_dy - row_dx * col_dy;
        let col = ((x - x0) * row_dy - (y - y0) * row_dx) / det;
        let row = ((y - y0) * col_dx - (x - x0) * col_dy) / det;
        (row, col)
    }

    fn sample(&self, lon: f64, lat: f64) -> f64 {
        let (row, col) = self.invert(lon, lat);
        if row < 0.0
            || col < 0.0
            || row > (self.height - 1) as f64
            || col > (self.width - 1) as f64
        {
            return f64::NAN;
        }

        // Clamp so a query on the last row or column still has a full
        // 2x2 neighborhood.
        let r = (row.floor() as usize).min(self.height - 2);
        let c = (col.floor() as usize).min(self.width - 2);
        let ty = row - r as f64;
        let tx = col - c as f64;

        let at = |r: usize, c: usize| self.values[r * self.width + c];
        at(r, c) * (1.0 - tx) * (1.0 - ty)
            + at(r, c + 1) * tx * (1.0 - ty)
            + at(r + 1, c) * (1.0 - tx) * ty
            + at(r + 1, c + 1) * tx * ty
    }
}

/// Scope-guarded access to a [`RasterGrid`].
#[derive(Debug)]
pub struct ElevationSampler {
    grid: RasterGrid,
    open: Cell<bool>,
}

impl ElevationSampler {
    #[must_use]
    pub fn new(grid: RasterGrid) -> Self {
        Self {
            grid,
            open: Cell::new(false),
        }
    }

    /// Run `body` with the raster open. The raster is closed again when
    /// the scope exits, whether or not `body` succeeded.
    pub fn with_open<T>(
        &self,
        body: impl FnOnce(&Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.open.set(true);
        let _guard = CloseOnExit(&self.open);
        body(self)
    }

    /// Sample the elevation at a coordinate. Outside the raster the
    /// value is NaN; outside an open scope the call fails.
    pub fn sample(&self, lon: f64, lat: f64) -> Result<f64, Error> {
        if !self.open.get() {
            return Err(Error::RasterClosed);
        }
        Ok(self.grid.sample(lon, lat))
    }
}

struct CloseOnExit<'a>(&'a Cell<bool>);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
