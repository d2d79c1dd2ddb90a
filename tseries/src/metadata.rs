use geo::geometry::{Coord, Point};

pub const SOURCE_CRS: &str = "Source CRS";
pub const PROJECTED_X: &str = "Projected X";
pub const PROJECTED_Y: &str = "Projected Y";
pub const LATITUDE: &str = "Latitude";
pub const LONGITUDE: &str = "Longitude";
pub const RASTER_ROW: &str = "Raster Row";
pub const RASTER_COL: &str = "Raster Col";

/// Ordered `key,value` pairs from the `#` block preceding the data.
///
/// Lines without a value, such as a title, are kept with an empty
/// value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Parses one comment line with the leading `#` already removed.
    pub(crate) fn push_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match line.split_once(',') {
            Some((key, value)) => self.push(key.trim(), value.trim().trim_matches('"')),
            None => self.push(line, ""),
        }
    }

    /// First value stored under `key`, ignoring ASCII case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source_crs(&self) -> Option<&str> {
        self.get(SOURCE_CRS)
    }

    /// Pixel location in WGS84 (`x` is longitude).
    pub fn location(&self) -> Option<Point<f64>> {
        let lat = self.get_parsed(LATITUDE)?;
        let lon = self.get_parsed(LONGITUDE)?;
        Some(Point::new(lon, lat))
    }

    /// Pixel location in the source CRS.
    pub fn projected(&self) -> Option<Coord<f64>> {
        Some(Coord {
            x: self.get_parsed(PROJECTED_X)?,
            y: self.get_parsed(PROJECTED_Y)?,
        })
    }

    /// `(row, col)` of the pixel in the source raster.
    pub fn raster_cell(&self) -> Option<(usize, usize)> {
        Some((self.get_parsed(RASTER_ROW)?, self.get_parsed(RASTER_COL)?))
    }
}
