use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data::spot::Point;
use crate::error::{CoreError, Result};

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d*)?(?:[eE][-+]?\d+)?").unwrap());

/// Axis-aligned rectangle `(x_min, y_min, x_max, y_max)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Rect {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Rect { x_min, y_min, x_max, y_max }
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Text form used in the metadata table, e.g. `(0, 0, 1200, 800)`.
    pub fn to_text(&self) -> String {
        format!("({}, {}, {}, {})", self.x_min, self.y_min, self.x_max, self.y_max)
    }
}

impl FromStr for Rect {
    type Err = CoreError;

    /// Parse a tuple or list of four numbers, e.g. `(0, 0, 1200, 800)` or `[0.5, 1, 2, 3]`.
    fn from_str(s: &str) -> Result<Self> {
        let numbers = NUMBER
            .find_iter(s)
            .map(|m| m.as_str().parse::<f64>())
            .collect::<std::result::Result<Vec<f64>, _>>()
            .map_err(|_| CoreError::InvalidRect(s.to_string()))?;
        match numbers.as_slice() {
            [x_min, y_min, x_max, y_max] => Ok(Rect::new(*x_min, *y_min, *x_max, *y_max)),
            _ => Err(CoreError::InvalidRect(s.to_string())),
        }
    }
}

/// Placement of one MSI image: its pixel extent and the machine raster it covers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub image_file_name: String,
    pub pixel_rect: Rect,
    pub msi_rect: Rect,
}

impl ImageMetadata {
    pub fn new(image_file_name: &str, pixel_rect: Rect, msi_rect: Rect) -> Result<Self> {
        if pixel_rect.width() == 0.0 || pixel_rect.height() == 0.0 {
            return Err(CoreError::InvalidRect(pixel_rect.to_text()));
        }
        Ok(ImageMetadata {
            image_file_name: image_file_name.to_string(),
            pixel_rect,
            msi_rect,
        })
    }

    /// Build from the text rects stored in the metadata table.
    pub fn from_text(image_file_name: &str, pixel_rect: &str, msi_rect: &str) -> Result<Self> {
        ImageMetadata::new(image_file_name, pixel_rect.parse()?, msi_rect.parse()?)
    }

    /// Image pixel position to machine coordinates, each axis interpolated on its own.
    pub fn to_machine(&self, point: Point) -> Point {
        let px = &self.pixel_rect;
        let msi = &self.msi_rect;
        [
            (point[0] - px.x_min) / px.width() * msi.width() + msi.x_min,
            (point[1] - px.y_min) / px.height() * msi.height() + msi.y_min,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rect() {
        let rect: Rect = "(0, 10, 1200, 810.5)".parse().unwrap();
        assert_eq!(rect, Rect::new(0.0, 10.0, 1200.0, 810.5));
        assert_eq!(rect.to_text().parse::<Rect>().unwrap(), rect);
        assert!("(1, 2, 3)".parse::<Rect>().is_err());
        assert!("".parse::<Rect>().is_err());
    }

    #[test]
    fn test_to_machine() {
        let meta = ImageMetadata::from_text("img.tif", "(0, 0, 100, 50)", "(200, 1000, 300, 1100)").unwrap();
        assert_eq!(meta.to_machine([0.0, 0.0]), [200.0, 1000.0]);
        assert_eq!(meta.to_machine([100.0, 50.0]), [300.0, 1100.0]);
        assert_eq!(meta.to_machine([50.0, 25.0]), [250.0, 1050.0]);
    }

    #[test]
    fn test_empty_pixel_rect() {
        let err = ImageMetadata::from_text("img.tif", "(5, 0, 5, 50)", "(0, 0, 1, 1)").unwrap_err();
        assert!(matches!(err, CoreError::InvalidRect(_)));
    }
}
