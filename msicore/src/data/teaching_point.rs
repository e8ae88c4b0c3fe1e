use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::data::rect::ImageMetadata;
use crate::data::spot::Point;
use crate::error::{CoreError, Result};

/// Converts canvas positions to core depth.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthScale {
    /// canvas x of the sediment start line
    pub sediment_start_x: f64,
    pub cm_per_pixel: f64,
}

impl DepthScale {
    pub fn new(sediment_start_x: f64, cm_per_pixel: f64) -> Self {
        DepthScale { sediment_start_x, cm_per_pixel }
    }

    /// Depth in cm of a canvas x position.
    pub fn depth_at(&self, canvas_x: f64) -> f64 {
        (self.sediment_start_x - canvas_x).abs() * self.cm_per_pixel
    }
}

/// cm per canvas pixel from exactly two vertical scale lines and their real distance.
///
/// # Arguments
///
/// * `line_positions` - canvas x of the scale lines
/// * `real_distance_cm` - distance between the two lines on the ruler
///
pub fn cm_per_pixel_from_scale_lines(line_positions: &[f64], real_distance_cm: f64) -> Result<f64> {
    let [a, b] = line_positions else {
        return Err(CoreError::InvalidScale(format!(
            "two scale lines are needed, got {}",
            line_positions.len()
        )));
    };
    let pixel_distance = (b - a).abs();
    if pixel_distance == 0.0 {
        return Err(CoreError::InvalidScale("scale lines coincide".to_string()));
    }
    Ok(real_distance_cm / pixel_distance)
}

/// A user-marked correspondence point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeachingPoint {
    pub id: u64,
    /// position on the shared canvas
    pub canvas: Point,
    /// position in the image's native pixel space
    pub local: Point,
    /// machine raster coordinates, MSI images only
    #[serde(default)]
    pub machine: Option<Point>,
    #[serde(default)]
    pub depth: Option<f64>,
    #[serde(default)]
    pub label: Option<i64>,
}

impl TeachingPoint {
    pub fn new(id: u64, canvas: Point, local: Point) -> Self {
        TeachingPoint { id, canvas, local, machine: None, depth: None, label: None }
    }

    /// Coordinates used as fit source on an MSI image.
    pub fn machine_or_local(&self) -> Point {
        self.machine.unwrap_or(self.local)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    /// X-ray or other reference photograph
    Reference,
    Msi,
    /// XRF element scan, teaching points stay in image pixels
    Xrf,
}

/// An image the operator placed teaching points on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeachableImage {
    pub name: String,
    pub kind: ImageKind,
    #[serde(default)]
    pub points: Vec<TeachingPoint>,
}

impl TeachableImage {
    pub fn new(name: &str, kind: ImageKind) -> Self {
        TeachableImage { name: name.to_string(), kind, points: Vec::new() }
    }

    pub fn point(&self, id: u64) -> Option<&TeachingPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    /// Labelled points keyed by label; the last point wins on duplicate labels.
    pub fn label_indexed(&self) -> BTreeMap<i64, &TeachingPoint> {
        self.points
            .iter()
            .filter_map(|p| p.label.map(|label| (label, p)))
            .collect()
    }

    /// Depth of a point, `MissingDepth` if it has none.
    pub fn depth_of(&self, point: &TeachingPoint) -> Result<f64> {
        point.depth.ok_or_else(|| CoreError::MissingDepth { image: self.name.clone(), point: point.id })
    }

    /// Mean depth over all points; every point must carry a depth.
    pub fn mean_depth(&self) -> Result<f64> {
        if self.points.is_empty() {
            return Err(CoreError::InsufficientPoints { required: 1, found: 0 });
        }
        let mut total = 0.0;
        for point in &self.points {
            total += self.depth_of(point)?;
        }
        Ok(total / self.points.len() as f64)
    }

    /// Fill in machine coordinates of every point from the image placement.
    pub fn convert_to_machine(&mut self, metadata: &ImageMetadata) {
        for point in self.points.iter_mut() {
            point.machine = Some(metadata.to_machine(point.local));
        }
        debug!("converted {} teaching points of {} to machine coordinates", self.points.len(), self.name);
    }
}

/// All teachable images of a workspace, plus the optional depth scale.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TeachingPointSet {
    pub images: Vec<TeachableImage>,
    #[serde(default)]
    pub depth_scale: Option<DepthScale>,
}

impl TeachingPointSet {
    pub fn new() -> Self {
        TeachingPointSet::default()
    }

    pub fn image(&self, name: &str) -> Option<&TeachableImage> {
        self.images.iter().find(|i| i.name == name)
    }

    pub fn image_mut(&mut self, name: &str) -> Option<&mut TeachableImage> {
        self.images.iter_mut().find(|i| i.name == name)
    }

    pub fn add_image(&mut self, name: &str, kind: ImageKind) -> &mut TeachableImage {
        if let Some(index) = self.images.iter().position(|i| i.name == name) {
            return &mut self.images[index];
        }
        self.images.push(TeachableImage::new(name, kind));
        let last = self.images.len() - 1;
        &mut self.images[last]
    }

    /// First reference image, the target of pairing.
    pub fn reference_image(&self) -> Option<&TeachableImage> {
        self.images.iter().find(|i| i.kind == ImageKind::Reference)
    }

    /// MSI and XRF images, the images pairing fits maps for.
    pub fn aligned_images(&self) -> impl Iterator<Item = &TeachableImage> {
        self.images.iter().filter(|i| i.kind != ImageKind::Reference)
    }

    fn next_id(&self) -> u64 {
        self.images
            .iter()
            .flat_map(|i| i.points.iter())
            .map(|p| p.id + 1)
            .max()
            .unwrap_or(0)
    }

    /// Add a point to an image and return its id. Depth is set when a scale is known.
    pub fn add_point(&mut self, image: &str, canvas: Point, local: Point) -> Result<u64> {
        let id = self.next_id();
        let depth = self.depth_scale.map(|scale| scale.depth_at(canvas[0]));
        let target = self
            .image_mut(image)
            .ok_or_else(|| CoreError::UnknownImage(image.to_string()))?;
        let mut point = TeachingPoint::new(id, canvas, local);
        point.depth = depth;
        target.points.push(point);
        Ok(id)
    }

    fn point_mut(&mut self, id: u64) -> Result<&mut TeachingPoint> {
        self.images
            .iter_mut()
            .flat_map(|i| i.points.iter_mut())
            .find(|p| p.id == id)
            .ok_or(CoreError::UnknownPoint(id))
    }

    pub fn point(&self, id: u64) -> Option<&TeachingPoint> {
        self.images.iter().find_map(|i| i.point(id))
    }

    /// Move a point on the canvas; its id, local position and depth stay.
    pub fn move_point(&mut self, id: u64, canvas: Point) -> Result<()> {
        self.point_mut(id)?.canvas = canvas;
        Ok(())
    }

    /// Shift every point of an image, as when the image is dragged on the canvas.
    pub fn translate_image(&mut self, image: &str, offset: Point) -> Result<()> {
        let target = self
            .image_mut(image)
            .ok_or_else(|| CoreError::UnknownImage(image.to_string()))?;
        for point in target.points.iter_mut() {
            point.canvas = [point.canvas[0] + offset[0], point.canvas[1] + offset[1]];
        }
        Ok(())
    }

    pub fn set_label(&mut self, id: u64, label: Option<i64>) -> Result<()> {
        self.point_mut(id)?.label = label;
        Ok(())
    }

    pub fn remove_point(&mut self, id: u64) -> Result<TeachingPoint> {
        for image in self.images.iter_mut() {
            if let Some(index) = image.points.iter().position(|p| p.id == id) {
                return Ok(image.points.remove(index));
            }
        }
        Err(CoreError::UnknownPoint(id))
    }

    /// Overwrite the depth of every point from its canvas x, returns the number of points.
    pub fn recompute_depths(&mut self, scale: DepthScale) -> usize {
        self.depth_scale = Some(scale);
        let mut count = 0;
        for point in self.images.iter_mut().flat_map(|i| i.points.iter_mut()) {
            point.depth = Some(scale.depth_at(point.canvas[0]));
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::rect::Rect;

    fn set() -> TeachingPointSet {
        let mut set = TeachingPointSet::new();
        set.add_image("xray", ImageKind::Reference);
        set.add_image("msi_1", ImageKind::Msi);
        set
    }

    #[test]
    fn test_ids_are_stable_across_moves() {
        let mut set = set();
        let a = set.add_point("xray", [10.0, 20.0], [1.0, 2.0]).unwrap();
        let b = set.add_point("msi_1", [30.0, 40.0], [3.0, 4.0]).unwrap();
        assert_ne!(a, b);
        set.move_point(a, [11.0, 21.0]).unwrap();
        set.translate_image("msi_1", [5.0, 5.0]).unwrap();
        assert_eq!(set.point(a).unwrap().canvas, [11.0, 21.0]);
        assert_eq!(set.point(b).unwrap().canvas, [35.0, 45.0]);
        assert_eq!(set.point(b).unwrap().local, [3.0, 4.0]);
        assert!(set.move_point(99, [0.0, 0.0]).is_err());
    }

    #[test]
    fn test_depth_from_scale() {
        let mut set = set();
        set.depth_scale = Some(DepthScale::new(100.0, 0.01));
        let id = set.add_point("xray", [350.0, 0.0], [0.0, 0.0]).unwrap();
        assert!((set.point(id).unwrap().depth.unwrap() - 2.5).abs() < 1e-12);

        let count = set.recompute_depths(DepthScale::new(50.0, 0.1));
        assert_eq!(count, 1);
        assert!((set.point(id).unwrap().depth.unwrap() - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_cm_per_pixel() {
        assert_eq!(cm_per_pixel_from_scale_lines(&[300.0, 100.0], 2.0).unwrap(), 0.01);
        assert!(cm_per_pixel_from_scale_lines(&[100.0], 2.0).is_err());
        assert!(cm_per_pixel_from_scale_lines(&[1.0, 2.0, 3.0], 2.0).is_err());
        assert!(cm_per_pixel_from_scale_lines(&[5.0, 5.0], 2.0).is_err());
    }

    #[test]
    fn test_mean_depth_requires_depths() {
        let mut image = TeachableImage::new("msi_1", ImageKind::Msi);
        let mut point = TeachingPoint::new(0, [0.0, 0.0], [0.0, 0.0]);
        point.depth = Some(1.0);
        image.points.push(point);
        image.points.push(TeachingPoint::new(1, [0.0, 0.0], [0.0, 0.0]));
        assert_eq!(
            image.mean_depth().unwrap_err(),
            CoreError::MissingDepth { image: "msi_1".to_string(), point: 1 }
        );
    }

    #[test]
    fn test_convert_to_machine() {
        let mut image = TeachableImage::new("msi_1", ImageKind::Msi);
        image.points.push(TeachingPoint::new(0, [0.0, 0.0], [50.0, 25.0]));
        let meta = ImageMetadata::new(
            "msi_1",
            Rect::new(0.0, 0.0, 100.0, 50.0),
            Rect::new(200.0, 1000.0, 300.0, 1100.0),
        )
        .unwrap();
        image.convert_to_machine(&meta);
        assert_eq!(image.points[0].machine_or_local(), [250.0, 1050.0]);
    }

    #[test]
    fn test_label_index() {
        let mut set = set();
        let a = set.add_point("xray", [0.0, 0.0], [0.0, 0.0]).unwrap();
        set.add_point("xray", [1.0, 0.0], [1.0, 0.0]).unwrap();
        set.set_label(a, Some(7)).unwrap();
        let index = set.image("xray").unwrap().label_indexed();
        assert_eq!(index.len(), 1);
        assert_eq!(index[&7].id, a);
    }

    #[test]
    fn test_json_document() {
        let text = r#"{
            "images": [
                { "name": "xray", "kind": "reference",
                  "points": [{ "id": 4, "canvas": [1, 2], "local": [3, 4], "depth": 0.5, "label": 1 }] },
                { "name": "msi_1", "kind": "msi" }
            ],
            "depth_scale": { "sediment_start_x": 10.0, "cm_per_pixel": 0.01 }
        }"#;
        let set: TeachingPointSet = serde_json::from_str(text).unwrap();
        assert_eq!(set.images[1].kind, ImageKind::Msi);
        assert!(set.images[1].points.is_empty());
        let point = set.point(4).unwrap();
        assert_eq!((point.depth, point.label, point.machine), (Some(0.5), Some(1), None));
        assert_eq!(set.depth_scale, Some(DepthScale::new(10.0, 0.01)));

        let again: TeachingPointSet = serde_json::from_str(&serde_json::to_string(&set).unwrap()).unwrap();
        assert_eq!(again, set);
    }
}
