use std::fs;
use std::path::Path;

use log::{debug, info};
use msicore::alignment::pairing::{pair_by_geometry, pair_by_labels, PairingReport};
use msicore::data::teaching_point::{ImageKind, TeachingPointSet};
use msicore::error::CoreError;

use crate::data::handle::MsiDataHandle;
use crate::error::Result;
use crate::transform::spots::{SpotTransformer, TransformReport};

/// How teaching points are put in correspondence.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingMode {
    /// depth-sorted groups of three, ordered clockwise
    Geometry,
    /// explicit `(label, label)` records
    Labels(Vec<(i64, i64)>),
}

#[derive(Debug, Default)]
pub struct AlignReport {
    /// MSI images whose points were converted to machine coordinates
    pub converted: Vec<String>,
    pub pairing: PairingReport,
    pub transform: TransformReport,
}

/// Read a teaching point set from its JSON document.
pub fn load_teaching_points(path: &Path) -> Result<TeachingPointSet> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

pub fn save_teaching_points(path: &Path, set: &TeachingPointSet) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(set)?)?;
    Ok(())
}

/// Convert the teaching points of every MSI image to machine coordinates using the
/// rectangles stored in `metadata`.
///
/// Images without stored rectangles are left alone when all their points already
/// carry machine coordinates, otherwise the image is reported as unknown.
pub fn convert_msi_points(handle: &MsiDataHandle, set: &mut TeachingPointSet) -> Result<Vec<String>> {
    let images = handle.read_image_metadata()?;
    let mut converted = Vec::new();
    for image in set.images.iter_mut().filter(|i| i.kind == ImageKind::Msi) {
        match images.iter().find(|m| m.image_file_name == image.name) {
            Some(metadata) => {
                image.convert_to_machine(metadata);
                converted.push(image.name.clone());
            }
            None if image.points.iter().all(|p| p.machine.is_some()) => {
                debug!("{} has no stored rectangles, keeping given machine coordinates", image.name);
            }
            None => return Err(CoreError::UnknownImage(image.name.clone()).into()),
        }
    }
    Ok(converted)
}

/// Fit the maps of every MSI and XRF image.
pub fn pair(set: &TeachingPointSet, mode: &PairingMode) -> Result<PairingReport> {
    let pairing = match mode {
        PairingMode::Geometry => pair_by_geometry(set)?,
        PairingMode::Labels(pairs) => pair_by_labels(set, pairs)?,
    };
    info!("{} images paired, {} failed", pairing.registry.len(), pairing.failures.len());
    Ok(pairing)
}

/// Write every teaching point as an `img;x;y;d` record, positions in image pixels.
pub fn export_teaching_points(path: &Path, set: &TeachingPointSet) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new().delimiter(b';').from_path(path)?;
    writer.write_record(["img", "x", "y", "d"])?;
    let mut count = 0;
    for image in &set.images {
        for point in &image.points {
            writer.write_record([
                image.name.clone(),
                point.local[0].to_string(),
                point.local[1].to_string(),
                point.depth.map(|d| d.to_string()).unwrap_or_default(),
            ])?;
            count += 1;
        }
    }
    writer.flush()?;
    info!("exported {} teaching points to {}", count, path.display());
    Ok(count)
}

/// Machine conversion, pairing and spot transformation in one pass.
///
/// The `transformation` table is always rebuilt, so images without a registry
/// entry lose coordinates from earlier runs. Images that failed label pairing are
/// listed in the report.
pub fn align(handle: &mut MsiDataHandle, set: &mut TeachingPointSet, mode: &PairingMode) -> Result<AlignReport> {
    let converted = convert_msi_points(handle, set)?;
    let pairing = pair(set, mode)?;

    let transform = SpotTransformer::new(&pairing.registry).run(handle)?;

    Ok(AlignReport { converted, pairing, transform })
}
