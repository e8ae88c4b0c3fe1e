use log::{debug, info, warn};
use msicore::alignment::registry::TransformationRegistry;
use msicore::data::spot::parse_spot_coordinates;

use crate::data::handle::MsiDataHandle;
use crate::error::Result;

/// What a spot transformation run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    /// rows written to the `transformation` table
    pub rows: usize,
    /// rows that received transformed arrays
    pub transformed: usize,
    /// `(spec_id, image)` of rows whose image has no registry entry
    pub skipped: Vec<(i64, String)>,
}

/// Applies a transformation registry to the machine spot coordinates in the store.
///
/// # Description
///
/// The `transformation` table is derived data: each run drops and rebuilds it from
/// `metadata`, so the same registry and metadata always produce the same bytes.
///
pub struct SpotTransformer<'a> {
    registry: &'a TransformationRegistry,
}

impl<'a> SpotTransformer<'a> {
    pub fn new(registry: &'a TransformationRegistry) -> Self {
        SpotTransformer { registry }
    }

    pub fn run(&self, handle: &mut MsiDataHandle) -> Result<TransformReport> {
        handle.rebuild_transformation_table()?;

        let spectra = handle.read_spectra()?;
        let raw: Vec<(i64, String, Vec<[i64; 2]>)> = spectra
            .into_iter()
            .map(|s| {
                let spots = parse_spot_coordinates(&s.spot_name);
                (s.spec_id, s.msi_img_file_name, spots)
            })
            .collect();
        handle.insert_spot_arrays(&raw)?;
        debug!("stored raw spot arrays of {} spectra", raw.len());

        let mut report = TransformReport { rows: raw.len(), ..Default::default() };
        let mut updates = Vec::new();
        for row in handle.read_transformations()? {
            let Some(entry) = self.registry.get(&row.msi_img_file_name) else {
                warn!("no transformation for image {}, spec_id {} skipped", row.msi_img_file_name, row.spec_id);
                report.skipped.push((row.spec_id, row.msi_img_file_name));
                continue;
            };
            let xray = entry.to_reference_pixels.transform_spots(&row.spot_array)?;
            let linescan = entry.to_depth_lateral.transform_spots(&row.spot_array)?;
            updates.push((row.spec_id, xray, linescan));
        }
        handle.update_transformed_arrays(&updates)?;
        report.transformed = updates.len();

        info!(
            "transformed {} of {} spectra, {} skipped",
            report.transformed,
            report.rows,
            report.skipped.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::meta::MetadataRow;
    use msicore::alignment::registry::RegistryEntry;

    fn handle() -> MsiDataHandle {
        let handle = MsiDataHandle::in_memory().unwrap();
        handle.create_metadata_table().unwrap();
        for (spec_id, image) in [(1, "msi one.tif"), (2, "msi_two.tif")] {
            handle
                .insert_metadata(&MetadataRow {
                    spec_id,
                    spec_file_name: format!("slide_{}.d", spec_id),
                    msi_img_file_name: image.to_string(),
                    px_rect: "(0, 0, 10, 10)".to_string(),
                    msi_rect: "(0, 0, 10, 10)".to_string(),
                    spot_name: "R1X10Y20,R1X15Y20,R1X10Y25".to_string(),
                    tic: "[1, 1, 1]".to_string(),
                    maxpeak: None,
                    rt: None,
                })
                .unwrap();
        }
        handle
    }

    #[test]
    fn test_identity_registry() {
        let mut handle = handle();
        let mut registry = TransformationRegistry::new();
        registry.insert("msi_one.tif", RegistryEntry::identity());

        let report = SpotTransformer::new(&registry).run(&mut handle).unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.transformed, 1);
        assert_eq!(report.skipped, vec![(2, "msi_two.tif".to_string())]);

        let rows = handle.read_transformations().unwrap();
        assert_eq!(rows[0].spot_array, vec![[10, 20], [15, 20], [10, 25]]);
        assert_eq!(rows[0].xray_array, Some(vec![[10.0, 20.0], [15.0, 20.0], [10.0, 25.0]]));
        assert_eq!(rows[1].xray_array, None);
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let mut handle = handle();
        let mut registry = TransformationRegistry::new();
        registry.insert("msi one.tif", RegistryEntry::identity());
        registry.insert("msi_two.tif", RegistryEntry::identity());

        let transformer = SpotTransformer::new(&registry);
        transformer.run(&mut handle).unwrap();
        let first = (handle.read_raw_blobs(1).unwrap(), handle.read_raw_blobs(2).unwrap());
        transformer.run(&mut handle).unwrap();
        let second = (handle.read_raw_blobs(1).unwrap(), handle.read_raw_blobs(2).unwrap());
        assert_eq!(first, second);
        assert_eq!(handle.read_transformations().unwrap().len(), 2);
    }
}
