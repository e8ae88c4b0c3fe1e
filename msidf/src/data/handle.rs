use std::path::Path;

use log::{debug, info};
use msicore::data::rect::ImageMetadata;
use msicore::data::spot::{parse_spot_names, Point};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::data::meta::{
    read_image_metadata, read_spectrum_meta, read_tic, spot_range_of, MetadataRow,
    SpectrumMeta, SpotCoordinates,
};
use crate::data::utility::{blob_to_f64_pairs, blob_to_i64_pairs, f64_pairs_to_blob, i64_pairs_to_blob};

/// Raw and transformed spot coordinates of one spectrum file.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformationRow {
    pub spec_id: i64,
    pub msi_img_file_name: String,
    pub spot_array: Vec<[i64; 2]>,
    pub xray_array: Option<Vec<Point>>,
    pub linescan_array: Option<Vec<Point>>,
}

/// Handle on the project SQLite store holding `metadata` and `transformation`.
#[derive(Debug)]
pub struct MsiDataHandle {
    pub connection: Connection,
}

fn blob_error(column: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Blob, Box::new(e))
}

impl MsiDataHandle {
    pub fn new(path: &Path) -> rusqlite::Result<Self> {
        let connection = Connection::open(path)?;
        Ok(Self { connection })
    }

    pub fn in_memory() -> rusqlite::Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self { connection })
    }

    /// Create the `metadata` table if it does not exist.
    pub fn create_metadata_table(&self) -> rusqlite::Result<()> {
        self.connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (
                spec_id INTEGER PRIMARY KEY,
                spec_file_name TEXT,
                msi_img_file_name TEXT,
                px_rect TEXT,
                msi_rect TEXT,
                spot_name TEXT,
                TIC TEXT,
                maxpeak REAL,
                rt REAL
            )",
        )
    }

    pub fn insert_metadata(&self, row: &MetadataRow) -> rusqlite::Result<()> {
        self.connection.execute(
            "INSERT INTO metadata (spec_id, spec_file_name, msi_img_file_name, px_rect, msi_rect, spot_name, TIC, maxpeak, rt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.spec_id,
                row.spec_file_name,
                row.msi_img_file_name,
                row.px_rect,
                row.msi_rect,
                row.spot_name,
                row.tic,
                row.maxpeak,
                row.rt
            ],
        )?;
        Ok(())
    }

    pub fn read_spectra(&self) -> rusqlite::Result<Vec<SpectrumMeta>> {
        read_spectrum_meta(&self.connection)
    }

    pub fn read_image_metadata(&self) -> rusqlite::Result<Vec<ImageMetadata>> {
        read_image_metadata(&self.connection)
    }

    pub fn image_metadata(&self, image_file_name: &str) -> rusqlite::Result<Option<ImageMetadata>> {
        Ok(self
            .read_image_metadata()?
            .into_iter()
            .find(|m| m.image_file_name == image_file_name))
    }

    pub fn column_exists(&self, table: &str, column: &str) -> rusqlite::Result<bool> {
        let mut stmt = self.connection.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(columns.iter().any(|c| c == column))
    }

    /// Add a column if missing; returns whether it was added.
    pub fn ensure_column(&self, table: &str, column: &str, column_type: &str) -> rusqlite::Result<bool> {
        if self.column_exists(table, column)? {
            return Ok(false);
        }
        self.connection
            .execute(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_type), [])?;
        debug!("added column {}.{}", table, column);
        Ok(true)
    }

    /// Drop and recreate the `transformation` table, one commit.
    pub fn rebuild_transformation_table(&mut self) -> rusqlite::Result<()> {
        let tx = self.connection.transaction()?;
        tx.execute_batch(
            "DROP TABLE IF EXISTS transformation;
             CREATE TABLE transformation (
                spec_id INTEGER,
                msi_img_file_name TEXT,
                spot_array BLOB,
                xray_array BLOB,
                linescan_array BLOB,
                FOREIGN KEY(spec_id) REFERENCES metadata(spec_id)
             );",
        )?;
        tx.commit()
    }

    /// Insert raw machine spot arrays, one commit.
    pub fn insert_spot_arrays(&mut self, rows: &[(i64, String, Vec<[i64; 2]>)]) -> rusqlite::Result<()> {
        let tx = self.connection.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO transformation (spec_id, msi_img_file_name, spot_array) VALUES (?1, ?2, ?3)",
            )?;
            for (spec_id, image, spots) in rows {
                stmt.execute(params![spec_id, image, i64_pairs_to_blob(spots)])?;
            }
        }
        tx.commit()
    }

    /// Write both transformed arrays per spec id, one commit.
    pub fn update_transformed_arrays(&mut self, rows: &[(i64, Vec<Point>, Vec<Point>)]) -> rusqlite::Result<()> {
        let tx = self.connection.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE transformation SET xray_array = ?1, linescan_array = ?2 WHERE spec_id = ?3",
            )?;
            for (spec_id, xray, linescan) in rows {
                stmt.execute(params![f64_pairs_to_blob(xray), f64_pairs_to_blob(linescan), spec_id])?;
            }
        }
        tx.commit()
    }

    pub fn read_transformations(&self) -> rusqlite::Result<Vec<TransformationRow>> {
        let mut stmt = self.connection.prepare(
            "SELECT spec_id, msi_img_file_name, spot_array, xray_array, linescan_array
             FROM transformation ORDER BY spec_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let spot_blob: Vec<u8> = row.get(2)?;
            let xray_blob: Option<Vec<u8>> = row.get(3)?;
            let linescan_blob: Option<Vec<u8>> = row.get(4)?;

            let spot_array = blob_to_i64_pairs(&spot_blob).map_err(|e| blob_error(2, e))?;
            let xray_array = match xray_blob {
                Some(blob) => Some(blob_to_f64_pairs(&blob).map_err(|e| blob_error(3, e))?),
                None => None,
            };
            let linescan_array = match linescan_blob {
                Some(blob) => Some(blob_to_f64_pairs(&blob).map_err(|e| blob_error(4, e))?),
                None => None,
            };

            Ok(TransformationRow {
                spec_id: row.get(0)?,
                msi_img_file_name: row.get(1)?,
                spot_array,
                xray_array,
                linescan_array,
            })
        })?;
        let mut transformations = Vec::new();
        for row in rows {
            transformations.push(row?);
        }
        Ok(transformations)
    }

    /// Raw stored blobs of a spec id, for byte-level comparison.
    pub fn read_raw_blobs(&self, spec_id: i64) -> rusqlite::Result<Option<(Vec<u8>, Option<Vec<u8>>, Option<Vec<u8>>)>> {
        self.connection
            .query_row(
                "SELECT spot_array, xray_array, linescan_array FROM transformation WHERE spec_id = ?1",
                [spec_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
    }

    pub fn spec_ids_by_file_name(&self, spec_file_name: &str) -> rusqlite::Result<Vec<i64>> {
        let mut stmt = self.connection.prepare("SELECT spec_id FROM metadata WHERE spec_file_name = ?1")?;
        let ids = stmt
            .query_map([spec_file_name], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Spectrum file names stored under an export alias; empty if the alias column is absent.
    pub fn spec_file_names_by_export_name(&self, export_name: &str) -> rusqlite::Result<Vec<String>> {
        if !self.column_exists("metadata", "export_da_name")? {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .connection
            .prepare("SELECT spec_file_name FROM metadata WHERE export_da_name = ?1")?;
        let names = stmt
            .query_map([export_name], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn set_export_name(&self, spec_file_name: &str, export_name: &str) -> rusqlite::Result<()> {
        self.ensure_column("metadata", "export_da_name", "TEXT")?;
        self.connection.execute(
            "UPDATE metadata SET export_da_name = ?1 WHERE spec_file_name = ?2",
            params![export_name, spec_file_name],
        )?;
        info!("stored {} as alias of {}", export_name, spec_file_name);
        Ok(())
    }

    /// Create and fill `first_spot_number` and `last_spot_number` when either is missing.
    pub fn ensure_spot_range_columns(&mut self) -> rusqlite::Result<()> {
        let added_first = self.ensure_column("metadata", "first_spot_number", "TEXT")?;
        let added_last = self.ensure_column("metadata", "last_spot_number", "TEXT")?;
        if !added_first && !added_last {
            return Ok(());
        }

        let spectra = self.read_spectra()?;
        let tx = self.connection.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE metadata SET first_spot_number = ?1, last_spot_number = ?2 WHERE spec_id = ?3",
            )?;
            for spectrum in &spectra {
                let (first, last) = match spot_range_of(&spectrum.spot_name) {
                    Some((first, last)) => (Some(first), Some(last)),
                    None => (None, None),
                };
                stmt.execute(params![first, last, spectrum.spec_id])?;
            }
        }
        tx.commit()?;
        debug!("filled spot ranges of {} spectra", spectra.len());
        Ok(())
    }

    pub fn spec_file_name_by_spot_range(&self, first: &str, last: &str) -> rusqlite::Result<Option<String>> {
        self.connection
            .query_row(
                "SELECT spec_file_name FROM metadata WHERE first_spot_number = ?1 AND last_spot_number = ?2",
                [first, last],
                |row| row.get(0),
            )
            .optional()
    }

    /// Spot names and transformed coordinates of a spectrum file.
    ///
    /// `None` if the file has no transformation row or it was never transformed.
    pub fn coordinates_by_spec_file_name(&self, spec_file_name: &str) -> rusqlite::Result<Option<SpotCoordinates>> {
        let row: Option<(String, Option<Vec<u8>>, Option<Vec<u8>>)> = self
            .connection
            .query_row(
                "SELECT metadata.spot_name, transformation.xray_array, transformation.linescan_array
                 FROM metadata
                 INNER JOIN transformation ON metadata.spec_id = transformation.spec_id
                 WHERE metadata.spec_file_name = ?1",
                [spec_file_name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((spot_name, Some(xray_blob), Some(linescan_blob))) = row else {
            return Ok(None);
        };
        let xray = blob_to_f64_pairs(&xray_blob).map_err(|e| blob_error(1, e))?;
        let linescan = blob_to_f64_pairs(&linescan_blob).map_err(|e| blob_error(2, e))?;
        Ok(Some(SpotCoordinates {
            spot_names: parse_spot_names(&spot_name),
            xray,
            linescan,
        }))
    }

    pub fn tic_by_spec_file_name(&self, spec_file_name: &str) -> rusqlite::Result<Option<Vec<f64>>> {
        read_tic(&self.connection, spec_file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> MsiDataHandle {
        let handle = MsiDataHandle::in_memory().unwrap();
        handle.create_metadata_table().unwrap();
        handle
            .insert_metadata(&MetadataRow {
                spec_id: 1,
                spec_file_name: "slide_a.d".to_string(),
                msi_img_file_name: "slide a.tif".to_string(),
                px_rect: "(0, 0, 100, 50)".to_string(),
                msi_rect: "(200, 1000, 300, 1100)".to_string(),
                spot_name: "a_R00X1Y2,a_R00X3Y4".to_string(),
                tic: "[10.0, 20.0]".to_string(),
                maxpeak: None,
                rt: None,
            })
            .unwrap();
        handle
    }

    #[test]
    fn test_transformation_round_trip() {
        let mut handle = handle();
        handle.rebuild_transformation_table().unwrap();
        handle
            .insert_spot_arrays(&[(1, "slide a.tif".to_string(), vec![[1, 2], [3, 4]])])
            .unwrap();
        let rows = handle.read_transformations().unwrap();
        assert_eq!(rows[0].spot_array, vec![[1, 2], [3, 4]]);
        assert!(rows[0].xray_array.is_none());
        assert!(handle.coordinates_by_spec_file_name("slide_a.d").unwrap().is_none());

        handle
            .update_transformed_arrays(&[(1, vec![[1.0, 2.0], [3.0, 4.0]], vec![[0.5, 2.0], [0.7, 4.0]])])
            .unwrap();
        let coords = handle.coordinates_by_spec_file_name("slide_a.d").unwrap().unwrap();
        assert_eq!(coords.spot_names, vec!["R00X1Y2", "R00X3Y4"]);
        assert_eq!(coords.linescan[1], [0.7, 4.0]);
    }

    #[test]
    fn test_spot_range_columns() {
        let mut handle = handle();
        assert!(!handle.column_exists("metadata", "first_spot_number").unwrap());
        handle.ensure_spot_range_columns().unwrap();
        assert_eq!(
            handle.spec_file_name_by_spot_range("R00X1Y2", "R00X3Y4").unwrap(),
            Some("slide_a.d".to_string())
        );
        assert_eq!(handle.spec_file_name_by_spot_range("R00X1Y2", "R00X9Y9").unwrap(), None);
    }

    #[test]
    fn test_export_alias() {
        let handle = handle();
        assert!(handle.spec_file_names_by_export_name("export.csv").unwrap().is_empty());
        handle.set_export_name("slide_a.d", "export.csv").unwrap();
        assert_eq!(handle.spec_file_names_by_export_name("export.csv").unwrap(), vec!["slide_a.d"]);
    }

    #[test]
    fn test_metadata_readers() {
        let handle = handle();
        assert_eq!(handle.tic_by_spec_file_name("slide_a.d").unwrap(), Some(vec![10.0, 20.0]));
        assert_eq!(handle.tic_by_spec_file_name("other.d").unwrap(), None);
        let meta = handle.image_metadata("slide a.tif").unwrap().unwrap();
        assert_eq!(meta.to_machine([50.0, 25.0]), [250.0, 1050.0]);
        assert_eq!(handle.spec_ids_by_file_name("slide_a.d").unwrap(), vec![1]);
    }
}
