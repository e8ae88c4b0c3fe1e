use msicore::data::rect::ImageMetadata;
use msicore::data::spot::{extract_spot_name, Point};
use rusqlite::types::Type;
use rusqlite::{Connection, Result};

use crate::data::utility::parse_number_list;

/// One row of the `metadata` table, as written by the metadata crawler.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow {
    pub spec_id: i64,
    pub spec_file_name: String,
    pub msi_img_file_name: String,
    pub px_rect: String,
    pub msi_rect: String,
    /// comma-joined spot labels of every spectrum in the file
    pub spot_name: String,
    /// text list with one TIC value per spot
    pub tic: String,
    pub maxpeak: Option<f64>,
    pub rt: Option<f64>,
}

/// The fields of a `metadata` row the spot transformer needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumMeta {
    pub spec_id: i64,
    pub msi_img_file_name: String,
    pub spot_name: String,
}

/// Spot names with their transformed coordinates, in spot order.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotCoordinates {
    pub spot_names: Vec<String>,
    /// reference image pixels
    pub xray: Vec<Point>,
    /// `(depth, lateral)`
    pub linescan: Vec<Point>,
}

/// First and last spot name of a comma-joined label string.
pub fn spot_range_of(label: &str) -> Option<(String, String)> {
    let tokens: Vec<&str> = label.split(',').collect();
    let first = extract_spot_name(tokens.first()?)?;
    let last = extract_spot_name(tokens.last()?)?;
    Some((first, last))
}

// Read spec id, image name and spot labels of all spectra
pub fn read_spectrum_meta(conn: &Connection) -> Result<Vec<SpectrumMeta>> {
    let mut stmt = conn.prepare("SELECT spec_id, msi_img_file_name, spot_name FROM metadata ORDER BY spec_id")?;
    let rows: Result<Vec<SpectrumMeta>> = stmt
        .query_map([], |row| {
            Ok(SpectrumMeta {
                spec_id: row.get(0)?,
                msi_img_file_name: row.get(1)?,
                spot_name: row.get(2)?,
            })
        })?
        .collect();
    rows
}

// Read the pixel and machine rectangles of every MSI image, first row per image wins
pub fn read_image_metadata(conn: &Connection) -> Result<Vec<ImageMetadata>> {
    let mut stmt = conn.prepare("SELECT msi_img_file_name, px_rect, msi_rect FROM metadata ORDER BY spec_id")?;
    let rows: Result<Vec<ImageMetadata>> = stmt
        .query_map([], |row| {
            let name: String = row.get(0)?;
            let px_rect: String = row.get(1)?;
            let msi_rect: String = row.get(2)?;
            ImageMetadata::from_text(&name, &px_rect, &msi_rect)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))
        })?
        .collect();

    let mut images: Vec<ImageMetadata> = Vec::new();
    for image in rows? {
        if !images.iter().any(|i| i.image_file_name == image.image_file_name) {
            images.push(image);
        }
    }
    Ok(images)
}

// Read the TIC list of a spectrum file, None when the column is absent or unreadable
pub fn read_tic(conn: &Connection, spec_file_name: &str) -> Result<Option<Vec<f64>>> {
    let mut stmt = match conn.prepare("SELECT TIC FROM metadata WHERE spec_file_name = ?1") {
        Ok(stmt) => stmt,
        // no TIC column in this database
        Err(rusqlite::Error::SqliteFailure(_, _)) => return Ok(None),
        Err(e) => return Err(e),
    };
    let values: Vec<Option<String>> = stmt
        .query_map([spec_file_name], |row| row.get(0))?
        .collect::<Result<_>>()?;
    Ok(values
        .into_iter()
        .next()
        .flatten()
        .and_then(|text| parse_number_list(&text)))
}
