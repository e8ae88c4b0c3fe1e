use std::path::Path;

use log::{debug, warn};
use msicore::data::age_model::AgeModel;
use msicore::data::frame::{Column, MeasurementFrame};
use msicore::data::spot::extract_spot_name;

use crate::config::ExtractionConfig;
use crate::data::handle::MsiDataHandle;
use crate::data::meta::SpotCoordinates;
use crate::error::{DataError, Result};

pub const SPOT_COLUMN: &str = "spot_name";
pub const DEPTH_COLUMN: &str = "d";
pub const TIC_COLUMN: &str = "TIC";
const SNR_PREFIX: &str = "snr_";

/// Produces the per-spot measurement table of one exported source.
pub trait SpectrumExtractor {
    fn extract(&self, path: &Path, settings: &ExtractionConfig) -> Result<MeasurementFrame>;
}

/// Reads spectra that were already reduced to one row per spot.
///
/// The CSV holds a `spot_name` column and numeric columns such as `int_<compound>`.
/// Intensities below the minimum intensity become missing, as do intensities whose
/// `snr_<compound>` column is below the minimum SNR. SNR columns are not kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExtractor;

impl SpectrumExtractor for CsvExtractor {
    fn extract(&self, path: &Path, settings: &ExtractionConfig) -> Result<MeasurementFrame> {
        let mut frame = read_numeric_csv(path, SPOT_COLUMN)?;
        apply_intensity_floor(&mut frame, settings)?;
        Ok(frame)
    }
}

fn parse_cell(path: &Path, column: &str, cell: &str) -> Result<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    cell.parse::<f64>().map(Some).map_err(|_| DataError::InvalidValue {
        path: path.to_path_buf(),
        column: column.to_string(),
        value: cell.to_string(),
    })
}

/// Read a CSV with a spot name column into a frame.
///
/// Spot names are reduced to their `R..X..Y..` part; rows without one are dropped.
pub fn read_numeric_csv(path: &Path, spot_column: &str) -> Result<MeasurementFrame> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let spot_index = headers
        .iter()
        .position(|h| h == spot_column)
        .ok_or_else(|| DataError::MissingColumn {
            path: path.to_path_buf(),
            column: spot_column.to_string(),
        })?;

    let mut spot_names = Vec::new();
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); headers.len()];
    let mut dropped = 0;
    for record in reader.records() {
        let record = record?;
        let Some(spot) = record.get(spot_index).and_then(extract_spot_name) else {
            dropped += 1;
            continue;
        };
        spot_names.push(spot);
        for (i, header) in headers.iter().enumerate() {
            if i != spot_index {
                values[i].push(parse_cell(path, header, record.get(i).unwrap_or(""))?);
            }
        }
    }
    if dropped > 0 {
        debug!("{}: {} rows without spot name dropped", path.display(), dropped);
    }

    let mut frame = MeasurementFrame::new(spot_names);
    for (i, header) in headers.iter().enumerate() {
        if i != spot_index {
            frame.push_column(Column::new(header, std::mem::take(&mut values[i])))?;
        }
    }
    Ok(frame)
}

fn apply_intensity_floor(frame: &mut MeasurementFrame, settings: &ExtractionConfig) -> Result<()> {
    let snr_columns: Vec<Column> = frame
        .columns()
        .iter()
        .filter(|c| c.name.starts_with(SNR_PREFIX))
        .cloned()
        .collect();

    for name in frame.intensity_columns() {
        let compound = name.strip_prefix("int_").unwrap_or(&name).to_string();
        let snr = snr_columns
            .iter()
            .find(|c| c.name[SNR_PREFIX.len()..] == compound)
            .map(|c| c.values.clone());
        if let Some(column) = frame.column_mut(&name) {
            for (i, value) in column.values.iter_mut().enumerate() {
                let weak = value.is_some_and(|v| v < settings.min_intensity);
                let noisy = snr
                    .as_ref()
                    .and_then(|s| s[i])
                    .is_some_and(|s| s < settings.min_snr);
                if weak || noisy {
                    *value = None;
                }
            }
        }
    }

    let kept: Vec<Column> = frame
        .columns()
        .iter()
        .filter(|c| !c.name.starts_with(SNR_PREFIX))
        .cloned()
        .collect();
    let mut filtered = MeasurementFrame::new(std::mem::take(&mut frame.spot_names));
    for column in kept {
        filtered.push_column(column)?;
    }
    *frame = filtered;
    Ok(())
}

/// Per-spot coordinate table: `px`, `py`, `d` and `TIC`.
///
/// A TIC list whose length differs from the spot count is ignored and the column
/// left missing.
pub fn coordinate_frame(coordinates: &SpotCoordinates, tic: Option<Vec<f64>>) -> Result<MeasurementFrame> {
    let n = coordinates.spot_names.len();
    let mut frame = MeasurementFrame::new(coordinates.spot_names.clone());
    let px: Vec<f64> = coordinates.xray.iter().map(|p| p[0]).collect();
    let py: Vec<f64> = coordinates.xray.iter().map(|p| p[1]).collect();
    let d: Vec<f64> = coordinates.linescan.iter().map(|p| p[0]).collect();
    frame.push_column(Column::from_values("px", &px))?;
    frame.push_column(Column::from_values("py", &py))?;
    frame.push_column(Column::from_values(DEPTH_COLUMN, &d))?;

    let tic = match tic {
        Some(values) if values.len() == n => values.into_iter().map(Some).collect(),
        Some(values) => {
            warn!("TIC list has {} values for {} spots, ignored", values.len(), n);
            vec![None; n]
        }
        None => vec![None; n],
    };
    frame.push_column(Column::new(TIC_COLUMN, tic))?;
    Ok(frame)
}

/// Join extracted measurements with the stored coordinates of their spectrum file.
pub fn join_coordinates(
    handle: &MsiDataHandle,
    spec_file_name: &str,
    measurements: &MeasurementFrame,
) -> Result<MeasurementFrame> {
    let coordinates = handle
        .coordinates_by_spec_file_name(spec_file_name)?
        .ok_or_else(|| DataError::MissingCoordinates(spec_file_name.to_string()))?;
    let tic = handle.tic_by_spec_file_name(spec_file_name)?;
    let joined = coordinate_frame(&coordinates, tic)?.inner_join(measurements)?;
    debug!(
        "{}: {} of {} measured spots have coordinates",
        spec_file_name,
        joined.len(),
        measurements.len()
    );
    Ok(joined)
}

/// Divide every `int_` column by the spot's TIC.
pub fn normalize_by_tic(frame: &mut MeasurementFrame) -> Result<()> {
    let tic = frame.values(TIC_COLUMN)?.to_vec();
    let names: Vec<String> = frame
        .column_names()
        .into_iter()
        .filter(|name| name.starts_with("int_"))
        .map(String::from)
        .collect();
    for name in names {
        if let Some(column) = frame.column_mut(&name) {
            for (value, t) in column.values.iter_mut().zip(&tic) {
                *value = match (*value, *t) {
                    (Some(v), Some(t)) => Some(v / t),
                    _ => None,
                };
            }
        }
    }
    Ok(())
}

/// Read a `depth,age` CSV into an age model.
pub fn read_age_model(path: &Path) -> Result<AgeModel> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let index = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| DataError::MissingColumn { path: path.to_path_buf(), column: name.to_string() })
    };
    let (depth_index, age_index) = (index("depth")?, index("age")?);

    let mut depths = Vec::new();
    let mut ages = Vec::new();
    for record in reader.records() {
        let record = record?;
        let depth = parse_cell(path, "depth", record.get(depth_index).unwrap_or(""))?;
        let age = parse_cell(path, "age", record.get(age_index).unwrap_or(""))?;
        if let (Some(depth), Some(age)) = (depth, age) {
            depths.push(depth);
            ages.push(age);
        }
    }
    Ok(AgeModel::new(depths, ages)?)
}
