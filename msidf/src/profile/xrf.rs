//! Depth profiles of XRF line-scan exports.
//!
//! An export is a CSV with a depth column `d`, one numeric column per element
//! and an optional boolean `mask` column. Each requested item is either a ratio
//! `A/B`, computed as the sum of `A` over the sum of `B` within a horizon, or a
//! single element `X`, computed as its mean.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{error, info, warn};
use msicore::algorithm::aggregation::{HorizonRow, Profile};
use msicore::algorithm::chunking::get_chunks;
use msicore::algorithm::expression::{BinaryOp, ColumnReduction, Expr};
use msicore::data::frame::{Column, MeasurementFrame};

use crate::config::ProfileConfig;
use crate::error::{DataError, Result};
use crate::profile::output::{all_path, indexed_path, write_xrf_csv};
use crate::profile::source::DEPTH_COLUMN;

pub const MASK_COLUMN: &str = "mask";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XrfItem {
    Ratio { numerator: String, denominator: String },
    Mean(String),
}

impl XrfItem {
    fn expr(&self) -> Expr {
        let column = |name: &str, reduction| Expr::Column { name: name.to_string(), reduction };
        match self {
            XrfItem::Ratio { numerator, denominator } => Expr::Binary {
                op: BinaryOp::Div,
                left: Box::new(column(numerator, ColumnReduction::Sum)),
                right: Box::new(column(denominator, ColumnReduction::Sum)),
            },
            XrfItem::Mean(name) => column(name, ColumnReduction::Mean),
        }
    }
}

impl FromStr for XrfItem {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once('/') {
            Some((a, b)) if !a.trim().is_empty() && !b.trim().is_empty() => Ok(XrfItem::Ratio {
                numerator: a.trim().to_string(),
                denominator: b.trim().to_string(),
            }),
            None if !s.is_empty() => Ok(XrfItem::Mean(s.to_string())),
            _ => Err(DataError::InvalidSetting(format!("invalid XRF item {:?}", s))),
        }
    }
}

impl fmt::Display for XrfItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XrfItem::Ratio { numerator, denominator } => write!(f, "{}/{}", numerator, denominator),
            XrfItem::Mean(name) => write!(f, "{}", name),
        }
    }
}

/// Parse `;`-separated items such as `Al/Ca;Ca/Ti;Fe;`, ignoring empty entries.
pub fn parse_items(text: &str) -> Result<Vec<XrfItem>> {
    text.split(';')
        .filter(|item| !item.trim().is_empty())
        .map(str::parse)
        .collect()
}

fn parse_mask(path: &Path, cell: &str) -> Result<bool> {
    match cell.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(DataError::InvalidValue {
            path: path.to_path_buf(),
            column: MASK_COLUMN.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Read an export, keeping complete rows that pass the mask, sorted by depth.
pub fn read_xrf_csv(path: &Path) -> Result<MeasurementFrame> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    if !headers.iter().any(|h| h == DEPTH_COLUMN) {
        return Err(DataError::MissingColumn { path: path.to_path_buf(), column: DEPTH_COLUMN.to_string() });
    }
    let mask_index = headers.iter().position(|h| h == MASK_COLUMN);

    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); headers.len()];
    let mut rows = 0;
    let mut incomplete = 0;
    for record in reader.records() {
        let record = record?;
        if record.iter().any(|cell| cell.trim().is_empty() || cell.trim().eq_ignore_ascii_case("nan")) {
            incomplete += 1;
            continue;
        }
        if let Some(i) = mask_index {
            if !parse_mask(path, &record[i])? {
                continue;
            }
        }
        for (i, (header, cell)) in headers.iter().zip(record.iter()).enumerate() {
            if Some(i) == mask_index {
                continue;
            }
            let value = cell.trim().parse::<f64>().map_err(|_| DataError::InvalidValue {
                path: path.to_path_buf(),
                column: header.to_string(),
                value: cell.to_string(),
            })?;
            values[i].push(Some(value));
        }
        rows += 1;
    }
    if incomplete > 0 {
        warn!("{}: {} incomplete rows dropped", path.display(), incomplete);
    }

    let mut frame = MeasurementFrame::new((0..rows).map(|i| i.to_string()).collect());
    for (i, header) in headers.iter().enumerate() {
        if Some(i) != mask_index {
            frame.push_column(Column::new(header, std::mem::take(&mut values[i])))?;
        }
    }
    Ok(frame.sort_by_column(DEPTH_COLUMN)?)
}

/// Chunk a sorted export and evaluate every item per horizon.
pub fn xrf_profile(frame: &MeasurementFrame, items: &[XrfItem], config: &ProfileConfig) -> Result<Profile> {
    let mut chunk_config = config.chunk_config()?;
    chunk_config.adaptive = None;

    let depth: Vec<f64> = frame.values(DEPTH_COLUMN)?.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    let horizons = get_chunks(&depth, &chunk_config)?;
    let exprs: Vec<Expr> = items.iter().map(XrfItem::expr).collect();

    let mut profile = Profile::new(items.iter().map(|i| i.to_string()).collect());
    for horizon in horizons {
        let data = frame.slice(horizon.start, horizon.end);
        let values = exprs
            .iter()
            .map(|e| e.evaluate(&data))
            .collect::<std::result::Result<Vec<f64>, _>>()?;
        profile.rows.push(HorizonRow {
            depth: ColumnReduction::Mean.apply(&data.valid(DEPTH_COLUMN)?),
            count: Some(horizon.len()),
            span: None,
            grown: false,
            values,
        });
    }
    Ok(profile)
}

#[derive(Debug, Default)]
pub struct XrfReport {
    pub written: Vec<PathBuf>,
    /// sources that do not exist
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, DataError)>,
}

/// Build and write the profile of every export.
///
/// With several sources each result gets an `_<index>` suffix and all profiles
/// are concatenated into `<output>_all.csv`. A failing source is reported and the
/// remaining ones still run.
pub fn run_xrf(sources: &[PathBuf], items: &[XrfItem], config: &ProfileConfig, output: &Path) -> Result<XrfReport> {
    if items.is_empty() {
        return Err(DataError::InvalidSetting("no XRF items given".to_string()));
    }
    let mut report = XrfReport::default();
    let mut profiles = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        if !source.exists() {
            warn!("{} does not exist, skipped", source.display());
            report.skipped.push(source.clone());
            continue;
        }
        let target = if sources.len() > 1 { indexed_path(output, index) } else { output.to_path_buf() };
        let result = read_xrf_csv(source)
            .and_then(|frame| xrf_profile(&frame, items, config))
            .and_then(|profile| write_xrf_csv(&target, std::slice::from_ref(&profile)).map(|_| profile));
        match result {
            Ok(profile) => {
                report.written.push(target);
                profiles.push(profile);
            }
            Err(e) => {
                error!("{}: {}", source.display(), e);
                report.failures.push((source.clone(), e));
            }
        }
    }

    if profiles.len() > 1 {
        let target = all_path(output);
        write_xrf_csv(&target, &profiles)?;
        report.written.push(target);
    }
    info!("{} XRF profiles written, {} failed", profiles.len(), report.failures.len());
    Ok(report)
}
