//! Depth coordinates for XRF element scans.
//!
//! A scan root holds one folder per scan. Each folder carries one `;`-separated
//! grid per element, named `<common prefix><element>.txt`, where row `i` and
//! column `j` are pixel `x = i`, `y = j`, plus the scan image the teaching points
//! were placed on. Preparing a folder melts its grids into one long table,
//! optionally masks it by a two-means split of one element, maps every pixel to
//! core depth with the image's fitted depth map and writes `transformed.csv`,
//! the input of the line-scan profile.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use msicore::alignment::registry::{normalize_image_name, RegistryEntry, TransformationRegistry};
use msicore::algorithm::threshold::two_means_mask;
use msicore::data::frame::{Column, MeasurementFrame};

use crate::error::{DataError, Result};
use crate::profile::output::write_columns_csv;
use crate::profile::source::DEPTH_COLUMN;
use crate::profile::xrf::MASK_COLUMN;

pub const TRANSFORMED_FILE_NAME: &str = "transformed.csv";
pub const GRID_EXTENSION: &str = "txt";

/// One element grid, rows of optional values.
type Grid = Vec<Vec<Option<f64>>>;

/// Read a `;`-separated grid without header. Trailing empty cells are dropped.
pub fn read_grid(path: &Path) -> Result<Grid> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut grid: Grid = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut cells: Vec<&str> = record.iter().map(str::trim).collect();
        while cells.last().is_some_and(|c| c.is_empty()) {
            cells.pop();
        }
        if cells.is_empty() {
            continue;
        }
        let row = cells
            .iter()
            .map(|cell| match *cell {
                "" => Ok(None),
                cell => cell.parse::<f64>().map(Some).map_err(|_| DataError::InvalidValue {
                    path: path.to_path_buf(),
                    column: format!("{}", grid.len()),
                    value: cell.to_string(),
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(first) = grid.first() {
            if first.len() != row.len() {
                return Err(DataError::InvalidGrid {
                    path: path.to_path_buf(),
                    reason: format!("row {} has {} cells, expected {}", grid.len(), row.len(), first.len()),
                });
            }
        }
        grid.push(row);
    }
    Ok(grid)
}

fn common_prefix<'a>(names: &[&'a str]) -> &'a str {
    let Some(first) = names.first() else {
        return "";
    };
    let mut end = first.len();
    for name in &names[1..] {
        end = first
            .char_indices()
            .zip(name.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map_or(0, |((i, a), _)| i + a.len_utf8())
            .min(end);
    }
    &first[..end]
}

/// Element name of each grid file: the file name without the folder's common
/// prefix and the extension. A lone grid is named by its file stem.
pub fn element_names(file_names: &[&str]) -> Vec<String> {
    let prefix = if file_names.len() > 1 { common_prefix(file_names) } else { "" };
    file_names
        .iter()
        .map(|name| {
            let name = &name[prefix.len()..];
            name.strip_suffix(&format!(".{}", GRID_EXTENSION)).unwrap_or(name).to_string()
        })
        .collect()
}

fn sorted_file_names(folder: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .collect();
    names.sort();
    Ok(names)
}

/// Melt every element grid of a folder into one table with `x`, `y` and one
/// column per element, ordered column by column of the grids.
///
/// Grids that cannot be read are skipped with a warning; the remaining grids must
/// share one shape.
pub fn read_element_folder(folder: &Path) -> Result<MeasurementFrame> {
    let file_names = sorted_file_names(folder)?;
    let grid_names: Vec<&str> = file_names
        .iter()
        .map(String::as_str)
        .filter(|name| Path::new(name).extension().is_some_and(|e| e == GRID_EXTENSION))
        .collect();
    let elements = element_names(&grid_names);

    let mut grids: Vec<(String, Grid)> = Vec::new();
    for (name, element) in grid_names.iter().zip(elements) {
        match read_grid(&folder.join(name)) {
            Ok(grid) => grids.push((element, grid)),
            Err(e) => warn!("{}: {}, skipped", folder.join(name).display(), e),
        }
    }
    let Some((_, first)) = grids.first() else {
        return Ok(MeasurementFrame::default());
    };
    let rows = first.len();
    let cols = first.first().map_or(0, Vec::len);
    for (element, grid) in &grids {
        if grid.len() != rows || grid.first().map_or(0, Vec::len) != cols {
            return Err(DataError::InvalidGrid {
                path: folder.to_path_buf(),
                reason: format!("grid {} differs in shape from {}x{}", element, rows, cols),
            });
        }
    }

    let n = rows * cols;
    let mut frame = MeasurementFrame::new((0..n).map(|i| i.to_string()).collect());
    let (xs, ys): (Vec<f64>, Vec<f64>) = (0..cols)
        .flat_map(|y| (0..rows).map(move |x| (x as f64, y as f64)))
        .unzip();
    frame.push_column(Column::from_values("x", &xs))?;
    frame.push_column(Column::from_values("y", &ys))?;
    for (element, grid) in &grids {
        let values = (0..cols).flat_map(|y| (0..rows).map(move |x| grid[x][y])).collect();
        frame.push_column(Column::new(element, values))?;
    }
    debug!("{}: {} elements on a {}x{} grid", folder.display(), grids.len(), rows, cols);
    Ok(frame)
}

/// Registry entry of the scan image found among the folder's files.
pub fn folder_entry<'r>(folder: &Path, registry: &'r TransformationRegistry) -> Result<Option<&'r RegistryEntry>> {
    let names: Vec<String> = sorted_file_names(folder)?.iter().map(|n| normalize_image_name(n)).collect();
    Ok(registry
        .iter()
        .find(|(image, _)| names.iter().any(|n| n == image))
        .map(|(_, entry)| entry))
}

/// Add a `mask` column, 1 for pixels in the high cluster of `element`.
pub fn mask_by_element(frame: &mut MeasurementFrame, element: &str) -> Result<()> {
    let mask = two_means_mask(frame.values(element)?);
    let kept = mask.iter().filter(|&&m| m).count();
    debug!("mask by {} keeps {} of {} pixels", element, kept, mask.len());
    let values = mask.into_iter().map(|m| Some(if m { 1.0 } else { 0.0 })).collect();
    frame.push_column(Column::new(MASK_COLUMN, values))?;
    Ok(())
}

/// Depth of every pixel from the fitted depth map, applied to `(y, x)`.
pub fn add_depth(frame: &mut MeasurementFrame, entry: &RegistryEntry) -> Result<()> {
    let xs = frame.values("x")?;
    let ys = frame.values("y")?;
    let points: Vec<[f64; 2]> = ys
        .iter()
        .zip(xs)
        .map(|(y, x)| [y.unwrap_or(f64::NAN), x.unwrap_or(f64::NAN)])
        .collect();
    let depth: Vec<f64> = entry.to_depth_lateral.transform(&points)?.iter().map(|p| p[0]).collect();
    frame.push_column(Column::from_values(DEPTH_COLUMN, &depth))?;
    Ok(())
}

/// Read, mask and transform one scan folder, writing `transformed.csv` into it.
pub fn prepare_folder(folder: &Path, registry: &TransformationRegistry, mask_by: Option<&str>) -> Result<PathBuf> {
    let entry = folder_entry(folder, registry)?.ok_or_else(|| DataError::NoTransformation(folder.to_path_buf()))?;
    let mut frame = read_element_folder(folder)?;
    if let Some(element) = mask_by {
        mask_by_element(&mut frame, element).map_err(|e| match e {
            DataError::Core(_) => DataError::MissingColumn { path: folder.to_path_buf(), column: element.to_string() },
            other => other,
        })?;
    }
    add_depth(&mut frame, entry)?;

    let target = folder.join(TRANSFORMED_FILE_NAME);
    write_columns_csv(&target, &frame)?;
    Ok(target)
}

#[derive(Debug, Default)]
pub struct XrfPrepareReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, DataError)>,
}

/// Prepare every scan folder below `root` that holds at least one grid.
///
/// A failing folder is reported and the remaining folders still run.
pub fn prepare_scans(root: &Path, registry: &TransformationRegistry, mask_by: Option<&str>) -> Result<XrfPrepareReport> {
    let mut folders: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    folders.sort();

    let mut report = XrfPrepareReport::default();
    for folder in folders {
        let has_grids = sorted_file_names(&folder)?
            .iter()
            .any(|n| Path::new(n).extension().is_some_and(|e| e == GRID_EXTENSION));
        if !has_grids {
            debug!("{} holds no grids, skipped", folder.display());
            continue;
        }
        match prepare_folder(&folder, registry, mask_by) {
            Ok(target) => report.written.push(target),
            Err(e) => {
                warn!("{}: {}", folder.display(), e);
                report.failures.push((folder, e));
            }
        }
    }
    info!("{} scans prepared, {} failed", report.written.len(), report.failures.len());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_names() {
        assert_eq!(
            element_names(&["scan_01_Ca.txt", "scan_01_Fe.txt", "scan_01_Video.txt"]),
            vec!["Ca", "Fe", "Video"]
        );
        assert_eq!(element_names(&["only.txt"]), vec!["only"]);
    }

    #[test]
    fn test_read_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.txt");
        fs::write(&path, "1;2;3;\n4;;6;\n").unwrap();
        assert_eq!(
            read_grid(&path).unwrap(),
            vec![vec![Some(1.0), Some(2.0), Some(3.0)], vec![Some(4.0), None, Some(6.0)]]
        );
        fs::write(&path, "1;2\n3\n").unwrap();
        assert!(matches!(read_grid(&path), Err(DataError::InvalidGrid { .. })));
    }

    #[test]
    fn test_read_element_folder_melts_by_column() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("s_Ca.txt"), "1;2\n3;4\n5;6\n").unwrap();
        fs::write(dir.path().join("s_Ti.txt"), "10;20\n30;40\n50;60\n").unwrap();
        fs::write(dir.path().join("s_bad.txt"), "a;b\n").unwrap();
        let frame = read_element_folder(dir.path()).unwrap();
        assert_eq!(frame.column_names(), vec!["x", "y", "Ca", "Ti"]);
        let x: Vec<f64> = frame.values("x").unwrap().iter().flatten().copied().collect();
        let y: Vec<f64> = frame.values("y").unwrap().iter().flatten().copied().collect();
        assert_eq!(x, vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
        assert_eq!(y, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(
            frame.values("Ca").unwrap(),
            &[Some(1.0), Some(3.0), Some(5.0), Some(2.0), Some(4.0), Some(6.0)]
        );
    }

    #[test]
    fn test_prepare_scans() {
        let root = tempfile::tempdir().unwrap();
        let good = root.path().join("core_1");
        fs::create_dir(&good).unwrap();
        fs::write(good.join("core 1 scan.tif"), b"").unwrap();
        fs::write(good.join("c1_Fe.txt"), "1;1\n9;9\n").unwrap();
        fs::write(good.join("c1_Ca.txt"), "2;3\n4;5\n").unwrap();
        let unknown = root.path().join("core_2");
        fs::create_dir(&unknown).unwrap();
        fs::write(unknown.join("c2_Fe.txt"), "1\n").unwrap();
        fs::create_dir(root.path().join("empty")).unwrap();

        let mut registry = TransformationRegistry::new();
        registry.insert("core 1 scan.tif", RegistryEntry::identity());
        let report = prepare_scans(root.path(), &registry, Some("Fe")).unwrap();
        assert_eq!(report.written, vec![good.join(TRANSFORMED_FILE_NAME)]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].1, DataError::NoTransformation(_)));

        let text = fs::read_to_string(good.join(TRANSFORMED_FILE_NAME)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // identity depth map: d is the grid column y
        assert_eq!(lines[0], "x,y,Ca,Fe,mask,d");
        assert_eq!(lines[1], "0,0,2,1,0,0");
        assert_eq!(lines[2], "1,0,4,9,1,0");
        assert_eq!(lines[3], "0,1,3,1,0,1");

        let err = prepare_folder(&good, &registry, Some("Zn")).unwrap_err();
        assert!(matches!(err, DataError::MissingColumn { .. }));
    }
}
