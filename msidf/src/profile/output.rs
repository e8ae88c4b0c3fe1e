use std::path::{Path, PathBuf};

use log::info;
use msicore::algorithm::aggregation::{HorizonRow, Profile};
use msicore::data::age_model::AgeModel;
use msicore::data::frame::MeasurementFrame;

use crate::error::Result;
use crate::profile::source::SPOT_COLUMN;

pub const DEPTH_HEADER: &str = "d (cm)";
pub const COUNT_HEADER: &str = "horizon_count";
pub const SPAN_HEADER: &str = "horizon_len (cm)";
pub const SLIDE_HEADER: &str = "slide";
pub const GROWN_HEADER: &str = "grown";
pub const AGE_HEADER: &str = "age";

/// The 1D profile of one source, tagged with the source file name.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideProfile {
    pub slide: String,
    pub profile: Profile,
}

/// `out.csv` becomes `out_<index>.csv`.
pub fn indexed_path(path: &Path, index: usize) -> PathBuf {
    suffixed_path(path, &index.to_string())
}

/// `out.csv` becomes `out_all.csv`.
pub fn all_path(path: &Path) -> PathBuf {
    suffixed_path(path, "all")
}

fn suffixed_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext),
        None => format!("{}_{}", stem, suffix),
    };
    path.with_file_name(name)
}

/// Missing and NaN values are written as empty cells.
fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if !v.is_nan() => v.to_string(),
        _ => String::new(),
    }
}

/// Write a per-spot frame with its spot names as the first column.
pub fn write_frame_csv(path: &Path, frame: &MeasurementFrame) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec![SPOT_COLUMN];
    header.extend(frame.column_names());
    writer.write_record(&header)?;

    for (i, spot) in frame.spot_names.iter().enumerate() {
        let mut record = vec![spot.clone()];
        record.extend(frame.columns().iter().map(|c| format_value(c.values[i])));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!("wrote {} spots to {}", frame.len(), path.display());
    Ok(())
}

/// Write only the numeric columns of a frame, for tables keyed by coordinates.
pub fn write_columns_csv(path: &Path, frame: &MeasurementFrame) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(frame.column_names())?;
    for i in 0..frame.len() {
        writer.write_record(frame.columns().iter().map(|c| format_value(c.values[i])))?;
    }
    writer.flush()?;
    info!("wrote {} rows to {}", frame.len(), path.display());
    Ok(())
}

/// Result columns of several profiles in first-seen order.
fn union_columns<'a>(profiles: impl Iterator<Item = &'a Profile>) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for profile in profiles {
        for column in &profile.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
    }
    columns
}

fn row_values(profile: &Profile, row: &HorizonRow, columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .map(|name| {
            let value = profile
                .columns
                .iter()
                .position(|c| c == name)
                .and_then(|i| row.values.get(i).copied());
            format_value(value)
        })
        .collect()
}

/// Write one or more 1D profiles into one table.
///
/// # Arguments
///
/// * `path` - output CSV
/// * `profiles` - profiles in output order, rows already sorted by depth
/// * `age_model` - adds an interpolated `age` column when given
///
pub fn write_profile_csv(path: &Path, profiles: &[SlideProfile], age_model: Option<&AgeModel>) -> Result<()> {
    let columns = union_columns(profiles.iter().map(|p| &p.profile));
    let mut writer = csv::Writer::from_path(path)?;

    let mut header: Vec<&str> = vec![DEPTH_HEADER, COUNT_HEADER, SPAN_HEADER, SLIDE_HEADER, GROWN_HEADER];
    header.extend(columns.iter().map(String::as_str));
    if age_model.is_some() {
        header.push(AGE_HEADER);
    }
    writer.write_record(&header)?;

    let mut written = 0;
    for slide in profiles {
        for row in &slide.profile.rows {
            let mut record = vec![
                format_value(Some(row.depth)),
                row.count.map(|c| c.to_string()).unwrap_or_default(),
                format_value(row.span),
                slide.slide.clone(),
                row.grown.to_string(),
            ];
            record.extend(row_values(&slide.profile, row, &columns));
            if let Some(model) = age_model {
                record.push(format_value(Some(model.age_at(row.depth))));
            }
            writer.write_record(&record)?;
            written += 1;
        }
    }
    writer.flush()?;
    info!("wrote {} horizons to {}", written, path.display());
    Ok(())
}

/// Write line-scan element profiles: `d`, `horizon_count` and one column per item.
pub fn write_xrf_csv(path: &Path, profiles: &[Profile]) -> Result<()> {
    let columns = union_columns(profiles.iter());
    let mut writer = csv::Writer::from_path(path)?;

    let mut header: Vec<&str> = vec!["d", COUNT_HEADER];
    header.extend(columns.iter().map(String::as_str));
    writer.write_record(&header)?;

    for profile in profiles {
        for row in &profile.rows {
            let mut record = vec![
                format_value(Some(row.depth)),
                row.count.map(|c| c.to_string()).unwrap_or_default(),
            ];
            record.extend(row_values(profile, row, &columns));
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    info!("wrote {} element profiles to {}", profiles.len(), path.display());
    Ok(())
}

/// Concatenate 1D profile tables into one, rows sorted by depth.
///
/// Columns are the union of all headers in first-seen order; cells a table does
/// not have are left empty. Rows without a readable depth go last.
pub fn stitch_profiles(sources: &[PathBuf], output: &Path) -> Result<usize> {
    let mut header: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<(usize, String)>> = Vec::new();
    for source in sources {
        let mut reader = csv::Reader::from_path(source)?;
        let positions: Vec<usize> = reader
            .headers()?
            .iter()
            .map(|name| match header.iter().position(|h| h == name) {
                Some(i) => i,
                None => {
                    header.push(name.to_string());
                    header.len() - 1
                }
            })
            .collect();
        for record in reader.records() {
            let record = record?;
            rows.push(positions.iter().copied().zip(record.iter().map(String::from)).collect());
        }
    }

    let depth_index = header.iter().position(|h| h == DEPTH_HEADER);
    let depth_of = |row: &[(usize, String)]| {
        depth_index
            .and_then(|d| row.iter().find(|(i, _)| *i == d))
            .and_then(|(_, cell)| cell.parse::<f64>().ok())
            .unwrap_or(f64::INFINITY)
    };
    rows.sort_by(|a, b| depth_of(a).total_cmp(&depth_of(b)));

    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record(&header)?;
    for row in &rows {
        let mut record = vec![String::new(); header.len()];
        for (i, cell) in row {
            record[*i] = cell.clone();
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!("stitched {} rows from {} profiles into {}", rows.len(), sources.len(), output.display());
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use msicore::data::frame::Column;
    use std::fs;

    fn profile(columns: &[&str], rows: Vec<HorizonRow>) -> Profile {
        let mut profile = Profile::new(columns.iter().map(|c| c.to_string()).collect());
        profile.rows = rows;
        profile
    }

    fn row(depth: f64, values: Vec<f64>) -> HorizonRow {
        HorizonRow { depth, count: Some(10), span: Some(0.5), grown: false, values }
    }

    #[test]
    fn test_paths() {
        assert_eq!(indexed_path(Path::new("/out/profile.csv"), 2), PathBuf::from("/out/profile_2.csv"));
        assert_eq!(all_path(Path::new("profile.csv")), PathBuf::from("profile_all.csv"));
        assert_eq!(all_path(Path::new("profile")), PathBuf::from("profile_all"));
    }

    #[test]
    fn test_write_frame_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2d.csv");
        let mut frame = MeasurementFrame::new(vec!["R00X1Y1".into(), "R00X2Y1".into()]);
        frame.push_column(Column::from_values("d", &[0.5, 1.0])).unwrap();
        frame.push_column(Column::new("int_a", vec![None, Some(2.0)])).unwrap();
        write_frame_csv(&path, &frame).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "spot_name,d,int_a\nR00X1Y1,0.5,\nR00X2Y1,1,2\n"
        );
    }

    #[test]
    fn test_write_profile_csv_with_gap_and_age() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1d.csv");
        let first = SlideProfile {
            slide: "a.csv".into(),
            profile: profile(&["result"], vec![row(1.0, vec![4.0]), HorizonRow::placeholder(2.0, 1)]),
        };
        let second = SlideProfile {
            slide: "b.csv".into(),
            profile: profile(&["int_x"], vec![row(3.0, vec![7.0])]),
        };
        let model = AgeModel::new(vec![0.0, 4.0], vec![0.0, 400.0]).unwrap();
        write_profile_csv(&path, &[first, second], Some(&model)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "d (cm),horizon_count,horizon_len (cm),slide,grown,result,int_x,age");
        assert_eq!(lines[1], "1,10,0.5,a.csv,false,4,,100");
        assert_eq!(lines[2], "2,,,a.csv,false,,,200");
        assert_eq!(lines[3], "3,10,0.5,b.csv,false,,7,300");
    }

    #[test]
    fn test_write_xrf_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xrf.csv");
        let profiles = vec![profile(&["Ca/Ti", "Fe"], vec![row(0.25, vec![2.0, 3.5])])];
        write_xrf_csv(&path, &profiles).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "d,horizon_count,Ca/Ti,Fe\n0.25,10,2,3.5\n");
    }

    #[test]
    fn test_stitch_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "d (cm),slide,int_x\n2.5,a.csv,1\n0.5,a.csv,2\n").unwrap();
        fs::write(&b, "d (cm),slide,int_y\n1.5,b.csv,3\n,b.csv,4\n").unwrap();
        let output = dir.path().join("all.csv");

        assert_eq!(stitch_profiles(&[a, b], &output).unwrap(), 4);
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "d (cm),slide,int_x,int_y\n0.5,a.csv,2,\n1.5,b.csv,,3\n2.5,a.csv,1,\n,b.csv,,4\n"
        );
    }
}
