use std::fmt;
use std::str::FromStr;

use itertools::{Itertools, MinMaxResult};
use statrs::statistics::{Data, Median, Statistics};

use crate::algorithm::chunking::Horizon;
use crate::algorithm::expression::Expr;
use crate::data::frame::MeasurementFrame;
use crate::error::{CoreError, Result};

/// Columns with fewer non-missing values than this inside a horizon report 0.
pub const MIN_VALID_COUNT: usize = 10;

/// Name of the single result column of `sumall` and custom expressions.
pub const RESULT_COLUMN: &str = "result";

/// How a horizon's spots are combined into one profile row.
#[derive(Clone, Debug, PartialEq)]
pub enum Reduction {
    Mean,
    Sum,
    Median,
    Std,
    SumAll,
    Custom(Expr),
}

impl FromStr for Reduction {
    type Err = CoreError;

    /// Built-in mode names, anything else is parsed as a custom expression.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "mean" => Ok(Reduction::Mean),
            "sum" => Ok(Reduction::Sum),
            "median" => Ok(Reduction::Median),
            "std" => Ok(Reduction::Std),
            "sumall" => Ok(Reduction::SumAll),
            other => Ok(Reduction::Custom(Expr::parse(other)?)),
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reduction::Mean => write!(f, "mean"),
            Reduction::Sum => write!(f, "sum"),
            Reduction::Median => write!(f, "median"),
            Reduction::Std => write!(f, "std"),
            Reduction::SumAll => write!(f, "sumall"),
            Reduction::Custom(_) => write!(f, "custom"),
        }
    }
}

/// One aggregated horizon.
#[derive(Clone, Debug, PartialEq)]
pub struct HorizonRow {
    /// mean depth of the horizon's spots
    pub depth: f64,
    /// number of spots, `None` for a gap placeholder
    pub count: Option<usize>,
    /// max minus min depth, `None` for a gap placeholder
    pub span: Option<f64>,
    pub grown: bool,
    pub values: Vec<f64>,
}

impl HorizonRow {
    /// Row marking a depth with no emitted horizon; all values are NaN.
    pub fn placeholder(depth: f64, width: usize) -> Self {
        HorizonRow {
            depth,
            count: None,
            span: None,
            grown: false,
            values: vec![f64::NAN; width],
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.count.is_none()
    }
}

/// Result columns plus one row per horizon.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Profile {
    pub columns: Vec<String>,
    pub rows: Vec<HorizonRow>,
}

impl Profile {
    pub fn new(columns: Vec<String>) -> Self {
        Profile { columns, rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stable sort of the rows by depth.
    pub fn sort_by_depth(&mut self) {
        self.rows.sort_by(|a, b| a.depth.total_cmp(&b.depth));
    }

    /// Add a placeholder row for each candidate depth that has no row within
    /// the open interval `(depth - window, depth + window)`.
    pub fn fill_gaps(&mut self, candidate_depths: &[f64], window: f64) -> usize {
        let existing: Vec<f64> = self.rows.iter().map(|r| r.depth).collect();
        let width = self.columns.len();
        let mut added = 0;
        for &depth in candidate_depths {
            let covered = existing
                .iter()
                .any(|&d| depth - window < d && d < depth + window);
            if !covered {
                self.rows.push(HorizonRow::placeholder(depth, width));
                added += 1;
            }
        }
        added
    }
}

fn reduce(reduction: &Reduction, values: &[f64]) -> f64 {
    if values.len() < MIN_VALID_COUNT {
        return 0.0;
    }
    match reduction {
        Reduction::Mean => values.mean(),
        Reduction::Sum => values.iter().sum(),
        Reduction::Median => Data::new(values.to_vec()).median(),
        Reduction::Std => values.std_dev(),
        Reduction::SumAll | Reduction::Custom(_) => f64::NAN,
    }
}

/// Reduce measurement columns over each horizon.
///
/// # Arguments
///
/// * `frame` - spots sorted by depth, the frame the horizons index into
/// * `depth_column` - name of the depth column, e.g. `d`
/// * `horizons` - output of the chunker for this frame
/// * `reduction` - built-in mode or custom expression
///
/// # Returns
///
/// * one row per horizon; built-in modes yield one result column per measurement
///   column, `sumall` and custom expressions a single `result` column
///
/// An expression that fails on any horizon fails the whole call, so callers never
/// see a partially filled profile.
///
pub fn aggregate(
    frame: &MeasurementFrame,
    depth_column: &str,
    horizons: &[Horizon],
    reduction: &Reduction,
) -> Result<Profile> {
    let measurement_columns: Vec<String> = frame
        .measurement_columns()
        .into_iter()
        .map(String::from)
        .collect();

    let columns = match reduction {
        Reduction::SumAll | Reduction::Custom(_) => vec![RESULT_COLUMN.to_string()],
        _ => measurement_columns.clone(),
    };
    let mut profile = Profile::new(columns);

    for horizon in horizons {
        if horizon.end > frame.len() || horizon.start > horizon.end {
            return Err(CoreError::ColumnLength {
                name: depth_column.to_string(),
                expected: frame.len(),
                found: horizon.end,
            });
        }
        let data = frame.slice(horizon.start, horizon.end);
        let depths = data.valid(depth_column)?;

        let span = match depths.iter().minmax() {
            MinMaxResult::NoElements => 0.0,
            MinMaxResult::OneElement(_) => 0.0,
            MinMaxResult::MinMax(min, max) => max - min,
        };

        let values = match reduction {
            Reduction::Custom(expr) => vec![expr.evaluate(&data)?],
            Reduction::SumAll => {
                let mut total = 0.0;
                for name in &measurement_columns {
                    total += data.valid(name)?.iter().sum::<f64>();
                }
                vec![total]
            }
            _ => measurement_columns
                .iter()
                .map(|name| data.valid(name).map(|v| reduce(reduction, &v)))
                .collect::<Result<Vec<f64>>>()?,
        };

        profile.rows.push(HorizonRow {
            depth: depths.as_slice().mean(),
            count: Some(horizon.len()),
            span: Some(span),
            grown: horizon.grown,
            values,
        });
    }

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::Column;

    fn frame(n: usize, missing: usize) -> MeasurementFrame {
        let names = (0..n).map(|i| format!("R00X{}Y0", i)).collect();
        let mut frame = MeasurementFrame::new(names);
        let depth: Vec<f64> = (0..n).map(|i| i as f64 * 0.01).collect();
        frame.push_column(Column::from_values("d", &depth)).unwrap();
        let values = (0..n)
            .map(|i| if i < missing { None } else { Some(i as f64) })
            .collect();
        frame.push_column(Column::new("int_a", values)).unwrap();
        frame.push_column(Column::from_values("px", &vec![1.0; n])).unwrap();
        frame
    }

    #[test]
    fn test_nine_valid_values_report_zero() {
        let frame = frame(10, 1);
        let horizons = vec![Horizon::new(0, 10)];
        let profile = aggregate(&frame, "d", &horizons, &Reduction::Mean).unwrap();
        assert_eq!(profile.columns, vec!["int_a"]);
        assert_eq!(profile.rows[0].values, vec![0.0]);
        assert_eq!(profile.rows[0].count, Some(10));
    }

    #[test]
    fn test_ten_valid_values_report_mean() {
        let frame = frame(10, 0);
        let horizons = vec![Horizon::new(0, 10)];
        let profile = aggregate(&frame, "d", &horizons, &Reduction::Mean).unwrap();
        assert!((profile.rows[0].values[0] - 4.5).abs() < 1e-12);
        assert!((profile.rows[0].depth - 0.045).abs() < 1e-12);
        assert!((profile.rows[0].span.unwrap() - 0.09).abs() < 1e-12);
    }

    #[test]
    fn test_sumall_ignores_minimum() {
        let frame = frame(5, 2);
        let horizons = vec![Horizon::new(0, 5)];
        let profile = aggregate(&frame, "d", &horizons, &Reduction::SumAll).unwrap();
        assert_eq!(profile.columns, vec![RESULT_COLUMN]);
        assert_eq!(profile.rows[0].values, vec![2.0 + 3.0 + 4.0]);
    }

    #[test]
    fn test_sumall_skips_joined_tic() {
        let mut frame = frame(10, 0);
        frame.push_column(Column::from_values("TIC", &[100.0; 10])).unwrap();
        let horizons = vec![Horizon::new(0, 10)];
        let profile = aggregate(&frame, "d", &horizons, &Reduction::SumAll).unwrap();
        assert_eq!(profile.rows[0].values, vec![45.0]);
        let mean = aggregate(&frame, "d", &horizons, &Reduction::Mean).unwrap();
        assert_eq!(mean.columns, vec!["int_a"]);
    }

    #[test]
    fn test_builtin_modes() {
        let frame = frame(12, 0);
        let horizons = vec![Horizon::new(0, 12)];
        let sum = aggregate(&frame, "d", &horizons, &Reduction::Sum).unwrap();
        assert_eq!(sum.rows[0].values, vec![66.0]);
        let median = aggregate(&frame, "d", &horizons, &Reduction::Median).unwrap();
        assert!((median.rows[0].values[0] - 5.5).abs() < 1e-9);
        let std = aggregate(&frame, "d", &horizons, &Reduction::Std).unwrap();
        // sample standard deviation of 0..12
        assert!((std.rows[0].values[0] - 13.0f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_custom_expression() {
        let frame = frame(6, 0);
        let horizons = vec![Horizon::new(0, 3), Horizon::new(3, 6)];
        let reduction: Reduction = "data['int_a'].max() - data['int_a'].min()".parse().unwrap();
        let profile = aggregate(&frame, "d", &horizons, &reduction).unwrap();
        assert_eq!(profile.rows.iter().map(|r| r.values[0]).collect::<Vec<_>>(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_failing_expression_fails_whole_aggregation() {
        let frame = frame(6, 0);
        let horizons = vec![Horizon::new(0, 3), Horizon::new(3, 6)];
        let reduction: Reduction = "data['int_zz'].mean()".parse().unwrap();
        assert!(aggregate(&frame, "d", &horizons, &reduction).is_err());
    }

    #[test]
    fn test_fill_gaps() {
        let mut profile = Profile::new(vec!["int_a".to_string()]);
        profile.rows.push(HorizonRow {
            depth: 1.0,
            count: Some(10),
            span: Some(0.04),
            grown: false,
            values: vec![3.0],
        });
        let added = profile.fill_gaps(&[1.02, 1.5, 2.0], 0.05);
        assert_eq!(added, 2);
        profile.sort_by_depth();
        assert_eq!(profile.rows.iter().map(|r| r.depth).collect::<Vec<_>>(), vec![1.0, 1.5, 2.0]);
        assert!(profile.rows[1].is_placeholder());
        assert!(profile.rows[1].values[0].is_nan());
    }
}
