use serde::{Deserialize, Serialize};

use crate::algorithm::chunking::check_sorted;
use crate::error::{CoreError, Result};

/// Depth to age tie points, linearly interpolated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgeModel {
    depths: Vec<f64>,
    ages: Vec<f64>,
}

impl AgeModel {
    /// # Arguments
    ///
    /// * `depths` - ascending tie point depths
    /// * `ages` - age at each tie point
    ///
    pub fn new(depths: Vec<f64>, ages: Vec<f64>) -> Result<Self> {
        if depths.len() != ages.len() {
            return Err(CoreError::MismatchedLengths { sources: depths.len(), targets: ages.len() });
        }
        if depths.is_empty() {
            return Err(CoreError::InsufficientPoints { required: 1, found: 0 });
        }
        check_sorted(&depths)?;
        Ok(AgeModel { depths, ages })
    }

    pub fn len(&self) -> usize {
        self.depths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }

    /// Age at a depth; depths outside the model take the age of the nearest end.
    pub fn age_at(&self, depth: f64) -> f64 {
        if depth.is_nan() {
            return f64::NAN;
        }
        let n = self.depths.len();
        if depth <= self.depths[0] {
            return self.ages[0];
        }
        if depth >= self.depths[n - 1] {
            return self.ages[n - 1];
        }
        // first tie point strictly deeper than `depth`
        let upper = self.depths.partition_point(|&d| d <= depth);
        let lower = upper - 1;
        let (d0, d1) = (self.depths[lower], self.depths[upper]);
        let (a0, a1) = (self.ages[lower], self.ages[upper]);
        a0 + (depth - d0) / (d1 - d0) * (a1 - a0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_and_clamping() {
        let model = AgeModel::new(vec![0.0, 10.0, 20.0], vec![100.0, 200.0, 400.0]).unwrap();
        assert_eq!(model.age_at(5.0), 150.0);
        assert_eq!(model.age_at(15.0), 300.0);
        assert_eq!(model.age_at(10.0), 200.0);
        assert_eq!(model.age_at(-1.0), 100.0);
        assert_eq!(model.age_at(25.0), 400.0);
        assert!(model.age_at(f64::NAN).is_nan());
    }

    #[test]
    fn test_rejects_bad_tables() {
        assert!(AgeModel::new(vec![0.0, 1.0], vec![1.0]).is_err());
        assert!(AgeModel::new(vec![], vec![]).is_err());
        assert!(AgeModel::new(vec![1.0, 0.0], vec![1.0, 2.0]).is_err());
    }
}
