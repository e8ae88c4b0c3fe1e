use std::f64::consts::TAU;

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::data::spot::Point;
use crate::error::{CoreError, Result};

const COLLINEAR_EPSILON: f64 = 1e-12;

/// Canonical clockwise order of a point group, as indices into `points`.
///
/// # Description
///
/// Points are taken in image coordinates (y grows downward), so increasing
/// `atan2` around the centroid runs clockwise on screen. The sequence starts at
/// the topmost point, leftmost on ties. Remaining ties in angle are broken by
/// distance to the centroid and then by coordinates, which makes the result
/// independent of the order the points were given in.
///
/// # Errors
///
/// * `InsufficientPoints` for fewer than 3 points
/// * `DegenerateGeometry` if all points lie on one line
///
pub fn clockwise_order(points: &[Point]) -> Result<Vec<usize>> {
    if points.len() < 3 {
        return Err(CoreError::InsufficientPoints { required: 3, found: points.len() });
    }

    // sum in coordinate order so the centroid does not depend on input order
    let canonical: Vec<usize> = (0..points.len())
        .sorted_by_key(|&i| (OrderedFloat(points[i][0]), OrderedFloat(points[i][1])))
        .collect();
    let n = points.len() as f64;
    let cx = canonical.iter().map(|&i| points[i][0]).sum::<f64>() / n;
    let cy = canonical.iter().map(|&i| points[i][1]).sum::<f64>() / n;

    if is_collinear(points, cx, cy) {
        return Err(CoreError::DegenerateGeometry);
    }

    let anchor = canonical
        .iter()
        .copied()
        .min_by_key(|&i| (OrderedFloat(points[i][1]), OrderedFloat(points[i][0])))
        .ok_or(CoreError::InsufficientPoints { required: 3, found: 0 })?;
    let anchor_angle = (points[anchor][1] - cy).atan2(points[anchor][0] - cx);

    let order = canonical
        .into_iter()
        .sorted_by_key(|&i| {
            let [x, y] = points[i];
            let relative = if i == anchor {
                0.0
            } else {
                ((y - cy).atan2(x - cx) - anchor_angle).rem_euclid(TAU)
            };
            let distance = (x - cx).hypot(y - cy);
            (OrderedFloat(relative), OrderedFloat(distance), OrderedFloat(x), OrderedFloat(y))
        })
        .collect();
    Ok(order)
}

/// Reorder a point group clockwise, see [`clockwise_order`].
pub fn sort_points_clockwise(points: &[Point]) -> Result<Vec<Point>> {
    let order = clockwise_order(points)?;
    Ok(order.into_iter().map(|i| points[i]).collect())
}

/// Reorder a point group clockwise and carry the caller's keys along.
pub fn sort_points_clockwise_by_keys<K: Clone>(points: &[Point], keys: &[K]) -> Result<(Vec<Point>, Vec<K>)> {
    if points.len() != keys.len() {
        return Err(CoreError::MismatchedLengths { sources: points.len(), targets: keys.len() });
    }
    let order = clockwise_order(points)?;
    let sorted_points = order.iter().map(|&i| points[i]).collect();
    let sorted_keys = order.iter().map(|&i| keys[i].clone()).collect();
    Ok((sorted_points, sorted_keys))
}

fn is_collinear(points: &[Point], cx: f64, cy: f64) -> bool {
    let (sxx, syy, sxy) = points.iter().fold((0.0, 0.0, 0.0), |(sxx, syy, sxy), p| {
        let dx = p[0] - cx;
        let dy = p[1] - cy;
        (sxx + dx * dx, syy + dy * dy, sxy + dx * dy)
    });
    let trace = sxx + syy;
    trace <= 0.0 || sxx * syy - sxy * sxy <= COLLINEAR_EPSILON * trace * trace
}
