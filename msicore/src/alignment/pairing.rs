use std::collections::BTreeMap;

use itertools::Itertools;
use log::{debug, info, warn};
use ordered_float::OrderedFloat;

use crate::algorithm::ordering::sort_points_clockwise_by_keys;
use crate::algorithm::solver::AffineSolver;
use crate::alignment::registry::{RegistryEntry, TransformationRegistry};
use crate::data::spot::Point;
use crate::data::teaching_point::{TeachableImage, TeachingPoint, TeachingPointSet};
use crate::error::{CoreError, Result};

/// Largest depth gap between an MSI image and the reference group it is paired with.
pub const DEPTH_MATCH_TOLERANCE: f64 = 0.5;

/// Reference points per group in geometric pairing.
pub const GROUP_SIZE: usize = 3;

/// Outcome of a pairing run: the fitted registry and the images that failed.
#[derive(Clone, Debug, Default)]
pub struct PairingReport {
    pub registry: TransformationRegistry,
    pub failures: Vec<(String, CoreError)>,
}

impl PairingReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Three reference points ordered clockwise with their fit targets.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceGroup {
    pub mean_depth: f64,
    pub pixels: Vec<Point>,
    /// `(depth, local_y)` of the same points, same order
    pub depth_lateral: Vec<Point>,
}

/// Parse pairing text: one `a b` record of integer labels per line.
///
/// Blank lines are ignored; any other line that is not exactly two integers fails
/// the whole parse.
pub fn parse_label_pairs(text: &str) -> Result<Vec<(i64, i64)>> {
    let mut pairs = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let malformed = || CoreError::MalformedPairing { line: index + 1, content: line.to_string() };
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [a, b] = fields.as_slice() else {
            return Err(malformed());
        };
        let a = a.parse::<i64>().map_err(|_| malformed())?;
        let b = b.parse::<i64>().map_err(|_| malformed())?;
        pairs.push((a, b));
    }
    Ok(pairs)
}

/// Cut the reference image's points into depth-sorted groups of three.
pub fn reference_groups(reference: &TeachableImage) -> Result<Vec<ReferenceGroup>> {
    let mut points: Vec<(f64, &TeachingPoint)> = reference
        .points
        .iter()
        .map(|p| reference.depth_of(p).map(|d| (d, p)))
        .collect::<Result<Vec<_>>>()?;
    if points.is_empty() {
        return Err(CoreError::InsufficientPoints { required: GROUP_SIZE, found: 0 });
    }
    if points.len() % GROUP_SIZE != 0 {
        return Err(CoreError::PartialGroup { count: points.len() });
    }
    points.sort_by_key(|(depth, _)| OrderedFloat(*depth));

    let mut groups = Vec::with_capacity(points.len() / GROUP_SIZE);
    for chunk in points.chunks(GROUP_SIZE) {
        let locals: Vec<Point> = chunk.iter().map(|(_, p)| p.local).collect();
        let (pixels, keys) = sort_points_clockwise_by_keys(&locals, chunk)?;
        let depth_lateral = keys.iter().map(|(depth, p)| [*depth, p.local[1]]).collect();
        let mean_depth = chunk.iter().map(|(depth, _)| depth).sum::<f64>() / chunk.len() as f64;
        groups.push(ReferenceGroup { mean_depth, pixels, depth_lateral });
    }
    Ok(groups)
}

fn fit_entry(sources: &[Point], pixels: &[Point], depth_lateral: &[Point]) -> Result<RegistryEntry> {
    Ok(RegistryEntry::new(
        AffineSolver::fitted(sources, pixels)?,
        AffineSolver::fitted(sources, depth_lateral)?,
    ))
}

/// Pair every MSI image with the reference group closest in depth and fit both maps.
///
/// # Description
///
/// Reference points are sorted by depth and cut into groups of three, each group
/// ordered clockwise. An MSI image is matched to the group whose mean depth is
/// nearest to the mean depth of its own points, and its points are ordered
/// clockwise the same way. Point `i` of one sequence then corresponds to point
/// `i` of the other.
///
/// # Errors
///
/// Any failure aborts the whole run and no registry is returned: missing depths,
/// a partial group, an MSI image farther than [`DEPTH_MATCH_TOLERANCE`] from every
/// group, or a degenerate fit.
///
pub fn pair_by_geometry(set: &TeachingPointSet) -> Result<PairingReport> {
    let reference = set.reference_image().ok_or(CoreError::NoReferenceImage)?;
    let groups = reference_groups(reference)?;
    debug!("{} reference groups from {}", groups.len(), reference.name);

    let mut registry = TransformationRegistry::new();
    for image in set.aligned_images() {
        let depth = image.mean_depth()?;
        let (group, gap) = groups
            .iter()
            .map(|g| (g, (g.mean_depth - depth).abs()))
            .min_by_key(|(_, gap)| OrderedFloat(*gap))
            .ok_or(CoreError::NoReferenceImage)?;
        if gap > DEPTH_MATCH_TOLERANCE {
            return Err(CoreError::NoMatchingGroup {
                image: image.name.clone(),
                gap,
                tolerance: DEPTH_MATCH_TOLERANCE,
            });
        }

        let sources: Vec<Point> = image.points.iter().map(|p| p.machine_or_local()).collect();
        let ids: Vec<u64> = image.points.iter().map(|p| p.id).collect();
        let (sources, ids) = sort_points_clockwise_by_keys(&sources, &ids)?;
        debug!(
            "{} matched group at depth {:.3} (gap {:.3}), points {}",
            image.name,
            group.mean_depth,
            gap,
            ids.iter().join(",")
        );

        registry.insert(&image.name, fit_entry(&sources, &group.pixels, &group.depth_lateral)?);
    }

    info!("geometric pairing fitted {} images", registry.len());
    Ok(PairingReport { registry, failures: Vec::new() })
}

/// MSI label to reference label, whichever column of a record the reference knows.
fn label_map(pairs: &[(i64, i64)], reference_labels: &BTreeMap<i64, &TeachingPoint>) -> BTreeMap<i64, i64> {
    let mut map = BTreeMap::new();
    for &(a, b) in pairs {
        if reference_labels.contains_key(&a) {
            map.insert(b, a);
        } else if reference_labels.contains_key(&b) {
            map.insert(a, b);
        } else {
            debug!("pairing record {} {} names no reference label, skipped", a, b);
        }
    }
    map
}

fn fit_by_labels(
    image: &TeachableImage,
    reference: &TeachableImage,
    reference_labels: &BTreeMap<i64, &TeachingPoint>,
    map: &BTreeMap<i64, i64>,
) -> Result<RegistryEntry> {
    let mut sources = Vec::new();
    let mut pixels = Vec::new();
    let mut depth_lateral = Vec::new();

    // label order of the MSI image
    for (label, point) in image.label_indexed() {
        let Some(target) = map.get(&label).and_then(|r| reference_labels.get(r)) else {
            continue;
        };
        sources.push(point.machine_or_local());
        pixels.push(target.local);
        depth_lateral.push([reference.depth_of(target)?, target.local[1]]);
    }
    debug!("{} resolved {} labelled pairs", image.name, sources.len());
    fit_entry(&sources, &pixels, &depth_lateral)
}

/// Pair MSI and XRF images with the reference image through user-declared label pairs.
///
/// Records that name no reference label are skipped. An image whose
/// resolved pairs cannot be fitted is listed in the report and the other images
/// still get their entries.
pub fn pair_by_labels(set: &TeachingPointSet, pairs: &[(i64, i64)]) -> Result<PairingReport> {
    let reference = set.reference_image().ok_or(CoreError::NoReferenceImage)?;
    let reference_labels = reference.label_indexed();
    let map = label_map(pairs, &reference_labels);

    let mut report = PairingReport::default();
    for image in set.aligned_images() {
        match fit_by_labels(image, reference, &reference_labels, &map) {
            Ok(entry) => report.registry.insert(&image.name, entry),
            Err(e) => {
                warn!("label pairing failed for {}: {}", image.name, e);
                report.failures.push((image.name.clone(), e));
            }
        }
    }

    info!(
        "label pairing fitted {} images, {} failed",
        report.registry.len(),
        report.failures.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::teaching_point::ImageKind;

    fn point(id: u64, local: Point, depth: f64, label: Option<i64>) -> TeachingPoint {
        let mut p = TeachingPoint::new(id, [0.0, 0.0], local);
        p.depth = Some(depth);
        p.label = label;
        p
    }

    fn assert_close(a: &[Point], b: &[Point]) {
        for (p, q) in a.iter().zip(b.iter()) {
            assert!((p[0] - q[0]).abs() < 1e-9 && (p[1] - q[1]).abs() < 1e-9, "{:?} vs {:?}", a, b);
        }
    }

    fn workspace() -> TeachingPointSet {
        let mut set = TeachingPointSet::new();
        let xray = set.add_image("xray", ImageKind::Reference);
        // shuffled on purpose, grouping goes by depth
        xray.points = vec![
            point(4, [40.0, 100.0], 5.1, Some(5)),
            point(1, [50.0, 20.0], 1.0, Some(1)),
            point(3, [50.0, 30.0], 1.2, Some(3)),
            point(5, [10.0, 130.0], 5.2, Some(6)),
            point(2, [70.0, 20.0], 1.1, Some(2)),
            point(0, [10.0, 100.0], 5.0, Some(4)),
        ];

        let msi_a = set.add_image("msi a", ImageKind::Msi);
        msi_a.points = vec![
            point(10, [100.0, 205.0], 1.2, Some(103)),
            point(11, [100.0, 200.0], 1.0, Some(101)),
            point(12, [110.0, 200.0], 1.1, Some(102)),
        ];

        let msi_b = set.add_image("msi_b", ImageKind::Msi);
        msi_b.points = vec![
            point(20, [3.0, 0.0], 5.1, Some(201)),
            point(21, [0.0, 3.0], 5.2, Some(202)),
            point(22, [0.0, 0.0], 5.0, None),
        ];
        set
    }

    #[test]
    fn test_parse_label_pairs() {
        assert_eq!(parse_label_pairs("1 101\n2   102\n\n").unwrap(), vec![(1, 101), (2, 102)]);
        assert!(parse_label_pairs("").unwrap().is_empty());
        assert_eq!(
            parse_label_pairs("1 101\n2 x").unwrap_err(),
            CoreError::MalformedPairing { line: 2, content: "2 x".to_string() }
        );
        assert!(parse_label_pairs("1 2 3").is_err());
    }

    #[test]
    fn test_reference_groups() {
        let set = workspace();
        let groups = reference_groups(set.reference_image().unwrap()).unwrap();
        assert_eq!(groups.len(), 2);
        assert!((groups[0].mean_depth - 1.1).abs() < 1e-12);
        assert_eq!(groups[0].pixels, vec![[50.0, 20.0], [70.0, 20.0], [50.0, 30.0]]);
        assert_eq!(groups[0].depth_lateral, vec![[1.0, 20.0], [1.1, 20.0], [1.2, 30.0]]);
    }

    #[test]
    fn test_pair_by_geometry() {
        let set = workspace();
        let report = pair_by_geometry(&set).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.registry.len(), 2);

        let entry = report.registry.get("msi_a").unwrap();
        let mapped = entry
            .to_reference_pixels
            .transform(&[[100.0, 200.0], [110.0, 200.0], [100.0, 205.0]])
            .unwrap();
        assert_close(&mapped, &[[50.0, 20.0], [70.0, 20.0], [50.0, 30.0]]);
        let depth = entry.to_depth_lateral.transform(&[[110.0, 200.0]]).unwrap();
        assert_close(&depth, &[[1.1, 20.0]]);

        let entry = report.registry.get("msi_b").unwrap();
        let mapped = entry.to_reference_pixels.transform(&[[0.0, 0.0], [3.0, 0.0]]).unwrap();
        assert_close(&mapped, &[[10.0, 100.0], [40.0, 100.0]]);
    }

    #[test]
    fn test_geometry_rejects_partial_group() {
        let mut set = workspace();
        set.image_mut("xray").unwrap().points.pop();
        assert_eq!(pair_by_geometry(&set).unwrap_err(), CoreError::PartialGroup { count: 5 });
    }

    #[test]
    fn test_geometry_rejects_far_image() {
        let mut set = workspace();
        for p in set.image_mut("msi_b").unwrap().points.iter_mut() {
            p.depth = Some(3.0);
        }
        let err = pair_by_geometry(&set).unwrap_err();
        assert!(matches!(err, CoreError::NoMatchingGroup { ref image, .. } if image == "msi_b"));
    }

    #[test]
    fn test_pair_by_labels_with_unresolvable_label() {
        let set = workspace();
        // "102 2" lists the reference label second, "99 999" names no reference label
        let pairs = parse_label_pairs("1 101\n102 2\n3 103\n99 999\n201 5\n202 6").unwrap();
        let report = pair_by_labels(&set, &pairs).unwrap();

        let entry = report.registry.get("msi a").unwrap();
        let mapped = entry.to_reference_pixels.transform(&[[100.0, 205.0]]).unwrap();
        assert_close(&mapped, &[[50.0, 30.0]]);
        let depth = entry.to_depth_lateral.transform(&[[100.0, 200.0]]).unwrap();
        assert_close(&depth, &[[1.0, 20.0]]);

        // msi_b resolves only two labelled points
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "msi_b");
        assert_eq!(report.failures[0].1, CoreError::InsufficientPoints { required: 3, found: 2 });
    }

    #[test]
    fn test_pair_by_labels_requires_reference() {
        let mut set = workspace();
        set.images.retain(|i| i.kind == ImageKind::Msi);
        assert_eq!(pair_by_labels(&set, &[]).unwrap_err(), CoreError::NoReferenceImage);
    }

    #[test]
    fn test_xrf_images_are_paired() {
        let mut set = workspace();
        set.images.retain(|i| i.kind == ImageKind::Reference);
        let xrf = set.add_image("scan.tif", ImageKind::Xrf);
        xrf.points = vec![
            point(30, [50.0, 20.0], 1.0, Some(301)),
            point(31, [70.0, 20.0], 1.1, Some(302)),
            point(32, [50.0, 30.0], 1.2, Some(303)),
        ];
        let pairs = parse_label_pairs("1 301\n2 302\n3 303").unwrap();
        let report = pair_by_labels(&set, &pairs).unwrap();
        assert!(report.is_complete());
        let entry = report.registry.get("scan.tif").unwrap();
        let depth = entry.to_depth_lateral.transform(&[[50.0, 20.0], [70.0, 20.0]]).unwrap();
        assert_close(&depth, &[[1.0, 20.0], [1.1, 20.0]]);
    }
}
