use std::path::{Path, PathBuf};

use log::{error, info, warn};
use msicore::algorithm::aggregation::{aggregate, Profile, Reduction, RESULT_COLUMN};
use msicore::algorithm::chunking::{get_chunks, ChunkConfig, Horizon};
use msicore::algorithm::expression::ColumnReduction;
use msicore::data::age_model::AgeModel;
use msicore::data::frame::MeasurementFrame;
use msicore::error::CoreError;

use crate::config::{ExtractionConfig, Normalization, ProfileConfig, SpotPolicy};
use crate::data::handle::MsiDataHandle;
use crate::error::Result;
use crate::profile::output::{all_path, indexed_path, write_frame_csv, write_profile_csv, SlideProfile};
use crate::profile::resolver::{Prompt, Resolution, Resolver};
use crate::profile::source::{join_coordinates, normalize_by_tic, SpectrumExtractor, DEPTH_COLUMN};

/// Everything a pipeline run needs besides its sources.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub profile: ProfileConfig,
    pub extraction: ExtractionConfig,
    /// joined per-spot table
    pub output_2d: PathBuf,
    /// horizon table
    pub output_1d: PathBuf,
    pub age_model: Option<AgeModel>,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub written: Vec<PathBuf>,
    pub resolved: Vec<(PathBuf, Resolution)>,
    /// sources that do not exist
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, crate::error::DataError)>,
    /// sources whose custom expression failed; their 1D table is empty
    pub expression_failures: Vec<(PathBuf, CoreError)>,
    pub profiles: Vec<SlideProfile>,
}

/// Turns exported spectra into depth profiles.
///
/// # Description
///
/// Each source is extracted, resolved to its spectrum file, joined with the
/// transformed spot coordinates and written as a 2D table. Its spots are then
/// filtered, binned into horizons and reduced into a 1D table. A failing source
/// is reported and the run continues with the next one.
///
pub struct DepthProfilePipeline<'a, E: SpectrumExtractor, P: Prompt> {
    handle: &'a mut MsiDataHandle,
    extractor: E,
    prompt: P,
    settings: PipelineSettings,
}

impl<'a, E: SpectrumExtractor, P: Prompt> DepthProfilePipeline<'a, E, P> {
    pub fn new(handle: &'a mut MsiDataHandle, extractor: E, prompt: P, settings: PipelineSettings) -> Self {
        DepthProfilePipeline { handle, extractor, prompt, settings }
    }

    pub fn run(&mut self, sources: &[PathBuf]) -> Result<PipelineReport> {
        let reduction = self.settings.profile.reduction()?;
        let chunk_config = self.settings.profile.chunk_config()?;
        let mut report = PipelineReport::default();

        for (index, source) in sources.iter().enumerate() {
            if !source.exists() {
                warn!("{} does not exist, skipped", source.display());
                report.skipped.push(source.clone());
                continue;
            }
            let suffix = (sources.len() > 1).then_some(index);
            match self.run_source(source, suffix, &reduction, &chunk_config, &mut report) {
                Ok(profile) => report.profiles.push(profile),
                Err(e) => {
                    error!("{}: {}", source.display(), e);
                    report.failures.push((source.clone(), e));
                }
            }
        }

        if report.profiles.len() > 1 {
            let target = all_path(&self.settings.output_1d);
            write_profile_csv(&target, &report.profiles, self.settings.age_model.as_ref())?;
            report.written.push(target);
        }
        info!(
            "{} profiles written, {} sources failed, {} skipped",
            report.profiles.len(),
            report.failures.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn run_source(
        &mut self,
        source: &Path,
        suffix: Option<usize>,
        reduction: &Reduction,
        chunk_config: &ChunkConfig,
        report: &mut PipelineReport,
    ) -> Result<SlideProfile> {
        let measurements = self.extractor.extract(source, &self.settings.extraction)?;
        let resolution = Resolver::new(&mut *self.handle, &mut self.prompt).resolve(source)?;

        let mut frame = join_coordinates(self.handle, &resolution.spec_file_name, &measurements)?;
        report.resolved.push((source.to_path_buf(), resolution));
        if self.settings.profile.normalization == Normalization::Tic {
            normalize_by_tic(&mut frame)?;
        }
        let frame = frame.sort_by_column(DEPTH_COLUMN)?;

        let output_2d = target_path(&self.settings.output_2d, suffix);
        write_frame_csv(&output_2d, &frame)?;
        report.written.push(output_2d);

        let gap_depths = if chunk_config.adaptive.is_none() {
            horizon_depths(&frame, chunk_config.horizon_size)?
        } else {
            Vec::new()
        };

        let filtered = apply_spot_policy(&frame, &self.settings.profile.spot_policy)?.sort_by_column(DEPTH_COLUMN)?;
        let horizons = get_chunks(&depths(&filtered)?, chunk_config)?;
        self.warn_grown(source, &filtered, &horizons)?;

        let profile = match aggregate(&filtered, DEPTH_COLUMN, &horizons, reduction) {
            Ok(mut profile) => {
                if !profile.is_empty() {
                    let added = profile.fill_gaps(&gap_depths, chunk_config.horizon_size);
                    if added > 0 {
                        info!("{}: {} gap rows added", source.display(), added);
                    }
                }
                profile.sort_by_depth();
                profile
            }
            Err(e) if matches!(reduction, Reduction::Custom(_)) => {
                error!("{}: expression failed, 1D result left empty: {}", source.display(), e);
                report.expression_failures.push((source.to_path_buf(), e));
                Profile::new(vec![RESULT_COLUMN.to_string()])
            }
            Err(e) => return Err(e.into()),
        };

        let slide = SlideProfile { slide: file_name(source), profile };
        let output_1d = target_path(&self.settings.output_1d, suffix);
        write_profile_csv(&output_1d, std::slice::from_ref(&slide), self.settings.age_model.as_ref())?;
        report.written.push(output_1d);
        Ok(slide)
    }

    fn warn_grown(&self, source: &Path, frame: &MeasurementFrame, horizons: &[Horizon]) -> Result<()> {
        let size = self.settings.profile.horizon_size_cm();
        let depth = depths(frame)?;
        for horizon in horizons.iter().filter(|h| h.grown) {
            let span = depth[horizon.end - 1] - depth[horizon.start];
            if span > size {
                warn!(
                    "{}: horizon at {:.4} cm grown to {:.4} cm to reach {} spots",
                    source.display(),
                    depth[horizon.start],
                    span,
                    horizon.len()
                );
            }
        }
        Ok(())
    }
}

fn target_path(path: &Path, suffix: Option<usize>) -> PathBuf {
    match suffix {
        Some(index) => indexed_path(path, index),
        None => path.to_path_buf(),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn depths(frame: &MeasurementFrame) -> Result<Vec<f64>> {
    Ok(frame
        .values(DEPTH_COLUMN)?
        .iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// Mean depth of every horizon of the unfiltered spots, used to mark data gaps.
pub fn horizon_depths(frame: &MeasurementFrame, horizon_size: f64) -> Result<Vec<f64>> {
    let horizons = get_chunks(&depths(frame)?, &ChunkConfig::new(horizon_size, 0))?;
    horizons
        .iter()
        .map(|h| Ok(ColumnReduction::Mean.apply(&frame.slice(h.start, h.end).valid(DEPTH_COLUMN)?)))
        .collect()
}

/// Keep the spots the policy accepts.
///
/// Zero intensities count as absent. Kept spots get 0 for their absent intensities.
pub fn apply_spot_policy(frame: &MeasurementFrame, policy: &SpotPolicy) -> Result<MeasurementFrame> {
    let intensity = frame.intensity_columns();
    let mut cleaned = frame.clone();
    for name in &intensity {
        if let Some(column) = cleaned.column_mut(name) {
            for value in column.values.iter_mut() {
                if *value == Some(0.0) {
                    *value = None;
                }
            }
        }
    }

    let required: Vec<String> = match policy {
        SpotPolicy::Compounds(compounds) => compounds.iter().map(|c| format!("int_{}", c)).collect(),
        _ => intensity.clone(),
    };
    let present: Vec<&[Option<f64>]> = required
        .iter()
        .map(|name| cleaned.values(name))
        .collect::<std::result::Result<_, _>>()?;

    let keep: Vec<bool> = (0..cleaned.len())
        .map(|i| {
            let mut found = present.iter().map(|column| column[i].is_some());
            match policy {
                _ if present.is_empty() => true,
                SpotPolicy::Any => found.any(|f| f),
                SpotPolicy::All | SpotPolicy::Compounds(_) => found.all(|f| f),
            }
        })
        .collect();
    let mut kept = cleaned.filter_rows(&keep);

    for name in &intensity {
        if let Some(column) = kept.column_mut(name) {
            for value in column.values.iter_mut() {
                value.get_or_insert(0.0);
            }
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use msicore::data::frame::Column;

    fn frame() -> MeasurementFrame {
        let mut frame = MeasurementFrame::new((0..4).map(|i| format!("R00X{}Y0", i)).collect());
        frame.push_column(Column::from_values("d", &[0.0, 0.1, 0.2, 0.3])).unwrap();
        frame
            .push_column(Column::new("int_a", vec![Some(1.0), Some(0.0), None, Some(4.0)]))
            .unwrap();
        frame
            .push_column(Column::new("int_b", vec![Some(1.0), Some(2.0), None, None]))
            .unwrap();
        frame
    }

    #[test]
    fn test_spot_policy_all() {
        let kept = apply_spot_policy(&frame(), &SpotPolicy::All).unwrap();
        assert_eq!(kept.spot_names, vec!["R00X0Y0"]);
    }

    #[test]
    fn test_spot_policy_any_fills_zero() {
        let kept = apply_spot_policy(&frame(), &SpotPolicy::Any).unwrap();
        assert_eq!(kept.spot_names, vec!["R00X0Y0", "R00X1Y0", "R00X3Y0"]);
        assert_eq!(kept.values("int_a").unwrap(), &[Some(1.0), Some(0.0), Some(4.0)]);
        assert_eq!(kept.values("int_b").unwrap(), &[Some(1.0), Some(2.0), Some(0.0)]);
    }

    #[test]
    fn test_spot_policy_compounds() {
        let kept = apply_spot_policy(&frame(), &SpotPolicy::Compounds(vec!["a".into()])).unwrap();
        assert_eq!(kept.spot_names, vec!["R00X0Y0", "R00X3Y0"]);
        assert!(apply_spot_policy(&frame(), &SpotPolicy::Compounds(vec!["c".into()])).is_err());
    }

    #[test]
    fn test_horizon_depths() {
        let depths = horizon_depths(&frame(), 0.15).unwrap();
        assert_eq!(depths.len(), 2);
        assert!((depths[0] - 0.05).abs() < 1e-12);
        assert!((depths[1] - 0.25).abs() < 1e-12);
    }
}
