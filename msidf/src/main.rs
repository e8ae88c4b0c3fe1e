//! # msidf
//!
//! Command-line front end for aligning MSI rasters with reference images and
//! building depth profiles.
//!
//! ```bash
//! # convert, pair and transform spot coordinates
//! msidf align --db core.db --points points.json --pairs pairs.txt
//!
//! # bin exported spectra into horizons
//! msidf profile --db core.db --output-2d 2d.csv --output-1d 1d.csv export_a.csv export_b.csv
//!
//! # line-scan element profiles
//! msidf xrf --items "Ca/Ti;Fe" --output xrf.csv scan.csv
//!
//! # depth-annotate XRF element grids, one folder per scan
//! msidf xrf-prepare --points points.json --pairs pairs.txt --mask-by Fe scans/
//!
//! # teaching points as `img;x;y;d`, then merge 1D profiles
//! msidf export-points --points points.json --output points.csv
//! msidf stitch --output all.csv 1d_a.csv 1d_b.csv
//! ```

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use msicore::alignment::pairing::parse_label_pairs;
use msicore::data::teaching_point::{cm_per_pixel_from_scale_lines, DepthScale};

use msidf::config::{Config, Normalization, SpotPolicy};
use msidf::data::handle::MsiDataHandle;
use msidf::error::{DataError, Result};
use msidf::profile::pipeline::{DepthProfilePipeline, PipelineSettings};
use msidf::profile::resolver::{NoPrompt, StdinPrompt};
use msidf::profile::source::{read_age_model, CsvExtractor};
use msidf::profile::output::stitch_profiles;
use msidf::profile::xrf::{parse_items, run_xrf};
use msidf::transform::align::{
    align, convert_msi_points, export_teaching_points, load_teaching_points, pair, save_teaching_points, PairingMode,
};
use msidf::transform::xrf::prepare_scans;

/// msidf - MSI alignment and depth profiling
#[derive(Parser)]
#[command(name = "msidf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Load settings from a TOML config file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pair teaching points and transform the spot coordinates in the database
    Align {
        /// SQLite database with the metadata table
        #[arg(long, value_name = "DB")]
        db: PathBuf,

        /// Teaching point set (JSON)
        #[arg(long, value_name = "FILE")]
        points: PathBuf,

        /// Label pairs, one `label label` record per line; geometric pairing when omitted
        #[arg(long, value_name = "FILE")]
        pairs: Option<PathBuf>,

        /// Recompute teaching point depths from the stored depth scale first
        #[arg(long)]
        recompute_depths: bool,

        /// Canvas x of two scale lines; replaces the stored depth scale
        #[arg(long, num_args = 2, value_names = ["X1", "X2"], requires_all = ["scale_cm", "sediment_start"])]
        scale_lines: Option<Vec<f64>>,

        /// Real distance between the scale lines in cm
        #[arg(long)]
        scale_cm: Option<f64>,

        /// Canvas x of the sediment start line
        #[arg(long)]
        sediment_start: Option<f64>,

        /// Write the converted teaching point set here
        #[arg(long, value_name = "FILE")]
        save_points: Option<PathBuf>,
    },

    /// Build 2D and 1D depth profiles from exported spectra
    Profile {
        /// SQLite database with transformed coordinates
        #[arg(long, value_name = "DB")]
        db: PathBuf,

        /// Exported spectra, one CSV per spectrum file
        #[arg(value_name = "SOURCE", required = true)]
        sources: Vec<PathBuf>,

        /// Joined per-spot output
        #[arg(long, value_name = "CSV")]
        output_2d: PathBuf,

        /// Horizon output
        #[arg(long, value_name = "CSV")]
        output_1d: PathBuf,

        /// Horizon size in µm
        #[arg(long)]
        horizon_size: Option<f64>,

        /// Minimum spots per horizon
        #[arg(long)]
        min_samples: Option<usize>,

        /// `all`, `any` or `;`-separated compounds
        #[arg(long)]
        spot_policy: Option<String>,

        /// `none` or `tic`
        #[arg(long)]
        normalization: Option<String>,

        /// `mean`, `sum`, `median`, `std`, `sumall` or an expression
        #[arg(long)]
        reduction: Option<String>,

        /// Grow horizons that have too few spots
        #[arg(long)]
        adaptive: bool,

        /// Depth to age table (CSV with `depth` and `age`)
        #[arg(long, value_name = "CSV")]
        age_model: Option<PathBuf>,

        /// Ask for the spectrum file name when a source cannot be matched
        #[arg(long)]
        interactive: bool,
    },

    /// Build element profiles from XRF line-scan exports
    Xrf {
        /// Line-scan CSV exports
        #[arg(value_name = "SOURCE", required = true)]
        sources: Vec<PathBuf>,

        /// `;`-separated items, `A/B` for ratios, `X` for means
        #[arg(long)]
        items: String,

        /// Horizon output
        #[arg(long, value_name = "CSV")]
        output: PathBuf,

        /// Horizon size in µm
        #[arg(long)]
        horizon_size: Option<f64>,

        /// Minimum spots per horizon
        #[arg(long)]
        min_samples: Option<usize>,
    },

    /// Add depths to XRF element grids and write `transformed.csv` per scan folder
    XrfPrepare {
        /// Folder holding one subfolder of `;`-separated element grids per scan
        #[arg(value_name = "ROOT")]
        root: PathBuf,

        /// Teaching point set (JSON)
        #[arg(long, value_name = "FILE")]
        points: PathBuf,

        /// Label pairs, one `label label` record per line; geometric pairing when omitted
        #[arg(long, value_name = "FILE")]
        pairs: Option<PathBuf>,

        /// SQLite database used to convert MSI teaching points to machine coordinates
        #[arg(long, value_name = "DB")]
        db: Option<PathBuf>,

        /// Keep only pixels in the high two-means cluster of this element
        #[arg(long, value_name = "ELEMENT")]
        mask_by: Option<String>,
    },

    /// Write teaching points as an `img;x;y;d` table
    ExportPoints {
        /// Teaching point set (JSON)
        #[arg(long, value_name = "FILE")]
        points: PathBuf,

        #[arg(long, value_name = "CSV")]
        output: PathBuf,
    },

    /// Concatenate 1D profiles into one table sorted by depth
    Stitch {
        /// 1D profile CSVs
        #[arg(value_name = "SOURCE", required = true)]
        sources: Vec<PathBuf>,

        #[arg(long, value_name = "CSV")]
        output: PathBuf,
    },
}

fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("loading config from {}", path.display());
            Config::from_file(path)
        }
        None => Ok(Config::default()),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Align {
            db,
            points,
            pairs,
            recompute_depths,
            scale_lines,
            scale_cm,
            sediment_start,
            save_points,
        } => {
            let scale = match (scale_lines, scale_cm, sediment_start) {
                (Some(lines), Some(cm), Some(start)) => {
                    Some(DepthScale::new(start, cm_per_pixel_from_scale_lines(&lines, cm)?))
                }
                _ => None,
            };
            run_align(&db, &points, pairs.as_deref(), recompute_depths, scale, save_points.as_deref())
        }
        Commands::Profile {
            db,
            sources,
            output_2d,
            output_1d,
            horizon_size,
            min_samples,
            spot_policy,
            normalization,
            reduction,
            adaptive,
            age_model,
            interactive,
        } => {
            let profile = &mut config.profile;
            if let Some(size) = horizon_size {
                profile.horizon_size_um = size;
            }
            if let Some(n) = min_samples {
                profile.min_samples = n;
            }
            if let Some(policy) = spot_policy {
                profile.spot_policy = policy.parse::<SpotPolicy>()?;
            }
            if let Some(mode) = normalization {
                profile.normalization = mode.parse::<Normalization>()?;
            }
            if let Some(reduction) = reduction {
                profile.reduction = reduction;
            }
            profile.adaptive.enabled |= adaptive;

            let settings = PipelineSettings {
                profile: config.profile,
                extraction: config.extraction,
                output_2d,
                output_1d,
                age_model: age_model.as_deref().map(read_age_model).transpose()?,
            };
            run_profile(&db, &sources, settings, interactive)
        }
        Commands::Xrf { sources, items, output, horizon_size, min_samples } => {
            if let Some(size) = horizon_size {
                config.profile.horizon_size_um = size;
            }
            if let Some(n) = min_samples {
                config.profile.min_samples = n;
            }
            let items = parse_items(&items)?;
            let report = run_xrf(&sources, &items, &config.profile, &output)?;
            info!(
                "wrote {} files, {} sources failed",
                report.written.len(),
                report.failures.len()
            );
            Ok(())
        }
        Commands::XrfPrepare { root, points, pairs, db, mask_by } => {
            run_xrf_prepare(&root, &points, pairs.as_deref(), db.as_deref(), mask_by.as_deref())
        }
        Commands::ExportPoints { points, output } => {
            let set = load_teaching_points(&points)?;
            export_teaching_points(&output, &set)?;
            Ok(())
        }
        Commands::Stitch { sources, output } => {
            stitch_profiles(&sources, &output)?;
            Ok(())
        }
    }
}

fn pairing_mode(pairs: Option<&Path>) -> Result<PairingMode> {
    Ok(match pairs {
        Some(path) => PairingMode::Labels(parse_label_pairs(&std::fs::read_to_string(path)?)?),
        None => PairingMode::Geometry,
    })
}

fn run_xrf_prepare(
    root: &Path,
    points: &Path,
    pairs: Option<&Path>,
    db: Option<&Path>,
    mask_by: Option<&str>,
) -> Result<()> {
    let mut set = load_teaching_points(points)?;
    if let Some(db) = db {
        let handle = MsiDataHandle::new(db)?;
        convert_msi_points(&handle, &mut set)?;
    }
    let pairing = pair(&set, &pairing_mode(pairs)?)?;
    for (image, e) in &pairing.failures {
        warn!("{} not aligned: {}", image, e);
    }

    let report = prepare_scans(root, &pairing.registry, mask_by)?;
    for (folder, e) in &report.failures {
        warn!("{}: {}", folder.display(), e);
    }
    info!(
        "wrote {} files, {} folders failed",
        report.written.len(),
        report.failures.len()
    );
    Ok(())
}

fn run_align(
    db: &Path,
    points: &Path,
    pairs: Option<&Path>,
    recompute_depths: bool,
    scale: Option<DepthScale>,
    save_points: Option<&Path>,
) -> Result<()> {
    let mut handle = MsiDataHandle::new(db)?;
    let mut set = load_teaching_points(points)?;

    if let Some(scale) = scale {
        info!("depth scale {:.6} cm per pixel from x = {}", scale.cm_per_pixel, scale.sediment_start_x);
        set.depth_scale = Some(scale);
    }
    if recompute_depths || scale.is_some() {
        let scale = set
            .depth_scale
            .ok_or_else(|| DataError::InvalidSetting("teaching point set has no depth scale".to_string()))?;
        let updated = set.recompute_depths(scale);
        info!("recomputed {} teaching point depths", updated);
    }

    let report = align(&mut handle, &mut set, &pairing_mode(pairs)?)?;

    for (image, e) in &report.pairing.failures {
        warn!("{} not aligned: {}", image, e);
    }
    info!(
        "{} spectra transformed, {} without transformation",
        report.transform.transformed,
        report.transform.skipped.len()
    );

    if let Some(path) = save_points {
        save_teaching_points(path, &set)?;
    }
    Ok(())
}

fn run_profile(db: &Path, sources: &[PathBuf], settings: PipelineSettings, interactive: bool) -> Result<()> {
    let mut handle = MsiDataHandle::new(db)?;
    let report = if interactive {
        DepthProfilePipeline::new(&mut handle, CsvExtractor, StdinPrompt, settings).run(sources)?
    } else {
        DepthProfilePipeline::new(&mut handle, CsvExtractor, NoPrompt, settings).run(sources)?
    };

    for (source, e) in &report.expression_failures {
        warn!("{}: expression failed: {}", source.display(), e);
    }
    info!(
        "wrote {} files, {} sources failed",
        report.written.len(),
        report.failures.len()
    );
    Ok(())
}
