use std::{collections::HashSet, fs, path::PathBuf, process::ExitCode};

use clap::{Parser, ValueEnum};
use elastic_align::{
    align::{self, AlignmentInputs, CancelFlag},
    config::{self, AlignmentParamsOverrides},
    error::AlignError,
    geom::Vec2,
    skiplayers::SkipSet,
    tile::LayerIndex,
};
use log::{error, info};

/// Aligns a stack of microscopy tile layers into a globally consistent
/// volume using inter-layer point-match correspondences.
#[derive(Parser, Debug)]
#[command(name = "elastic-align", version, about)]
struct Cli {
    /// Correspondence-point-pair files. Either flag may also name a single
    /// `.txt` file listing one path per line.
    #[arg(long = "corrFiles", required = true, num_args = 1..)]
    corr_files: Vec<PathBuf>,

    /// Tile-spec files, one per layer. Same list-or-list-file rule as
    /// `--corrFiles`.
    #[arg(long = "tilespecFiles", required = true, num_args = 1..)]
    tilespec_files: Vec<PathBuf>,

    /// Layers whose model is frozen at identity during solve.
    #[arg(long = "fixedLayers", num_args = 0..)]
    fixed_layers: Vec<u32>,

    #[arg(long = "imageWidth")]
    image_width: u32,

    #[arg(long = "imageHeight")]
    image_height: u32,

    /// Directory updated tile-spec files (and the run report) are written to.
    #[arg(long = "targetDir")]
    target_dir: PathBuf,

    /// 0=translation, 1=rigid, 2=similarity, 3=affine, 4=homography.
    #[arg(long = "modelIndex")]
    model_index: Option<u8>,

    #[arg(long = "layerScale")]
    layer_scale: Option<f64>,

    #[arg(long = "resolutionSpringMesh")]
    resolution_spring_mesh: Option<u32>,

    #[arg(long = "stiffnessSpringMesh")]
    stiffness_spring_mesh: Option<f64>,

    #[arg(long = "dampSpringMesh")]
    damp_spring_mesh: Option<f64>,

    #[arg(long = "maxStretchSpringMesh")]
    max_stretch_spring_mesh: Option<f64>,

    #[arg(long = "maxEpsilon")]
    max_epsilon: Option<f64>,

    #[arg(long = "maxIterationsSpringMesh")]
    max_iterations_spring_mesh: Option<usize>,

    #[arg(long = "maxPlateauwidthSpringMesh")]
    max_plateau_width_spring_mesh: Option<usize>,

    #[arg(long = "maxLayersDistance")]
    max_layers_distance: Option<usize>,

    #[arg(long = "useLegacyOptimizer")]
    use_legacy_optimizer: bool,

    /// Worker-pool size; 0 or absent means host CPU count.
    #[arg(long = "threads")]
    threads: Option<usize>,

    #[arg(long = "fromLayer")]
    from_layer: Option<i64>,

    #[arg(long = "toLayer")]
    to_layer: Option<i64>,

    /// Range expression, e.g. `3,5-7,12`.
    #[arg(long = "skipLayers", default_value = "")]
    skip_layers: String,

    /// World-coordinate origin the solve's scaled coordinates are unscaled
    /// back into (SPEC_FULL.md §4.E step 7).
    #[arg(long = "startX", default_value_t = 0.0)]
    start_x: f64,

    #[arg(long = "startY", default_value_t = 0.0)]
    start_y: f64,

    /// Optional TOML file supplying defaults for the tuning parameters
    /// above; any flag passed on the command line still wins.
    #[arg(long = "configFile")]
    config_file: Option<PathBuf>,

    /// Repeatable: raises log verbosity (info -> debug -> trace).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long = "quiet", conflicts_with = "verbose")]
    quiet: bool,

    #[arg(long = "logFormat", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    if cli.log_format == LogFormat::Json {
        builder.format(|buf, record| {
            use std::io::Write;
            let line = serde_json::json!({
                "level": record.level().to_string(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{line}")
        });
    }
    builder.init();
}

/// Expands any `--corrFiles`/`--tilespecFiles` entry that names a `.txt`
/// file into the paths listed one-per-line inside it (SPEC_FULL.md §10.6).
fn expand_list_files(raw: &[PathBuf]) -> Result<Vec<PathBuf>, AlignError> {
    let mut expanded = Vec::with_capacity(raw.len());
    for path in raw {
        if path.extension().and_then(|e| e.to_str()) == Some("txt") {
            let text = fs::read_to_string(path)
                .map_err(|source| AlignError::Io { path: path.clone(), source })?;
            for line in text.lines() {
                let line = line.trim();
                if !line.is_empty() {
                    expanded.push(PathBuf::from(line));
                }
            }
        } else {
            expanded.push(path.clone());
        }
    }
    Ok(expanded)
}

fn cli_overrides(cli: &Cli) -> AlignmentParamsOverrides {
    AlignmentParamsOverrides {
        model_index: cli.model_index,
        layer_scale: cli.layer_scale,
        resolution_spring_mesh: cli.resolution_spring_mesh,
        stiffness_spring_mesh: cli.stiffness_spring_mesh,
        damp_spring_mesh: cli.damp_spring_mesh,
        max_stretch_spring_mesh: cli.max_stretch_spring_mesh,
        max_epsilon: cli.max_epsilon,
        max_iterations_spring_mesh: cli.max_iterations_spring_mesh,
        max_plateau_width_spring_mesh: cli.max_plateau_width_spring_mesh,
        max_layers_distance: cli.max_layers_distance,
        use_legacy_optimizer: cli.use_legacy_optimizer.then_some(true),
        threads: cli.threads,
        mls_alpha: None,
    }
}

/// A compact single-line `[kind] context: message` tag for stderr
/// (SPEC_FULL.md §7 "User-visible").
fn error_tag(err: &AlignError) -> String {
    let kind = match err {
        AlignError::InputParse { .. } => "input-parse",
        AlignError::MissingLayer { .. } => "missing-layer",
        AlignError::DuplicateCorrespondence { .. } => "duplicate-correspondence",
        AlignError::NotEnoughDataPoints { .. } => "not-enough-data-points",
        AlignError::NonInvertibleModel => "non-invertible-model",
        AlignError::MeshCollapse { .. } => "mesh-collapse",
        AlignError::ConvergenceTimeout { .. } => "convergence-timeout",
        AlignError::Canceled { .. } => "canceled",
        AlignError::Io { .. } => "io",
    };
    format!("[{kind}] {err}")
}

fn run() -> Result<(), AlignError> {
    let cli = Cli::parse();
    init_logging(&cli);

    let file_overrides = match &cli.config_file {
        Some(path) => config::load_config_file(path)?,
        None => AlignmentParamsOverrides::default(),
    };
    let params = config::resolve(cli_overrides(&cli), file_overrides);

    if params.threads > 0 {
        let _ = rayon::ThreadPoolBuilder::new().num_threads(params.threads).build_global();
    }

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        let mut escalated = false;
        if let Err(e) = ctrlc::set_handler(move || {
            if escalated {
                eprintln!("Aborting immediately");
                std::process::exit(130);
            }
            escalated = true;
            info!("received interrupt, stopping at the next phase boundary");
            cancel.set();
        }) {
            error!("failed to install interrupt handler: {e}");
        }
    }

    let inputs = AlignmentInputs {
        tilespec_files: expand_list_files(&cli.tilespec_files)?,
        corr_files: expand_list_files(&cli.corr_files)?,
        fixed_layers: cli.fixed_layers.iter().map(|&l| LayerIndex(l)).collect::<HashSet<_>>(),
        skip_layers: SkipSet::parse(&cli.skip_layers)?,
        from_layer: cli.from_layer,
        to_layer: cli.to_layer,
        image_width: cli.image_width,
        image_height: cli.image_height,
        scene_origin: Vec2::new(cli.start_x, cli.start_y),
        target_dir: cli.target_dir.clone(),
    };

    info!(
        target: "wiring",
        "starting alignment: {} tile-spec file(s), {} correspondence file(s) -> {}",
        inputs.tilespec_files.len(),
        inputs.corr_files.len(),
        inputs.target_dir.display()
    );

    let report = align::run(&params, &inputs, &cancel)?;
    info!("run complete: status={:?}, dropped {} out-of-mesh matches", report.status, report.dropped_out_of_mesh_matches);
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", error_tag(&err));
            error!("{err:#}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

