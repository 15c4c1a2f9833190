use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dvc_registration::{
    ImageDumpObserver, LogObserver, RegistrationBox, RegistrationConfig, UserVolume, Volume,
    VolumeLoader, register_volumes,
};

#[derive(Parser)]
#[command(name = "dvc-register")]
#[command(about = "Coarse integer registration of two 3D volumes for DVC")]
struct Cli {
    /// Reference volume (.npy, or raw with --shape and --dtype)
    reference: PathBuf,

    /// Target volume, same shape and sample type as the reference
    target: PathBuf,

    /// Shape of raw volumes as D0,D1,D2
    #[arg(long, value_delimiter = ',', num_args = 3)]
    shape: Option<Vec<usize>>,

    /// Sample type of raw volumes, e.g. "<u2", "uint8", ">i2"
    #[arg(long, default_value = "uint8")]
    dtype: String,

    /// Point of interest as I,J,K
    #[arg(long, value_delimiter = ',', num_args = 3, required = true)]
    anchor: Vec<usize>,

    /// Correlation window as LO0,HI0,LO1,HI1,LO2,HI2
    #[arg(long, value_delimiter = ',', num_args = 6, conflicts_with = "box_size")]
    user_volume: Option<Vec<usize>>,

    /// Register in a box of this size around the anchor instead of the full volume
    #[arg(long)]
    box_size: Option<usize>,

    /// Largest accepted disagreement between the two observations of an axis
    #[arg(long, default_value_t = 2.0)]
    err_thresh: f64,

    /// Iteration cap
    #[arg(long, default_value_t = 30)]
    max_iterations: usize,

    /// Write slice, correlation and difference images of every iteration here
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Log every per-slice quantity
    #[arg(short, long)]
    verbose: bool,
}

fn triple(values: &[usize]) -> [usize; 3] {
    [values[0], values[1], values[2]]
}

fn load(path: &Path, cli: &Cli) -> Result<Volume> {
    let raw_layout = cli.shape.as_deref().map(|shape| (triple(shape), cli.dtype.as_str()));
    VolumeLoader::load(path, raw_layout).with_context(|| format!("loading {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let reference = load(&cli.reference, &cli)?;
    let target = load(&cli.target, &cli)?;
    info!(shape = ?reference.shape(), sample_type = %reference.sample_type(), "volumes loaded");

    let config = RegistrationConfig::default()
        .with_err_thresh(cli.err_thresh)
        .with_max_iterations(cli.max_iterations);
    let anchor = triple(&cli.anchor);

    let dump = cli
        .dump_dir
        .as_ref()
        .map(ImageDumpObserver::new)
        .transpose()
        .context("creating the dump directory")?;
    let verbose = cli.verbose.then_some(LogObserver);
    let observer = (verbose, dump);

    let outcome = match (cli.box_size, cli.user_volume.as_deref()) {
        (Some(box_size), _) => {
            let rbox = RegistrationBox::around(anchor, box_size, reference.shape())?;
            info!(extent = ?rbox.extent, user_volume = ?rbox.user_volume.bounds(), "registration box");
            rbox.register(&reference, &target, config, observer)?
        }
        (None, Some(bounds)) => {
            let user_volume = UserVolume::new([
                [bounds[0], bounds[1]],
                [bounds[2], bounds[3]],
                [bounds[4], bounds[5]],
            ])?;
            register_volumes(reference, target, anchor, user_volume, config, observer)?
        }
        (None, None) => {
            let user_volume = UserVolume::full(reference.shape())?;
            register_volumes(reference, target, anchor, user_volume, config, observer)?
        }
    };

    println!("accumulated shift: {:?}", outcome.accumulated_shift);
    println!("final anchor:      {:?}", outcome.anchor);
    println!("final shape:       {:?}", outcome.reference.shape());
    println!("residual error:    {:?}", outcome.residual_error);
    println!("iterations:        {}", outcome.iterations);
    println!("converged:         {}", outcome.converged);
    Ok(())
}
