//! # Stereo rectification tool
//!
//! Calibrates a stereo rig from a capture directory and writes the rectified
//! first pair, plus the copied label sidecar, to the output directory. The
//! checkerboard dimensions come from `HEIGHT_NUM` and `WIDTH_NUM`.

use std::path::PathBuf;

use clap::Parser;

use cv_stereo_pipeline::prelude::*;

#[derive(Debug, Parser)]
#[command(author, version, about = "Rectify the first stereo pair of a capture directory")]
struct Args {
    /// Directory containing LEFT/ and RIGHT/ capture images.
    input_dir: PathBuf,

    /// Directory to write the rectified LEFT/ and RIGHT/ images into.
    output_dir: PathBuf,
}

fn main() {
    env_logger::init();
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    let grid = GridConfig::from_env()?;
    rectify_directory(&args.input_dir, &args.output_dir, &grid)
}
