//! # Disparity mapping tool
//!
//! Computes disparity and depth products for one rectified stereo pair. Without
//! `--pair` the tool prints the numbered pair menu and exits; with it, the
//! selected pair is matched with the chosen algorithm and the results written
//! under `<output>/<session>/<algorithm>/`. The baseline and fallback focal
//! length come from the `BASE_LENGTH` and `FOCAL_LENGTH` environment variables.

use std::path::PathBuf;

use clap::Parser;

use cv_stereo_pipeline::prelude::*;

#[derive(Debug, Parser)]
#[command(author, version, about = "Disparity and depth maps from a rectified stereo pair")]
struct Args {
    /// Directory containing rectified LEFT/ and RIGHT/ images.
    input_dir: PathBuf,

    /// Directory to write the disparity products into.
    output_dir: PathBuf,

    /// Matching algorithm: 1 = block matching, 2 = semi-global matching.
    #[arg(short, long)]
    algorithm: u32,

    /// 1-based index of the pair to process; omit to list the available pairs.
    #[arg(short, long)]
    pair: Option<usize>,

    /// Show the normalised disparity map in a window.
    #[arg(short, long)]
    display: bool,
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
    let algorithm = Algorithm::from_selector(args.algorithm)?;

    let pair = match args.pair {
        Some(p) => p,
        None => {
            for line in list_pairs(&args.input_dir)? {
                println!("{line}");
            }
            return Ok(());
        }
    };

    let depth_config = DepthConfig::from_env()?;
    let products = disparity_pair(
        &args.input_dir,
        &args.output_dir,
        algorithm,
        pair,
        &depth_config,
        ZeroDisparity::default(),
    )?;
    println!("products written to {}", products.directory.display());

    if args.display {
        show_disparity(&products.image);
    }

    Ok(())
}

#[cfg(feature = "display")]
fn show_disparity(image: &image::GrayImage) {
    use minifb::{Key, Window, WindowOptions};

    let width = image.width() as usize;
    let height = image.height() as usize;

    let mut window = match Window::new("Disparity", width, height, WindowOptions::default()) {
        Ok(w) => w,
        Err(e) => {
            log::warn!("cannot open display window: {e}");
            return;
        }
    };
    window.limit_update_rate(Some(std::time::Duration::from_micros(16600)));

    let buffer: Vec<u32> = image
        .pixels()
        .map(|p| {
            let v = p[0] as u32;
            (v << 16) | (v << 8) | v
        })
        .collect();

    while window.is_open() && !window.is_key_down(Key::Escape) {
        if window.update_with_buffer(&buffer, width, height).is_err() {
            break;
        }
    }
}

#[cfg(not(feature = "display"))]
fn show_disparity(_image: &image::GrayImage) {
    log::warn!("--display requested but this build has no display feature");
}
