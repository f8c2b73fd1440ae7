use std::path::PathBuf;
use std::time::Instant;

use aerial_orthomosaic::config::ProjectConfig;
use aerial_orthomosaic::pipeline::{run, write_outputs};
use clap::Parser;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Project configuration JSON
    config: PathBuf,

    /// Root directory for per-project outputs
    #[arg(short, long, default_value = "output")]
    output_root: PathBuf,

    /// Worker threads, 0 uses every core
    #[arg(short, long, default_value = "0")]
    threads: usize,

    /// Skip the quick-look PNG
    #[arg(long)]
    no_preview: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()?;
    }

    let config = ProjectConfig::load(&args.config)?;
    let paths = config.output_paths(&args.output_root);
    let now = Instant::now();
    let output = run(&config)?;
    write_outputs(&output, &paths, !args.no_preview)?;

    println!(
        "{}: {}x{} pixels, {} bands, {} frames in mosaic, {:.3} sec",
        config.project_name,
        output.mosaic.width(),
        output.mosaic.height(),
        output.mosaic.band_count(),
        output.mosaic.frame_ids.len(),
        now.elapsed().as_secs_f64()
    );
    let excluded = &output.report.excluded_frames;
    if !excluded.is_empty() {
        println!("excluded frames:");
        for e in excluded {
            println!("    {}: {}", e.frame, e.reason);
        }
    }
    println!("raster: {}", paths.raster.display());
    Ok(())
}
