use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecache_core::{FaceMatcher, OnnxExtractor, ReconcileReport, ReferenceCache};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod frames;
mod validation;

use config::Config;
use frames::FrameSource;
use validation::ValidationClient;

#[derive(Parser)]
#[command(name = "facecache", about = "Reference face cache and frame recognition")]
struct Cli {
    /// Print progress while running
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the cached encodings with a folder of reference photos
    Sync {
        /// Folder of reference photos (file stem = identity name)
        folder: PathBuf,
    },
    /// List cached identity names
    List {
        folder: PathBuf,
    },
    /// Synchronize, then recognize faces in frame images
    Recognize {
        /// Folder of reference photos
        folder: PathBuf,
        /// Frame image files or directories of frames
        #[arg(required = true)]
        frames: Vec<PathBuf>,
        /// Maximum embedding distance accepted as a match
        #[arg(short, long)]
        tolerance: Option<f32>,
        /// Resize factor applied to frames before detection
        #[arg(short, long)]
        scale: Option<f32>,
        /// Look up a validation status for each recognized name
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::from_env();

    match cli.command {
        Commands::Sync { folder } => {
            let mut extractor = load_extractor(&config)?;
            let (cache, report) = sync(&mut extractor, &folder)?;
            print_report(&report);
            println!("{} identities cached", cache.len());
        }
        Commands::List { folder } => {
            let cache = ReferenceCache::load(&folder);
            if cache.is_empty() {
                println!("No identities cached");
            }
            for name in cache.names() {
                println!("{name}");
            }
        }
        Commands::Recognize {
            folder,
            frames: inputs,
            tolerance,
            scale,
            validate,
        } => {
            let matcher = FaceMatcher::new(check_tolerance(tolerance.unwrap_or(config.tolerance))?);
            let scale = check_scale(scale.unwrap_or(config.frame_scale))?;

            let mut extractor = load_extractor(&config)?;
            let (cache, report) = sync(&mut extractor, &folder)?;
            tracing::info!(?report, identities = cache.len(), "reference cache ready");

            let validator = if validate {
                Some(ValidationClient::new(config.validation_url.clone())?)
            } else {
                None
            };

            for frame in FrameSource::open(&inputs)? {
                let label = frame.path.display();
                let image = match frame.image {
                    Ok(image) => image,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable frame");
                        continue;
                    }
                };

                let matches = frames::recognize_frame(&matcher, &mut extractor, &image, &cache, scale);
                tracing::debug!(frame = %label, faces = matches.len(), "frame processed");

                for m in &matches {
                    let (top, left, bottom, right) = m.region.corners();
                    let mut line = format!("{label}\t{top},{left},{bottom},{right}\t{}", m.identity);
                    if let (Some(client), Some(name)) = (&validator, m.identity.name()) {
                        line.push('\t');
                        line.push_str(&client.status(name).await);
                    }
                    println!("{line}");
                }
            }
        }
    }

    Ok(())
}

fn load_extractor(config: &Config) -> Result<OnnxExtractor> {
    OnnxExtractor::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))
}

fn sync(extractor: &mut OnnxExtractor, folder: &Path) -> Result<(ReferenceCache, ReconcileReport)> {
    let mut cache = ReferenceCache::load(folder);
    let report = cache
        .reconcile(extractor)
        .with_context(|| format!("synchronizing {}", folder.display()))?;
    Ok((cache, report))
}

fn print_report(report: &ReconcileReport) {
    println!("Removed:  {}", report.removed);
    println!("Excluded: {}", report.excluded);
    println!(
        "Encoded:  {} / {}",
        report.encoded,
        report.encoded + report.rejected()
    );
    if report.rejected() > 0 {
        println!(
            "Failed:   {} (no face: {}, multiple faces: {}, unreadable: {})",
            report.rejected(),
            report.failed_no_face,
            report.failed_many_faces,
            report.failed_unreadable
        );
    }
}

fn check_tolerance(tolerance: f32) -> Result<f32> {
    anyhow::ensure!(
        tolerance.is_finite() && tolerance > 0.0,
        "tolerance must be a positive number, got {tolerance}"
    );
    Ok(tolerance)
}

fn check_scale(scale: f32) -> Result<f32> {
    anyhow::ensure!(scale > 0.0 && scale <= 1.0, "scale must be in (0, 1], got {scale}");
    Ok(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_recognize() {
        let cli = Cli::try_parse_from([
            "facecache", "-v", "recognize", "faces", "f1.png", "frames/", "--tolerance", "0.9", "--validate",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Recognize { folder, frames, tolerance, scale, validate } => {
                assert_eq!(folder, PathBuf::from("faces"));
                assert_eq!(frames.len(), 2);
                assert_eq!(tolerance, Some(0.9));
                assert_eq!(scale, None);
                assert!(validate);
            }
            _ => panic!("expected recognize"),
        }
    }

    #[test]
    fn test_tolerance_must_be_positive_and_finite() {
        assert_eq!(check_tolerance(0.9).unwrap(), 0.9);
        for bad in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(check_tolerance(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_scale_range() {
        assert_eq!(check_scale(1.0).unwrap(), 1.0);
        assert!(check_scale(0.0).is_err());
        assert!(check_scale(1.5).is_err());
        assert!(check_scale(f32::NAN).is_err());
    }

    #[test]
    fn test_negative_tolerance_parses_but_is_rejected() {
        let cli = Cli::try_parse_from(["facecache", "recognize", "faces", "f.png", "--tolerance=-1"]).unwrap();
        let Commands::Recognize { tolerance, .. } = cli.command else {
            panic!("expected recognize");
        };
        assert!(check_tolerance(tolerance.unwrap()).is_err());
    }

    #[test]
    fn test_recognize_requires_frames() {
        assert!(Cli::try_parse_from(["facecache", "recognize", "faces"]).is_err());
    }
}
