mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use facematch_core::gallery::{self, GalleryStore};
use facematch_core::{
    load_pixels, BoundingBox, EmbeddingExtractor, FaceMatch, Identity, MatchResult, PixelBuffer,
    Recognition, RecognitionSession, Scope, SessionConfig, SessionError, StorageLayout,
};
use facematch_onnx::OnnxExtractor;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "facematch",
    about = "Identify people in photos against an enrolled face gallery"
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use this user's private gallery instead of the global one
    #[arg(short, long, global = true)]
    user: Option<String>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show gallery size from the cache (no models needed)
    Stats,
    /// Build the gallery from the people folders
    Rebuild {
        /// Ignore the cache and re-encode every image
        #[arg(long)]
        force: bool,
    },
    /// Delete the cached gallery
    ClearCache,
    /// Identify the first face in each image
    Recognize {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Number of nearest candidates to list
        #[arg(long)]
        top: Option<usize>,
    },
    /// Identify every face in an image
    MatchAll { image: PathBuf },
    /// Enroll confirmed faces from an image
    Confirm {
        image: PathBuf,
        /// One label per detected face, in detection order ("unknown" or "?" to skip)
        #[arg(short, long = "label", required = true)]
        labels: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if cli.user.is_some() {
        config.user = cli.user;
    }

    let scope = match config.user.as_deref() {
        Some(name) => Scope::user(name).with_context(|| format!("invalid user name {name:?}"))?,
        None => Scope::Global,
    };
    let layout = StorageLayout::new(&config.data_dir);
    tracing::debug!(?config, %scope, "configuration resolved");

    match cli.command {
        Commands::Stats => stats(&layout, &scope, cli.json),
        Commands::ClearCache => clear_cache(&layout, &scope, cli.json),
        Commands::Rebuild { force } => {
            let mut session = open_session(&config, &layout, scope)?;
            let count = session.rebuild(force);
            let stats = session.stats();
            if cli.json {
                print_json(&json!({ "entries": count, "stats": stats }))?;
            } else {
                println!(
                    "Gallery rebuilt: {} entries, {} people",
                    stats.total_entries, stats.unique_labels
                );
            }
            Ok(())
        }
        Commands::Recognize { images, top } => {
            let pixels = images
                .iter()
                .map(|path| read_image(path))
                .collect::<Result<Vec<_>>>()?;
            let mut session = open_session(&config, &layout, scope)?;
            session.initialize();

            let results = session.recognize_batch(&pixels, top.unwrap_or(config.top_n));

            if cli.json {
                let reports: Vec<Value> = images
                    .iter()
                    .zip(&results)
                    .map(|(path, result)| recognition_json(path, result))
                    .collect();
                print_json(&reports)?;
            } else {
                for (path, result) in images.iter().zip(&results) {
                    print_recognition(path, result, images.len() > 1);
                }
            }

            let failed = results.iter().filter(|r| r.is_err()).count();
            if failed > 0 {
                bail!("recognition failed for {failed} of {} images", images.len());
            }
            Ok(())
        }
        Commands::MatchAll { image } => {
            let pixels = read_image(&image)?;
            let mut session = open_session(&config, &layout, scope)?;
            session.initialize();

            let faces = session.match_all_faces(&pixels)?;
            if cli.json {
                return print_json(&faces);
            }
            if faces.is_empty() {
                println!("No faces found");
            }
            for (i, face) in faces.iter().enumerate() {
                println!("Face {}: {}", i + 1, describe(face));
            }
            Ok(())
        }
        Commands::Confirm { image, labels } => {
            let pixels = read_image(&image)?;
            let mut session = open_session(&config, &layout, scope)?;
            session.initialize();

            let detected = session.match_all_faces(&pixels)?;
            let faces = pair_labels(&detected, &labels)?;
            let enrolled = session.confirm_and_enroll(&pixels, &faces);
            if enrolled == 0 {
                bail!("no faces were enrolled");
            }

            if cli.json {
                print_json(&json!({ "enrolled": enrolled, "stats": session.stats() }))
            } else {
                println!("Enrolled {enrolled} of {} faces", faces.len());
                Ok(())
            }
        }
    }
}

/// Report gallery size straight from the cache file.
fn stats(layout: &StorageLayout, scope: &Scope, json: bool) -> Result<()> {
    let paths = layout.paths(scope);
    let mut store = GalleryStore::new();
    let cached = store.load(&paths.cache_path);
    let stats = store.stats();
    let counts = store.label_counts();

    if json {
        return print_json(&json!({
            "scope": scope.to_string(),
            "cache": paths.cache_path,
            "cached": cached,
            "stats": stats,
            "labels": counts,
        }));
    }

    println!("Scope:   {scope}");
    println!("Cache:   {}", paths.cache_path.display());
    if !cached {
        println!("No usable cache; run `facematch rebuild`");
    }
    println!("Entries: {}", stats.total_entries);
    println!("People:  {}", stats.unique_labels);
    for (label, count) in &counts {
        println!("  {label}: {count}");
    }
    Ok(())
}

fn clear_cache(layout: &StorageLayout, scope: &Scope, json: bool) -> Result<()> {
    let paths = layout.paths(scope);
    let removed = gallery::remove_cache(&paths.cache_path)
        .with_context(|| format!("removing {}", paths.cache_path.display()))?;

    if json {
        print_json(&json!({ "removed": removed, "cache": paths.cache_path }))
    } else {
        if removed {
            println!("Removed {}", paths.cache_path.display());
        } else {
            println!("No cache at {}", paths.cache_path.display());
        }
        Ok(())
    }
}

/// Load the models and open the scope's session, degrading to an empty
/// detached session when storage cannot be created.
fn open_session(
    config: &Config,
    layout: &StorageLayout,
    scope: Scope,
) -> Result<RecognitionSession<OnnxExtractor>> {
    let extractor = OnnxExtractor::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let session_config = SessionConfig {
        match_threshold: config
            .match_threshold
            .unwrap_or_else(|| extractor.recommended_threshold()),
    };
    tracing::debug!(threshold = session_config.match_threshold, "match threshold");
    Ok(RecognitionSession::open_or_detached(layout, scope, extractor, session_config))
}

fn read_image(path: &Path) -> Result<PixelBuffer> {
    load_pixels(path).with_context(|| format!("reading image {}", path.display()))
}

/// Pair user-supplied labels with detected faces, in detection order.
fn pair_labels(faces: &[FaceMatch], labels: &[String]) -> Result<Vec<(Identity, BoundingBox)>> {
    if faces.len() != labels.len() {
        bail!(
            "{} faces detected but {} labels given",
            faces.len(),
            labels.len()
        );
    }
    Ok(faces
        .iter()
        .zip(labels)
        .map(|(face, label)| (parse_identity(label), face.bbox))
        .collect())
}

fn parse_identity(label: &str) -> Identity {
    let label = label.trim();
    if label.is_empty() || label == "?" || label.eq_ignore_ascii_case("unknown") {
        Identity::Unidentified
    } else {
        Identity::Identified(label.to_string())
    }
}

fn describe(face: &FaceMatch) -> String {
    let b = &face.bbox;
    let region = format!("[{:.0},{:.0} {:.0}x{:.0}]", b.x, b.y, b.width, b.height);
    match face.distance {
        Some(d) => format!("{} (distance {d:.4}) {region}", face.identity),
        None => format!("{} {region}", face.identity),
    }
}

fn describe_candidate(rank: usize, candidate: &MatchResult) -> String {
    format!(
        "  {rank}. {} (distance {:.4}, confidence {:.1}%)",
        candidate.label,
        candidate.distance,
        candidate.confidence()
    )
}

fn print_recognition(
    path: &Path,
    result: &Result<Option<Recognition>, SessionError>,
    with_name: bool,
) {
    if with_name {
        println!("{}:", path.display());
    }
    match result {
        Ok(Some(recognition)) => {
            println!("{}", describe(&recognition.face));
            for (i, candidate) in recognition.candidates.iter().enumerate() {
                println!("{}", describe_candidate(i + 1, candidate));
            }
        }
        Ok(None) => println!("No face found"),
        Err(e) => println!("Error: {e}"),
    }
}

fn recognition_json(path: &Path, result: &Result<Option<Recognition>, SessionError>) -> Value {
    let (face, candidates, error) = match result {
        Ok(Some(r)) => (Some(&r.face), r.candidates.as_slice(), None),
        Ok(None) => (None, &[][..], None),
        Err(e) => (None, &[][..], Some(e.to_string())),
    };
    let candidates: Vec<Value> = candidates
        .iter()
        .map(|c| json!({ "label": c.label, "distance": c.distance, "confidence": c.confidence() }))
        .collect();
    json!({ "image": path, "face": face, "candidates": candidates, "error": error })
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
