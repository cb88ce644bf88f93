use std::fs;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use icd_normalize::Normalizer;
use icd_terms::{AssetPaths, LoadMode, TerminologyIndex};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use pdf2icd::config::{DEFAULT_FUZZY_LIMIT, DEFAULT_FUZZY_THRESHOLD};
use pdf2icd::mentions::read_mentions_from_path;
use pdf2icd::{
    AppState, CancelFlag, MatchConfig, Resolver, TriageConfig, classify_document, poppler, router,
    tsv,
};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_ASSETS_DIR: &str = "assets";
const DEFAULT_MAX_BATCH: usize = 1000;
// US letter, in points.
const DEFAULT_PAGE_WIDTH: f64 = 612.0;
const DEFAULT_PAGE_HEIGHT: f64 = 792.0;

#[derive(Parser)]
#[command(name = "pdf2icd")]
#[command(about = "Resolve disease mentions to ICD codes and triage PDF pages for OCR")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
        host: String,
        #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long, env = "MAX_BATCH", default_value_t = DEFAULT_MAX_BATCH)]
        max_batch: usize,
        #[command(flatten)]
        assets: AssetArgs,
        #[command(flatten)]
        matching: MatchArgs,
        #[command(flatten)]
        triage: TriageArgs,
    },
    /// Resolve JSON-lines mentions into a TSV file.
    Resolve {
        /// One mention per line: a JSON object or a JSON string.
        #[arg(long)]
        mentions: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[command(flatten)]
        assets: AssetArgs,
        #[command(flatten)]
        matching: MatchArgs,
    },
    /// Classify pages from pdftotext output and an optional `pdfimages -list` listing.
    Triage {
        #[arg(long)]
        text: PathBuf,
        #[arg(long)]
        images: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_PAGE_WIDTH)]
        page_width: f64,
        #[arg(long, default_value_t = DEFAULT_PAGE_HEIGHT)]
        page_height: f64,
        /// Write JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        triage: TriageArgs,
    },
}

#[derive(Args)]
struct AssetArgs {
    #[arg(long, env = "ASSETS_DIR", default_value = DEFAULT_ASSETS_DIR)]
    assets_dir: PathBuf,
    #[arg(long, env = "ASSETS_LOAD_MODE", default_value = "mmap", value_parser = parse_load_mode)]
    load_mode: LoadMode,
    /// Extra `surface replacement...` lines layered over the clinical tables.
    #[arg(long, env = "NORMALIZER_TABLE")]
    normalizer_table: Option<PathBuf>,
}

#[derive(Args)]
struct MatchArgs {
    #[arg(long, env = "FUZZY_LIMIT", default_value_t = DEFAULT_FUZZY_LIMIT)]
    fuzzy_limit: usize,
    #[arg(long, env = "FUZZY_THRESHOLD", default_value_t = u32::from(DEFAULT_FUZZY_THRESHOLD))]
    fuzzy_threshold: u32,
}

#[derive(Args)]
struct TriageArgs {
    #[arg(long, env = "TRIAGE_MIN_CHARS_PER_SQ_INCH")]
    min_chars_per_sq_inch: Option<f64>,
    #[arg(long, env = "TRIAGE_MAX_NOISE_RATIO")]
    max_noise_ratio: Option<f64>,
    #[arg(long, env = "TRIAGE_MAX_IMAGE_COVERAGE")]
    max_image_coverage: Option<f64>,
    #[arg(long, env = "TRIAGE_IMAGE_TEXT_MIN_CHARS")]
    image_text_min_chars: Option<usize>,
    #[arg(long, env = "TRIAGE_BORDERLINE_MARGIN")]
    borderline_margin: Option<f64>,
}

impl MatchArgs {
    fn config(&self) -> Result<MatchConfig> {
        MatchConfig::new(self.fuzzy_limit, self.fuzzy_threshold).context("invalid matching options")
    }
}

impl TriageArgs {
    fn config(&self) -> Result<TriageConfig> {
        let defaults = TriageConfig::default();
        let config = TriageConfig {
            min_chars_per_sq_inch: self
                .min_chars_per_sq_inch
                .unwrap_or(defaults.min_chars_per_sq_inch),
            max_noise_ratio: self.max_noise_ratio.unwrap_or(defaults.max_noise_ratio),
            max_image_coverage: self.max_image_coverage.unwrap_or(defaults.max_image_coverage),
            image_text_min_chars: self
                .image_text_min_chars
                .unwrap_or(defaults.image_text_min_chars),
            borderline_margin: self.borderline_margin.unwrap_or(defaults.borderline_margin),
        };
        config.validate().context("invalid triage options")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            host,
            port,
            max_batch,
            assets,
            matching,
            triage,
        } => {
            let config = matching.config()?;
            let triage = triage.config()?;
            info!("binding to {host}:{port}");
            info!(
                "fuzzy matching: limit {}, threshold {}",
                config.fuzzy_limit, config.fuzzy_threshold
            );
            let resolver = load_resolver(&assets, config)?;
            let state = AppState {
                resolver: Arc::new(resolver),
                triage,
                max_batch,
            };
            let app = router(state).layer(TraceLayer::new_for_http());
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("invalid listen address {host}:{port}"))?;
            let listener = TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
        Commands::Resolve {
            mentions,
            output,
            assets,
            matching,
        } => {
            let config = matching.config()?;
            let resolver = load_resolver(&assets, config)?;
            let mentions = read_mentions_from_path(&mentions)
                .with_context(|| format!("reading {}", mentions.display()))?;
            info!("read {} mentions", mentions.len());
            let start = Instant::now();
            let results = resolver.resolve_batch(mentions, &CancelFlag::new())?;
            let resolved = results.iter().filter(|r| r.is_resolved()).count();
            info!(
                "resolved {resolved} of {} mentions in {} ms",
                results.len(),
                start.elapsed().as_millis()
            );
            tsv::write_results_to_path(&output, &results)
                .with_context(|| format!("writing {}", output.display()))?;
            info!("results written to {}", output.display());
        }
        Commands::Triage {
            text,
            images,
            page_width,
            page_height,
            output,
            triage,
        } => {
            let config = triage.config()?;
            let text = fs::read_to_string(&text)
                .with_context(|| format!("reading {}", text.display()))?;
            let listed = match images {
                Some(path) => {
                    let listing = fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    poppler::parse_image_listing(&listing)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => Vec::new(),
            };
            let pages = poppler::assemble_pages(&text, &listed, page_width, page_height);
            let classified = classify_document(&pages, &config);
            match output {
                Some(path) => {
                    let file = fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    serde_json::to_writer_pretty(io::BufWriter::new(file), &classified)?;
                }
                None => {
                    let mut stdout = io::stdout().lock();
                    serde_json::to_writer_pretty(&mut stdout, &classified)?;
                    writeln!(stdout)?;
                }
            }
        }
    }
    Ok(())
}

fn load_resolver(assets: &AssetArgs, config: MatchConfig) -> Result<Resolver> {
    let normalizer = match &assets.normalizer_table {
        Some(path) => Normalizer::load(path)
            .with_context(|| format!("loading normalizer table {}", path.display()))?,
        None => Normalizer::clinical(),
    };
    info!(
        "using assets at {} (mode: {:?})",
        assets.assets_dir.display(),
        assets.load_mode
    );

    let start = Instant::now();
    let paths = AssetPaths::in_dir(&assets.assets_dir);
    let index = TerminologyIndex::load_with_keys(&paths, assets.load_mode, |key| {
        normalizer.normalize(key)
    })
    .with_context(|| format!("loading assets from {}", assets.assets_dir.display()))?;
    info!("terminology loaded in {} ms", start.elapsed().as_millis());

    let start = Instant::now();
    let resolver = Resolver::with_normalizer(Arc::new(index), normalizer, config);
    info!("fuzzy candidates built in {} ms", start.elapsed().as_millis());
    Ok(resolver)
}

fn parse_load_mode(raw: &str) -> Result<LoadMode, String> {
    match raw.to_ascii_lowercase().as_str() {
        "mmap" => Ok(LoadMode::Mmap),
        "owned" => Ok(LoadMode::Owned),
        other => Err(format!("unknown load mode {other:?} (expected mmap or owned)")),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let max_level = env_filter
        .max_level_hint()
        .and_then(|hint| hint.into_level())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_max_level(max_level)
        .with_writer(io::stderr)
        .init();
}
