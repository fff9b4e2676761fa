use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use tokio::task::LocalSet;

use vast_resolver::{
    BreakSchedule, HttpFetcher, MediaTarget, ResolveConfig, VastError, VastSession,
};

/// VAST resolver: follows wrapper chains and reports the ad to play
#[derive(Parser)]
#[command(name = "vast-resolve", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Settings {
    /// JSON file with resolver settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Maximum number of wrappers to follow
    #[arg(long, global = true, env = "VAST_WRAPPER_ABORT_LIMIT")]
    wrapper_abort_limit: Option<usize>,

    /// Allow pods when a wrapper does not say
    #[arg(long, global = true, env = "VAST_ALLOW_MULTIPLE_ADS")]
    allow_multiple_ads: Option<bool>,
}

impl Settings {
    fn load(&self) -> Result<ResolveConfig, VastError> {
        let mut config = match &self.config {
            Some(path) => ResolveConfig::from_json_file(path)?,
            None => ResolveConfig::default(),
        };
        if self.wrapper_abort_limit.is_some() {
            config.wrapper_abort_limit = self.wrapper_abort_limit;
        }
        if let Some(allow) = self.allow_multiple_ads {
            config.allow_multiple_ads = allow;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a VAST file or URL and describe the best ad
    Resolve {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Prefer the first pod member
        #[arg(long)]
        pods: bool,

        /// Print the full ad as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pick the media file closest to a player size
    Media {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        #[arg(long)]
        width: f64,

        #[arg(long)]
        height: f64,

        #[arg(long)]
        bitrate: Option<f64>,
    },

    /// List the tracking points of the best ad's linear creative
    Points {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,
    },

    /// List the breaks of a VMAP file or URL
    Breaks {
        /// Path to the VMAP file or URL
        #[arg(short, long)]
        input: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vast_resolver=info,vast_resolve=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.settings.load()?;

    LocalSet::new().run_until(run(cli.command, config)).await
}

async fn run(command: Commands, config: ResolveConfig) -> Result<(), Box<dyn std::error::Error>> {
    let session = VastSession::with_http(config.clone())?;

    match command {
        Commands::Resolve { input, pods, json } => {
            let settled = session.query(&input).settled().await;
            for failure in &settled.failures {
                eprintln!("failure: {}", failure);
            }

            let doc = settled.available?;
            let Some(id) = session.best_ad(doc, pods) else {
                println!("No playable ad");
                return Ok(());
            };

            let ad = session.ad(id);
            if json {
                println!("{}", serde_json::to_string_pretty(&*ad)?);
            } else {
                println!("Ad: {}", ad.tag_or("AdTitle", "(untitled)"));
                println!("System: {}", ad.tag_or("AdSystem", "(unknown)"));
                if let Some(linear) = ad.linear() {
                    let duration = linear
                        .duration()
                        .map(vast_resolver::timecode::format_timecode)
                        .unwrap_or_else(|| "unknown".to_string());
                    println!("Linear: {} ({} media files)", duration, linear.all_medias().len());
                }
                println!("Companions: {}", ad.companions().len());
                println!("Non-linears: {}", ad.non_linears().len());
                println!("Impressions: {}", ad.impression_urls().len());
            }
        }
        Commands::Media {
            input,
            width,
            height,
            bitrate,
        } => {
            let doc = session.query(&input).settled().await.available?;
            let target = MediaTarget {
                width,
                height,
                bitrate,
            };

            let best = session.best_ad(doc, config.allow_multiple_ads).and_then(|id| {
                let ad = session.ad(id);
                ad.linear()
                    .and_then(|linear| linear.best_media(&target))
                    .cloned()
            });
            match best {
                Some(media) => println!("{}", serde_json::to_string_pretty(&media)?),
                None => println!("No media file"),
            }
        }
        Commands::Points { input } => {
            let doc = session.query(&input).settled().await.available?;
            let points = session
                .best_ad(doc, config.allow_multiple_ads)
                .and_then(|id| session.ad(id).linear().map(|l| l.tracking_points()))
                .unwrap_or_default();

            for point in points {
                println!("{:>6}  {}", point.offset.to_string(), point.event);
            }
        }
        Commands::Breaks { input } => {
            let fetcher = HttpFetcher::new(&config)?;
            let mut schedule = BreakSchedule::load(&fetcher, &input).await?;
            info!("Loaded {} breaks from {}", schedule.len(), input);

            let positions = schedule.positions();
            schedule.resolve(&session);
            for (position, query) in positions.into_iter().zip(schedule.take_queries()) {
                let status = match query {
                    Some(query) => match query.settled().await.available {
                        Ok(doc) => match session.best_ad(doc, true) {
                            Some(id) => session.ad(id).tag_or("AdTitle", "ad").to_string(),
                            None => "no playable ad".to_string(),
                        },
                        Err(e) => format!("failed: {}", e),
                    },
                    None => "not resolved".to_string(),
                };
                println!("{:>10}  {}", position.to_string(), status);
            }
        }
    }

    Ok(())
}
