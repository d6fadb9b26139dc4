use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use studio_delivery::config::{default_cache_db_path, Config};
use studio_delivery::dom::{Document, Rect};
use studio_delivery::images::{FetchPathImages, ImagePipeline};
use studio_delivery::offline::push::Notification;
use studio_delivery::offline::{
    Fetch, Method, OfflineCache, Request, SiteDirectory, SqliteStorage, StaticManifest, Unreachable,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "studio-delivery", version)]
#[command(about = "Image delivery pipeline and offline asset cache for the studio website")]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Cache database (defaults to the user data directory)
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Origin the cache answers for
    #[arg(long, value_name = "URL", default_value = "https://studio.local/", global = true)]
    scope: Url,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether WebP images can be decoded
    Detect,
    /// Pre-cache the static assets, then drop stale partitions
    Install {
        /// Site directory serving as the network
        #[arg(long, value_name = "DIR")]
        site: PathBuf,
        /// Build the manifest from every file in the site
        #[arg(long)]
        scan: bool,
    },
    /// List cache partitions
    Partitions,
    /// Send one request through the cache
    Fetch {
        /// Path or URL, relative to the scope
        path: String,
        #[arg(long, value_name = "DIR")]
        site: PathBuf,
        /// Pretend the network is down
        #[arg(long)]
        offline: bool,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        accept: Option<String>,
        #[arg(long)]
        body: Option<String>,
    },
    /// Replay queued requests
    Sync {
        #[arg(long, value_name = "DIR")]
        site: PathBuf,
        #[arg(long)]
        offline: bool,
    },
    /// Load images through the cache and print their final sources
    Images {
        #[arg(long, value_name = "DIR")]
        site: PathBuf,
        #[arg(long)]
        offline: bool,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Show the notification a push payload would produce
    Notify {
        text: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let config = Config::load_or_default(&config_path)?;

    match &args.command {
        Command::Detect => {
            let pipeline = ImagePipeline::builder(
                Document::new().into_shared(),
                Arc::new(FetchPathImages::new(args.scope.clone(), Arc::new(Unreachable))),
            )
            .config(config.loader.clone())
            .build();
            let supported = pipeline.detect_format_support().await;
            println!("webp: {}", if supported { "supported" } else { "unsupported" });
        }
        Command::Install { site, scan } => {
            let mut cache = open_cache(&args, &config, network(site, false))?;
            if *scan {
                cache = cache.with_manifest(StaticManifest::scan(site));
            }
            let report = cache.install().await?;
            let deleted = cache.activate()?;
            println!("✅ Cached {} static assets", report.cached);
            for name in deleted {
                println!("🧹 Deleted {}", name);
            }
        }
        Command::Partitions => {
            let cache = open_cache(&args, &config, Arc::new(Unreachable))?;
            for name in cache.list_partitions()? {
                println!("{}", name);
            }
        }
        Command::Fetch {
            path,
            site,
            offline,
            method,
            accept,
            body,
        } => {
            let cache = open_cache(&args, &config, network(site, *offline))?;
            let url = args.scope.join(path)?;
            let method: Method = method.parse()?;
            let mut request = Request::new(method, url);
            if let Some(accept) = accept {
                request = request.with_header("accept", accept.as_str());
            }
            if let Some(body) = body {
                request = request.with_body(body.clone());
            }

            let outcome = cache.respond(&request).await;
            println!("{} {} ({:?})", request.key(), outcome.response.status, outcome.served);
            for (name, value) in outcome.response.headers.iter() {
                println!("{}: {}", name, value);
            }
            println!();
            println!("{}", outcome.response.text());
        }
        Command::Sync { site, offline } => {
            let cache = open_cache(&args, &config, network(site, *offline))?;
            let report = cache.sync(&config.cache.sync_tag).await?;
            println!(
                "🔁 Replayed {}, still queued {}",
                report.replayed, report.still_queued
            );
        }
        Command::Images { site, offline, urls } => {
            let cache = Arc::new(open_cache(&args, &config, network(site, *offline))?);
            let fetcher = Arc::new(FetchPathImages::new(args.scope.clone(), cache));

            let mut doc = Document::new();
            let body = doc.create_element("body", doc.root());
            let mut elements = Vec::with_capacity(urls.len());
            for (i, url) in urls.iter().enumerate() {
                let img = doc.create_element("img", body);
                doc.set_attribute(img, "data-src", url.as_str());
                if let Some(stem) = Path::new(url).file_stem() {
                    doc.set_attribute(img, "alt", stem.to_string_lossy().replace(['-', '_'], " "));
                }
                doc.set_rect(img, Rect::new(0.0, i as f64 * 420.0, 600.0, 400.0));
                elements.push((img, url));
            }

            let pipeline = ImagePipeline::builder(doc.into_shared(), fetcher)
                .config(config.loader.clone())
                .build();
            pipeline.detect_format_support().await;
            pipeline.start()?;
            let visible = pipeline.update_viewport(Rect::new(0.0, 0.0, 1280.0, 800.0));
            info!("{} images in the first viewport", visible);
            pipeline.force_load_remaining()?;
            pipeline.settle().await;

            let doc = pipeline.document().lock();
            for (img, url) in elements {
                let src = doc.attribute(img, "src").unwrap_or("-");
                println!("{} -> {} ({:?})", url, src, pipeline.state(img));
            }
        }
        Command::Notify { text } => {
            let notification = Notification::from_push(&config.cache.notification, text, Utc::now());
            println!("{}", serde_json::to_string_pretty(&notification)?);
        }
    }

    Ok(())
}

fn network(site: &Path, offline: bool) -> Arc<dyn Fetch> {
    if offline {
        Arc::new(Unreachable)
    } else {
        Arc::new(SiteDirectory::new(site))
    }
}

fn open_cache(args: &Args, config: &Config, network: Arc<dyn Fetch>) -> Result<OfflineCache, Box<dyn std::error::Error>> {
    let db_path = match &args.db {
        Some(path) => path.clone(),
        None => default_cache_db_path()?,
    };
    let storage = Arc::new(SqliteStorage::open_path(&db_path)?);
    info!("💾 Cache database: {}", db_path.display());
    Ok(OfflineCache::new(
        args.scope.clone(),
        config.cache.clone(),
        storage,
        network,
    ))
}
