use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use arclight::{
    AppState, Capture, Collection, CollectionConfig, LogNotifier, MemoryStore, Prefixes,
    PrefixTransforms, ServerConfig,
};

/// Serve archived captures back as replayable pages.
#[derive(Parser, Debug)]
#[command(name = "arclight", version, about)]
struct Args {
    /// Host address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// URL prefix all collections are served under.
    #[arg(long, default_value = "/w/")]
    prefix: String,

    /// Where the replay client scripts are served from.
    #[arg(long, default_value = "/static/")]
    static_prefix: String,

    /// JSON manifest of collections and captures to serve.
    manifest: PathBuf,
}

/// On-disk manifest format.
#[derive(Debug, Deserialize)]
struct Manifest {
    collections: Vec<ManifestCollection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestCollection {
    name: String,
    #[serde(default)]
    root: bool,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    top_template_url: Option<String>,
    captures: Vec<ManifestCapture>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestCapture {
    url: String,
    timestamp: String,
    content_type: String,
    body: String,
    #[serde(default)]
    page: bool,
    #[serde(default)]
    no_rewrite: bool,
}

fn load_collections(args: &Args) -> Result<Vec<Collection>> {
    let raw = std::fs::read_to_string(&args.manifest)
        .with_context(|| format!("reading manifest {}", args.manifest.display()))?;
    let manifest: Manifest = serde_json::from_str(&raw)
        .with_context(|| format!("parsing manifest {}", args.manifest.display()))?;

    let mut collections = Vec::with_capacity(manifest.collections.len());
    for coll in manifest.collections {
        let captures = coll
            .captures
            .into_iter()
            .map(|c| {
                let mut capture = Capture::new(&c.url, &c.timestamp, &c.content_type, c.body);
                if c.page {
                    capture = capture.page();
                }
                if c.no_rewrite {
                    capture = capture.no_rewrite();
                }
                capture
            })
            .collect();

        tracing::info!(collection = %coll.name, root = coll.root, "loaded collection");

        collections.push(Collection::new(
            coll.name,
            Arc::new(MemoryStore::new(captures)),
            CollectionConfig {
                root: coll.root,
                source_url: coll.source_url,
                top_template_url: coll.top_template_url,
                ..Default::default()
            },
            Prefixes {
                main: args.prefix.clone(),
                root: None,
                static_prefix: args.static_prefix.clone(),
            },
            Arc::new(PrefixTransforms),
            Arc::new(LogNotifier),
        ));
    }
    Ok(collections)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let collections = load_collections(&args)?;
    let state = AppState::new(collections);

    let config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
        cors_permissive: true,
    };

    arclight::run_server(state, config).await
}
