use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::prelude::*;

use portal::catalog::StaticCatalog;
use portal::config::PortalConfig;
use portal::file_source::{DownloadRequest, FileSource, HttpFileSource};
use portal_core::deeplink::resolve;
use portal_core::geometry::{Size, Transform};
use portal_core::target::tunnel_name;
use portal_core::transfer::upload_frames;

#[derive(Parser)]
#[command(name = "portal")]
#[command(about = "Inspect and drive multiplexed remote sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.config/portal/portal.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a deep link against a catalog and show the tunnel it opens
    Resolve(ResolveArgs),

    /// Print the transfer frames that saving a local file would emit
    Frames(FramesArgs),

    /// Compute the transform fitting a remote display into a container
    Fit(FitArgs),

    /// Download a remote file and write it to stdout
    Fetch(FetchArgs),
}

#[derive(Parser)]
struct ResolveArgs {
    /// Server id or `host-container` pair
    link: String,

    /// TOML catalog of servers and container hosts
    #[arg(long)]
    catalog: PathBuf,
}

#[derive(Parser)]
struct FramesArgs {
    /// Destination path on the remote side
    remote_path: String,

    /// Local file whose contents are uploaded
    local_file: PathBuf,
}

#[derive(Parser)]
struct FitArgs {
    container_width: u32,
    container_height: u32,
    remote_width: u32,
    remote_height: u32,
}

#[derive(Parser)]
struct FetchArgs {
    server: String,
    identity: String,
    path: String,
}

#[derive(Serialize)]
struct FrameLine {
    opcode: u8,
    size: usize,
    payload: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "portal=debug,info"
    } else {
        "portal=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = PortalConfig::load(cli.config.as_deref())?;
    debug!(
        tunnel_base = %config.connector.tunnel_base,
        api_base = %config.api_base,
        "config loaded"
    );

    match cli.command {
        Commands::Resolve(args) => resolve_command(&config, args),
        Commands::Frames(args) => frames_command(args),
        Commands::Fit(args) => fit_command(args),
        Commands::Fetch(args) => fetch_command(&config, args).await,
    }
}

fn resolve_command(config: &PortalConfig, args: ResolveArgs) -> Result<()> {
    let catalog = StaticCatalog::load(&args.catalog)?;
    let resolved = match resolve(&catalog, &args.link) {
        Ok(resolved) => resolved,
        Err(err) => {
            debug!(link = %args.link, error = %err, "link did not resolve");
            println!("no session: {err}");
            return Ok(());
        }
    };

    let tunnel = tunnel_name(&resolved.target, resolved.kind);
    println!("target:  {:?}", resolved.target);
    println!("kind:    {:?}", resolved.kind);
    println!("tunnel:  {}{}", config.connector.tunnel_base, tunnel);
    println!("query:   {}", resolved.target.connect_query("<session-token>"));
    Ok(())
}

fn frames_command(args: FramesArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.local_file)
        .with_context(|| format!("Failed to read {:?} as UTF-8 text", args.local_file))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut count = 0;
    for frame in upload_frames(&args.remote_path, &text) {
        let bytes = frame.encode()?;
        let line = FrameLine {
            opcode: frame.opcode() as u8,
            size: bytes.len(),
            payload: String::from_utf8_lossy(&bytes[1..]).into_owned(),
        };
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
        count += 1;
    }
    info!(frames = count, bytes = text.len(), path = %args.remote_path, "frames written");
    Ok(())
}

fn fit_command(args: FitArgs) -> Result<()> {
    let container = Size::new(args.container_width, args.container_height);
    let remote = Size::new(args.remote_width, args.remote_height);
    let transform = Transform::fit(container, remote)
        .with_context(|| format!("Cannot fit {remote:?} into {container:?}"))?;

    let (width, height) = transform.scaled(remote);
    println!("scale:   {:.6}", transform.scale);
    println!("offset:  {:.1}, {:.1}", transform.offset_x, transform.offset_y);
    println!("scaled:  {width:.1} x {height:.1}");
    Ok(())
}

async fn fetch_command(config: &PortalConfig, args: FetchArgs) -> Result<()> {
    let session_token = config
        .session_token
        .clone()
        .context(
            "No session token configured (set auth.session_token or PORTAL_AUTH__SESSION_TOKEN)",
        )?;

    let request = DownloadRequest {
        server: args.server,
        identity: args.identity,
        path: args.path,
        session_token,
    };
    let body = HttpFileSource::new(&config.api_base)
        .download(&request)
        .await
        .with_context(|| format!("Failed to download {}", request.path))?;

    std::io::stdout().lock().write_all(&body)?;
    info!(path = %request.path, bytes = body.len(), "file fetched");
    Ok(())
}
