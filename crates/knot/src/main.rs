use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use knot::config::{Config, ConfigArgs};
use knot::server::{render_page, router, AppState};
use knot_core::{DirectoryStore, LinkFormat, NoteStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(version, about)]
struct Opts {
    #[clap(subcommand)]
    subcmd: KnotSubcommand,
}

#[derive(Subcommand)]
enum KnotSubcommand {
    /// Serve notes over HTTP
    Serve {
        #[clap(flatten)]
        config: ConfigArgs,
    },

    /// Print a stored note as an HTML page
    Render {
        name: String,

        /// Render links for the public view
        #[clap(long)]
        public: bool,

        #[clap(flatten)]
        config: ConfigArgs,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn serve(config: Config) -> Result<()> {
    let addr = config.bind_addr();
    let state = Arc::new(AppState::open(config)?);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn render(config: Config, name: &str, public: bool) -> Result<()> {
    let store = DirectoryStore::open(&config.store.data_dir)?;
    let note = store
        .fetch_note(name)
        .await?
        .with_context(|| format!("No note named {}", name))?;
    let format = if public {
        LinkFormat::Public
    } else {
        config.editor.link_format
    };
    print!("{}", render_page(&note, format));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();

    match opts.subcmd {
        KnotSubcommand::Serve { config } => {
            let config = Config::load(&config)?;
            init_tracing(&config.server.log_level);
            serve(config).await
        }
        KnotSubcommand::Render { name, public, config } => {
            let config = Config::load(&config)?;
            init_tracing(&config.server.log_level);
            render(config, &name, public).await
        }
    }
}
