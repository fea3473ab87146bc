use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod app;
mod commands;
mod media;

#[derive(Parser)]
#[command(name = "anthara")]
#[command(about = "Anthara - answers with cited web sources, images and speech")]
#[command(version)]
struct Cli {
    /// Ask a single question and exit
    #[arg(short, long)]
    prompt: Option<String>,

    /// Image to send with the prompt (for editing)
    #[arg(short, long, requires = "prompt")]
    image: Option<PathBuf>,

    /// Deep research mode for the prompt
    #[arg(long)]
    deep: bool,

    /// Text model to use
    #[arg(short, long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = anthara_core::Settings::load();

    if let Some(ref model) = cli.model {
        settings.provider.text_model = model.clone();
    }

    if let Some(prompt) = cli.prompt {
        app::run_single_prompt(&settings, &prompt, cli.image.as_deref(), cli.deep).await?;
    } else {
        app::run_repl(settings).await?;
    }

    Ok(())
}
