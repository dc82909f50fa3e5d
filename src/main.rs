use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use fern::colors::{Color, ColoredLevelConfig};
use log::{error, info, LevelFilter};

use wattbook::{
    download_story,
    error::{ErrorKind, Result},
    Credentials, WattpadClient,
};

#[derive(Parser)]
#[command(author, version, about = "Download Wattpad stories as EPUB")]
struct Cli {
    /// Numeric id of the story to download
    story_id: u64,

    /// Embed images found in chapter content
    #[arg(short, long)]
    images: bool,

    /// Wattpad username, for access-restricted stories
    #[arg(short, long, requires = "password")]
    username: Option<String>,

    /// Wattpad password
    #[arg(short, long, requires = "username")]
    password: Option<String>,

    /// Output file (default: derived from the story title)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Level of verbosity, can be used multiple times
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn setup_logger(verbosity: u8) -> std::result::Result<(), fern::InitError> {
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .debug(Color::Magenta);
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                colors.color(record.level()),
                message
            ))
        })
        .level(LevelFilter::Warn)
        .level_for("wattbook", level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let client = WattpadClient::new()?;
    let credentials = cli
        .username
        .zip(cli.password)
        .map(|(username, password)| Credentials { username, password });

    let output = download_story(&client, cli.story_id, cli.images, credentials.as_ref()).await?;

    let path = cli
        .output
        .unwrap_or_else(|| PathBuf::from(output.filename(cli.images)));
    tokio::fs::write(&path, &output.epub)
        .await
        .with_context(|| format!("unable to write {}", path.display()))?;
    info!("Saved \"{}\" to {}", output.story.title, path.display());

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = setup_logger(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", err);
        std::process::exit(1);
    }

    if let Err(err) = run(cli).await {
        error!("{}", err);
        std::process::exit(match err.kind() {
            ErrorKind::Authentication => 3,
            ErrorKind::NotFound => 4,
            ErrorKind::Upstream | ErrorKind::Internal => 1,
        });
    }
}
