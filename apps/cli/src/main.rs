//! StoryReel CLI: turn a one-line idea into a narrated short video.
//!
//! Plans a story with a text model, illustrates and narrates each segment,
//! then renders everything into one video with ffmpeg.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    // A missing .env file is fine; real environment variables still apply.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
