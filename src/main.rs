use clap::Parser;
use tracing::{error, info};

use storyshorts::args::Args;
use storyshorts::config::Config;
use storyshorts::{job, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = Config::from_args(&args)?;
    let (_guard, log_path) = logging::init_logging(&config.log_dir())?;
    info!("Starting story video generation pipeline");
    info!("Logging to {}", log_path.display());

    match job::run(&config).await {
        Ok(video) => {
            info!("Process complete: {}", video.display());
            Ok(())
        }
        Err(e) => {
            error!("Pipeline failed: {}", e);
            Err(e.into())
        }
    }
}
