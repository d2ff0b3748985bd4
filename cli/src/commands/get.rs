//! `nixload get` command: resolve, import and tag an image.

use std::time::Duration;

use clap::Args;
use nixload_core::NixloadConfig;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct GetArgs {
    /// Image name (e.g., "app", "nix/app:1.0")
    pub name: String,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

pub async fn execute(
    args: GetArgs,
    config: &NixloadConfig,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = super::open_runtime(config)?;

    let acquire = runtime.get_image(&args.name, cancel);
    let result = match args.timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), acquire)
            .await
            .map_err(|_| format!("timed out after {secs}s resolving {}", args.name))?,
        None => acquire.await,
    };

    match result {
        Ok(image) => {
            println!("{}", image.names().join(", "));
            println!("{}", image.digest());
            Ok(())
        }
        Err(e) if e.is_fallback_signal() => {
            eprintln!("No Nix store image for {}; pull it from a registry instead.", args.name);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
