//! `nixload resolve` command: show where a name resolves to, without importing.

use clap::Args;
use nixload_core::NixloadConfig;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct ResolveArgs {
    /// Image name (e.g., "app", "localhost/nix/app:1.0")
    pub name: String,

    /// Print the resolution result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(
    args: ResolveArgs,
    config: &NixloadConfig,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = super::open_runtime(config)?;
    let resolved = runtime.loader().resolve_image(&args.name, cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    println!("Location: {}", resolved.location);
    if let Some(name) = &resolved.canonical_name {
        println!("Name:     {name}");
    }
    if let Some(digest) = &resolved.digest {
        println!("Digest:   {digest}");
    }
    Ok(())
}
