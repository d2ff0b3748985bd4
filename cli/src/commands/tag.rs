//! `nixload tag` command: create a tag that refers to an existing image.

use clap::Args;
use nixload_core::NixloadConfig;

#[derive(Args)]
pub struct TagArgs {
    /// Source image ID or name
    pub source: String,

    /// New name for the image
    pub target: String,
}

pub async fn execute(args: TagArgs, config: &NixloadConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = super::open_runtime(config)?;
    runtime.tag_image(&args.source, &args.target).await?;
    println!("{}", args.target);
    Ok(())
}
