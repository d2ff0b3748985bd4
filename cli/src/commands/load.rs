//! `nixload load` command: import an archive or layout directory.

use std::path::PathBuf;

use clap::Args;
use nixload_core::NixloadConfig;

#[derive(Args)]
pub struct LoadArgs {
    /// Docker archive (optionally gzipped), OCI archive or OCI layout directory
    pub path: PathBuf,

    /// Tag the first loaded image with this name
    #[arg(short, long)]
    pub tag: Option<String>,
}

pub async fn execute(args: LoadArgs, config: &NixloadConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !args.path.exists() {
        return Err(format!("Path not found: {}", args.path.display()).into());
    }

    let runtime = super::open_runtime(config)?;
    let images = runtime.load_image(&args.path).await?;
    let first = images
        .first()
        .ok_or_else(|| format!("No images found in {}", args.path.display()))?;

    if let Some(tag) = &args.tag {
        runtime.tag_image(first.id(), tag).await?;
    }

    for image in &images {
        if image.names().is_empty() {
            println!("Loaded image ID: {}", image.digest());
        }
        for name in image.names() {
            println!("Loaded image: {name}");
        }
    }
    if let Some(tag) = &args.tag {
        println!("Loaded image: {tag}");
    }
    Ok(())
}
