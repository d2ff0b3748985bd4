//! `nixload info` command.

use clap::Args;
use nixload_core::NixloadConfig;

use crate::output;

#[derive(Args)]
pub struct InfoArgs;

pub async fn execute(_args: InfoArgs, config: &NixloadConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("nixload version {}", nixload_core::VERSION);

    let runtime = super::open_runtime(config)?;
    let loader = runtime.loader();

    println!("Strategy: {} (configured: {})", loader.strategy(), config.strategy);
    println!("Enabled: {}", loader.is_enabled());
    println!(
        "Tag namespace: {}",
        loader.tag_namespace().unwrap_or("<none>")
    );

    match config.cache_dir() {
        Some(dir) => println!("Cache directory: {}", dir.display()),
        None => println!("Cache directory: <disabled>"),
    }
    println!("Store directory: {}", runtime.store().store_dir().display());

    let images = runtime.list_images().await;
    println!(
        "Images: {} stored ({} of {})",
        images.len(),
        output::format_bytes(runtime.store().total_size().await),
        output::format_bytes(runtime.store().max_size_bytes())
    );

    Ok(())
}
