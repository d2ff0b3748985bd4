//! `nixload rmi` command: remove one or more stored images.

use clap::Args;
use nixload_core::NixloadConfig;
use nixload_runtime::Removal;

#[derive(Args)]
pub struct RmiArgs {
    /// Image IDs or names to remove
    #[arg(required = true)]
    pub images: Vec<String>,

    /// Delete images even if they have other names; ignore missing ones
    #[arg(short, long)]
    pub force: bool,
}

pub async fn execute(args: RmiArgs, config: &NixloadConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = super::open_runtime(config)?;

    let mut errors: Vec<String> = Vec::new();

    for reference in &args.images {
        match runtime.remove_image(reference, args.force).await {
            Ok(Removal::Untagged(name)) => println!("Untagged: {name}"),
            Ok(Removal::Deleted(id)) => println!("Deleted: sha256:{id}"),
            Err(_) if args.force => continue,
            Err(e) => errors.push(format!("{reference}: {e}")),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = errors.join("\n");
        Err(format!("Failed to remove image(s):\n{msg}").into())
    }
}
