//! `nixload images` command.

use clap::Args;
use nixload_core::NixloadConfig;
use nixload_runtime::Image;

use crate::output;

#[derive(Args)]
pub struct ImagesArgs {
    /// Only show image IDs (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: ImagesArgs,
    config: &NixloadConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let headers = ["REPOSITORY", "TAG", "IMAGE ID", "SIZE", "LOADED"];
    if !config.images_dir().exists() {
        if !args.quiet {
            println!("{}", output::new_table(&headers));
        }
        return Ok(());
    }

    let runtime = super::open_runtime(config)?;
    let images = runtime.list_images().await;

    if args.quiet {
        for image in &images {
            println!("{}", image.short_id());
        }
        return Ok(());
    }

    let mut table = output::new_table(&headers);
    for row in images.iter().flat_map(ImageRow::from_image) {
        table.add_row(&[&row.repository, &row.tag, &row.id, &row.size, &row.loaded]);
    }

    println!("{table}");
    Ok(())
}

/// Display fields for one name of an image.
struct ImageRow {
    repository: String,
    tag: String,
    id: String,
    size: String,
    loaded: String,
}

impl ImageRow {
    /// One row per name; nameless images get a single `<none>` row.
    fn from_image(image: &Image) -> Vec<Self> {
        let row = |repository: &str, tag: &str| Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
            id: image.short_id().to_string(),
            size: output::format_bytes(image.size_bytes()),
            loaded: output::format_ago(&image.stored().loaded_at),
        };

        if image.names().is_empty() {
            return vec![row("<none>", "<none>")];
        }
        image
            .names()
            .iter()
            .map(|name| {
                let (repository, tag) = split_name(name);
                row(repository, tag.unwrap_or("<none>"))
            })
            .collect()
    }
}

/// Split `repo:tag` on the last colon after the last slash.
fn split_name(name: &str) -> (&str, Option<&str>) {
    let after_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[after_slash..].rfind(':') {
        Some(i) => (&name[..after_slash + i], Some(&name[after_slash + i + 1..])),
        None => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("app"), ("app", None));
        assert_eq!(split_name("nix/app:1.0"), ("nix/app", Some("1.0")));
        assert_eq!(split_name("localhost:5000/app"), ("localhost:5000/app", None));
        assert_eq!(
            split_name("localhost:5000/app:v2"),
            ("localhost:5000/app", Some("v2"))
        );
    }
}
