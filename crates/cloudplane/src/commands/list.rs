use crate::utils;
use cloudplane_core::{Context, Filters, write_result};
use cloudplane_provider::Listing;
use colored::Colorize;
use std::path::Path;

pub async fn handle<L: Listing>(
    lifecycle: &L,
    ctx: &Context,
    filters: &Filters<L::Key>,
    workers: usize,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let items = match lifecycle.list(ctx, filters, workers).await {
        Ok(items) => items,
        Err(e) => utils::fail(e),
    };

    match output {
        Some(path) => {
            write_result(path, &items).await?;
            eprintln!(
                "{} Wrote {} {}(s) to {}",
                "✓".green(),
                items.len(),
                lifecycle.kind(),
                path.display().to_string().cyan()
            );
            Ok(())
        }
        None => utils::print_json(&items),
    }
}
