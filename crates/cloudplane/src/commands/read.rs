use crate::utils;
use cloudplane_core::{Context, Lifecycle, Reconciler};
use colored::Colorize;

pub async fn handle<L: Lifecycle>(
    reconciler: &Reconciler<L>,
    ctx: &Context,
    id: &str,
    model: bool,
) -> anyhow::Result<()> {
    let kind = reconciler.lifecycle().kind();

    let found = if model {
        match reconciler.read_model(ctx, id).await {
            Ok(spec) => spec.map(serde_json::to_value).transpose()?,
            Err(e) => utils::fail(e),
        }
    } else {
        match reconciler.read(ctx, id).await {
            Ok(object) => object.map(serde_json::to_value).transpose()?,
            Err(e) => utils::fail(e),
        }
    };

    match found {
        Some(value) => utils::print_json(&value),
        None => {
            // absent is a normal answer: the caller should forget the id
            eprintln!("{} {kind} {} does not exist", "✗".yellow(), id.cyan());
            Ok(())
        }
    }
}
