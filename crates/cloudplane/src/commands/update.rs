use crate::utils;
use cloudplane_core::{Context, Lifecycle, Reconciler};
use colored::Colorize;

/// Without a prior spec the current remote state stands in for it.
pub async fn handle<L: Lifecycle>(
    reconciler: &Reconciler<L>,
    ctx: &Context,
    id: &str,
    prior: Option<L::Spec>,
    desired: &L::Spec,
) -> anyhow::Result<()> {
    let kind = reconciler.lifecycle().kind();

    let prior = match prior {
        Some(prior) => prior,
        None => match reconciler.read_model(ctx, id).await {
            Ok(Some(observed)) => observed,
            Ok(None) => {
                eprintln!("{} {kind} {} does not exist", "✗".red().bold(), id.cyan());
                std::process::exit(1);
            }
            Err(e) => utils::fail(e),
        },
    };

    let updated = match reconciler.update(ctx, id, &prior, desired).await {
        Ok(updated) => updated,
        Err(e) => utils::fail(e),
    };

    if updated.changed.is_empty() {
        eprintln!("{} {kind} {} is up to date", "✓".green(), id.cyan());
    } else {
        eprintln!(
            "{} Updated {kind} {} ({})",
            "✓".green(),
            updated.id.to_string().cyan().bold(),
            updated.changed.join(", ")
        );
    }
    utils::print_report(&updated.report);

    match &updated.object {
        Some(object) => utils::print_json(object),
        None => {
            eprintln!("{}", format!("{kind} {id} is no longer visible").yellow());
            Ok(())
        }
    }
}
