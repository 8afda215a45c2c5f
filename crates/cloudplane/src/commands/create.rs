use crate::utils;
use cloudplane_core::{Context, Lifecycle, Reconciler};
use colored::Colorize;

pub async fn handle<L: Lifecycle>(
    reconciler: &Reconciler<L>,
    ctx: &Context,
    spec: &L::Spec,
) -> anyhow::Result<()> {
    let kind = reconciler.lifecycle().kind();
    eprintln!("{}", format!("Creating {kind}...").blue());

    let created = match reconciler.create(ctx, spec).await {
        Ok(created) => created,
        Err(e) => utils::fail(e),
    };

    eprintln!(
        "{} Created {kind} {}",
        "✓".green(),
        created.id.to_string().cyan().bold()
    );
    utils::print_report(&created.report);
    utils::print_json(&created.object)
}
