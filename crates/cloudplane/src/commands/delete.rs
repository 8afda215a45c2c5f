use crate::utils;
use cloudplane_core::{Context, DeleteOptions, Lifecycle, Reconciler, Removal};
use colored::Colorize;

pub async fn handle<L: Lifecycle>(
    reconciler: &Reconciler<L>,
    ctx: &Context,
    id: &str,
    force: bool,
    detach: bool,
) -> anyhow::Result<()> {
    let kind = reconciler.lifecycle().kind();
    let options = DeleteOptions { force, detach };

    let deleted = match reconciler.delete(ctx, id, &options).await {
        Ok(deleted) => deleted,
        Err(e) => utils::fail(e),
    };

    let id = deleted.id.to_string();
    match deleted.removal {
        Removal::AlreadyAbsent => {
            println!("{} {kind} {} was already gone", "✓".green(), id.cyan());
        }
        Removal::Absent => {
            println!("{} Deleted {kind} {}", "✓".green(), id.cyan().bold());
        }
        Removal::SoftDeleted => {
            println!(
                "{} Deleted {kind} {} (kept in the recycle bin)",
                "✓".green(),
                id.cyan().bold()
            );
            if !force {
                println!("  Run again with {} to purge it", "--force".bold());
            }
        }
    }
    utils::print_report(&deleted.report);
    Ok(())
}
