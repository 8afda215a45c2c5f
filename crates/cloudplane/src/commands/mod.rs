pub mod create;
pub mod delete;
pub mod list;
pub mod read;
pub mod update;

use crate::Commands;
use crate::utils;
use cloudplane_core::Context;
use cloudplane_provider::{Listing, Provider};
use tracing::debug;

/// Run one command against one object kind.
pub(crate) async fn run<L: Listing>(provider: &Provider, lifecycle: L, command: Commands) -> anyhow::Result<()> {
    let reconciler = provider.reconciler(lifecycle);
    debug!(kind = reconciler.lifecycle().kind(), region = %provider.config().region, "Dispatching command");

    match command {
        Commands::Read { id, model, .. } => {
            reconciler.parse_id(&id).unwrap_or_else(|e| utils::fail(e));
            read::handle(&reconciler, &connect(provider), &id, model).await
        }
        Commands::Create { spec, .. } => {
            let spec = utils::load_spec(&spec)?;
            create::handle(&reconciler, &connect(provider), &spec).await
        }
        Commands::Update {
            id, spec, prior, ..
        } => {
            reconciler.parse_id(&id).unwrap_or_else(|e| utils::fail(e));
            let desired = utils::load_spec(&spec)?;
            let prior = prior.as_deref().map(utils::load_spec).transpose()?;
            update::handle(&reconciler, &connect(provider), &id, prior, &desired).await
        }
        Commands::Delete {
            id, force, detach, ..
        } => {
            reconciler.parse_id(&id).unwrap_or_else(|e| utils::fail(e));
            delete::handle(&reconciler, &connect(provider), &id, force, detach).await
        }
        Commands::List {
            filters,
            workers,
            output,
            ..
        } => {
            let filters = utils::parse_filters(&filters, reconciler.lifecycle().filter_keys())
                .unwrap_or_else(|e| utils::fail(e));
            list::handle(
                reconciler.lifecycle(),
                &connect(provider),
                &filters,
                workers,
                output.as_deref(),
            )
            .await
        }
        Commands::Version => Ok(()),
    }
}

fn connect(provider: &Provider) -> Context {
    provider.connect().unwrap_or_else(|e| utils::fail(e))
}
