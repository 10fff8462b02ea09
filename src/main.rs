use anyhow::Result;
use clap::Parser;
use std::process;
use taskdag::cli::{Cli, Commands};
use taskdag::cli_handlers;
use taskdag::config::Config;
use taskdag::logging::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose)?;
    let config = Config::resolve(cli.overrides());

    match cli.command {
        Commands::Init => cli_handlers::handle_init(&config).await?,
        Commands::Add { title, desc, deps } => {
            cli_handlers::handle_add(&config, &title, desc.as_deref(), deps).await?
        }
        Commands::Edit {
            id,
            title,
            desc,
            no_desc,
            deps,
            no_deps,
        } => {
            cli_handlers::handle_edit(
                &config,
                id,
                title.as_deref(),
                desc.as_deref(),
                no_desc,
                deps,
                no_deps,
            )
            .await?
        }
        Commands::Rm { id } => cli_handlers::handle_rm(&config, id).await?,
        Commands::Show { id, json } => cli_handlers::handle_show(&config, id, json).await?,
        Commands::List { json } => cli_handlers::handle_list(&config, json).await?,
        Commands::Projects => cli_handlers::handle_projects(&config).await?,
        Commands::Depend { id, on_id } => cli_handlers::handle_depend(&config, id, on_id).await?,
        Commands::Undepend { id, on_id } => {
            cli_handlers::handle_undepend(&config, id, on_id).await?
        }
        Commands::Start { id } => cli_handlers::handle_start(&config, id).await?,
        Commands::Done { id } => cli_handlers::handle_done(&config, id).await?,
        Commands::Stop { id } => cli_handlers::handle_stop(&config, id).await?,
        Commands::Block { id } => cli_handlers::handle_block(&config, id).await?,
        Commands::Unblock { id } => cli_handlers::handle_unblock(&config, id).await?,
        Commands::Check { id, json } => cli_handlers::handle_check(&config, id, json).await?,
        Commands::Reorder { ids } => cli_handlers::handle_reorder(&config, &ids).await?,
        Commands::Recompute => cli_handlers::handle_recompute(&config).await?,
    }

    Ok(())
}
