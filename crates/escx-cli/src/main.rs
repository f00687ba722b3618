use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn usage_exit() -> ! {
    eprintln!("Usage: escx <copy|validate> [config.toml]   (default config: escx.toml)");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mode = match args.get(1) {
        Some(m) => m.as_str(),
        None => usage_exit(),
    };
    let path_arg = match args.get(2) {
        Some(s) => s.as_str(),
        None => "escx.toml",
    };

    let config_file = std::path::Path::new(path_arg);
    let config_file_path_which_is_validated_to_exist = match config_file.try_exists()
        .context(format!("Configuration file may not exist, couldn't find it. Double check that it exists, or maybe, it's an issue with pwd/cwd and relative paths. In that case, use an absolute path, to be absolutely certain, you are not messing this up. Was checking here: '{}'", config_file.display()))?
    {
        true => Some(config_file),
        false => None,
    };

    let app_config = escx::load_config(config_file_path_which_is_validated_to_exist)
        .context("In escx-cli, main, we couldn't load the config, take a look at the file (and any ESCX_ env vars), make sure it's correct. Make sure you didn't forget something obvious, dumas")?;

    // ctrl-c flips the shared token; every stage drains and the job returns clean
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, winding down");
                cancel.cancel();
            }
        });
    }

    match mode {
        "copy" => {
            if let Err(err) = escx::run_copy(&app_config, cancel).await {
                error!("error: {:#}", err);
                for cause in err.chain().skip(1) {
                    error!("cause: {:#}", cause);
                }
                std::process::exit(1);
            }
        }
        "validate" => match escx::run_validate(&app_config, cancel).await {
            Ok(results) => info!("{results}"),
            Err(err) => {
                if let Some(escx::MissMatch(results)) = err.downcast_ref::<escx::MissMatch>() {
                    error!("{results}");
                    for detail in &results.details {
                        error!("  {detail}");
                    }
                    // 99 is the contract: "the copy is bad", distinct from "the tool broke"
                    std::process::exit(99);
                }
                error!("error: {:#}", err);
                for cause in err.chain().skip(1) {
                    error!("cause: {:#}", cause);
                }
                std::process::exit(1);
            }
        },
        _ => usage_exit(),
    }

    Ok(())
}
