use std::sync::Arc;

use satcheld::daemon::{DaemonConfig, DaemonRuntime};
use satcheld::localdir::LocalDirBackend;
use satchel_plugin::PluginBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: satcheld");
            println!("  Serves the configured directory over the plugin bus.");
            println!("  SATCHELD_LOCAL_ROOT   directory to serve (default ~/Satchel)");
            println!("  SATCHELD_CACHE_DIR    cache for opened files");
            println!("  SATCHELD_AUTH_CMD     external authenticator command");
            return Ok(());
        }
        CliMode::Run => {}
    }
    let config = DaemonConfig::from_env()?;
    let backend: Arc<dyn PluginBackend> = Arc::new(LocalDirBackend::new(
        config.local_root.clone(),
        config.cache_root.clone(),
    ));
    let daemon = DaemonRuntime::bootstrap(config, backend).await?;
    daemon.run().await
}
