//! Tether Runtime
//!
//! Minimal binary that loads a guest module, links the jsutils plugin and
//! runs one exported entry function.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tether_core::HandleTable;
use tether_host::{BridgeConfig, JsUtils, PluginLoader};
use tracing_subscriber::EnvFilter;
use wasmi::{Engine, Linker, Module, Store};

#[derive(Debug, Parser)]
#[command(name = "tether", version, about = "Run a WASM guest against the host handle table")]
struct Args {
    /// Guest module (.wasm binary or .wat text)
    module: PathBuf,

    /// Exported function to call, signature `() -> ()`
    #[arg(long, default_value = "main")]
    entry: String,

    /// Bridge configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<BridgeConfig> {
    let Some(path) = path else {
        return Ok(BridgeConfig::default());
    };
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    BridgeConfig::from_json(&source).with_context(|| format!("parsing config {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    tracing::info!("Tether v{}", tether_core::VERSION);
    tracing::debug!(?config, "bridge configuration");

    let bytes = std::fs::read(&args.module)
        .with_context(|| format!("reading guest {}", args.module.display()))?;

    let engine = Engine::default();
    let module = Module::new(&engine, &bytes[..]).context("compiling guest module")?;
    let table = config.handle_table();
    tracing::debug!(policy = ?table.policy(), "handle table ready");
    let mut store = Store::new(&engine, table);

    let mut linker = <Linker<HandleTable>>::new(&engine);
    let mut loader = PluginLoader::new();
    loader.add_plugin(JsUtils::new(&config))?;
    loader.link(&mut linker)?;

    let instance = linker
        .instantiate(&mut store, &module)
        .context("instantiating guest")?
        .ensure_no_start(&mut store)
        .context("guest has a start function")?;

    let entry = instance
        .get_typed_func::<(), ()>(&store, &args.entry)
        .with_context(|| format!("guest export '{}'", args.entry))?;
    entry
        .call(&mut store, ())
        .with_context(|| format!("running '{}'", args.entry))?;

    let table = store.into_data();
    for (name, value) in table.counters().iter() {
        tracing::info!(counter = name, value, "bridge stats");
    }
    tracing::info!(live = table.len(), "guest finished");
    table.shutdown();

    Ok(())
}
