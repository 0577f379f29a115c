use anyhow::Result;
use heron_engine::config::EngineConfig;

fn main() -> Result<()> {
    let _ = env_logger::try_init();
    let config = EngineConfig::load_or_default("config/engine.json");
    heron_engine::run(config)
}
