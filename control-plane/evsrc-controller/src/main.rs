use envconfig::Envconfig;
use evsrc_controller::{config::ControllerConfig, init_tracing, runtime};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let cfg = ControllerConfig::init_from_env()?.apply_profile_defaults();
    info!(?cfg, "Starting event source controller");

    runtime::run_all(cfg).await
}
