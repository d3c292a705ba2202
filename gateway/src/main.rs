#![forbid(unsafe_code)]

use std::sync::Arc;

use clap::Parser;
use eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ethgate_core::{AddressBook, HdWallet};
use ethgate_ethereum::{HttpRpc, SolcCompiler};

use ethgate_gateway::addressbook::RestAddressBook;
use ethgate_gateway::hdwallet::RestHdWallet;
use ethgate_gateway::metrics::GatewayMetrics;
use ethgate_gateway::processor::TxnProcessor;
use ethgate_gateway::registry::openapi_gen::Abi2OpenApi;
use ethgate_gateway::registry::ContractStore;
use ethgate_gateway::server::{router, AppState};
use ethgate_gateway::settings::{Opts, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = Opts::parse();
    let settings = Settings::load(&opts)?;
    info!(
        listen = %settings.listen,
        rpc = %settings.rpc_url,
        openapi_path = %settings.openapi_path.display(),
        "starting gateway"
    );

    std::fs::create_dir_all(&settings.openapi_path)?;

    let metrics = Arc::new(GatewayMetrics::new()?);
    let rpc = Arc::new(HttpRpc::connect(&settings.rpc_url)?);
    let hdwallet = settings
        .hd_wallet_url_template
        .clone()
        .map(|template| Arc::new(RestHdWallet::new(template)) as Arc<dyn HdWallet>);
    let addressbook = settings
        .address_book_url_prefix
        .clone()
        .map(|prefix| Arc::new(RestAddressBook::new(prefix, rpc.clone())) as Arc<dyn AddressBook>);

    // The processor is the submission side of the gateway: callers (e.g. the
    // method-invocation router layered on top of this crate) feed it via
    // TxnProcessor::on_message and receive exactly one reply per request.
    let processor = TxnProcessor::new(
        settings.processor_config(),
        rpc,
        hdwallet,
        addressbook,
        metrics.clone(),
    );

    let store = Arc::new(ContractStore::new(
        settings.registry_config(),
        Arc::new(Abi2OpenApi::new(&settings.openapi_base_url)?),
        Arc::new(SolcCompiler::default()),
    ));
    store.build_index();

    let state = Arc::new(AppState {
        store,
        events: None,
        archive: None,
        metrics,
    });

    let addr = settings.listen.parse()?;
    info!(%addr, "gateway listening");
    axum::Server::bind(&addr)
        .serve(router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    processor.shutdown().await;
    Ok(())
}
