use fulfillment::{
    api,
    cardano::CardanoService,
    catalogue::CatalogueService,
    config::Config,
    database::Database,
    metrics::{self, Metrics},
    now_payments::NowPaymentsService,
    orders::OrderService,
};
use std::{net::SocketAddr, path::Path, process::exit, sync::Arc};
use tokio::task;

const EXIT_MISSING_CONFIG_ARG: i32 = 2;
const EXIT_CONFIG_LOAD: i32 = 3;
const EXIT_CONFIG_VALIDATE: i32 = 4;
const EXIT_DATABASE_INIT: i32 = 5;
const EXIT_NOW_PAYMENTS_INIT: i32 = 6;
const EXIT_CARDANO_INIT: i32 = 7;
const EXIT_ROUTER: i32 = 8;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "order fulfillment server"
    );

    let mut args = std::env::args();
    let config_path = match (args.nth(1), args.next()) {
        (Some(path), None) => path,
        _ => {
            eprintln!("usage: fulfillment <config.yaml>");
            exit(EXIT_MISSING_CONFIG_ARG);
        }
    };

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(?err, "failed to load config");
            exit(EXIT_CONFIG_LOAD);
        }
    };
    if let Err(err) = config.validate() {
        tracing::error!(?err, "failed to validate config");
        exit(EXIT_CONFIG_VALIDATE);
    }
    tracing::info!(%config_path, mocked = config.mocked, "starting server");

    let address: SocketAddr = match format!("{}:{}", config.server.host, config.server.port).parse()
    {
        Ok(address) => address,
        Err(err) => {
            tracing::error!(?err, "failed to parse bind address");
            exit(EXIT_ROUTER);
        }
    };

    if config.mocked {
        let filter = api::mocked::handle_all_routes();
        let (bound, server) = match warp::serve(filter).try_bind_ephemeral(address) {
            Ok(bound) => bound,
            Err(err) => {
                tracing::error!(?err, "failed to bind server");
                exit(EXIT_ROUTER);
            }
        };
        tracing::info!(%bound, "serving mocked order fulfillment");
        let serve_task = task::spawn(server);
        tokio::select! {
            result = serve_task => tracing::error!(?result, "serve task exited"),
            _ = tokio::signal::ctrl_c() => tracing::info!("received shutdown signal"),
        }
        exit(0);
    }

    let metrics = Arc::new(Metrics::new().expect("failed to register metrics"));

    let database = match Database::new(&config) {
        Ok(database) => Arc::new(database),
        Err(err) => {
            tracing::error!(?err, "failed to initialize database");
            exit(EXIT_DATABASE_INIT);
        }
    };

    let now_payments = match NowPaymentsService::new(&config.now_payments) {
        Ok(now_payments) => Arc::new(now_payments),
        Err(err) => {
            tracing::error!(?err, "failed to initialize NowPayments client");
            exit(EXIT_NOW_PAYMENTS_INIT);
        }
    };

    if !Path::new(&config.cardano.hot_wallet_signing_key_path).is_file() {
        tracing::error!(
            path = %config.cardano.hot_wallet_signing_key_path,
            "hot wallet signing key not found"
        );
        exit(EXIT_CARDANO_INIT);
    }
    let catalogue = Arc::new(CatalogueService::new(database.clone()));
    let cardano = Arc::new(CardanoService::new(
        &config.cardano,
        database.clone(),
        catalogue.clone(),
        metrics.clone(),
    ));

    let orders = Arc::new(OrderService::new(
        database,
        now_payments.clone(),
        catalogue,
        cardano,
        metrics.clone(),
    ));

    let filter = api::handle_all_routes(
        orders.clone(),
        now_payments,
        metrics.clone(),
        config.now_payments.ipn_verification_enabled,
    );
    let (bound, server) = match warp::serve(filter).try_bind_ephemeral(address) {
        Ok(bound) => bound,
        Err(err) => {
            tracing::error!(?err, "failed to bind server");
            exit(EXIT_ROUTER);
        }
    };
    tracing::info!(%bound, "serving order fulfillment");

    let serve_task = task::spawn(server);
    let payment_watcher = orders.watch_orders_for_payment();
    let fulfillment_watcher = orders.watch_orders_for_fulfillment();
    let status_task = task::spawn(metrics::record_status(
        metrics,
        config.monitoring.status_url.clone(),
    ));

    tokio::select! {
        result = serve_task => tracing::error!(?result, "serve task exited"),
        result = payment_watcher => tracing::error!(?result, "payment watcher exited"),
        result = fulfillment_watcher => tracing::error!(?result, "fulfillment watcher exited"),
        result = status_task => tracing::error!(?result, "status monitor exited"),
        _ = tokio::signal::ctrl_c() => tracing::info!("received shutdown signal"),
    }

    exit(0);
}
