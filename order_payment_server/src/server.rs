use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, web::ServiceConfig, App, HttpServer};
use log::*;
use order_payment_engine::{
    events::EventHandlers,
    traits::PaymentGatewayDatabase,
    CallbackResolver,
    OrderFlowApi,
    ReconciliationApi,
    SqliteDatabase,
};
use provider_tools::build_registry;

use crate::{
    config::{RequestOptions, ServerConfig},
    errors::ServerError,
    event_hooks::logging_hooks,
    reconciliation_worker::start_reconciliation_worker,
    routes::{
        health,
        CancelPaymentRoute,
        CreateOrderRoute,
        OpenSessionRoute,
        OrderByIdRoute,
        PaymentByIdRoute,
        PaymentEventsRoute,
        PaymentReturnRoute,
        PaymentWebhookRoute,
        RefundPaymentRoute,
        UpdateOrderStatusRoute,
    },
};

const EVENT_BUFFER_SIZE: usize = 128;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, config.db_max_connections)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let providers = build_registry(&config.providers).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    if providers.is_empty() {
        warn!("💻️ No payment provider is configured. Orders can be created, but not paid for.");
    }
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, logging_hooks());
    let producers = handlers.producers();
    handlers.start_handlers().await;
    // A single orchestrator instance, so that the request handlers and the worker share the per-order locks
    let api = OrderFlowApi::new(db, providers, producers).with_config(config.order_flow.clone());
    let _worker = start_reconciliation_worker(ReconciliationApi::new(api.clone()), config.reconciliation.clone());
    let srv = create_server_instance(config, api)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(config: ServerConfig, api: OrderFlowApi<SqliteDatabase>) -> Result<Server, ServerError> {
    let resolver = CallbackResolver::new(api.clone());
    let options = RequestOptions::from(&config);
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("opg::access_log"))
            .app_data(web::Data::new(api.clone()))
            .app_data(web::Data::new(resolver.clone()))
            .app_data(web::Data::new(options.clone()))
            .configure(configure_routes::<SqliteDatabase>)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}

/// Registers every endpoint. `/payments/return` must be registered ahead of `/payments/{payment_id}`.
pub fn configure_routes<B: PaymentGatewayDatabase + 'static>(cfg: &mut ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        debug!("💻️ Rejecting request body. {err}");
        ServerError::InvalidRequestBody(err.to_string()).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| ServerError::InvalidRequestPath(err.to_string()).into()))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| ServerError::InvalidQuery(err.to_string()).into()))
    .service(health)
    .service(CreateOrderRoute::<B>::new())
    .service(OrderByIdRoute::<B>::new())
    .service(UpdateOrderStatusRoute::<B>::new())
    .service(OpenSessionRoute::<B>::new())
    .service(PaymentReturnRoute::<B>::new())
    .service(PaymentWebhookRoute::<B>::new())
    .service(PaymentByIdRoute::<B>::new())
    .service(CancelPaymentRoute::<B>::new())
    .service(RefundPaymentRoute::<B>::new())
    .service(PaymentEventsRoute::<B>::new());
}
