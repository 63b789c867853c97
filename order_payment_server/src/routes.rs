//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy.
//!
//! Every handler is generic over the storage backend, so that the endpoints can be exercised against an in-memory
//! database in tests. Actix cannot register generic handlers directly, which is what the `route!` macro is for.
//!
//! Long running work (provider calls, database access) is always awaited, never blocked on, since each worker thread
//! processes its requests sequentially.
use std::collections::HashMap;

use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use log::*;
use order_payment_engine::{
    db_types::{OrderId, PaymentId, ProviderCode},
    traits::PaymentGatewayDatabase,
    CallbackResolver,
    OrchestratorError,
    OrderFlowApi,
};

use crate::{
    config::RequestOptions,
    data_objects::{
        CallbackResponse,
        JsonResponse,
        NewOrderRequest,
        OpenSessionRequest,
        OrderStatusUpdate,
        PaymentSummary,
        RefundRequest,
    },
    errors::ServerError,
    helpers::{header_value, require_admin},
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(create_order => Post "/orders" impl PaymentGatewayDatabase);
/// Creates an order from the buyer's cart lines. The total price is computed here and is fixed from then on.
pub async fn create_order<B: PaymentGatewayDatabase>(
    body: web::Json<NewOrderRequest>,
    api: web::Data<OrderFlowApi<B>>,
    options: web::Data<RequestOptions>,
) -> Result<HttpResponse, ServerError> {
    let order = body.into_inner().into_new_order(&options.default_currency);
    debug!("💻️ POST new order with {} line items", order.line_items.len());
    let order = api.create_order(order).await?;
    Ok(HttpResponse::Created().json(order))
}

route!(order_by_id => Get "/orders/{order_id}" impl PaymentGatewayDatabase);
/// The order together with its current payment and the full payment history.
pub async fn order_by_id<B: PaymentGatewayDatabase>(
    path: web::Path<OrderId>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    debug!("💻️ GET order {order_id}");
    let order = api.fetch_order_with_payments(&order_id).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(update_order_status => Patch "/orders/{order_id}/status" impl PaymentGatewayDatabase);
/// Administrative. Moves an order along the fulfillment path. An order only becomes `processing` through payment, so
/// `pending -> processing` is refused here.
pub async fn update_order_status<B: PaymentGatewayDatabase>(
    req: HttpRequest,
    path: web::Path<OrderId>,
    body: web::Json<OrderStatusUpdate>,
    api: web::Data<OrderFlowApi<B>>,
    options: web::Data<RequestOptions>,
) -> Result<HttpResponse, ServerError> {
    require_admin(&req, &options.admin_token)?;
    let order_id = path.into_inner();
    let target = body.into_inner().status;
    info!("💻️ PATCH order {order_id} status to {target}");
    let order = api.transition_order_status(&order_id, target).await?;
    Ok(HttpResponse::Ok().json(order))
}

//----------------------------------------------  Payments  ----------------------------------------------------
route!(open_session => Post "/payments" impl PaymentGatewayDatabase);
/// Opens a checkout session with the chosen provider. The caller redirects the buyer to `checkout_url`.
pub async fn open_session<B: PaymentGatewayDatabase>(
    body: web::Json<OpenSessionRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let OpenSessionRequest { order_id, provider } = body.into_inner();
    debug!("💻️ POST payment for order {order_id} with {provider}");
    let session = api.open_session(&order_id, provider).await?;
    Ok(HttpResponse::Created().json(session))
}

route!(payment_return => Get "/payments/return" impl PaymentGatewayDatabase);
/// The provider sends the buyer's browser here once checkout is over. The `provider` parameter selects the adapter;
/// the rest of the query string is provider specific.
///
/// Whatever the query string claims, the status reported back is the one the provider confirms.
pub async fn payment_return<B: PaymentGatewayDatabase>(
    query: web::Query<HashMap<String, String>>,
    resolver: web::Data<CallbackResolver<B>>,
) -> Result<HttpResponse, ServerError> {
    let params = query.into_inner();
    let provider =
        params.get("provider").ok_or_else(|| ServerError::InvalidQuery("The provider parameter is missing".into()))?;
    let provider = parse_provider(provider)?;
    debug!("💻️ GET {provider} payment return");
    let resolved = resolver.resolve(provider, &params).await?;
    Ok(HttpResponse::Ok().json(CallbackResponse::from(resolved)))
}

route!(payment_webhook => Post "/payments/webhook/{provider}" impl PaymentGatewayDatabase);
/// Server-to-server notifications from a provider. Events that have no bearing on payment status are acknowledged
/// and otherwise ignored, so that the provider does not keep redelivering them.
pub async fn payment_webhook<B: PaymentGatewayDatabase>(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    resolver: web::Data<CallbackResolver<B>>,
    options: web::Data<RequestOptions>,
) -> Result<HttpResponse, ServerError> {
    let provider = parse_provider(&path.into_inner())?;
    debug!("💻️ POST {provider} webhook ({} bytes)", body.len());
    let header = resolver.signature_header(provider)?;
    let signature = header_value(&req, header);
    match resolver.resolve_webhook(provider, &body, signature, options.webhook_signature_checks).await {
        Ok(resolved) => Ok(HttpResponse::Ok().json(CallbackResponse::from(resolved))),
        Err(OrchestratorError::IgnoredEvent(reason)) => {
            debug!("💻️ Acknowledging {provider} webhook without action. {reason}");
            Ok(HttpResponse::Ok().json(JsonResponse::success(format!("Ignored. {reason}"))))
        },
        Err(e) => Err(e.into()),
    }
}

route!(payment_by_id => Get "/payments/{payment_id}" impl PaymentGatewayDatabase);
pub async fn payment_by_id<B: PaymentGatewayDatabase>(
    path: web::Path<PaymentId>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let payment_id = path.into_inner();
    debug!("💻️ GET payment {payment_id}");
    let payment = api.fetch_payment(&payment_id).await?;
    Ok(HttpResponse::Ok().json(PaymentSummary::from(payment)))
}

route!(cancel_payment => Post "/payments/{payment_id}/cancel" impl PaymentGatewayDatabase);
/// The buyer abandons a payment attempt. Only a pending payment can be cancelled; anything else is already final and
/// yields a 409.
pub async fn cancel_payment<B: PaymentGatewayDatabase>(
    path: web::Path<PaymentId>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let payment_id = path.into_inner();
    debug!("💻️ POST cancel payment {payment_id}");
    let payment = api.cancel_payment(&payment_id).await?;
    Ok(HttpResponse::Ok().json(PaymentSummary::from(payment)))
}

route!(refund_payment => Post "/payments/{payment_id}/refund" impl PaymentGatewayDatabase);
/// Administrative. Resolves a dispute in the buyer's favour.
pub async fn refund_payment<B: PaymentGatewayDatabase>(
    req: HttpRequest,
    path: web::Path<PaymentId>,
    body: web::Json<RefundRequest>,
    api: web::Data<OrderFlowApi<B>>,
    options: web::Data<RequestOptions>,
) -> Result<HttpResponse, ServerError> {
    require_admin(&req, &options.admin_token)?;
    let payment_id = path.into_inner();
    let RefundRequest { reason } = body.into_inner();
    info!("💻️ POST refund for disputed payment {payment_id}. Reason: {reason}");
    let payment = api.refund_disputed_payment(&payment_id, &reason).await?;
    Ok(HttpResponse::Ok().json(PaymentSummary::from(payment)))
}

route!(payment_events => Get "/payments/{payment_id}/events" impl PaymentGatewayDatabase);
/// The audit trail of every status change the payment has gone through.
pub async fn payment_events<B: PaymentGatewayDatabase>(
    path: web::Path<PaymentId>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let payment_id = path.into_inner();
    debug!("💻️ GET events for payment {payment_id}");
    let events = api.fetch_payment_events(&payment_id).await?;
    Ok(HttpResponse::Ok().json(events))
}

fn parse_provider(name: &str) -> Result<ProviderCode, OrchestratorError> {
    name.parse::<ProviderCode>().map_err(|_| OrchestratorError::UnsupportedProvider(name.to_string()))
}
