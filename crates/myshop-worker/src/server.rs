//! HTTP JSON facade over the query service and indexer diagnostics

use actix_cors::Cors;
use actix_web::http::StatusCode;
use actix_web::{error, web, HttpResponse};
use alloy_primitives::{Address, U256};
use myshop_sync::{
    ChainClientAdapter, MetricsRegistry, PurchaseFilter, PurchaseQuery, PurchaseSource,
    QueryService, SyncError,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Shared application state for the HTTP server.
pub struct AppState<C: ChainClientAdapter> {
    pub query: QueryService<C>,
    pub metrics: Arc<MetricsRegistry>,
    pub chain_id: u64,
    pub rpc_url: String,
}

type Params = web::Query<HashMap<String, String>>;

/// Every handler failure becomes `400 {ok:false, error}`.
#[derive(Debug)]
pub struct ApiError(SyncError);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError(err)
    }
}

impl error::ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::BadRequest().json(json!({ "ok": false, "error": self.0.to_string() }))
    }
}

type ApiResult = Result<HttpResponse, ApiError>;

#[derive(Serialize)]
struct OkBody<T: Serialize> {
    ok: bool,
    #[serde(flatten)]
    body: T,
}

fn ok<T: Serialize>(body: T) -> HttpResponse {
    HttpResponse::Ok().json(OkBody { ok: true, body })
}

fn invalid(name: &str, value: &str) -> SyncError {
    SyncError::InvalidParam(format!("Invalid query param {}: {}", name, value))
}

fn param<'a>(params: &'a Params, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn required<'a>(params: &'a Params, name: &str) -> Result<&'a str, SyncError> {
    param(params, name)
        .ok_or_else(|| SyncError::InvalidParam(format!("Missing query param: {}", name)))
}

fn parse_u256(name: &str, raw: &str) -> Result<U256, SyncError> {
    U256::from_str(raw).map_err(|_| invalid(name, raw))
}

fn optional_u256(params: &Params, name: &str) -> Result<Option<U256>, SyncError> {
    param(params, name).map(|raw| parse_u256(name, raw)).transpose()
}

fn optional_u64(params: &Params, name: &str) -> Result<Option<u64>, SyncError> {
    param(params, name)
        .map(|raw| raw.parse::<u64>().map_err(|_| invalid(name, raw)))
        .transpose()
}

/// CORS policy: any origin, any method, any header.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
}

/// Register every route plus the JSON 404 fallback.
pub fn configure<C: ChainClientAdapter + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("")
            .route("/health", web::get().to(health))
            .route("/config", web::get().to(config::<C>))
            .route("/indexer", web::get().to(indexer::<C>))
            .route("/metrics", web::get().to(metrics::<C>))
            .route("/shop", web::get().to(shop::<C>))
            .route("/shops", web::get().to(shops::<C>))
            .route("/item", web::get().to(item::<C>))
            .route("/items", web::get().to(items::<C>))
            .route("/purchases", web::get().to(purchases::<C>))
            .default_service(web::route().to(not_found)),
    );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "ok": true }))
}

async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "ok": false, "error": "not_found" }))
}

async fn config<C: ChainClientAdapter + 'static>(state: web::Data<AppState<C>>) -> ApiResult {
    let shops_address: Address = state.query.cache().shops_address().await?;
    let status = state.query.indexer().status().await;
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "chainId": state.chain_id,
        "rpcUrl": state.rpc_url,
        "itemsAddress": state.query.cache().items_address(),
        "shopsAddress": shops_address,
        "indexer": {
            "enabled": status.enabled,
            "running": status.running,
            "lastIndexedBlock": status.last_indexed_block.map(|block| block.to_string()),
            "cachedPurchases": status.cached_purchases,
        },
    })))
}

async fn indexer<C: ChainClientAdapter + 'static>(state: web::Data<AppState<C>>) -> HttpResponse {
    ok(state.query.indexer().status().await)
}

async fn metrics<C: ChainClientAdapter + 'static>(state: web::Data<AppState<C>>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.metrics.encode_prometheus())
}

async fn shop<C: ChainClientAdapter + 'static>(
    state: web::Data<AppState<C>>,
    params: Params,
) -> ApiResult {
    let shop_id = parse_u256("shopId", required(&params, "shopId")?)?;
    let shop = state.query.shop(shop_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "shopId": shop_id.to_string(),
        "shop": shop,
    })))
}

async fn shops<C: ChainClientAdapter + 'static>(
    state: web::Data<AppState<C>>,
    params: Params,
) -> ApiResult {
    let page = state
        .query
        .shops(optional_u256(&params, "cursor")?, optional_u64(&params, "limit")?)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "cursor": page.cursor.to_string(),
        "nextCursor": page.next_cursor.map(|c| c.to_string()),
        "shopCount": page.count.to_string(),
        "shops": page.entries,
    })))
}

async fn item<C: ChainClientAdapter + 'static>(
    state: web::Data<AppState<C>>,
    params: Params,
) -> ApiResult {
    let item_id = parse_u256("itemId", required(&params, "itemId")?)?;
    let item = state.query.item(item_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "itemId": item_id.to_string(),
        "item": item,
    })))
}

async fn items<C: ChainClientAdapter + 'static>(
    state: web::Data<AppState<C>>,
    params: Params,
) -> ApiResult {
    let page = state
        .query
        .items(optional_u256(&params, "cursor")?, optional_u64(&params, "limit")?)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "cursor": page.cursor.to_string(),
        "nextCursor": page.next_cursor.map(|c| c.to_string()),
        "itemCount": page.count.to_string(),
        "items": page.entries,
    })))
}

async fn purchases<C: ChainClientAdapter + 'static>(
    state: web::Data<AppState<C>>,
    params: Params,
) -> ApiResult {
    let buyer = param(&params, "buyer")
        .map(|raw| Address::from_str(raw).map_err(|_| invalid("buyer", raw)))
        .transpose()?;
    let source = param(&params, "source")
        .map(PurchaseSource::from_str)
        .transpose()?
        .unwrap_or(PurchaseSource::Index);
    // Only an absent `include` defaults to enrichment; `include=` opts out.
    let enrich = params
        .get("include")
        .map(|include| include.contains("enrich"))
        .unwrap_or(true);

    let query = PurchaseQuery {
        filter: PurchaseFilter {
            buyer,
            shop_id: optional_u256(&params, "shopId")?,
            item_id: optional_u256(&params, "itemId")?,
        },
        from_block: optional_u64(&params, "fromBlock")?,
        to_block: optional_u64(&params, "toBlock")?,
        limit: optional_u64(&params, "limit")?,
        enrich,
        source,
    };

    Ok(ok(state.query.purchases(query).await?))
}
