//! Local stand-in for the hosted backend: the PostgREST subset that
//! [`miniapp_ledger::RestUserStore`] speaks, served over any store.

use crate::Result;
use actix_cors::Cors;
use actix_web::{
    App,
    HttpRequest,
    HttpResponse,
    HttpServer,
    ResponseError,
    dev::ServerHandle,
    http::StatusCode,
    middleware::Logger,
    web,
};
use anyhow::Context;
use miniapp_ledger::{
    BackendConfig,
    BackendError,
    Referral,
    ReferralStore,
    UserProfile,
    UserStore,
    config::{
        DEFAULT_INCREMENT_FUNCTION,
        DEFAULT_REFERRALS_TABLE,
        DEFAULT_USERS_TABLE,
    },
};
use serde::Deserialize;
use serde_json::{
    Value,
    json,
};
use std::{
    collections::HashMap,
    net::TcpListener,
    thread::JoinHandle,
};

const IGNORE_DUPLICATES: &str = "resolution=ignore-duplicates";
const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Anything the server can expose as the users and referrals tables.
pub trait BackendStore: UserStore + ReferralStore + Send + Sync + 'static {}

impl<T> BackendStore for T where T: UserStore + ReferralStore + Send + Sync + 'static {}

/// Names the server answers to. Must match the client's [`BackendConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub users_table: String,
    pub referrals_table: String,
    pub increment_function: String,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            users_table: DEFAULT_USERS_TABLE.to_string(),
            referrals_table: DEFAULT_REFERRALS_TABLE.to_string(),
            increment_function: DEFAULT_INCREMENT_FUNCTION.to_string(),
        }
    }
}

impl From<&BackendConfig> for Schema {
    fn from(config: &BackendConfig) -> Self {
        Self {
            users_table: config.users_table.clone(),
            referrals_table: config.referrals_table.clone(),
            increment_function: config.increment_function.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub schema: Schema,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            schema: Schema::default(),
        }
    }
}

struct Backend<S> {
    store: S,
    schema: Schema,
}

pub struct BackendServer {
    base_url: String,
    schema: Schema,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl BackendServer {
    /// Serve `store` on localhost. `None` picks a free port.
    pub fn start<S: BackendStore>(store: S, port: Option<u16>) -> Result<Self> {
        let settings = ServerSettings {
            port: port.unwrap_or(0),
            ..ServerSettings::default()
        };
        Self::start_with(store, settings)
    }

    pub fn start_with<S: BackendStore>(store: S, settings: ServerSettings) -> Result<Self> {
        let listener = TcpListener::bind((settings.host.as_str(), settings.port))
            .context("failed to bind HTTP listener for backend")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{}", address);

        tracing::info!("backend listening on {}", base_url);

        let backend = web::Data::new(Backend {
            store,
            schema: settings.schema.clone(),
        });
        let server = HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .wrap(Logger::default())
                .app_data(backend.clone())
                .route(
                    "/rest/v1/rpc/{function}",
                    web::post().to(handle_rpc::<S>),
                )
                .route("/rest/v1/{table}", web::get().to(handle_select::<S>))
                .route("/rest/v1/{table}", web::post().to(handle_insert::<S>))
        })
        .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
        .listen(listener)
        .context("failed to start Actix server")?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });

        Ok(Self {
            base_url,
            schema: settings.schema,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Client configuration pointing at this server.
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            users_table: self.schema.users_table.clone(),
            referrals_table: self.schema.referrals_table.clone(),
            increment_function: self.schema.increment_function.clone(),
            ..BackendConfig::new(self.base_url.clone())
        }
    }

    /// Resolves once the server has shut down.
    async fn stopped(&mut self) {
        if let Some(thread) = self.server_thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }

    pub async fn stop(mut self) {
        self.server_handle.stop(true).await;
        self.stopped().await;
    }
}

impl Drop for BackendServer {
    fn drop(&mut self) {
        // Not graceful: pooled client connections would otherwise hold
        // shutdown open until they time out.
        let _ = self.server_handle.stop(false);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

/// Error body shaped like PostgREST's so the client can tell cases apart.
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("relation {0} does not exist")]
    UnknownRelation(String),
    #[error("function {0} does not exist")]
    UnknownFunction(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("duplicate key {0}")]
    Duplicate(String),
    #[error(transparent)]
    Store(#[from] BackendError),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::UnknownRelation(_) => "42P01",
            ApiError::UnknownFunction(_) => "PGRST202",
            ApiError::BadRequest(_) => "PGRST100",
            ApiError::Duplicate(_) => "23505",
            ApiError::Store(BackendError::BalanceUnderflow { .. }) => "P0001",
            ApiError::Store(_) => "XX000",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Store(BackendError::BalanceUnderflow { .. }) => {
                "balance_underflow".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::UnknownRelation(_) | ApiError::UnknownFunction(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Duplicate(_) => StatusCode::CONFLICT,
            ApiError::Store(BackendError::BalanceUnderflow { .. }) => StatusCode::CONFLICT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "code": self.code(),
            "message": self.message(),
        }))
    }
}

/// PostgREST accepts a single object or an array of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum Rows<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Rows<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Rows::Many(rows) => rows,
            Rows::One(row) => vec![row],
        }
    }
}

#[derive(Debug, Deserialize)]
struct IncrementArgs {
    user_id: String,
    amount: i64,
}

fn parse_rows<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<Vec<T>, ApiError> {
    serde_json::from_slice::<Rows<T>>(body)
        .map(Rows::into_vec)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
}

fn eq_filter<'a>(
    query: &'a HashMap<String, String>,
    column: &str,
) -> Result<Option<&'a str>, ApiError> {
    match query.get(column) {
        None => Ok(None),
        Some(raw) => raw.strip_prefix("eq.").map(Some).ok_or_else(|| {
            ApiError::BadRequest(format!("unsupported filter on {column}: {raw}"))
        }),
    }
}

fn to_rows<T: serde::Serialize>(rows: &[T]) -> Result<Vec<Value>, ApiError> {
    rows.iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| ApiError::Store(BackendError::Storage(e.to_string())))
}

/// Apply a `select=a,b` column list. `*` or no list keeps every column.
fn project(rows: Vec<Value>, select: Option<&str>) -> Vec<Value> {
    let Some(columns) = select.filter(|select| *select != "*") else {
        return rows;
    };
    let columns: Vec<&str> = columns.split(',').map(str::trim).collect();
    rows.into_iter()
        .map(|row| match row {
            Value::Object(mut fields) => {
                fields.retain(|key, _| columns.contains(&key.as_str()));
                Value::Object(fields)
            }
            other => other,
        })
        .collect()
}

async fn handle_select<S: BackendStore>(
    backend: web::Data<Backend<S>>,
    table: web::Path<String>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let table = table.into_inner();
    tracing::debug!(%table, query = ?query, "received select");
    let schema = &backend.schema;
    let rows = if table == schema.users_table {
        if let Some(telegram_id) = eq_filter(&query, "telegramId")? {
            let found = backend.store.find_user(telegram_id).await?;
            to_rows(found.as_slice())?
        } else {
            match query.get("order").map(String::as_str) {
                None | Some("balance.desc") => {}
                Some(other) => {
                    return Err(ApiError::BadRequest(format!("unsupported order {other}")));
                }
            }
            let limit = match query.get("limit") {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("invalid limit {raw}")))?,
                None => usize::MAX,
            };
            to_rows(&backend.store.top_by_balance(limit).await?)?
        }
    } else if table == schema.referrals_table {
        let referrer_id = eq_filter(&query, "referrerId")?.ok_or_else(|| {
            ApiError::BadRequest("referrals must be filtered by referrerId".to_string())
        })?;
        to_rows(&backend.store.referrals_of(referrer_id).await?)?
    } else {
        return Err(ApiError::UnknownRelation(table));
    };
    Ok(HttpResponse::Ok().json(project(rows, query.get("select").map(String::as_str))))
}

async fn handle_insert<S: BackendStore>(
    backend: web::Data<Backend<S>>,
    table: web::Path<String>,
    request: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let table = table.into_inner();
    let schema = &backend.schema;
    if table == schema.users_table {
        // Users are always merged on telegramId.
        let mut stored = Vec::new();
        for profile in parse_rows::<UserProfile>(&body)? {
            tracing::info!(telegram_id = %profile.telegram_id, "upserting user");
            stored.push(backend.store.upsert_user(&profile).await?);
        }
        Ok(HttpResponse::Created().json(to_rows(&stored)?))
    } else if table == schema.referrals_table {
        let ignore_duplicates = request
            .headers()
            .get("Prefer")
            .and_then(|prefer| prefer.to_str().ok())
            .is_some_and(|prefer| prefer.contains(IGNORE_DUPLICATES));
        let mut inserted = Vec::new();
        for referral in parse_rows::<Referral>(&body)? {
            if backend.store.record_referral(&referral).await? {
                tracing::info!(
                    referrer_id = %referral.referrer_id,
                    telegram_id = %referral.telegram_id,
                    "referral inserted"
                );
                inserted.push(referral);
            } else if !ignore_duplicates {
                return Err(ApiError::Duplicate(referral.telegram_id));
            }
        }
        Ok(HttpResponse::Created().json(to_rows(&inserted)?))
    } else {
        Err(ApiError::UnknownRelation(table))
    }
}

async fn handle_rpc<S: BackendStore>(
    backend: web::Data<Backend<S>>,
    function: web::Path<String>,
    args: web::Json<IncrementArgs>,
) -> Result<HttpResponse, ApiError> {
    let function = function.into_inner();
    if function != backend.schema.increment_function {
        return Err(ApiError::UnknownFunction(function));
    }
    let IncrementArgs { user_id, amount } = args.into_inner();
    let balance = backend.store.add_to_balance(&user_id, amount).await;
    match &balance {
        Ok(Some(balance)) => tracing::info!(%user_id, amount, balance, "balance updated"),
        Ok(None) => tracing::debug!(%user_id, "increment for unknown user"),
        Err(err) => tracing::warn!(%user_id, amount, %err, "increment refused"),
    }
    Ok(HttpResponse::Ok().json(balance?))
}
