#![allow(unused)]
use crate::api::*;
use crate::db::SQLite;
use crate::storefront::Storefront;
use anyhow::{Context, Result};
use axum::extract::{Json, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::Router;
use axum_macros::debug_handler;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use log::{debug, error, LevelFilter};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

mod api;
mod cache;
mod checkout;
mod client;
mod db;
mod order;
mod pricing;
mod query;
mod session;
mod storefront;

type Response<T> = Result<Json<T>, (StatusCode, String)>;

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

#[debug_handler]
async fn login(State(state): State<Arc<RwLock<Storefront>>>, Json(request): Json<LoginRequest>) -> Response<LoginResponse> {
    let backend = state.read().await;
    let username = request.username.clone();
    let response = backend.login(request).await.map_err(map_any_err_and_code)?;
    debug!("User {} logged in", username);
    Ok(Json(response))
}
async fn logout(State(state): State<Arc<RwLock<Storefront>>>, headers: HeaderMap) -> Response<MessageResponse> {
    let backend = state.read().await;
    backend
        .logout(bearer(&headers))
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(MessageResponse {
        message: "Logout berhasil".to_string(),
    }))
}
async fn current_user(State(state): State<Arc<RwLock<Storefront>>>, headers: HeaderMap) -> Response<User> {
    let backend = state.read().await;
    let user = backend
        .check_access(bearer(&headers))
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(user))
}

async fn list_products(
    State(state): State<Arc<RwLock<Storefront>>>,
    Query(request): Query<ProductListRequest>,
) -> Response<ProductListResponse> {
    let backend = state.read().await;
    let products = backend
        .list_products(request)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(products))
}
#[debug_handler]
async fn create_product(
    State(state): State<Arc<RwLock<Storefront>>>,
    headers: HeaderMap,
    Json(request): Json<ProductRequest>,
) -> Result<(StatusCode, Json<Product>), (StatusCode, String)> {
    let backend = state.write().await;
    let product = backend
        .create_product(request, bearer(&headers))
        .await
        .map_err(map_any_err_and_code)?;
    Ok((StatusCode::CREATED, Json(product)))
}
async fn update_product(
    State(state): State<Arc<RwLock<Storefront>>>,
    Path(id): Path<RowId>,
    headers: HeaderMap,
    Json(request): Json<ProductRequest>,
) -> Response<Product> {
    let backend = state.write().await;
    let product = backend
        .update_product(id, request, bearer(&headers))
        .await
        .map_err(map_any_err_and_code)?;
    debug!("Updated product {}", id);
    Ok(Json(product))
}
async fn delete_product(
    State(state): State<Arc<RwLock<Storefront>>>,
    Path(id): Path<RowId>,
    headers: HeaderMap,
) -> Response<MessageResponse> {
    let backend = state.write().await;
    backend
        .delete_product(id, bearer(&headers))
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(MessageResponse {
        message: "Product berhasil dihapus".to_string(),
    }))
}

async fn check_nickname(
    State(state): State<Arc<RwLock<Storefront>>>,
    Json(request): Json<CheckNicknameRequest>,
) -> Json<CheckNicknameResponse> {
    let backend = state.read().await;
    Json(backend.check_nickname(&request))
}

#[debug_handler]
async fn create_transaction(
    State(state): State<Arc<RwLock<Storefront>>>,
    Json(request): Json<NewTransactionRequest>,
) -> Result<(StatusCode, Json<NewTransactionResponse>), (StatusCode, String)> {
    let backend = state.write().await;
    let response = backend
        .create_transaction(request)
        .await
        .map_err(map_any_err_and_code)?;
    Ok((StatusCode::CREATED, Json(response)))
}
async fn initiate_qris(State(state): State<Arc<RwLock<Storefront>>>, Path(id): Path<RowId>) -> Response<QrisResponse> {
    let backend = state.write().await;
    let qris = backend
        .initiate_qris(id)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(qris))
}
async fn get_transaction(
    State(state): State<Arc<RwLock<Storefront>>>,
    Path(id): Path<RowId>,
) -> Response<TransactionEnvelope> {
    let backend = state.read().await;
    let transaction = backend
        .get_transaction(id)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(TransactionEnvelope::Wrapped { transaction }))
}
async fn lookup_status(
    State(state): State<Arc<RwLock<Storefront>>>,
    Query(request): Query<StatusLookupRequest>,
) -> Response<StatusLookupResponse> {
    let backend = state.read().await;
    let status = backend
        .lookup_status(request)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(status))
}
async fn list_transactions(
    State(state): State<Arc<RwLock<Storefront>>>,
    headers: HeaderMap,
    Query(request): Query<TransactionListRequest>,
) -> Response<TransactionListResponse> {
    let backend = state.read().await;
    let transactions = backend
        .list_transactions(request, bearer(&headers))
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(transactions))
}
async fn update_transaction_status(
    State(state): State<Arc<RwLock<Storefront>>>,
    Path(id): Path<RowId>,
    headers: HeaderMap,
    Json(request): Json<UpdateStatusRequest>,
) -> Response<TransactionEnvelope> {
    let backend = state.write().await;
    let transaction = backend
        .update_transaction_status(id, request, bearer(&headers))
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(TransactionEnvelope::Bare(transaction)))
}

async fn dashboard(
    State(state): State<Arc<RwLock<Storefront>>>,
    headers: HeaderMap,
    Query(request): Query<DashboardRequest>,
) -> Response<DashboardResponse> {
    let backend = state.read().await;
    let dashboard = backend
        .dashboard(request, bearer(&headers))
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(dashboard))
}
async fn list_users(
    State(state): State<Arc<RwLock<Storefront>>>,
    headers: HeaderMap,
    Query(request): Query<UserListRequest>,
) -> Response<UserListResponse> {
    let backend = state.read().await;
    let users = backend
        .list_users(request, bearer(&headers))
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(users))
}

#[derive(Parser)]
struct Args {
    /// Admin account as username:password, repeatable
    #[arg(short, long)]
    admin: Vec<String>,
    #[arg(short, long, default_value_t = 8081)]
    port: u16,
    #[arg(short, long)]
    db: Option<String>,
    /// Provider cost of one diamond in IDR, used for the dashboard profit
    #[arg(long, default_value_t = 300)]
    diamond_cost: Rupiah,
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::default()
        .filter_level(LevelFilter::Debug)
        .write_style(WriteStyle::Always)
        .init();
    let cli = Args::parse();
    let (_port, handle) = run_server(Some(cli.port), cli.admin, cli.db, cli.diamond_cost).await?;
    handle.await?;
    Ok(())
}

async fn run_server(
    port: Option<u16>,
    admin: Vec<String>,
    db_conn: Option<String>,
    diamond_cost: Rupiah,
) -> Result<(u16, JoinHandle<()>)> {
    let state = Arc::new(RwLock::new(
        Storefront::new(Box::new(SQLite::new(db_conn).await?), admin, diamond_cost).await?,
    ));
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(current_user))
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", put(update_product).delete(delete_product))
        .route("/nickname/check-name-guin", post(check_nickname))
        .route(
            "/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route("/transactions/status", get(lookup_status))
        .route(
            "/transactions/:id",
            get(get_transaction).put(update_transaction_status),
        )
        .route("/transactions/:id/pay/qris", post(initiate_qris))
        .route("/dashboard", get(dashboard))
        .route("/users", get(list_users))
        .with_state(state);

    let addr: SocketAddr = ("127.0.0.1:".to_string() + port.unwrap_or(0).to_string().as_str())
        .parse()
        .context("invalid listen address")?;
    let server = axum::Server::try_bind(&addr)?.serve(app.into_make_service());
    let port = server.local_addr().port();
    debug!("Listening on {}", server.local_addr());
    let handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Server stopped: {}", e);
        }
    });
    Ok((port, handle))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::checkout::{Checkout, DialogState, PaymentStatus, PollConfig};
    use crate::client::Client;
    use crate::order::OrderForm;
    use crate::query::{format_datetime, ListQuery};
    use chrono::{Duration, Utc};
    use tokio::time::timeout;

    async fn start() -> Client {
        let (port, _) = run_server(None, vec!["admin:secret".to_string()], None, 300)
            .await
            .unwrap();
        Client::new("http://127.0.0.1:".to_string() + port.to_string().as_str())
    }
    async fn admin(client: &Client) -> Client {
        let login = client
            .login(LoginRequest {
                username: "admin".to_string(),
                password: "secret".to_string(),
            })
            .await
            .unwrap();
        let mut admin = client.clone();
        admin.set_token(Some(login.token));
        admin
    }
    fn diamonds(total_diamond: Diamonds, price: Rupiah, is_populer: bool) -> ProductRequest {
        ProductRequest {
            name: format!("{} Diamonds", total_diamond),
            price,
            total_diamond,
            discount: 15,
            is_populer,
        }
    }

    #[tokio::test]
    async fn product_crud() {
        let client = start().await;
        let admin = admin(&client).await;

        let product = admin.create_product(diamonds(100, 42500, true)).await.unwrap();
        assert_eq!(product.actual_price, 50000);
        let listed = client.list_products(ProductListRequest::default()).await.unwrap();
        assert_eq!(listed.products, vec![product.clone()]);
        assert_eq!(listed.pagination.total, 1);

        let mut request = diamonds(110, 46000, false);
        request.discount = 0;
        let updated = admin.update_product(product.id, request).await.unwrap();
        assert_eq!(updated.actual_price, 46000);
        // the mutation invalidated the cached list
        let listed = client.list_products(ProductListRequest::default()).await.unwrap();
        assert_eq!(listed.products[0].name, "110 Diamonds");

        admin.delete_product(product.id).await.unwrap();
        assert!(admin.delete_product(product.id).await.is_err());
        let listed = client.list_products(ProductListRequest::default()).await.unwrap();
        assert!(listed.products.is_empty());
    }

    #[tokio::test]
    async fn auth_gating() {
        let client = start().await;
        assert!(client.create_product(diamonds(5, 2000, false)).await.is_err());
        assert!(client
            .list_transactions(TransactionListRequest::default())
            .await
            .is_err());
        assert!(client.list_users(UserListRequest::default()).await.is_err());
        assert!(client
            .login(LoginRequest {
                username: "admin".to_string(),
                password: "nope".to_string(),
            })
            .await
            .is_err());

        let admin = admin(&client).await;
        let me = admin.current_user().await.unwrap();
        assert!(client.current_user().await.is_err());
        assert_eq!(me.username, "admin");
        assert_eq!(me.role, UserRole::Admin);
        let users = admin.list_users(UserListRequest::default()).await.unwrap();
        assert_eq!(users.pagination.total, 1);
        // the clones share a cache, but admin results stay with the admin token
        assert!(client.list_users(UserListRequest::default()).await.is_err());
        assert!(client
            .list_transactions(TransactionListRequest::default())
            .await
            .is_err());

        admin.logout().await.unwrap();
        assert!(admin.list_users(UserListRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn buy_flow_settles_after_status_update() {
        let client = start().await;
        let admin = admin(&client).await;
        let product = admin.create_product(diamonds(100, 42500, true)).await.unwrap();

        let mut form = OrderForm::new();
        form.set_player_id("123456789");
        form.set_phone("081234567890");
        form.select_product(product.clone());
        let order = form.submit().unwrap();

        let config = PollConfig {
            interval: std::time::Duration::from_millis(50),
            ..Default::default()
        };
        let mut checkout = Checkout::new(Arc::new(client.clone()), config);
        match checkout.open(order).await.unwrap() {
            DialogState::Confirm { nickname, quote, .. } => {
                assert_eq!(nickname, "Player6789");
                assert_eq!(quote.original_price, Some(50000));
            }
            state => panic!("unexpected state {}", state.name()),
        }
        let transaction = match checkout.confirm().await.unwrap() {
            DialogState::Qris {
                transaction, qris, ..
            } => {
                assert!(qris.qris.qr_string.is_some());
                assert_eq!(qris.transaction_id, transaction.id);
                transaction.clone()
            }
            state => panic!("unexpected state {}", state.name()),
        };
        assert_eq!(transaction.no_wa, "081234567890");
        let celebration = checkout.poller_mut().unwrap().take_celebration().unwrap();

        let status = client
            .lookup_status(StatusLookupRequest {
                merchant_transaction_id: transaction.merchant_transaction_id.clone().unwrap(),
                no_wa: transaction.no_wa.clone(),
            })
            .await
            .unwrap();
        assert_eq!(status.status, "processing");

        admin
            .update_transaction_status(transaction.id, TransactionStatus::Success)
            .await
            .unwrap();
        let finished = timeout(
            std::time::Duration::from_secs(5),
            checkout.poller().unwrap().finished(),
        )
        .await
        .unwrap();
        assert_eq!(finished, PaymentStatus::Success);
        let settled = celebration.await.unwrap();
        assert_eq!(settled.status, "success");
    }

    #[tokio::test]
    async fn transaction_filters_and_dashboard() {
        let client = start().await;
        let admin = admin(&client).await;
        let small = admin.create_product(diamonds(50, 22500, false)).await.unwrap();
        let large = admin.create_product(diamonds(100, 42500, true)).await.unwrap();
        let mut ids = vec![];
        for product in [&small, &large, &large] {
            let transaction = client
                .create_transaction(NewTransactionRequest {
                    total_diamond: product.total_diamond,
                    total_amount: product.price,
                    price: product.price,
                    actual_price: product.actual_price,
                    no_wa: "081234567890".to_string(),
                    target_id: 123456,
                    product_id: product.id,
                })
                .await
                .unwrap();
            ids.push(transaction.id);
        }
        admin
            .update_transaction_status(ids[1], TransactionStatus::Success)
            .await
            .unwrap();
        admin
            .update_transaction_status(ids[2], TransactionStatus::Success)
            .await
            .unwrap();
        admin
            .update_transaction_status(ids[0], TransactionStatus::Failed)
            .await
            .unwrap();

        let query = ListQuery::parse("status=success&limit=10");
        let list = admin
            .list_transactions(query.transaction_request())
            .await
            .unwrap();
        assert_eq!(list.pagination.total, 2);
        assert!(list.transactions.iter().all(|t| t.status == "success"));

        let yesterday = (Utc::now() - Duration::days(1)).naive_utc();
        let query = ListQuery::default().with_range(None, Some(yesterday));
        let list = admin
            .list_transactions(query.transaction_request())
            .await
            .unwrap();
        assert_eq!(list.pagination.total, 0);

        let dashboard = admin
            .dashboard(DashboardRequest {
                start: format_datetime(&yesterday),
                end: format_datetime(&(Utc::now() + Duration::days(1)).naive_utc()),
            })
            .await
            .unwrap();
        assert_eq!(dashboard.total_transactions, 2);
        assert_eq!(dashboard.total_income, 85000);
        assert_eq!(dashboard.total_profit, 85000 - 200 * 300);
        assert_eq!(dashboard.ranking_products.len(), 1);
        assert_eq!(dashboard.ranking_products[0].name, "100 Diamonds");
        assert_eq!(dashboard.ranking_products[0].total_transaksi, 2);
    }
}
