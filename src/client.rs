use anyhow::{bail, Result};
use async_trait::async_trait;
use log::trace;
use reqwest::{RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};

use crate::api::*;
use crate::cache::{QueryCache, QueryKey, QueryKind};
use crate::checkout::CheckoutApi;
use crate::session::Session;

/// REST client of the storefront backend.
#[derive(Debug, Clone)]
pub struct Client {
    url: String,
    client: reqwest::Client,
    token: Option<Token>,
    cache: QueryCache,
}
impl Client {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self {
            url: url.trim_end_matches('/').to_string(),
            client,
            token: None,
            cache: QueryCache::new(),
        }
    }
    pub fn with_session(mut self, session: Option<&Session>) -> Self {
        self.token = session.map(|s| s.token.clone());
        self
    }
    pub fn set_token(&mut self, token: Option<Token>) {
        self.token = token;
    }
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
    async fn get<T: DeserializeOwned>(&self, path: String, query: &impl Serialize) -> Result<T> {
        trace!("GET {}", path);
        let request = self.client.get(self.url.clone() + path.as_str()).query(query);
        let response = self.authorize(request).send().await?;
        Ok(bail_if_err(response).await?.json::<T>().await?)
    }
    async fn post<T: DeserializeOwned>(&self, path: String, body: &impl Serialize) -> Result<T> {
        trace!("POST {}", path);
        let request = self.client.post(self.url.clone() + path.as_str()).json(body);
        let response = self.authorize(request).send().await?;
        Ok(bail_if_err(response).await?.json::<T>().await?)
    }
    async fn put<T: DeserializeOwned>(&self, path: String, body: &impl Serialize) -> Result<T> {
        trace!("PUT {}", path);
        let request = self.client.put(self.url.clone() + path.as_str()).json(body);
        let response = self.authorize(request).send().await?;
        Ok(bail_if_err(response).await?.json::<T>().await?)
    }
    async fn delete(&self, path: String) -> Result<()> {
        trace!("DELETE {}", path);
        let request = self.client.delete(self.url.clone() + path.as_str());
        let response = self.authorize(request).send().await?;
        bail_if_err(response).await?;
        Ok(())
    }
    fn key(&self, kind: QueryKind, params: &impl Serialize) -> QueryKey {
        QueryKey::new(kind, params).for_token(self.token.as_deref())
    }
    async fn cached<T, F>(&self, key: QueryKey, fetch: F) -> Result<T>
    where
        T: DeserializeOwned + Serialize,
        F: std::future::Future<Output = Result<T>>,
    {
        if let Some(hit) = self.cache.get::<T>(&key).await {
            return Ok(hit);
        }
        let fresh = fetch.await?;
        self.cache.put(key, &fresh).await;
        Ok(fresh)
    }

    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse> {
        self.post("/auth/login".to_string(), &request).await
    }
    pub async fn logout(&self) -> Result<()> {
        let _: serde_json::Value = self.post("/auth/logout".to_string(), &()).await?;
        self.cache.clear().await;
        Ok(())
    }
    pub async fn current_user(&self) -> Result<User> {
        let key = self.key(QueryKind::CurrentUser, &());
        self.cached(key, self.get("/auth/me".to_string(), &())).await
    }

    pub async fn list_products(&self, request: ProductListRequest) -> Result<ProductListResponse> {
        let key = self.key(QueryKind::Products, &request);
        self.cached(key, self.get("/products".to_string(), &request))
            .await
    }
    pub async fn create_product(&self, request: ProductRequest) -> Result<Product> {
        let product = self.post("/products".to_string(), &request).await?;
        self.cache.invalidate(QueryKind::Products).await;
        Ok(product)
    }
    pub async fn update_product(&self, product: RowId, request: ProductRequest) -> Result<Product> {
        let product = self
            .put(format!("/products/{}", product), &request)
            .await?;
        self.cache.invalidate(QueryKind::Products).await;
        Ok(product)
    }
    pub async fn delete_product(&self, product: RowId) -> Result<()> {
        self.delete(format!("/products/{}", product)).await?;
        self.cache.invalidate(QueryKind::Products).await;
        Ok(())
    }

    pub async fn check_nickname(&self, target: &str) -> Result<CheckNicknameResponse> {
        let request = CheckNicknameRequest {
            target: target.to_string(),
        };
        self.post("/nickname/check-name-guin".to_string(), &request)
            .await
    }
    pub async fn create_transaction(&self, request: NewTransactionRequest) -> Result<Transaction> {
        let response: NewTransactionResponse =
            self.post("/transactions".to_string(), &request).await?;
        self.cache.invalidate(QueryKind::Transactions).await;
        Ok(response.transaction)
    }
    pub async fn initiate_qris(&self, transaction: RowId) -> Result<QrisResponse> {
        self.post(format!("/transactions/{}/pay/qris", transaction), &())
            .await
    }
    pub async fn get_transaction(&self, transaction: RowId) -> Result<Transaction> {
        let envelope: TransactionEnvelope = self
            .get(format!("/transactions/{}", transaction), &())
            .await?;
        Ok(envelope.into_inner())
    }
    pub async fn lookup_status(&self, request: StatusLookupRequest) -> Result<StatusLookupResponse> {
        self.get("/transactions/status".to_string(), &request).await
    }
    pub async fn list_transactions(
        &self,
        request: TransactionListRequest,
    ) -> Result<TransactionListResponse> {
        let key = self.key(QueryKind::Transactions, &request);
        self.cached(key, self.get("/transactions".to_string(), &request))
            .await
    }
    pub async fn update_transaction_status(
        &self,
        transaction: RowId,
        status: TransactionStatus,
    ) -> Result<Transaction> {
        let request = UpdateStatusRequest {
            status: status.to_string(),
        };
        let envelope: TransactionEnvelope = self
            .put(format!("/transactions/{}", transaction), &request)
            .await?;
        self.cache.invalidate(QueryKind::Transactions).await;
        self.cache.invalidate(QueryKind::Dashboard).await;
        Ok(envelope.into_inner())
    }
    pub async fn dashboard(&self, request: DashboardRequest) -> Result<DashboardResponse> {
        let key = self.key(QueryKind::Dashboard, &request);
        self.cached(key, self.get("/dashboard".to_string(), &request))
            .await
    }
    pub async fn list_users(&self, request: UserListRequest) -> Result<UserListResponse> {
        let key = self.key(QueryKind::Users, &request);
        self.cached(key, self.get("/users".to_string(), &request))
            .await
    }
}

#[async_trait]
impl CheckoutApi for Client {
    async fn check_nickname(&self, target: &str) -> Result<CheckNicknameResponse> {
        Client::check_nickname(self, target).await
    }
    async fn create_transaction(&self, request: NewTransactionRequest) -> Result<Transaction> {
        Client::create_transaction(self, request).await
    }
    async fn initiate_qris(&self, transaction: RowId) -> Result<QrisResponse> {
        Client::initiate_qris(self, transaction).await
    }
    async fn get_transaction(&self, transaction: RowId) -> Result<Transaction> {
        Client::get_transaction(self, transaction).await
    }
}

pub async fn bail_if_err(response: Response) -> Result<Response> {
    if !response.status().is_success() {
        bail!("{}: {}", response.status(), response.text().await?)
    }
    Ok(response)
}
