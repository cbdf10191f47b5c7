use crate::api::*;
use crate::db::{Page, ProductFilter, TransactionFilter, DB};
use crate::order::{validate_phone, validate_product};
use crate::pricing::original_price;
use crate::query::{parse_datetime, DEFAULT_LIMIT};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use log::{debug, trace};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;

const MAX_LIMIT: u32 = 100;
const MIN_TARGET_DIGITS: usize = 5;
const MAX_TARGET_DIGITS: usize = 12;

pub struct Storefront {
    db: Arc<Box<dyn DB + Send + Sync>>,
    cost_per_diamond: Rupiah,
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
fn page(page: Option<u32>, limit: Option<u32>) -> Page {
    Page {
        page: page.unwrap_or(1).max(1),
        limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
    }
}
fn pagination(page: Page, total: u64) -> Pagination {
    let limit = u64::from(page.limit);
    Pagination {
        page: page.page,
        limit: page.limit,
        total,
        total_pages: u32::try_from(total.div_ceil(limit))
            .unwrap_or(u32::MAX)
            .max(1),
    }
}
fn bound(value: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => match parse_datetime(value) {
            Some(naive) => Ok(Some(Utc.from_utc_datetime(&naive))),
            None => Err(ApiError::Invalid(format!("{} is not a date: {}", name, value)).into()),
        },
    }
}

impl Storefront {
    /// `admins` are `username:password` pairs seeded with the admin role.
    pub async fn new(
        db: Box<dyn DB + Send + Sync>,
        admins: Vec<String>,
        cost_per_diamond: Rupiah,
    ) -> Result<Self> {
        let me = Self {
            db: Arc::new(db),
            cost_per_diamond,
        };
        for admin in admins {
            let Some((username, password)) = admin.split_once(':') else {
                bail!("Admin must be given as username:password, got {}", admin)
            };
            me.db.add_user(username, password, UserRole::Admin).await?;
            debug!("Seeded admin {}", username);
        }
        Ok(me)
    }

    pub async fn check_access(&self, token: Option<&str>) -> Result<User> {
        let Some(token) = token else {
            return Err(ApiError::Unauthorized("missing bearer token".to_string()).into());
        };
        match self.db.get_token_user(token).await? {
            Some(user) => Ok(user),
            None => Err(ApiError::Unauthorized("invalid or expired token".to_string()).into()),
        }
    }
    pub async fn check_admin(&self, token: Option<&str>) -> Result<User> {
        let user = self.check_access(token).await?;
        if user.role != UserRole::Admin {
            debug!("User {} tried an admin request", user.username);
            return Err(ApiError::Forbidden(format!("{} is not an admin", user.username)).into());
        }
        Ok(user)
    }
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse> {
        let Some(user) = self
            .db
            .check_password(&request.username, &request.password)
            .await?
        else {
            return Err(ApiError::Unauthorized("wrong username or password".to_string()).into());
        };
        let token = random_string(30);
        trace!("Issued token for {}", user.username);
        self.db.add_token(&token, user.id).await?;
        Ok(LoginResponse { token, user })
    }
    pub async fn logout(&self, token: Option<&str>) -> Result<()> {
        let user = self.check_access(token).await?;
        if let Some(token) = token {
            self.db.remove_token(token).await?;
        }
        debug!("Logged out {}", user.username);
        Ok(())
    }

    pub async fn list_products(&self, request: ProductListRequest) -> Result<ProductListResponse> {
        let page = page(request.page, request.limit);
        let filter = ProductFilter {
            search: request.search.filter(|s| !s.trim().is_empty()),
            is_populer: request.is_populer,
        };
        let (products, total) = self.db.list_products(&filter, page).await?;
        Ok(ProductListResponse {
            products,
            pagination: pagination(page, total),
        })
    }
    pub async fn create_product(
        &self,
        request: ProductRequest,
        token: Option<&str>,
    ) -> Result<Product> {
        self.check_admin(token).await?;
        validate_product(&request).map_err(|e| ApiError::Invalid(e.to_string()))?;
        let actual_price = original_price(request.price, request.discount);
        let id = self.db.add_product(&request, actual_price).await?;
        debug!("Created product {}: {}", id, request.name);
        self.get_product(id).await
    }
    pub async fn update_product(
        &self,
        id: RowId,
        request: ProductRequest,
        token: Option<&str>,
    ) -> Result<Product> {
        self.check_admin(token).await?;
        validate_product(&request).map_err(|e| ApiError::Invalid(e.to_string()))?;
        let actual_price = original_price(request.price, request.discount);
        if !self.db.update_product(id, &request, actual_price).await? {
            return Err(ApiError::NotFound(format!("Product {}", id)).into());
        }
        self.get_product(id).await
    }
    pub async fn delete_product(&self, id: RowId, token: Option<&str>) -> Result<()> {
        self.check_admin(token).await?;
        if !self.db.delete_product(id).await? {
            return Err(ApiError::NotFound(format!("Product {}", id)).into());
        }
        debug!("Deleted product {}", id);
        Ok(())
    }
    async fn get_product(&self, id: RowId) -> Result<Product> {
        match self.db.get_product(id).await? {
            Some(product) => Ok(product),
            None => Err(ApiError::NotFound(format!("Product {}", id)).into()),
        }
    }

    /// Player ids of 5 to 12 digits resolve to a nickname derived from the id.
    pub fn check_nickname(&self, request: &CheckNicknameRequest) -> CheckNicknameResponse {
        let target = request.target.trim();
        let valid = (MIN_TARGET_DIGITS..=MAX_TARGET_DIGITS).contains(&target.len())
            && target.chars().all(|c| c.is_ascii_digit());
        if !valid {
            return CheckNicknameResponse {
                message: "Nickname tidak ditemukan".to_string(),
                nick: String::new(),
                success: false,
            };
        }
        CheckNicknameResponse {
            message: "Nickname ditemukan".to_string(),
            nick: format!("Player{}", &target[target.len() - 4..]),
            success: true,
        }
    }

    pub async fn create_transaction(
        &self,
        request: NewTransactionRequest,
    ) -> Result<NewTransactionResponse> {
        validate_phone(&request.no_wa).map_err(|e| ApiError::Invalid(e.to_string()))?;
        if request.total_amount < 1 {
            return Err(ApiError::Invalid("total_amount must be positive".to_string()).into());
        }
        self.get_product(request.product_id).await?;
        let merchant_transaction_id = format!("TRX-{}", random_string(16).to_uppercase());
        let id = self
            .db
            .add_transaction(&request, &merchant_transaction_id)
            .await?;
        debug!(
            "Created transaction {} ({}) for target {}",
            id, merchant_transaction_id, request.target_id
        );
        Ok(NewTransactionResponse {
            message: "Transaksi berhasil dibuat".to_string(),
            transaction: self.get_transaction(id).await?,
        })
    }
    pub async fn initiate_qris(&self, id: RowId) -> Result<QrisResponse> {
        let transaction = self.get_transaction(id).await?;
        if let Ok(status @ (TransactionStatus::Success | TransactionStatus::Failed)) =
            transaction.status.parse::<TransactionStatus>()
        {
            return Err(ApiError::Invalid(format!("Transaction {} is already {}", id, status)).into());
        }
        let reference_id = format!("REF-{}", random_string(12).to_uppercase());
        self.db.set_transaction_reference(id, &reference_id).await?;
        debug!("Initiated QRIS {} for transaction {}", reference_id, id);
        Ok(QrisResponse {
            message: "QRIS berhasil dibuat".to_string(),
            reference_id: Some(reference_id.clone()),
            transaction_id: id,
            qris: QrisPayload {
                qr_string: Some(format!(
                    "00020101021226570011ID.SANDBOX0118{}5204599953033605405{}5802ID6304",
                    reference_id, transaction.total_amount
                )),
                qr_url: None,
                redirect_url: None,
                transaction_id: transaction.merchant_transaction_id,
            },
        })
    }
    pub async fn get_transaction(&self, id: RowId) -> Result<Transaction> {
        match self.db.get_transaction(id).await? {
            Some(transaction) => Ok(transaction),
            None => Err(ApiError::NotFound(format!("Transaction {}", id)).into()),
        }
    }
    pub async fn lookup_status(&self, request: StatusLookupRequest) -> Result<StatusLookupResponse> {
        let transaction = self
            .db
            .find_transaction(request.merchant_transaction_id.trim(), request.no_wa.trim())
            .await?
            .ok_or_else(|| {
                ApiError::NotFound(format!("Transaction {}", request.merchant_transaction_id))
            })?;
        Ok(StatusLookupResponse {
            status: transaction.status.clone(),
            transaction,
        })
    }
    pub async fn list_transactions(
        &self,
        request: TransactionListRequest,
        token: Option<&str>,
    ) -> Result<TransactionListResponse> {
        self.check_admin(token).await?;
        let page = page(request.page, request.limit);
        let filter = TransactionFilter {
            status: request.status,
            start: bound(request.start.as_deref(), "start")?,
            end: bound(request.end.as_deref(), "end")?,
        };
        let (transactions, total) = self.db.list_transactions(&filter, page).await?;
        Ok(TransactionListResponse {
            transactions,
            pagination: pagination(page, total),
        })
    }
    pub async fn update_transaction_status(
        &self,
        id: RowId,
        request: UpdateStatusRequest,
        token: Option<&str>,
    ) -> Result<Transaction> {
        let admin = self.check_admin(token).await?;
        let status: TransactionStatus = request
            .status
            .parse()
            .map_err(|e: anyhow::Error| ApiError::Invalid(e.to_string()))?;
        if !self
            .db
            .set_transaction_status(id, &status.to_string())
            .await?
        {
            return Err(ApiError::NotFound(format!("Transaction {}", id)).into());
        }
        debug!("{} set transaction {} to {}", admin.username, id, status);
        self.get_transaction(id).await
    }

    pub async fn dashboard(
        &self,
        request: DashboardRequest,
        token: Option<&str>,
    ) -> Result<DashboardResponse> {
        self.check_admin(token).await?;
        let start = bound(Some(request.start.as_str()), "start")?;
        let end = bound(Some(request.end.as_str()), "end")?;
        let (Some(start), Some(end)) = (start, end) else {
            return Err(ApiError::Invalid("start and end are required".to_string()).into());
        };
        if end < start {
            return Err(ApiError::Invalid("end is before start".to_string()).into());
        }
        self.db
            .get_dashboard(start, end, self.cost_per_diamond)
            .await
            .context("Couldn't aggregate dashboard")
    }
    pub async fn list_users(
        &self,
        request: UserListRequest,
        token: Option<&str>,
    ) -> Result<UserListResponse> {
        self.check_admin(token).await?;
        let page = page(request.page, request.limit);
        let (users, total) = self.db.list_users(page).await?;
        Ok(UserListResponse {
            users,
            pagination: pagination(page, total),
        })
    }
}
