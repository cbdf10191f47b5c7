use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use anyhow::bail;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Rupiah = i64;
pub type Diamonds = i64;
pub type RowId = i64;
pub type Token = String;

// Requests
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CheckNicknameRequest {
    pub target: String,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProductRequest {
    pub name: String,
    pub price: Rupiah,
    pub total_diamond: Diamonds,
    pub discount: u32,
    pub is_populer: bool,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NewTransactionRequest {
    pub total_diamond: Diamonds,
    pub total_amount: Rupiah,
    pub price: Rupiah,
    pub actual_price: Rupiah,
    pub no_wa: String,
    pub target_id: RowId,
    pub product_id: RowId,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UpdateStatusRequest {
    pub status: String,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct ProductListRequest {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub is_populer: Option<bool>,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct TransactionListRequest {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<TransactionStatus>,
    pub start: Option<String>,
    pub end: Option<String>,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct UserListRequest {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DashboardRequest {
    pub start: String,
    pub end: String,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StatusLookupRequest {
    pub merchant_transaction_id: String,
    pub no_wa: String,
}

// Responses
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoginResponse {
    pub token: Token,
    pub user: User,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CheckNicknameResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub nick: String,
    pub success: bool,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProductListResponse {
    pub products: Vec<Product>,
    pub pagination: Pagination,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TransactionListResponse {
    pub transactions: Vec<Transaction>,
    pub pagination: Pagination,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UserListResponse {
    pub users: Vec<User>,
    pub pagination: Pagination,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NewTransactionResponse {
    #[serde(default)]
    pub message: String,
    pub transaction: Transaction,
}
/// `GET /transactions/:id` answers either with the bare record or wrapped in
/// `{ "transaction": ... }` depending on the backend version.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum TransactionEnvelope {
    Wrapped { transaction: Transaction },
    Bare(Transaction),
}
impl TransactionEnvelope {
    pub fn into_inner(self) -> Transaction {
        match self {
            Self::Wrapped { transaction } => transaction,
            Self::Bare(transaction) => transaction,
        }
    }
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct QrisPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QrisResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reference_id: Option<String>,
    pub transaction_id: RowId,
    pub qris: QrisPayload,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StatusLookupResponse {
    pub status: String,
    pub transaction: Transaction,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RankingProduct {
    pub name: String,
    pub total_pendapatan: Rupiah,
    pub total_transaksi: u64,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DashboardResponse {
    pub ranking_products: Vec<RankingProduct>,
    pub total_income: Rupiah,
    pub total_profit: Rupiah,
    pub total_transactions: u64,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    Invalid(String),
}

// helper functions
pub fn map_any_err_and_code(e: anyhow::Error) -> (StatusCode, String) {
    debug!("Error: {:#}", e);
    let code = match e.downcast_ref::<ApiError>() {
        Some(ApiError::Unauthorized(_)) => StatusCode::UNAUTHORIZED,
        Some(ApiError::Forbidden(_)) => StatusCode::FORBIDDEN,
        Some(ApiError::NotFound(_)) => StatusCode::NOT_FOUND,
        Some(ApiError::Invalid(_)) => StatusCode::BAD_REQUEST,
        None => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, format!("{:#}", e))
}

// Types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: RowId,
    pub name: String,
    pub price: Rupiah,
    pub actual_price: Rupiah,
    pub discount: u32,
    pub is_populer: bool,
    pub total_diamond: Diamonds,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: RowId,
    pub total_diamond: Diamonds,
    pub total_amount: Rupiah,
    pub no_wa: String,
    pub status: String,
    #[serde(default)]
    pub merchant_transaction_id: Option<String>,
    #[serde(default)]
    pub target_id: Option<RowId>,
    #[serde(default)]
    pub product_id: Option<RowId>,
    #[serde(default)]
    pub price: Option<Rupiah>,
    #[serde(default)]
    pub actual_price: Option<Rupiah>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: RowId,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
/// The statuses the back-office filters on. The backend may report other
/// free-text statuses, which is why `Transaction::status` stays a string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
}
impl Display for TransactionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for TransactionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            e => bail!("Couldn't deserialize to TransactionStatus: {}", e),
        }
    }
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum UserRole {
    User,
    Admin,
}
impl Display for UserRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::User => "User",
            Self::Admin => "Admin",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "User" => Ok(Self::User),
            "Admin" => Ok(Self::Admin),
            e => bail!("Couldn't deserialize to UserRole: {}", e),
        }
    }
}
impl Default for UserRole {
    fn default() -> Self {
        UserRole::User
    }
}
