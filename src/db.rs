use crate::api::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{query, Executor, QueryBuilder, Row, Sqlite, SqlitePool};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub is_populer: Option<bool>,
}
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}
impl Page {
    fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }
}

#[async_trait]
pub trait DB {
    async fn add_product(&self, product: &ProductRequest, actual_price: Rupiah) -> Result<RowId>;
    async fn update_product(
        &self,
        id: RowId,
        product: &ProductRequest,
        actual_price: Rupiah,
    ) -> Result<bool>;
    async fn delete_product(&self, id: RowId) -> Result<bool>;
    async fn get_product(&self, id: RowId) -> Result<Option<Product>>;
    async fn list_products(&self, filter: &ProductFilter, page: Page) -> Result<(Vec<Product>, u64)>;

    async fn add_transaction(
        &self,
        request: &NewTransactionRequest,
        merchant_transaction_id: &str,
    ) -> Result<RowId>;
    async fn get_transaction(&self, id: RowId) -> Result<Option<Transaction>>;
    async fn find_transaction(
        &self,
        merchant_transaction_id: &str,
        no_wa: &str,
    ) -> Result<Option<Transaction>>;
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> Result<(Vec<Transaction>, u64)>;
    async fn set_transaction_status(&self, id: RowId, status: &str) -> Result<bool>;
    async fn set_transaction_reference(&self, id: RowId, reference_id: &str) -> Result<()>;
    async fn get_dashboard(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cost_per_diamond: Rupiah,
    ) -> Result<DashboardResponse>;

    async fn add_user(&self, username: &str, password: &str, role: UserRole) -> Result<RowId>;
    async fn check_password(&self, username: &str, password: &str) -> Result<Option<User>>;
    async fn list_users(&self, page: Page) -> Result<(Vec<User>, u64)>;
    async fn add_token(&self, token: &str, user: RowId) -> Result<()>;
    async fn get_token_user(&self, token: &str) -> Result<Option<User>>;
    async fn remove_token(&self, token: &str) -> Result<()>;
}
pub struct SQLite {
    connection: SqlitePool,
}
impl SQLite {
    pub async fn new(db_conn: Option<String>) -> Result<Self> {
        // a single connection, otherwise every pooled connection would get
        // its own in-memory database
        let connection = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(db_conn.as_deref().unwrap_or("sqlite::memory:"))
            .await
            .context("couldn't open sandbox database")?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS products (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                name NOT NULL,\
                price NOT NULL,\
                actual_price NOT NULL,\
                discount NOT NULL,\
                is_populer NOT NULL,\
                total_diamond NOT NULL,\
                created_at NOT NULL,\
                updated_at NOT NULL\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS transactions (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                total_diamond NOT NULL,\
                total_amount NOT NULL,\
                price NOT NULL,\
                actual_price NOT NULL,\
                no_wa NOT NULL,\
                status NOT NULL,\
                merchant_transaction_id UNIQUE,\
                target_id,\
                product_id,\
                reference_id,\
                created_at NOT NULL,\
                updated_at NOT NULL\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS users (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                username UNIQUE NOT NULL,\
                password NOT NULL,\
                name NOT NULL,\
                email NOT NULL,\
                role DEFAULT 'User',\
                created_at NOT NULL\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS tokens (\
                token PRIMARY KEY,\
                user NOT NULL,\
                created_at NOT NULL\
                )",
            )
            .await?;
        Ok(Self { connection })
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
fn product_from_row(row: &SqliteRow) -> Product {
    Product {
        id: row.get("id"),
        name: row.get("name"),
        price: row.get("price"),
        actual_price: row.get("actual_price"),
        discount: row.get("discount"),
        is_populer: row.get("is_populer"),
        total_diamond: row.get("total_diamond"),
        created_at: timestamp(row.get("created_at")),
        updated_at: timestamp(row.get("updated_at")),
    }
}
fn transaction_from_row(row: &SqliteRow) -> Transaction {
    Transaction {
        id: row.get("id"),
        total_diamond: row.get("total_diamond"),
        total_amount: row.get("total_amount"),
        no_wa: row.get("no_wa"),
        status: row.get("status"),
        merchant_transaction_id: row.get("merchant_transaction_id"),
        target_id: row.get("target_id"),
        product_id: row.get("product_id"),
        price: row.get("price"),
        actual_price: row.get("actual_price"),
        created_at: timestamp(row.get("created_at")),
        updated_at: timestamp(row.get("updated_at")),
    }
}
fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        name: row.get("name"),
        email: row.get("email"),
        role: row.get::<String, _>("role").parse()?,
        created_at: timestamp(row.get("created_at")),
    })
}
fn push_product_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ProductFilter) {
    if let Some(search) = &filter.search {
        builder
            .push(" AND name LIKE ")
            .push_bind(format!("%{}%", search));
    }
    if let Some(is_populer) = filter.is_populer {
        builder.push(" AND is_populer = ").push_bind(is_populer);
    }
}
fn push_transaction_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &TransactionFilter) {
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.to_string());
    }
    if let Some(start) = filter.start {
        builder.push(" AND created_at >= ").push_bind(start.timestamp());
    }
    if let Some(end) = filter.end {
        builder.push(" AND created_at <= ").push_bind(end.timestamp());
    }
}

#[async_trait]
impl DB for SQLite {
    async fn add_product(&self, product: &ProductRequest, actual_price: Rupiah) -> Result<RowId> {
        let now = Utc::now().timestamp();
        let id = self
            .connection
            .execute(
                query(
                    "INSERT INTO products (\
                name,\
                price,\
                actual_price,\
                discount,\
                is_populer,\
                total_diamond,\
                created_at,\
                updated_at)\
                VALUES (?,?,?,?,?,?,?,?)",
                )
                .bind(product.name.clone())
                .bind(product.price)
                .bind(actual_price)
                .bind(product.discount)
                .bind(product.is_populer)
                .bind(product.total_diamond)
                .bind(now)
                .bind(now),
            )
            .await?
            .last_insert_rowid();
        Ok(id)
    }
    async fn update_product(
        &self,
        id: RowId,
        product: &ProductRequest,
        actual_price: Rupiah,
    ) -> Result<bool> {
        let updated = self
            .connection
            .execute(
                query(
                    "UPDATE products SET \
                name = ?,\
                price = ?,\
                actual_price = ?,\
                discount = ?,\
                is_populer = ?,\
                total_diamond = ?,\
                updated_at = ? \
                WHERE id = ?",
                )
                .bind(product.name.clone())
                .bind(product.price)
                .bind(actual_price)
                .bind(product.discount)
                .bind(product.is_populer)
                .bind(product.total_diamond)
                .bind(Utc::now().timestamp())
                .bind(id),
            )
            .await?
            .rows_affected();
        Ok(updated > 0)
    }
    async fn delete_product(&self, id: RowId) -> Result<bool> {
        let deleted = self
            .connection
            .execute(query("DELETE FROM products WHERE id = ?").bind(id))
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
    async fn get_product(&self, id: RowId) -> Result<Option<Product>> {
        let row = self
            .connection
            .fetch_optional(query("SELECT * FROM products WHERE id = ?").bind(id))
            .await
            .with_context(|| format!("couldn't get product {}", id))?;
        Ok(row.as_ref().map(product_from_row))
    }
    async fn list_products(&self, filter: &ProductFilter, page: Page) -> Result<(Vec<Product>, u64)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM products WHERE 1=1");
        push_product_filter(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.connection).await?.get(0);

        let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM products WHERE 1=1");
        push_product_filter(&mut select, filter);
        select
            .push(" ORDER BY price ASC, id ASC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select.build().fetch_all(&self.connection).await?;
        Ok((rows.iter().map(product_from_row).collect(), total as u64))
    }

    async fn add_transaction(
        &self,
        request: &NewTransactionRequest,
        merchant_transaction_id: &str,
    ) -> Result<RowId> {
        let now = Utc::now().timestamp();
        let id = self
            .connection
            .execute(
                query(
                    "INSERT INTO transactions (\
                total_diamond,\
                total_amount,\
                price,\
                actual_price,\
                no_wa,\
                status,\
                merchant_transaction_id,\
                target_id,\
                product_id,\
                created_at,\
                updated_at)\
                VALUES (?,?,?,?,?,'pending',?,?,?,?,?)",
                )
                .bind(request.total_diamond)
                .bind(request.total_amount)
                .bind(request.price)
                .bind(request.actual_price)
                .bind(request.no_wa.clone())
                .bind(merchant_transaction_id.to_string())
                .bind(request.target_id)
                .bind(request.product_id)
                .bind(now)
                .bind(now),
            )
            .await?
            .last_insert_rowid();
        Ok(id)
    }
    async fn get_transaction(&self, id: RowId) -> Result<Option<Transaction>> {
        let row = self
            .connection
            .fetch_optional(query("SELECT * FROM transactions WHERE id = ?").bind(id))
            .await
            .with_context(|| format!("couldn't get transaction {}", id))?;
        Ok(row.as_ref().map(transaction_from_row))
    }
    async fn find_transaction(
        &self,
        merchant_transaction_id: &str,
        no_wa: &str,
    ) -> Result<Option<Transaction>> {
        let row = self
            .connection
            .fetch_optional(
                query(
                    "SELECT * FROM transactions WHERE \
                merchant_transaction_id = ? AND no_wa = ?",
                )
                .bind(merchant_transaction_id.to_string())
                .bind(no_wa.to_string()),
            )
            .await?;
        Ok(row.as_ref().map(transaction_from_row))
    }
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> Result<(Vec<Transaction>, u64)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM transactions WHERE 1=1");
        push_transaction_filter(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.connection).await?.get(0);

        let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM transactions WHERE 1=1");
        push_transaction_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select.build().fetch_all(&self.connection).await?;
        Ok((rows.iter().map(transaction_from_row).collect(), total as u64))
    }
    async fn set_transaction_status(&self, id: RowId, status: &str) -> Result<bool> {
        let updated = self
            .connection
            .execute(
                query("UPDATE transactions SET status = ?, updated_at = ? WHERE id = ?")
                    .bind(status.to_string())
                    .bind(Utc::now().timestamp())
                    .bind(id),
            )
            .await?
            .rows_affected();
        Ok(updated > 0)
    }
    async fn set_transaction_reference(&self, id: RowId, reference_id: &str) -> Result<()> {
        self.connection
            .execute(
                query(
                    "UPDATE transactions SET reference_id = ?, status = 'processing', updated_at = ? \
                WHERE id = ? AND status IN ('pending', 'processing')",
                )
                .bind(reference_id.to_string())
                .bind(Utc::now().timestamp())
                .bind(id),
            )
            .await?;
        Ok(())
    }
    async fn get_dashboard(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cost_per_diamond: Rupiah,
    ) -> Result<DashboardResponse> {
        let totals = self
            .connection
            .fetch_one(
                query(
                    "SELECT \
                COUNT(*) AS count,\
                COALESCE(SUM(total_amount), 0) AS income,\
                COALESCE(SUM(total_diamond), 0) AS diamonds \
                FROM transactions \
                WHERE status = 'success' AND created_at >= ? AND created_at <= ?",
                )
                .bind(start.timestamp())
                .bind(end.timestamp()),
            )
            .await?;
        let income: i64 = totals.get("income");
        let diamonds: i64 = totals.get("diamonds");
        let count: i64 = totals.get("count");
        let ranking = self
            .connection
            .fetch_all(
                query(
                    "SELECT \
                COALESCE(p.name, 'Unknown') AS name,\
                SUM(t.total_amount) AS income,\
                COUNT(*) AS count \
                FROM transactions t LEFT JOIN products p ON p.id = t.product_id \
                WHERE t.status = 'success' AND t.created_at >= ? AND t.created_at <= ? \
                GROUP BY COALESCE(p.name, 'Unknown') \
                ORDER BY income DESC, name ASC \
                LIMIT 10",
                )
                .bind(start.timestamp())
                .bind(end.timestamp()),
            )
            .await?
            .iter()
            .map(|row| RankingProduct {
                name: row.get("name"),
                total_pendapatan: row.get("income"),
                total_transaksi: row.get::<i64, _>("count") as u64,
            })
            .collect();
        Ok(DashboardResponse {
            ranking_products: ranking,
            total_income: income,
            total_profit: income - diamonds * cost_per_diamond,
            total_transactions: count as u64,
        })
    }

    async fn add_user(&self, username: &str, password: &str, role: UserRole) -> Result<RowId> {
        let id = self
            .connection
            .execute(
                query(
                    "INSERT INTO users (username, password, name, email, role, created_at) \
                VALUES (?,?,?,?,?,?)",
                )
                .bind(username.to_string())
                .bind(password.to_string())
                .bind(username.to_string())
                .bind(format!("{}@topup.local", username))
                .bind(role.to_string())
                .bind(Utc::now().timestamp()),
            )
            .await
            .with_context(|| format!("couldn't add user {}", username))?
            .last_insert_rowid();
        Ok(id)
    }
    async fn check_password(&self, username: &str, password: &str) -> Result<Option<User>> {
        let row = self
            .connection
            .fetch_optional(
                query("SELECT * FROM users WHERE username = ? AND password = ?")
                    .bind(username.to_string())
                    .bind(password.to_string()),
            )
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }
    async fn list_users(&self, page: Page) -> Result<(Vec<User>, u64)> {
        let total: i64 = self
            .connection
            .fetch_one(query("SELECT COUNT(*) FROM users"))
            .await?
            .get(0);
        let rows = self
            .connection
            .fetch_all(
                query("SELECT * FROM users ORDER BY id ASC LIMIT ? OFFSET ?")
                    .bind(i64::from(page.limit))
                    .bind(page.offset()),
            )
            .await?;
        let users = rows.iter().map(user_from_row).collect::<Result<Vec<_>>>()?;
        Ok((users, total as u64))
    }
    async fn add_token(&self, token: &str, user: RowId) -> Result<()> {
        self.connection
            .execute(
                query("INSERT INTO tokens (token, user, created_at) VALUES (?,?,?)")
                    .bind(token.to_string())
                    .bind(user)
                    .bind(Utc::now().timestamp()),
            )
            .await?;
        Ok(())
    }
    async fn get_token_user(&self, token: &str) -> Result<Option<User>> {
        let row = self
            .connection
            .fetch_optional(
                query(
                    "SELECT u.* FROM tokens t JOIN users u ON u.id = t.user \
                WHERE t.token = ?",
                )
                .bind(token.to_string()),
            )
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }
    async fn remove_token(&self, token: &str) -> Result<()> {
        self.connection
            .execute(query("DELETE FROM tokens WHERE token = ?").bind(token.to_string()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn product(name: &str, price: Rupiah, is_populer: bool) -> ProductRequest {
        ProductRequest {
            name: name.to_string(),
            price,
            total_diamond: price / 425,
            discount: 15,
            is_populer,
        }
    }
    fn first_page() -> Page {
        Page { page: 1, limit: 50 }
    }

    #[tokio::test]
    async fn product_crud() {
        let db = SQLite::new(None).await.unwrap();
        let id = db.add_product(&product("100 Diamonds", 42500, true), 50000).await.unwrap();
        let stored = db.get_product(id).await.unwrap().unwrap();
        assert_eq!(stored.name, "100 Diamonds");
        assert_eq!(stored.actual_price, 50000);
        assert!(stored.is_populer);

        assert!(db
            .update_product(id, &product("100 Diamonds+", 40000, false), 47059)
            .await
            .unwrap());
        let stored = db.get_product(id).await.unwrap().unwrap();
        assert_eq!(stored.price, 40000);
        assert!(!stored.is_populer);

        assert!(db.delete_product(id).await.unwrap());
        assert!(!db.delete_product(id).await.unwrap());
        assert_eq!(db.get_product(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn product_filters_and_paging() {
        let db = SQLite::new(None).await.unwrap();
        for (name, price, populer) in [
            ("20 Diamonds", 10000, false),
            ("50 Diamonds", 22500, false),
            ("100 Diamonds", 42500, true),
            ("1000 Diamonds", 400000, true),
        ] {
            db.add_product(&product(name, price, populer), price).await.unwrap();
        }
        let (products, total) = db
            .list_products(&ProductFilter::default(), Page { page: 2, limit: 3 })
            .await
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "1000 Diamonds");

        let filter = ProductFilter {
            search: Some("00 diamonds".to_string()),
            is_populer: Some(true),
        };
        let (products, total) = db.list_products(&filter, first_page()).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(products[0].name, "100 Diamonds");
    }

    #[tokio::test]
    async fn transactions_and_dashboard() {
        let db = SQLite::new(None).await.unwrap();
        let product_id = db.add_product(&product("100 Diamonds", 42500, true), 50000).await.unwrap();
        let request = NewTransactionRequest {
            total_diamond: 100,
            total_amount: 42500,
            price: 42500,
            actual_price: 50000,
            no_wa: "081234567890".to_string(),
            target_id: 123456,
            product_id,
        };
        let paid = db.add_transaction(&request, "TRX-A").await.unwrap();
        let open = db.add_transaction(&request, "TRX-B").await.unwrap();
        db.set_transaction_reference(paid, "REF-A").await.unwrap();
        assert_eq!(db.get_transaction(paid).await.unwrap().unwrap().status, "processing");
        assert!(db.set_transaction_status(paid, "success").await.unwrap());
        assert!(!db.set_transaction_status(999, "success").await.unwrap());

        let found = db.find_transaction("TRX-B", "081234567890").await.unwrap().unwrap();
        assert_eq!(found.id, open);
        assert_eq!(db.find_transaction("TRX-B", "0800").await.unwrap(), None);

        let filter = TransactionFilter {
            status: Some(TransactionStatus::Success),
            ..Default::default()
        };
        let (transactions, total) = db.list_transactions(&filter, first_page()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(transactions[0].id, paid);

        let filter = TransactionFilter {
            end: Some(Utc::now() - chrono::Duration::days(1)),
            ..Default::default()
        };
        assert_eq!(db.list_transactions(&filter, first_page()).await.unwrap().1, 0);

        let dashboard = db
            .get_dashboard(
                Utc::now() - chrono::Duration::days(1),
                Utc::now() + chrono::Duration::days(1),
                300,
            )
            .await
            .unwrap();
        assert_eq!(dashboard.total_transactions, 1);
        assert_eq!(dashboard.total_income, 42500);
        assert_eq!(dashboard.total_profit, 42500 - 100 * 300);
        assert_eq!(
            dashboard.ranking_products,
            vec![RankingProduct {
                name: "100 Diamonds".to_string(),
                total_pendapatan: 42500,
                total_transaksi: 1,
            }]
        );
    }

    #[tokio::test]
    async fn users_and_tokens() {
        let db = SQLite::new(None).await.unwrap();
        let id = db.add_user("admin", "secret", UserRole::Admin).await.unwrap();
        assert!(db.add_user("admin", "other", UserRole::User).await.is_err());
        assert_eq!(db.check_password("admin", "wrong").await.unwrap(), None);
        let user = db.check_password("admin", "secret").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.role, UserRole::Admin);

        db.add_token("tok", id).await.unwrap();
        assert_eq!(db.get_token_user("tok").await.unwrap().unwrap().id, id);
        db.remove_token("tok").await.unwrap();
        assert_eq!(db.get_token_user("tok").await.unwrap(), None);

        let (users, total) = db.list_users(first_page()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(users[0].username, "admin");
    }
}
