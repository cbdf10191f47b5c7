#![allow(unused)]
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::{Builder, WriteStyle};
use futures_util::future::try_join;
use log::{debug, error};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::api::*;
use crate::checkout::{Checkout, CheckoutError, DialogState, PaymentStatus};
use crate::client::Client;
use crate::config::Settings;
use crate::order::{validate_product, OrderForm};
use crate::pricing::format_idr;
use crate::query::{parse_datetime, visible_pages, ListQuery, PageItem, PageNav};
use crate::session::{Session, SessionStore};

mod api;
mod cache;
mod checkout;
mod client;
mod config;
mod order;
mod pricing;
mod query;
mod session;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Backend url, overrides the configured `api_url`
    #[arg(short, long)]
    url: Option<String>,
    /// Configuration file, defaults to an optional `topup.toml`
    #[arg(short, long)]
    config: Option<String>,
}
#[derive(Subcommand)]
enum Commands {
    /// Lists the top-up packages
    Products {
        #[arg(short, long, default_value = "")]
        query: String,
    },
    /// Buys a package and pays it with QRIS
    Buy {
        #[arg(short, long)]
        target: String,
        #[arg(short, long)]
        phone: String,
        #[arg(long)]
        product: RowId,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Looks up a transaction by merchant transaction id and WhatsApp number
    Status {
        #[arg(short, long)]
        merchant_transaction_id: String,
        #[arg(short, long)]
        phone: String,
    },
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    Me,
    CreateProduct {
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        price: Rupiah,
        #[arg(long)]
        diamonds: Diamonds,
        #[arg(long, default_value_t = 0)]
        discount: u32,
        #[arg(long)]
        populer: bool,
    },
    UpdateProduct {
        #[arg(short, long)]
        id: RowId,
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        price: Rupiah,
        #[arg(long)]
        diamonds: Diamonds,
        #[arg(long, default_value_t = 0)]
        discount: u32,
        #[arg(long)]
        populer: bool,
    },
    DeleteProduct {
        #[arg(short, long)]
        id: RowId,
    },
    /// Lists transactions, e.g. `--query "status=success&limit=20"`
    Transactions {
        #[arg(short, long, default_value = "")]
        query: String,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        status: Option<TransactionStatus>,
    },
    SetStatus {
        #[arg(short, long)]
        id: RowId,
        #[arg(short, long)]
        status: TransactionStatus,
    },
    Dashboard {
        #[arg(short, long)]
        start: String,
        #[arg(short, long)]
        end: String,
    },
    Users {
        #[arg(short, long, default_value = "")]
        query: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    Builder::default()
        .filter_level(settings.level_filter())
        .parse_default_env()
        .write_style(WriteStyle::Always)
        .init();
    let store = SessionStore::new(&settings.session_path);
    let session = store.load().await?;
    let url = cli.url.unwrap_or_else(|| settings.api_url.clone());
    let client = Client::new(url).with_session(session.as_ref());

    match cli.command {
        Commands::Products { query } => {
            let query = ListQuery::parse(&query);
            let response = client.list_products(query.product_request()).await?;
            for product in &response.products {
                print_product(product);
            }
            print_pagination(&query, &response.pagination);
        }
        Commands::Buy {
            target,
            phone,
            product,
            yes,
        } => {
            buy(&client, &settings, target, phone, product, yes).await?;
        }
        Commands::Status {
            merchant_transaction_id,
            phone,
        } => {
            let response = client
                .lookup_status(StatusLookupRequest {
                    merchant_transaction_id,
                    no_wa: phone,
                })
                .await?;
            print_transaction(&response.transaction);
        }
        Commands::Login { username, password } => {
            let response = client.login(LoginRequest { username, password }).await?;
            println!("Login sebagai {} ({})", response.user.username, response.user.role);
            store.save(&Session::from(response)).await?;
        }
        Commands::Logout => {
            if let Err(e) = client.logout().await {
                error!("Logout on the server failed: {:#}", e);
            }
            store.clear().await?;
            println!("Logout berhasil");
        }
        Commands::Me => {
            require_session(&session)?;
            let user = client.current_user().await?;
            println!("{:#?}", user);
        }
        Commands::CreateProduct {
            name,
            price,
            diamonds,
            discount,
            populer,
        } => {
            require_session(&session)?;
            let request = ProductRequest {
                name,
                price,
                total_diamond: diamonds,
                discount,
                is_populer: populer,
            };
            validate_product(&request)?;
            let product = client.create_product(request).await?;
            print_product(&product);
        }
        Commands::UpdateProduct {
            id,
            name,
            price,
            diamonds,
            discount,
            populer,
        } => {
            require_session(&session)?;
            let request = ProductRequest {
                name,
                price,
                total_diamond: diamonds,
                discount,
                is_populer: populer,
            };
            validate_product(&request)?;
            let product = client.update_product(id, request).await?;
            print_product(&product);
        }
        Commands::DeleteProduct { id } => {
            require_session(&session)?;
            client.delete_product(id).await?;
            println!("Product {} dihapus", id);
        }
        Commands::Transactions {
            query,
            page,
            limit,
            status,
        } => {
            require_session(&session)?;
            let mut query = ListQuery::parse(&query);
            if let Some(limit) = limit {
                query = query.with_limit(limit);
            }
            if status.is_some() {
                query = query.with_status(status);
            }
            if let Some(page) = page {
                query.page = page.max(1);
            }
            let response = client
                .list_transactions(query.transaction_request())
                .await?;
            if query.page > response.pagination.total_pages {
                let last = query.clone().navigate(PageNav::Last, response.pagination.total);
                println!("Halaman {} tidak ada, lihat ?{}", query.page, last);
            }
            for transaction in &response.transactions {
                print_transaction(transaction);
            }
            print_pagination(&query, &response.pagination);
        }
        Commands::SetStatus { id, status } => {
            require_session(&session)?;
            let transaction = client.update_transaction_status(id, status).await?;
            print_transaction(&transaction);
        }
        Commands::Dashboard { start, end } => {
            require_session(&session)?;
            let (Some(from), Some(to)) = (parse_datetime(&start), parse_datetime(&end)) else {
                bail!("Tanggal harus berformat YYYY-MM-DD atau YYYY-MM-DDTHH:MM")
            };
            let recent = ListQuery::default().with_limit(10).with_range(Some(from), Some(to));
            let (dashboard, recent) = try_join(
                client.dashboard(DashboardRequest { start, end }),
                client.list_transactions(recent.transaction_request()),
            )
            .await?;
            println!("Total pendapatan: {}", format_idr(dashboard.total_income));
            println!("Total keuntungan: {}", format_idr(dashboard.total_profit));
            println!("Total transaksi:  {}", dashboard.total_transactions);
            println!("Produk terlaris:");
            for (rank, product) in dashboard.ranking_products.iter().enumerate() {
                println!(
                    "  {}. {} - {} ({} transaksi)",
                    rank + 1,
                    product.name,
                    format_idr(product.total_pendapatan),
                    product.total_transaksi
                );
            }
            println!("Transaksi terbaru:");
            for transaction in &recent.transactions {
                print_transaction(transaction);
            }
        }
        Commands::Users { query } => {
            require_session(&session)?;
            let query = ListQuery::parse(&query);
            let response = client.list_users(query.user_request()).await?;
            for user in &response.users {
                println!("#{} {} <{}> {}", user.id, user.username, user.email, user.role);
            }
            print_pagination(&query, &response.pagination);
        }
    }
    Ok(())
}

async fn buy(
    client: &Client,
    settings: &Settings,
    target: String,
    phone: String,
    product: RowId,
    yes: bool,
) -> Result<()> {
    let products = client
        .list_products(ProductListRequest {
            limit: Some(100),
            ..Default::default()
        })
        .await?;
    let Some(product) = products.products.into_iter().find(|p| p.id == product) else {
        bail!("Paket {} tidak ditemukan", product)
    };
    let mut form = OrderForm::new();
    form.set_player_id(&target);
    form.set_phone(&phone);
    form.select_product(product);
    let order = form.submit()?;

    let mut checkout = Checkout::new(Arc::new(client.clone()), settings.poll_config());
    if let DialogState::Confirm {
        nickname, quote, ..
    } = checkout.open(order).await?
    {
        println!("Nickname: {}", nickname);
        println!("Paket:    {} ({} diamond)", quote.product, quote.total_diamond);
        match quote.original_price {
            Some(original) => println!(
                "Harga:    {} (sebelumnya {})",
                format_idr(quote.price),
                format_idr(original)
            ),
            None => println!("Harga:    {}", format_idr(quote.price)),
        }
    }
    if !yes && !prompt("Lanjutkan pembayaran? [y/N] ").await? {
        checkout.close();
        return Ok(());
    }
    loop {
        match checkout.confirm().await {
            Ok(_) => break,
            Err(e @ CheckoutError::InitiateQris(_)) => {
                println!("{}", e);
                if !prompt("Coba lagi? [y/N] ").await? {
                    checkout.close();
                    return Ok(());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    if let Some(DialogState::Qris {
        transaction, qris, ..
    }) = checkout.state()
    {
        println!("Transaksi #{}", transaction.id);
        if let Some(id) = &transaction.merchant_transaction_id {
            println!("ID transaksi: {}", id);
        }
        if let Some(qr_string) = &qris.qris.qr_string {
            println!("QRIS: {}", qr_string);
        }
        if let Some(url) = qris.qris.qr_url.as_ref().or(qris.qris.redirect_url.as_ref()) {
            println!("Link pembayaran: {}", url);
        }
        println!("Menunggu pembayaran... (Ctrl-C untuk menutup)");
    }
    let Some(celebration) = checkout.poller_mut().and_then(|p| p.take_celebration()) else {
        bail!("Payment dialog has no poller")
    };
    let status = {
        let Some(poller) = checkout.poller() else {
            bail!("Payment dialog has no poller")
        };
        tokio::select! {
            status = poller.finished() => Some(status),
            _ = tokio::signal::ctrl_c() => None,
        }
    };
    match status {
        None => {
            checkout.close();
            println!("Dialog pembayaran ditutup");
        }
        Some(PaymentStatus::Success) => {
            if let Ok(transaction) = celebration.await {
                println!(
                    "Pembayaran berhasil! {} diamond untuk {} sedang diproses",
                    transaction.total_diamond, target
                );
            }
        }
        Some(status) => println!("{}", status),
    }
    Ok(())
}

async fn prompt(question: &str) -> Result<bool> {
    let mut stdout = io::stdout();
    stdout.write_all(question.as_bytes()).await?;
    stdout.flush().await?;
    let mut answer = String::new();
    BufReader::new(io::stdin()).read_line(&mut answer).await?;
    Ok(matches!(answer.trim(), "y" | "Y" | "ya"))
}
fn require_session(session: &Option<Session>) -> Result<()> {
    if session.is_none() {
        bail!("Silakan login terlebih dahulu")
    }
    Ok(())
}
fn print_product(product: &Product) {
    let populer = if product.is_populer { " [populer]" } else { "" };
    if product.discount > 0 {
        println!(
            "#{} {}{}: {} (diskon {}%, sebelumnya {})",
            product.id,
            product.name,
            populer,
            format_idr(product.price),
            product.discount,
            format_idr(product.actual_price)
        );
    } else {
        println!(
            "#{} {}{}: {}",
            product.id,
            product.name,
            populer,
            format_idr(product.price)
        );
    }
}
fn print_transaction(transaction: &Transaction) {
    let created = transaction
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    println!(
        "#{} {} {} {} diamond {} {} {}",
        transaction.id,
        transaction.merchant_transaction_id.as_deref().unwrap_or("-"),
        created,
        transaction.total_diamond,
        format_idr(transaction.total_amount),
        transaction.no_wa,
        transaction.status
    );
}
fn print_pagination(query: &ListQuery, pagination: &Pagination) {
    let strip: Vec<String> = visible_pages(pagination.page, pagination.total_pages)
        .into_iter()
        .map(|item| match item {
            PageItem::Page(page) if page == pagination.page => format!("[{}]", page),
            item => item.to_string(),
        })
        .collect();
    println!(
        "Halaman {} ({} data, ?{})",
        strip.join(" "),
        pagination.total,
        query
    );
}
