use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, trace};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

use crate::api::*;
use crate::order::ValidatedOrder;
use crate::pricing::original_price;

const SUCCESS_TOKENS: [&str; 5] = ["paid", "success", "settlement", "completed", "captured"];
const FAILURE_TOKENS: [&str; 4] = ["failed", "cancel", "expired", "void"];

/// The calls the payment dialog makes against the backend.
#[async_trait]
pub trait CheckoutApi {
    async fn check_nickname(&self, target: &str) -> Result<CheckNicknameResponse>;
    async fn create_transaction(&self, request: NewTransactionRequest) -> Result<Transaction>;
    async fn initiate_qris(&self, transaction: RowId) -> Result<QrisResponse>;
    async fn get_transaction(&self, transaction: RowId) -> Result<Transaction>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckoutError {
    #[error("Nickname tidak ditemukan: {0}")]
    LookupFailed(String),
    #[error("Royal ID harus berupa angka: {0}")]
    InvalidPlayerId(String),
    #[error("Gagal membuat transaksi: {0}")]
    CreateTransaction(String),
    #[error("Gagal membuat pembayaran QRIS: {0}")]
    InitiateQris(String),
    #[error("Payment dialog is not in the {0} state")]
    WrongState(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    /// Polling gave up before the backend reported a terminal status.
    Unconfirmed,
}
impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}
impl Display for PaymentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Pending => "Menunggu pembayaran",
            Self::Success => "Pembayaran berhasil",
            Self::Failed => "Pembayaran gagal",
            Self::Unconfirmed => "Pembayaran belum terkonfirmasi, cek kembali nanti",
        };
        write!(f, "{}", output)
    }
}

/// Maps a free-text backend status onto the three polling classes.
pub fn classify_status(status: &str) -> PaymentStatus {
    let status = status.to_lowercase();
    if SUCCESS_TOKENS.iter().any(|token| status.contains(token)) {
        PaymentStatus::Success
    } else if FAILURE_TOKENS.iter().any(|token| status.contains(token)) {
        PaymentStatus::Failed
    } else {
        PaymentStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_duration: Duration,
}
impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 200,
            max_duration: Duration::from_secs(10 * 60),
        }
    }
}

/// What the confirmation step shows before the customer commits.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub product: String,
    pub total_diamond: Diamonds,
    pub price: Rupiah,
    pub original_price: Option<Rupiah>,
}
impl Quote {
    pub fn for_product(product: &Product) -> Self {
        Self {
            product: product.name.clone(),
            total_diamond: product.total_diamond,
            price: product.price,
            original_price: (product.discount > 0)
                .then(|| original_price(product.price, product.discount)),
        }
    }
}

/// Background status poller of one transaction. Dropping it stops polling.
#[derive(Debug)]
pub struct Poller {
    handle: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
    status: watch::Receiver<PaymentStatus>,
    celebration: Option<oneshot::Receiver<Transaction>>,
}
impl Poller {
    pub fn spawn(
        api: Arc<dyn CheckoutApi + Send + Sync>,
        transaction: RowId,
        config: PollConfig,
    ) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (status_tx, status) = watch::channel(PaymentStatus::Pending);
        let (celebrate_tx, celebration) = oneshot::channel();
        let handle = tokio::spawn(poll_transaction(
            api,
            transaction,
            config,
            cancelled.clone(),
            status_tx,
            celebrate_tx,
        ));
        Self {
            handle,
            cancelled,
            status,
            celebration: Some(celebration),
        }
    }
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.handle.abort();
    }
    pub fn status(&self) -> PaymentStatus {
        *self.status.borrow()
    }
    pub fn subscribe(&self) -> watch::Receiver<PaymentStatus> {
        self.status.clone()
    }
    /// Fires once, with the settled transaction, when the payment succeeds.
    pub fn take_celebration(&mut self) -> Option<oneshot::Receiver<Transaction>> {
        self.celebration.take()
    }
    /// Resolves with the terminal status, or the last seen one if the
    /// poller stopped without reaching one.
    pub async fn finished(&self) -> PaymentStatus {
        let mut status = self.status.clone();
        loop {
            let current = *status.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if status.changed().await.is_err() {
                return *status.borrow();
            }
        }
    }
}
impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn poll_transaction(
    api: Arc<dyn CheckoutApi + Send + Sync>,
    transaction: RowId,
    config: PollConfig,
    cancelled: Arc<AtomicBool>,
    status: watch::Sender<PaymentStatus>,
    celebrate: oneshot::Sender<Transaction>,
) {
    let started = Instant::now();
    let mut interval = time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts = 0;
    loop {
        interval.tick().await;
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        if attempts >= config.max_attempts || started.elapsed() >= config.max_duration {
            debug!(
                "Giving up on transaction {} after {} polls",
                transaction, attempts
            );
            status.send_replace(PaymentStatus::Unconfirmed);
            return;
        }
        attempts += 1;
        let fetched = match api.get_transaction(transaction).await {
            Ok(fetched) => fetched,
            Err(e) => {
                debug!("Polling transaction {} failed: {:#}", transaction, e);
                continue;
            }
        };
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        let observed = classify_status(&fetched.status);
        trace!(
            "Transaction {} is \"{}\" ({:?})",
            transaction,
            fetched.status,
            observed
        );
        status.send_replace(observed);
        match observed {
            PaymentStatus::Success => {
                if celebrate.send(fetched).is_err() {
                    trace!("Nobody is waiting to celebrate transaction {}", transaction);
                }
                return;
            }
            PaymentStatus::Failed => return,
            _ => {}
        }
    }
}

#[derive(Debug)]
pub enum DialogState {
    Confirm {
        nickname: String,
        quote: Quote,
        /// Kept when QRIS initiation failed so a retry pays the same record.
        created: Option<Transaction>,
    },
    Qris {
        nickname: String,
        transaction: Transaction,
        qris: QrisResponse,
        poller: Poller,
    },
}
impl DialogState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Confirm { .. } => "confirm",
            Self::Qris { .. } => "qris",
        }
    }
}

/// The payment dialog: nickname lookup opens it in `Confirm`, confirmation
/// moves it to `Qris` and starts polling, closing tears everything down.
pub struct Checkout {
    api: Arc<dyn CheckoutApi + Send + Sync>,
    config: PollConfig,
    order: Option<ValidatedOrder>,
    state: Option<DialogState>,
}
impl Checkout {
    pub fn new(api: Arc<dyn CheckoutApi + Send + Sync>, config: PollConfig) -> Self {
        Self {
            api,
            config,
            order: None,
            state: None,
        }
    }
    pub fn state(&self) -> Option<&DialogState> {
        self.state.as_ref()
    }
    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }
    pub async fn open(&mut self, order: ValidatedOrder) -> Result<&DialogState, CheckoutError> {
        self.close();
        let lookup = self
            .api
            .check_nickname(&order.player_id)
            .await
            .map_err(|e| CheckoutError::LookupFailed(format!("{:#}", e)))?;
        if !lookup.success {
            debug!("Nickname lookup for {} failed: {}", order.player_id, lookup.message);
            return Err(CheckoutError::LookupFailed(lookup.message));
        }
        debug!("Player {} is {}", order.player_id, lookup.nick);
        let quote = Quote::for_product(&order.product);
        self.order = Some(order);
        Ok(self.state.insert(DialogState::Confirm {
            nickname: lookup.nick,
            quote,
            created: None,
        }))
    }
    pub async fn confirm(&mut self) -> Result<&DialogState, CheckoutError> {
        let (Some(order), Some(DialogState::Confirm { created, .. })) =
            (self.order.as_ref(), self.state.as_mut())
        else {
            return Err(CheckoutError::WrongState("confirm"));
        };
        let transaction = if let Some(transaction) = created.as_ref() {
            transaction.clone()
        } else {
            let request = new_transaction_request(order)?;
            let transaction = self
                .api
                .create_transaction(request)
                .await
                .map_err(|e| CheckoutError::CreateTransaction(format!("{:#}", e)))?;
            debug!("Created transaction {}", transaction.id);
            *created = Some(transaction.clone());
            transaction
        };
        let qris = self
            .api
            .initiate_qris(transaction.id)
            .await
            .map_err(|e| {
                error!("QRIS initiation for transaction {} failed: {:#}", transaction.id, e);
                CheckoutError::InitiateQris(format!("{:#}", e))
            })?;
        let Some(DialogState::Confirm { nickname, .. }) = self.state.take() else {
            return Err(CheckoutError::WrongState("confirm"));
        };
        let poller = Poller::spawn(self.api.clone(), transaction.id, self.config);
        Ok(self.state.insert(DialogState::Qris {
            nickname,
            transaction,
            qris,
            poller,
        }))
    }
    /// Closes the dialog from any state. Polling stops immediately.
    pub fn close(&mut self) {
        if let Some(DialogState::Qris {
            poller,
            transaction,
            ..
        }) = &self.state
        {
            debug!("Stopped polling transaction {}", transaction.id);
            poller.cancel();
        }
        self.state = None;
        self.order = None;
    }
    pub fn poller(&self) -> Option<&Poller> {
        match &self.state {
            Some(DialogState::Qris { poller, .. }) => Some(poller),
            _ => None,
        }
    }
    pub fn poller_mut(&mut self) -> Option<&mut Poller> {
        match &mut self.state {
            Some(DialogState::Qris { poller, .. }) => Some(poller),
            _ => None,
        }
    }
}
impl Drop for Checkout {
    fn drop(&mut self) {
        self.close();
    }
}

fn new_transaction_request(order: &ValidatedOrder) -> Result<NewTransactionRequest, CheckoutError> {
    let target_id = order
        .player_id
        .parse::<RowId>()
        .map_err(|_| CheckoutError::InvalidPlayerId(order.player_id.clone()))?;
    Ok(NewTransactionRequest {
        total_diamond: order.product.total_diamond,
        total_amount: order.product.price,
        price: order.product.price,
        actual_price: order.product.actual_price,
        no_wa: order.phone.clone(),
        target_id,
        product_id: order.product.id,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::bail;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// Scripted backend: every status poll pops the next status, the last one
    /// repeats. `None` entries simulate network errors.
    #[derive(Default)]
    struct TestApi {
        nick_found: bool,
        fail_qris: AtomicBool,
        statuses: Mutex<VecDeque<Option<&'static str>>>,
        lookups: AtomicU32,
        creates: AtomicU32,
        qris_calls: AtomicU32,
        polls: AtomicU32,
    }
    impl TestApi {
        fn new(statuses: &[Option<&'static str>]) -> Arc<Self> {
            Arc::new(Self {
                nick_found: true,
                statuses: Mutex::new(statuses.iter().copied().collect()),
                ..Default::default()
            })
        }
        fn polls(&self) -> u32 {
            self.polls.load(Ordering::SeqCst)
        }
    }
    #[async_trait]
    impl CheckoutApi for TestApi {
        async fn check_nickname(&self, target: &str) -> Result<CheckNicknameResponse> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(CheckNicknameResponse {
                message: if self.nick_found { "ok" } else { "not found" }.to_string(),
                nick: format!("Player{}", target),
                success: self.nick_found,
            })
        }
        async fn create_transaction(&self, request: NewTransactionRequest) -> Result<Transaction> {
            let id = self.creates.fetch_add(1, Ordering::SeqCst) as RowId + 1;
            Ok(transaction(id, "pending", &request))
        }
        async fn initiate_qris(&self, transaction: RowId) -> Result<QrisResponse> {
            self.qris_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_qris.load(Ordering::SeqCst) {
                bail!("502 Bad Gateway: provider down")
            }
            Ok(QrisResponse {
                message: "ok".to_string(),
                reference_id: Some("REF-1".to_string()),
                transaction_id: transaction,
                qris: QrisPayload {
                    qr_string: Some("00020101021226".to_string()),
                    ..Default::default()
                },
            })
        }
        async fn get_transaction(&self, id: RowId) -> Result<Transaction> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            let next = if statuses.len() > 1 {
                statuses.pop_front().flatten()
            } else {
                statuses.front().copied().flatten()
            };
            match next {
                Some(status) => Ok(transaction(id, status, &request())),
                None => bail!("connection reset"),
            }
        }
    }

    fn request() -> NewTransactionRequest {
        NewTransactionRequest {
            total_diamond: 100,
            total_amount: 42500,
            price: 42500,
            actual_price: 50000,
            no_wa: "081234567890".to_string(),
            target_id: 123456,
            product_id: 3,
        }
    }
    fn transaction(id: RowId, status: &str, request: &NewTransactionRequest) -> Transaction {
        Transaction {
            id,
            total_diamond: request.total_diamond,
            total_amount: request.total_amount,
            no_wa: request.no_wa.clone(),
            status: status.to_string(),
            merchant_transaction_id: Some(format!("TRX-{}", id)),
            target_id: Some(request.target_id),
            product_id: Some(request.product_id),
            price: Some(request.price),
            actual_price: Some(request.actual_price),
            created_at: None,
            updated_at: None,
        }
    }
    fn order() -> ValidatedOrder {
        ValidatedOrder {
            player_id: "123456".to_string(),
            phone: "081234567890".to_string(),
            product: Product {
                id: 3,
                name: "100 Diamonds".to_string(),
                price: 42500,
                actual_price: 50000,
                discount: 15,
                is_populer: true,
                total_diamond: 100,
                created_at: None,
                updated_at: None,
            },
        }
    }
    fn config() -> PollConfig {
        PollConfig::default()
    }

    #[test]
    fn classifies_statuses() {
        assert_eq!(classify_status("settlement"), PaymentStatus::Success);
        assert_eq!(classify_status("PAID"), PaymentStatus::Success);
        assert_eq!(classify_status("capture_captured"), PaymentStatus::Success);
        assert_eq!(classify_status("expired"), PaymentStatus::Failed);
        assert_eq!(classify_status("Cancelled"), PaymentStatus::Failed);
        assert_eq!(classify_status("void"), PaymentStatus::Failed);
        assert_eq!(classify_status("waiting_payment"), PaymentStatus::Pending);
        assert_eq!(classify_status("processing"), PaymentStatus::Pending);
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Unconfirmed.is_terminal());
    }

    #[test]
    fn quote_shows_original_price_only_with_discount() {
        let quote = Quote::for_product(&order().product);
        assert_eq!(quote.original_price, Some(50000));
        let mut product = order().product;
        product.discount = 0;
        assert_eq!(Quote::for_product(&product).original_price, None);
    }

    #[tokio::test(start_paused = true)]
    async fn settlement_stops_polling() {
        let api = TestApi::new(&[Some("waiting_payment"), None, Some("settlement")]);
        let mut checkout = Checkout::new(api.clone(), config());
        checkout.open(order()).await.unwrap();
        let state = checkout.confirm().await.unwrap();
        assert_eq!(state.name(), "qris");

        let poller = checkout.poller_mut().unwrap();
        let celebration = poller.take_celebration().unwrap();
        assert_eq!(poller.finished().await, PaymentStatus::Success);
        assert_eq!(celebration.await.unwrap().status, "settlement");
        assert_eq!(api.polls(), 3);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_stops_polling() {
        let api = TestApi::new(&[Some("expired")]);
        let mut checkout = Checkout::new(api.clone(), config());
        checkout.open(order()).await.unwrap();
        checkout.confirm().await.unwrap();
        let poller = checkout.poller().unwrap();
        assert_eq!(poller.finished().await, PaymentStatus::Failed);
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_keeps_polling_every_interval() {
        let api = TestApi::new(&[Some("waiting_payment")]);
        let mut checkout = Checkout::new(api.clone(), config());
        checkout.open(order()).await.unwrap();
        checkout.confirm().await.unwrap();

        // ticks at 0s, 3s, 6s and 9s
        time::sleep(Duration::from_millis(9_500)).await;
        assert_eq!(api.polls(), 4);
        assert_eq!(checkout.poller().unwrap().status(), PaymentStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_halts_polling() {
        let api = TestApi::new(&[Some("waiting_payment")]);
        let mut checkout = Checkout::new(api.clone(), config());
        checkout.open(order()).await.unwrap();
        checkout.confirm().await.unwrap();
        time::sleep(Duration::from_millis(3_500)).await;
        let before = api.polls();
        assert!(before >= 1);

        checkout.close();
        assert!(!checkout.is_open());
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.polls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_requires_a_fresh_lookup() {
        let api = TestApi::new(&[Some("pending")]);
        let mut checkout = Checkout::new(api.clone(), config());
        checkout.open(order()).await.unwrap();
        checkout.confirm().await.unwrap();
        checkout.close();

        assert_eq!(
            checkout.confirm().await.unwrap_err(),
            CheckoutError::WrongState("confirm")
        );
        let state = checkout.open(order()).await.unwrap();
        assert_eq!(state.name(), "confirm");
        assert_eq!(api.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_nickname_keeps_dialog_closed() {
        let api = Arc::new(TestApi {
            nick_found: false,
            ..Default::default()
        });
        let mut checkout = Checkout::new(api.clone(), config());
        let err = checkout.open(order()).await.unwrap_err();
        assert_eq!(err, CheckoutError::LookupFailed("not found".to_string()));
        assert!(!checkout.is_open());
        assert_eq!(api.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn qris_failure_stays_in_confirm_and_retry_reuses_transaction() {
        let api = TestApi::new(&[Some("pending")]);
        api.fail_qris.store(true, Ordering::SeqCst);
        let mut checkout = Checkout::new(api.clone(), config());
        checkout.open(order()).await.unwrap();

        let err = checkout.confirm().await.unwrap_err();
        assert!(matches!(err, CheckoutError::InitiateQris(_)));
        assert_eq!(checkout.state().unwrap().name(), "confirm");
        assert!(checkout.poller().is_none());

        api.fail_qris.store(false, Ordering::SeqCst);
        checkout.confirm().await.unwrap();
        assert_eq!(api.creates.load(Ordering::SeqCst), 1);
        assert_eq!(api.qris_calls.load(Ordering::SeqCst), 2);
        match checkout.state().unwrap() {
            DialogState::Qris { transaction, .. } => assert_eq!(transaction.id, 1),
            other => panic!("unexpected state {}", other.name()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let api = TestApi::new(&[Some("waiting_payment")]);
        let config = PollConfig {
            max_attempts: 5,
            ..PollConfig::default()
        };
        let mut checkout = Checkout::new(api.clone(), config);
        checkout.open(order()).await.unwrap();
        checkout.confirm().await.unwrap();
        let poller = checkout.poller().unwrap();
        assert_eq!(poller.finished().await, PaymentStatus::Unconfirmed);
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.polls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_duration() {
        let api = TestApi::new(&[None]);
        let config = PollConfig {
            max_duration: Duration::from_secs(10),
            ..PollConfig::default()
        };
        let mut checkout = Checkout::new(api.clone(), config);
        checkout.open(order()).await.unwrap();
        checkout.confirm().await.unwrap();
        let poller = checkout.poller().unwrap();
        assert_eq!(poller.finished().await, PaymentStatus::Unconfirmed);
        // polls at 0, 3, 6 and 9 seconds, the 12 second tick gives up
        assert_eq!(api.polls(), 4);
    }

    #[tokio::test]
    async fn non_numeric_player_id_is_rejected_before_creating() {
        let api = TestApi::new(&[Some("pending")]);
        let mut checkout = Checkout::new(api.clone(), config());
        let mut order = order();
        order.player_id = "abc".to_string();
        checkout.open(order).await.unwrap();
        let err = checkout.confirm().await.unwrap_err();
        assert_eq!(err, CheckoutError::InvalidPlayerId("abc".to_string()));
        assert_eq!(api.creates.load(Ordering::SeqCst), 0);
    }
}
