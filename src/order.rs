use thiserror::Error;

use crate::api::{Product, ProductRequest};

const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 15;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneError {
    #[error("Nomor WhatsApp tidak boleh kosong")]
    Empty,
    #[error("Nomor WhatsApp minimal 10 digit")]
    TooShort,
    #[error("Nomor WhatsApp maksimal 15 digit")]
    TooLong,
    #[error("Nomor WhatsApp harus dimulai dengan 08, +628, atau 628")]
    BadPrefix,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("Royal ID wajib diisi")]
    MissingPlayerId,
    #[error("Pilih paket top up terlebih dahulu")]
    MissingProduct,
    #[error(transparent)]
    Phone(#[from] PhoneError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProductFormError {
    #[error("Nama product wajib diisi")]
    MissingName,
    #[error("Harga harus lebih dari 0")]
    PriceTooLow,
    #[error("Total diamond harus lebih dari 0")]
    DiamondsTooLow,
    #[error("Diskon harus antara 0 dan 100")]
    DiscountOutOfRange,
}

/// Keeps what a phone field accepts while typing: digits, `+` and spaces.
pub fn sanitize_phone(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+' || c.is_whitespace())
        .collect()
}

pub fn validate_phone(number: &str) -> Result<(), PhoneError> {
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(PhoneError::Empty);
    }
    if digits.len() < MIN_PHONE_DIGITS {
        return Err(PhoneError::TooShort);
    }
    if digits.len() > MAX_PHONE_DIGITS {
        return Err(PhoneError::TooLong);
    }
    let valid_prefix =
        digits.starts_with("08") || digits.starts_with("628") || number.starts_with("+628");
    if !valid_prefix {
        return Err(PhoneError::BadPrefix);
    }
    Ok(())
}

/// An order that passed submit-time validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOrder {
    pub player_id: String,
    pub phone: String,
    pub product: Product,
}

/// Top-up order form state. Keystroke edits update the inline error without
/// blocking; `submit` re-validates everything and blocks on failure.
#[derive(Debug, Clone, Default)]
pub struct OrderForm {
    player_id: String,
    phone: String,
    phone_error: Option<PhoneError>,
    product: Option<Product>,
}
impl OrderForm {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_player_id(&mut self, player_id: &str) {
        self.player_id = player_id.trim().to_string();
    }
    pub fn set_phone(&mut self, input: &str) {
        self.phone = sanitize_phone(input);
        self.phone_error = if self.phone.trim().is_empty() {
            None
        } else {
            validate_phone(&self.phone).err()
        };
    }
    pub fn select_product(&mut self, product: Product) {
        self.product = Some(product);
    }
    pub fn phone(&self) -> &str {
        &self.phone
    }
    pub fn phone_error(&self) -> Option<PhoneError> {
        self.phone_error
    }
    /// True once every field has a value, i.e. when the pay button shows.
    pub fn is_complete(&self) -> bool {
        !self.player_id.is_empty() && !self.phone.is_empty() && self.product.is_some()
    }
    pub fn submit(&mut self) -> Result<ValidatedOrder, OrderError> {
        if self.player_id.is_empty() {
            return Err(OrderError::MissingPlayerId);
        }
        if let Err(e) = validate_phone(&self.phone) {
            self.phone_error = Some(e);
            return Err(e.into());
        }
        self.phone_error = None;
        let product = self.product.clone().ok_or(OrderError::MissingProduct)?;
        Ok(ValidatedOrder {
            player_id: self.player_id.clone(),
            phone: self.phone.trim().to_string(),
            product,
        })
    }
}

pub fn validate_product(request: &ProductRequest) -> Result<(), ProductFormError> {
    if request.name.trim().is_empty() {
        return Err(ProductFormError::MissingName);
    }
    if request.price < 1 {
        return Err(ProductFormError::PriceTooLow);
    }
    if request.total_diamond < 1 {
        return Err(ProductFormError::DiamondsTooLow);
    }
    if request.discount > 100 {
        return Err(ProductFormError::DiscountOutOfRange);
    }
    Ok(())
}
