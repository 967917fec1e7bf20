use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::core::donation::DonationForm;
use crate::core::participant::{PaymentStatus, Registration};

/// Map of field name to a human-readable message, one entry per failed field.
pub type FieldErrors = BTreeMap<&'static str, String>;

lazy_static! {
    /// Kenyan mobile numbers: optional +254 or leading 0, then 7 or 1,
    /// then 8 digits.
    static ref PHONE_RE: Regex = Regex::new(r"^(\+254|0)[17]\d{8}$").unwrap();
    static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

/// Raw registration form input. Absent fields are either defaulted below or
/// rejected with a field error; nothing here has been checked yet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationInput {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub email: String,
    pub number_of_guests: Option<i64>,
    pub payment_status: Option<String>,
    pub amount_paid: Option<f64>,
    pub avatar_url: Option<String>,
}

/// Raw donation form input.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DonationInput {
    #[serde(default)]
    pub item_name: String,
    pub quantity: Option<i64>,
    pub description: Option<String>,
}

/// Checks a registration form and produces the record to insert, or the
/// per-field messages to render. Pure, no I/O.
///
/// Defaults for absent fields: 1 guest, pending status, 0 paid. A pending
/// registration always comes out with `amount_paid` 0, whatever was
/// submitted.
pub fn validate_registration(input: &RegistrationInput) -> Result<Registration, FieldErrors> {
    let mut errors = FieldErrors::new();

    if input.full_name.is_empty() {
        errors.insert("full_name", "Full name is required".to_string());
    } else if input.full_name.chars().count() < 2 {
        errors.insert("full_name", "Name must be at least 2 characters".to_string());
    }

    if input.phone_number.is_empty() {
        errors.insert("phone_number", "Phone number is required".to_string());
    } else if !PHONE_RE.is_match(&input.phone_number) {
        errors.insert(
            "phone_number",
            "Please enter a valid Kenyan phone number".to_string(),
        );
    }

    if input.email.is_empty() {
        errors.insert("email", "Email is required".to_string());
    } else if !EMAIL_RE.is_match(&input.email) {
        errors.insert("email", "Please enter a valid email address".to_string());
    }

    let number_of_guests = input.number_of_guests.unwrap_or(1);
    if number_of_guests < 1 {
        errors.insert("number_of_guests", "At least 1 guest is required".to_string());
    } else if number_of_guests > 10 {
        errors.insert("number_of_guests", "Maximum 10 guests allowed".to_string());
    }

    let payment_status = match &input.payment_status {
        None => Some(PaymentStatus::Pending),
        Some(value) => {
            let parsed = PaymentStatus::parse(value);
            if parsed.is_none() {
                errors.insert("payment_status", "Invalid payment status".to_string());
            }
            parsed
        }
    };

    let amount_paid = input.amount_paid.unwrap_or(0.0);
    if amount_paid < 0.0 {
        errors.insert("amount_paid", "Amount paid cannot be negative".to_string());
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let payment_status = payment_status.unwrap();
    Ok(Registration {
        full_name: input.full_name.clone(),
        phone_number: input.phone_number.clone(),
        email: input.email.clone(),
        number_of_guests: number_of_guests as u32,
        payment_status,
        // A pending registration has not paid anything yet.
        amount_paid: match payment_status {
            PaymentStatus::Pending => 0.0,
            PaymentStatus::Partial | PaymentStatus::Paid => amount_paid,
        },
        avatar_url: input.avatar_url.clone().filter(|url| !url.is_empty()),
    })
}

/// Checks a donation form. Defaults: quantity 1. An empty description is
/// stored as absent.
pub fn validate_donation(input: &DonationInput) -> Result<DonationForm, FieldErrors> {
    let mut errors = FieldErrors::new();

    if input.item_name.is_empty() {
        errors.insert("item_name", "Item name is required".to_string());
    } else if input.item_name.chars().count() < 2 {
        errors.insert(
            "item_name",
            "Item name must be at least 2 characters".to_string(),
        );
    }

    let quantity = input.quantity.unwrap_or(1);
    if quantity < 1 {
        errors.insert("quantity", "Quantity must be at least 1".to_string());
    } else if quantity > 100 {
        errors.insert("quantity", "Maximum 100 items allowed".to_string());
    }

    if let Some(description) = &input.description {
        if description.chars().count() > 200 {
            errors.insert(
                "description",
                "Description must be less than 200 characters".to_string(),
            );
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(DonationForm {
        item_name: input.item_name.clone(),
        quantity: quantity as u32,
        description: input.description.clone().filter(|d| !d.is_empty()),
    })
}
