//! Format checks for card and UPI payment details.
//!
//! Nothing here talks to a payment network. A checkout that names a card or
//! a UPI id is still paid from the wallet; the details only have to look
//! right.

use chrono::{Datelike, Utc};

use crate::domain::commands::orders::PaymentMethod;
use crate::domain::errors::PaymentValidationError;

pub fn validate_payment_method(method: &PaymentMethod) -> Result<(), PaymentValidationError> {
    match method {
        PaymentMethod::Wallet => Ok(()),
        PaymentMethod::Card {
            number,
            expiry,
            cvv,
            holder,
        } => {
            validate_card_number(number)?;
            let today = Utc::now();
            validate_expiry(expiry, today.year(), today.month())?;
            validate_cvv(cvv)?;
            if holder.trim().is_empty() {
                return Err(PaymentValidationError::HolderName);
            }
            Ok(())
        }
        PaymentMethod::Upi { vpa } => validate_upi(vpa),
    }
}

/// 13-19 digits (spaces and dashes ignored) passing the Luhn check
pub fn validate_card_number(number: &str) -> Result<(), PaymentValidationError> {
    let digits: Vec<u32> = number
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .map(|c| c.to_digit(10).ok_or(PaymentValidationError::CardNumberLength))
        .collect::<Result<_, _>>()?;

    if !(13..=19).contains(&digits.len()) {
        return Err(PaymentValidationError::CardNumberLength);
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    if sum % 10 != 0 {
        return Err(PaymentValidationError::CardChecksum);
    }
    Ok(())
}

/// `MM/YY`, valid through the end of that month
pub fn validate_expiry(expiry: &str, current_year: i32, current_month: u32) -> Result<(), PaymentValidationError> {
    let (month, year) = expiry
        .trim()
        .split_once('/')
        .ok_or(PaymentValidationError::ExpiryFormat)?;
    if month.len() != 2 || year.len() != 2 {
        return Err(PaymentValidationError::ExpiryFormat);
    }
    let month: u32 = month.parse().map_err(|_| PaymentValidationError::ExpiryFormat)?;
    let year: i32 = year.parse().map_err(|_| PaymentValidationError::ExpiryFormat)?;
    if !(1..=12).contains(&month) {
        return Err(PaymentValidationError::ExpiryFormat);
    }

    let year = 2000 + year;
    if (year, month) < (current_year, current_month) {
        return Err(PaymentValidationError::CardExpired);
    }
    Ok(())
}

pub fn validate_cvv(cvv: &str) -> Result<(), PaymentValidationError> {
    if (3..=4).contains(&cvv.len()) && cvv.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(PaymentValidationError::Cvv)
    }
}

/// `handle@provider`: handle of letters, digits, `.`, `-` or `_`; provider letters only
pub fn validate_upi(vpa: &str) -> Result<(), PaymentValidationError> {
    let (handle, provider) = vpa
        .trim()
        .split_once('@')
        .ok_or(PaymentValidationError::UpiFormat)?;

    let handle_ok = (2..=256).contains(&handle.len())
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    let provider_ok = (2..=64).contains(&provider.len()) && provider.chars().all(|c| c.is_ascii_alphabetic());

    if handle_ok && provider_ok {
        Ok(())
    } else {
        Err(PaymentValidationError::UpiFormat)
    }
}
