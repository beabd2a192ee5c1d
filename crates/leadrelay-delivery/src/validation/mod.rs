//! WhatsApp number validation.
//!
//! `pending → {valid, invalid, error}`. The server side records the request
//! and forwards it to the validation service ([`ValidationService`]); the
//! service answers through a callback; the caller waits on a bounded poll
//! ([`ValidationPoller`]) that only reads the row.

mod poller;
mod service;

pub use poller::{
    HttpStatusSource, PollOutcome, StorageStatusSource, ValidationPoller, ValidationSnapshot,
    ValidationStatusSource,
};
pub use service::{ValidationAck, ValidationCallback, ValidationService};

use crate::error::{DeliveryError, Result};

/// Digits a normalized number must have: two-digit area code plus nine.
pub const PHONE_DIGITS: usize = 11;

/// Strips everything but digits and requires exactly [`PHONE_DIGITS`].
///
/// # Errors
///
/// Returns `InvalidFormat` for any other digit count.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != PHONE_DIGITS {
        return Err(DeliveryError::invalid_format(format!(
            "expected {PHONE_DIGITS} digits, got {}",
            digits.len()
        )));
    }
    Ok(digits)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn punctuation_is_stripped() {
        assert_eq!(normalize_phone("(82) 99999-1234").unwrap(), "82999991234");
        assert_eq!(normalize_phone(" 82 9 9999 1234 ").unwrap(), "82999991234");
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        for raw in ["", "8299999123", "829999912345", "+55 (82) 99999-1234", "abc"] {
            assert!(
                matches!(normalize_phone(raw), Err(DeliveryError::InvalidFormat { .. })),
                "{raw}"
            );
        }
    }

    proptest! {
        #[test]
        fn accepts_exactly_eleven_digits(digits in "[0-9]{1,20}", noise in "[ ()+.-]{0,4}") {
            let raw = format!("{noise}{digits}{noise}");
            let result = normalize_phone(&raw);
            if digits.len() == PHONE_DIGITS {
                prop_assert_eq!(result.unwrap(), digits);
            } else {
                prop_assert!(result.is_err());
            }
        }
    }
}
