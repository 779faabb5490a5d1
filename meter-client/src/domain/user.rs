use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::lenient;

/// A registered household, stored under `users/{id}`.
///
/// Field names on the wire follow the layout older portal versions wrote,
/// hence the mix of camelCase and snake_case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "consumerNumber", deserialize_with = "lenient::string")]
    pub consumer_number: String,
    #[serde(rename = "phoneNumber", default, deserialize_with = "lenient::string")]
    pub phone_number: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub approved_load_kw: Option<f64>,
    #[serde(default)]
    pub approved_phase: Option<String>,
    #[serde(rename = "isInstalled", default)]
    pub is_installed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub registration_date: OffsetDateTime,
}

impl User {
    /// Consumer numbers compare after trimming, ignoring ASCII case.
    pub fn has_consumer_number(&self, candidate: &str) -> bool {
        self.consumer_number
            .trim()
            .eq_ignore_ascii_case(candidate.trim())
    }

    /// Phone numbers compare on their digits only, so `+91 98470-12345`
    /// matches `919847012345`.
    pub fn phone_matches(&self, candidate: &str) -> bool {
        let stored = digits(&self.phone_number);
        !stored.is_empty() && stored == digits(candidate)
    }
}

fn digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Registration input. The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub name: String,
    pub consumer_number: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub approved_load_kw: Option<f64>,
    pub approved_phase: Option<String>,
}

impl NewUser {
    /// Every new registration starts uninstalled.
    pub fn into_user(self, id: String, registered_at: OffsetDateTime) -> User {
        User {
            id,
            name: self.name,
            consumer_number: self.consumer_number.trim().to_string(),
            phone_number: self.phone_number,
            email: self.email,
            address: self.address,
            approved_load_kw: self.approved_load_kw,
            approved_phase: self.approved_phase,
            is_installed: false,
            registration_date: registered_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample() -> User {
        NewUser {
            name: "Asha".to_string(),
            consumer_number: " 1155 ".to_string(),
            phone_number: "+91 98470-12345".to_string(),
            email: None,
            address: None,
            approved_load_kw: Some(5.0),
            approved_phase: Some("single".to_string()),
        }
        .into_user("u-1".to_string(), datetime!(2024-01-01 00:00:00 UTC))
    }

    #[test]
    fn new_user_is_uninstalled_with_trimmed_consumer_number() {
        let u = sample();
        assert!(!u.is_installed);
        assert_eq!(u.consumer_number, "1155");
    }

    #[test]
    fn phone_comparison_ignores_formatting() {
        let u = sample();
        assert!(u.phone_matches("919847012345"));
        assert!(u.phone_matches("91-98470 12345"));
        assert!(!u.phone_matches("9847012345"));
        assert!(!u.phone_matches(""));
    }

    #[test]
    fn consumer_number_comparison_trims_and_ignores_case() {
        let mut u = sample();
        assert!(u.has_consumer_number("1155 "));
        u.consumer_number = "kseb-77a".to_string();
        assert!(u.has_consumer_number("KSEB-77A"));
        assert!(!u.has_consumer_number("kseb-77"));
    }

    #[test]
    fn legacy_record_with_numeric_fields_deserializes() {
        let raw = r#"{
            "id": "-Nabc",
            "name": "Ravi",
            "consumerNumber": 1155,
            "phoneNumber": 9847012345,
            "approved_load_kw": "3.5",
            "approved_phase": "single",
            "isInstalled": true,
            "registration_date": "2024-02-01T10:00:00Z"
        }"#;
        let u: User = serde_json::from_str(raw).unwrap();
        assert_eq!(u.consumer_number, "1155");
        assert_eq!(u.phone_number, "9847012345");
        assert_eq!(u.approved_load_kw, Some(3.5));
        assert!(u.is_installed);
    }
}
