use serde::{Deserialize, Serialize};

/// Admin login record. Only the bcrypt hash of the password is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AdminAccount {
    pub email: String,
    pub password_hash: String,
}

impl AdminAccount {
    /// Emails are matched case-insensitively.
    pub fn normalize_email(email: &str) -> String {
        email.trim().to_ascii_lowercase()
    }

    /// Realtime database keys may not contain `.`, `#`, `$`, `[` or `]`.
    pub fn storage_key(email: &str) -> String {
        Self::normalize_email(email)
            .chars()
            .map(|c| match c {
                '.' => ',',
                '#' | '$' | '[' | ']' | '/' => '_',
                other => other,
            })
            .collect()
    }
}
