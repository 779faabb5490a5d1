//! Portal sessions and admin credentials.

pub mod password;
pub mod session;

pub use session::{AdminSession, Claims, Role, SessionKeys, UserSession, COOKIE_NAME};
