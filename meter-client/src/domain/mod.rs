mod admin;
mod alert;
mod daily;
mod reading;
mod user;

pub(crate) mod lenient;

pub use admin::AdminAccount;
pub use alert::{Alert, NewAlert, Severity, SeverityCounts};
pub use daily::DailyAggregate;
pub use reading::{Reading, ReadingQuery, DEFAULT_READING_LIMIT};
pub use user::{NewUser, User};
