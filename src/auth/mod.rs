//! Identity engines: registration, verification, and the login gate.

pub mod code;
pub mod config;
pub mod error;
pub mod guard;
pub mod login;
pub mod register;
pub mod types;
pub mod validate;
pub mod verify;

pub use config::AuthConfig;
pub use error::{AuthError, ConflictField};
pub use login::{Login, login};
pub use register::{RegisterRequest, Registration, register};
pub use types::{Account, AccountKind, Session};
pub use verify::{Resend, resend, verify};
