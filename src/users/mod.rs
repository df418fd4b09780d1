//! Users and email verification

mod memory;
mod postgres;
mod service;
mod store;

pub use memory::InMemoryUserStore;
pub use postgres::PgUserStore;
pub use service::{NewUser, UserChanges, UserService, SECRET_CODE_LEN};
pub use store::UserStore;
