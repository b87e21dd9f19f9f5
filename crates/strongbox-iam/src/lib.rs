pub mod secret;
pub mod store;
pub mod system;
pub mod traits;
pub mod types;

pub use store::IdentityStore;
pub use system::IdentitySys;
pub use traits::{SessionStore, UserStore};
pub use types::{Session, User};
