pub mod user;
pub mod score;
pub mod error;

pub use user::*;
pub use score::*;
pub use error::*;
