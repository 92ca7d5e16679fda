pub mod clock;
pub mod error;
pub mod rate_limit;
pub mod tick;
pub mod traits;
pub mod types;
pub mod watchlist;

pub use clock::*;
pub use error::*;
pub use rate_limit::*;
pub use tick::*;
pub use traits::*;
pub use types::*;
pub use watchlist::*;
