pub mod address;
pub mod chain;
pub mod flow;
pub mod sync_state;
pub mod transfer;

pub use address::*;
pub use chain::*;
pub use flow::*;
pub use sync_state::*;
pub use transfer::*;
