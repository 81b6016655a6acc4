pub mod agent;
pub mod item;
pub mod state;

pub use agent::*;
pub use item::*;
pub use state::*;
