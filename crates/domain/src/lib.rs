pub mod entities;
pub mod messaging;
pub mod repositories;

pub use entities::*;
pub use messaging::*;
pub use repositories::*;
