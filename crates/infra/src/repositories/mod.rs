mod memory;
mod postgres;

pub use memory::*;
pub use postgres::*;
