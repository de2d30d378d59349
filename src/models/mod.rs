pub mod count;
pub mod proxy;

pub use count::*;
pub use proxy::*;
