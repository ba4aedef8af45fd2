mod engagement;
mod session;

pub use engagement::*;
pub use session::*;
