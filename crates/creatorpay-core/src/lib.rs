pub mod config;
pub mod error;
pub mod evaluation;
pub mod ingest;
pub mod negotiation;
pub mod payment;
pub mod pricing;
pub mod session;
pub mod state;

pub use config::*;
pub use error::*;
pub use evaluation::*;
pub use ingest::*;
pub use negotiation::*;
pub use payment::*;
pub use pricing::*;
pub use session::*;
pub use state::*;
