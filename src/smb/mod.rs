pub mod handlers;
pub mod locking;
pub mod mangle;
pub mod search_table;
pub mod session;
pub mod session_state;
pub mod snapshot;
pub mod trans;
pub mod types;
pub mod utils;
pub mod wildcard;
pub mod wire;

pub use session::SmbSession;
pub use session_state::SessionState;
