use crate::smb::search_table::SearchHandleTable;
use crate::smb::trans::PendingTransaction;

/// Connection-local protocol state. Each connection task owns one of
/// these exclusively, so nothing in here needs locking.
pub struct SessionState {
    pub conn_id: u64,
    pub read_only: bool,
    /// Negotiated maximum packet size; sizes reply pagination.
    pub max_xmit: usize,
    pub searches: SearchHandleTable,
    /// At most one multi-packet transaction is in flight per connection.
    pub pending: Option<PendingTransaction>,
}
