use serde::Serialize;

/// What a backend reports about itself so the application can pick a
/// batching, draining and uniqueness strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Commits are expensive; group many writes per transaction.
    pub prefer_big_transactions: bool,
    /// Data is only guaranteed visible after an explicit `drain()`.
    pub needs_draining: bool,
    /// Composite indices can be declared unique and are enforced by the backend.
    pub supports_unique_index: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        prefer_big_transactions: false,
        needs_draining: false,
        supports_unique_index: false,
    };
}
