pub use error::{
    BackendError,
    Error,
    Result,
};
pub use balance::{
    BalanceLedger,
    BalancePhase,
    BalanceState,
};
pub use config::{
    BackendConfig,
    VerifierConfig,
};
pub use identity::IdentityResolver;
pub use in_memory_store::InMemoryUserStore;
pub use invite::{
    InviteLink,
    parse_invite,
};
pub use launch::{
    InitDataVerifier,
    LaunchData,
    LaunchUser,
    PayloadEncoding,
};
pub use rest_store::RestUserStore;
pub use session::{
    Session,
    SessionStatus,
};
pub use store::{
    ReferralStore,
    StoreResult,
    UserStore,
};
pub use user::{
    LeaderboardEntry,
    Referral,
    UserProfile,
    UserRecord,
};

pub mod balance;
pub mod config;
pub mod error;
pub mod identity;
pub mod in_memory_store;
pub mod invite;
pub mod launch;
pub mod rest_store;
pub mod session;
pub mod store;
pub mod user;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
