//! Client-side projection of a user's balance with optimistic increments.

use crate::{
    error::{
        Error,
        Result,
    },
    store::UserStore,
};
use tokio::sync::watch;

/// Where the most recent increment stands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BalancePhase {
    #[default]
    Idle,
    /// The optimistic estimate is shown while the backend call is in flight.
    /// `None` when the balance was never loaded.
    Pending { optimistic: Option<i64> },
    /// The backend confirmed; the cache holds its value.
    Committed { server: i64 },
    /// The backend refused; the delta was taken back out.
    RolledBack { prior: Option<i64>, error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceState {
    /// Cached copy of the server balance, `None` until first loaded.
    pub balance: Option<i64>,
    pub is_loading: bool,
    pub last_error: Option<String>,
    pub phase: BalancePhase,
}

pub struct BalanceLedger<S> {
    store: S,
    state: watch::Sender<BalanceState>,
}

impl<S> BalanceLedger<S> {
    pub fn new(store: S) -> Self {
        let (state, _) = watch::channel(BalanceState::default());
        Self { store, state }
    }

    /// Receiver that observes every state change, optimistic ones included.
    pub fn subscribe(&self) -> watch::Receiver<BalanceState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> BalanceState {
        self.state.borrow().clone()
    }

    pub fn balance(&self) -> Option<i64> {
        self.state.borrow().balance
    }
}

impl<S: UserStore> BalanceLedger<S> {
    /// Fetch the stored balance. On failure the cached balance is kept and
    /// only the error flag changes.
    pub async fn load(&self, telegram_id: &str) -> Result<i64> {
        self.state.send_modify(|state| state.is_loading = true);

        let outcome = match self.store.find_user(telegram_id).await {
            Ok(Some(record)) => Ok(record.balance),
            Ok(None) => Err(Error::UserNotFound(telegram_id.to_string())),
            Err(err) => Err(Error::from(err)),
        };

        self.state.send_modify(|state| {
            state.is_loading = false;
            match &outcome {
                Ok(balance) => {
                    state.balance = Some(*balance);
                    state.last_error = None;
                }
                Err(err) => state.last_error = Some(err.to_string()),
            }
        });
        match &outcome {
            Ok(balance) => tracing::debug!(telegram_id, balance, "balance loaded"),
            Err(err) => tracing::warn!(telegram_id, %err, "balance load failed"),
        }
        outcome
    }

    /// Add `amount` through the backend's atomic increment.
    ///
    /// The cache moves by `amount` before the call goes out. It is replaced by
    /// the server value on success and has the shown delta subtracted again
    /// on failure. Nothing is retried and repeated calls add again.
    pub async fn increment(&self, telegram_id: &str, amount: i64) -> Result<i64> {
        // What the optimistic step actually added, which differs from
        // `amount` once the estimate saturates.
        let mut shown = 0i64;
        self.state.send_modify(|state| {
            if let Some(prior) = state.balance {
                let optimistic = prior.saturating_add(amount);
                shown = optimistic - prior;
                state.balance = Some(optimistic);
            }
            state.last_error = None;
            state.phase = BalancePhase::Pending {
                optimistic: state.balance,
            };
        });

        let outcome = match self.store.add_to_balance(telegram_id, amount).await {
            Ok(Some(server)) => Ok(server),
            Ok(None) => Err(Error::UserNotFound(telegram_id.to_string())),
            Err(err) => Err(Error::from(err)),
        };

        match outcome {
            Ok(server) => {
                self.state.send_modify(|state| {
                    state.balance = Some(server);
                    state.phase = BalancePhase::Committed { server };
                });
                tracing::info!(
                    telegram_id,
                    amount,
                    balance = server,
                    "balance increment committed"
                );
                Ok(server)
            }
            Err(err) => {
                let message = err.to_string();
                self.state.send_modify(|state| {
                    state.balance = state.balance.map(|b| b.saturating_sub(shown));
                    state.last_error = Some(message.clone());
                    state.phase = BalancePhase::RolledBack {
                        prior: state.balance,
                        error: message.clone(),
                    };
                });
                tracing::warn!(telegram_id, amount, %err, "balance increment rolled back");
                Err(err)
            }
        }
    }
}
