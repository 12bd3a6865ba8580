use crate::error::{AuthorizationError, LedgerResult, ValidationError};
use crate::game::Identity;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Fee amounts in the smallest unit of the settlement currency
pub type Amount = u128;

/// Snapshot of the fee account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeAccount {
    pub rate_per_move: Amount,
    pub accumulated: Amount,
}

/// Per-move fee metering with an admin-withdrawable accumulator.
///
/// One mutex guards both fields; it is held only for the fee check plus
/// accrual on a move, or the read plus zeroing on a withdrawal, so accruals
/// can never race a withdrawal into being lost or counted twice.
pub struct FeeMeter {
    admin: Identity,
    account: Mutex<FeeAccount>,
}

impl FeeMeter {
    pub fn new(admin: Identity, rate_per_move: Amount) -> Self {
        Self {
            admin,
            account: Mutex::new(FeeAccount {
                rate_per_move,
                accumulated: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeeAccount> {
        // The guarded data is two integers; a panicked holder cannot leave it torn
        self.account.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn admin(&self) -> &Identity {
        &self.admin
    }

    pub fn ensure_admin(&self, caller: &Identity) -> LedgerResult<()> {
        if *caller != self.admin {
            return Err(AuthorizationError::NotAdmin.into());
        }
        Ok(())
    }

    pub fn account(&self) -> FeeAccount {
        *self.lock()
    }

    /// Change the per-move rate. Moves checked after this returns pay the new rate.
    pub fn set_rate(&self, caller: &Identity, rate: Amount) -> LedgerResult<()> {
        self.ensure_admin(caller)?;
        let previous = std::mem::replace(&mut self.lock().rate_per_move, rate);
        info!(previous, rate, "fee rate changed");
        Ok(())
    }

    /// Check `paid` against the current rate and accrue it in one step
    pub fn charge(&self, paid: Amount) -> Result<(), ValidationError> {
        let mut account = self.lock();
        if paid != account.rate_per_move {
            return Err(ValidationError::IncorrectFee {
                expected: account.rate_per_move,
                paid,
            });
        }
        account.accumulated = account.accumulated.saturating_add(paid);
        Ok(())
    }

    /// Drain the accumulator, returning what was withdrawn
    pub fn withdraw(&self, caller: &Identity) -> LedgerResult<Amount> {
        self.ensure_admin(caller)?;
        let amount = std::mem::take(&mut self.lock().accumulated);
        info!(amount, "fees withdrawn");
        Ok(amount)
    }
}
