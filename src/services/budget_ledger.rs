//! Budget Ledger
//!
//! Token bucket per provider per clock hour. Rows are created lazily on the
//! first admission of the hour, only ever incremented, and simply left behind
//! when the hour rolls over.

use crate::db::sqlite::columns::hour_window;
use crate::db::sqlite::models::Budget;
use crate::error::Result;
use crate::providers::ProviderKind;
use crate::state::AppState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Budget position of one provider in the current hour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub provider: ProviderKind,
    pub window_start: DateTime<Utc>,
    pub rate_limit: i64,
    pub used: i64,
    pub remaining: i64,
}

/// Budget ledger operations
pub struct BudgetLedger;

impl BudgetLedger {
    /// Make sure every registered provider has a row for the hour containing `now`
    pub fn ensure_current(state: &AppState, now: &DateTime<Utc>) -> Result<()> {
        let window = hour_window(now);
        for provider in state.providers.kinds() {
            state.db.ensure_budget(provider, &window, state.rate_limit(provider), now)?;
        }
        Ok(())
    }

    /// Atomically take up to `count` tokens from the current hour; returns the grant
    pub fn try_reserve(
        state: &AppState,
        provider: ProviderKind,
        count: i64,
        now: &DateTime<Utc>,
    ) -> Result<i64> {
        let window = hour_window(now);
        let granted = state
            .db
            .try_reserve(provider, &window, state.rate_limit(provider), count, now)?;

        if granted < count {
            tracing::warn!(
                provider = %provider,
                requested = count,
                granted,
                "Hourly budget exhausted"
            );
        }
        Ok(granted)
    }

    /// Current-hour position for every registered provider
    pub fn current(state: &AppState, now: &DateTime<Utc>) -> Result<Vec<BudgetStatus>> {
        let window = hour_window(now);
        let mut statuses = Vec::new();

        for provider in state.providers.kinds() {
            let budget = state.db.get_budget(provider, &window)?.unwrap_or(Budget {
                provider,
                window_start: window,
                rate_limit: state.rate_limit(provider),
                used: 0,
            });
            statuses.push(BudgetStatus {
                provider,
                window_start: budget.window_start,
                rate_limit: budget.rate_limit,
                used: budget.used,
                remaining: budget.remaining(),
            });
        }

        Ok(statuses)
    }

    /// Ledger rows for the last `hours` windows
    pub fn history(state: &AppState, hours: i64, now: &DateTime<Utc>) -> Result<Vec<Budget>> {
        let since = hour_window(now) - Duration::hours(hours.max(0));
        state.db.list_budgets(&since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    #[test]
    fn test_clamp_grants_remaining_tokens() {
        let state = test_state();
        let now = Utc::now();
        let window = hour_window(&now);

        // rate_limit 10, used 8, ask for 5 -> 2
        state.db.try_reserve(ProviderKind::StockX, &window, 10, 8, &now).unwrap();
        let granted = BudgetLedger::try_reserve(&state, ProviderKind::StockX, 5, &now).unwrap();
        assert_eq!(granted, 2);

        let current = BudgetLedger::current(&state, &now).unwrap();
        let stockx = current.iter().find(|b| b.provider == ProviderKind::StockX).unwrap();
        assert_eq!(stockx.used, 10);
        assert_eq!(stockx.remaining, 0);
    }

    #[test]
    fn test_ensure_current_creates_rows_lazily() {
        let state = test_state();
        let now = Utc::now();
        assert!(BudgetLedger::history(&state, 1, &now).unwrap().is_empty());

        BudgetLedger::ensure_current(&state, &now).unwrap();
        BudgetLedger::ensure_current(&state, &now).unwrap();
        assert_eq!(BudgetLedger::history(&state, 1, &now).unwrap().len(), 2);
    }
}
