use crate::fees::Amount;
use crate::game::Identity;
use crate::ledger::{LedgerSettings, SelfJoinPolicy, DEFAULT_CHANNEL_CAPACITY};
use anyhow::{anyhow, bail, Context, Result};

/// Ledger server configuration, read from `LEDGER_*` environment variables
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub addr: String,
    pub admin: Identity,
    pub fee_rate: Amount,
    pub self_join: SelfJoinPolicy,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr = lookup("LEDGER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let admin = lookup("LEDGER_ADMIN").ok_or_else(|| anyhow!("LEDGER_ADMIN must be set"))?;
        let admin = Identity::parse(&admin).context("LEDGER_ADMIN is not a valid identity")?;

        let fee_rate = match lookup("LEDGER_FEE_RATE") {
            Some(raw) => raw
                .trim()
                .parse::<Amount>()
                .with_context(|| format!("LEDGER_FEE_RATE is not an amount: {raw}"))?,
            None => 0,
        };

        let self_join = match lookup("LEDGER_SELF_JOIN").as_deref().map(str::trim) {
            None | Some("reject") => SelfJoinPolicy::Reject,
            Some("allow") => SelfJoinPolicy::Allow,
            Some(other) => bail!("LEDGER_SELF_JOIN must be 'allow' or 'reject', got '{other}'"),
        };

        let log_filter = lookup("LEDGER_LOG").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            addr,
            admin,
            fee_rate,
            self_join,
            log_filter,
        })
    }

    pub fn settings(&self) -> LedgerSettings {
        LedgerSettings {
            admin: self.admin.clone(),
            fee_rate: self.fee_rate,
            self_join: self.self_join,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
