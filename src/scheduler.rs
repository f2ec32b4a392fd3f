//! Per-deployment update scheduling.
//!
//! One [`Scheduler`] owns one deployment's update state: there is no shared
//! "is updating" flag, because a deployment is only ever driven by its own
//! scheduler task. Cross-process exclusion is a TTL lock in the database —
//! best-effort, expiring rather than being released on crash — so two
//! scheduler instances never update the same deployment concurrently.
//!
//! A cycle is: acquire/refresh the lock, read the head block, rebuild the
//! token/pair dictionaries from harvested pair events (token metadata comes
//! through the multicall reader and is cached across cycles), harvest every
//! stream up to the head, then replay referral state to the same height.
//! Errors abort the cycle (no partial cursor advance happened inside the
//! failed stage) and the next fixed-interval tick retries the same ranges.
//! The scheduler keeps a liveness signal (last successful cycle time, count
//! of consecutive failures) for an external health check to consume.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use colored::Colorize;
use tracing::{debug, error, info, warn};

use crate::db::repository::Repository;
use crate::deployment::{Deployment, TokenMeta};
use crate::error::IndexerResult;
use crate::events::FieldValue;
use crate::harvester::mapping::{Dictionaries, TokenRef};
use crate::harvester::{streams, Harvester};
use crate::multicall::MulticallReader;
use crate::referral::ReferralReplayer;
use crate::rpc::ChainClient;

/// Liveness signal for one deployment.
#[derive(Debug, Clone, Default)]
pub struct DeploymentHealth {
    /// When the last cycle completed successfully
    pub last_success_at: Option<DateTime<Utc>>,
    /// Failures since the last successful cycle
    pub consecutive_errors: u32,
}

/// Drives one deployment on a fixed interval.
pub struct Scheduler {
    chain: Arc<dyn ChainClient>,
    repo: Arc<Repository>,
    deployment: Deployment,
    multicall: MulticallReader,
    replayer: ReferralReplayer,
    holder: String,
    lock_ttl_secs: i64,
    token_cache: HashMap<Address, TokenMeta>,
    health: DeploymentHealth,
}

impl Scheduler {
    /// Creates a scheduler for one deployment.
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        repo: Arc<Repository>,
        deployment: Deployment,
        lock_ttl_secs: i64,
    ) -> Self {
        let multicall = MulticallReader::new(Arc::clone(&chain), &deployment);
        let replayer = ReferralReplayer::new(Arc::clone(&repo), deployment.clone());

        Self {
            chain,
            repo,
            deployment,
            multicall,
            replayer,
            holder: format!("indexer-{}", std::process::id()),
            lock_ttl_secs,
            token_cache: HashMap::new(),
            health: DeploymentHealth::default(),
        }
    }

    /// Current liveness signal.
    #[must_use]
    pub const fn health(&self) -> &DeploymentHealth {
        &self.health
    }

    /// Rebuild the token/pair dictionaries from harvested pair events.
    ///
    /// Token metadata is fetched through the multicall reader; addresses
    /// seen in earlier cycles are served from the in-memory cache.
    async fn resolve_dictionaries(&mut self) -> IndexerResult<Dictionaries> {
        let pair_stream = streams::stream_key(&self.deployment, "pair-created");
        let rows = self
            .repo
            .get_event_rows_in_range(&pair_stream, 0, u64::MAX)
            .await?;

        let mut pair_tokens: Vec<(Address, Address, u64)> = Vec::new();
        for row in &rows {
            let fields = row.field_map()?;
            let token0 = fields.get("token0").and_then(FieldValue::as_address);
            let token1 = fields.get("token1").and_then(FieldValue::as_address);
            let pair_id = fields
                .get("pairId")
                .and_then(FieldValue::as_biguint)
                .map_or(0, |id| u64::try_from(id).unwrap_or(0));
            if let (Some(token0), Some(token1)) = (token0, token1) {
                pair_tokens.push((token0, token1, pair_id));
            }
        }

        let mut unknown: Vec<Address> = pair_tokens
            .iter()
            .flat_map(|(token0, token1, _)| [*token0, *token1])
            .filter(|address| !self.token_cache.contains_key(address))
            .collect();
        unknown.sort_unstable();
        unknown.dedup();

        if !unknown.is_empty() {
            debug!(count = unknown.len(), "Fetching metadata for new tokens");
            for meta in self.multicall.fetch_tokens(&unknown).await? {
                self.token_cache.insert(meta.address, meta);
            }
        }

        // Stable ids: enumerate addresses in sorted order so a rebuild
        // assigns the same id to the same token.
        let mut addresses: Vec<Address> = self.token_cache.keys().copied().collect();
        addresses.sort_unstable();

        let mut dictionaries = Dictionaries::default();
        for (index, address) in addresses.iter().enumerate() {
            if let Some(meta) = self.token_cache.get(address) {
                dictionaries.tokens.insert(
                    *address,
                    TokenRef {
                        id: index as u64 + 1,
                        symbol: meta.symbol.clone(),
                        decimals: meta.decimals,
                    },
                );
            }
        }
        for (token0, token1, pair_id) in pair_tokens {
            let key = if token0 <= token1 {
                (token0, token1)
            } else {
                (token1, token0)
            };
            dictionaries.pairs.insert(key, pair_id);
        }

        Ok(dictionaries)
    }

    /// Run one full update cycle: lock, harvest, replay.
    ///
    /// # Errors
    ///
    /// Propagates the first fatal error from any stage. Failing to take the
    /// lock is not an error; the cycle is simply skipped.
    pub async fn run_cycle(&mut self) -> IndexerResult<()> {
        let acquired = self
            .repo
            .try_acquire_lock(&self.deployment.key(), &self.holder, self.lock_ttl_secs)
            .await?;
        if !acquired {
            warn!(
                deployment = %self.deployment.key(),
                "Another instance holds the deployment lock, skipping cycle"
            );
            return Ok(());
        }

        let latest = self.chain.get_block_number().await?;
        debug!(deployment = %self.deployment.key(), latest, "Starting update cycle");

        let dictionaries = Arc::new(self.resolve_dictionaries().await?);
        let harvester = Harvester::new(
            Arc::clone(&self.chain),
            Arc::clone(&self.repo),
            self.deployment.clone(),
            dictionaries,
        );

        for spec in streams::all_streams(&self.deployment, latest) {
            harvester.process_stream(&spec).await?;
        }

        self.replayer.run_to(latest).await?;

        info!(deployment = %self.deployment.key(), latest, "Update cycle complete");
        Ok(())
    }

    /// Run one cycle and fold the outcome into the liveness signal.
    pub async fn tick(&mut self) {
        match self.run_cycle().await {
            Ok(()) => {
                self.health.last_success_at = Some(Utc::now());
                self.health.consecutive_errors = 0;
            }
            Err(e) => {
                self.health.consecutive_errors += 1;
                error!(
                    deployment = %self.deployment.key(),
                    consecutive_errors = self.health.consecutive_errors,
                    error = %e,
                    "Update cycle failed, will retry next tick"
                );
            }
        }
    }

    /// Run cycles on a fixed interval until ctrl-c.
    pub async fn run(mut self, interval_secs: u64) -> IndexerResult<()> {
        info!(
            deployment = %self.deployment.key(),
            interval_secs,
            "Starting scheduler loop"
        );
        println!(
            "{}",
            format!("Indexing deployment {}...", self.deployment.key())
                .cyan()
                .bold()
        );

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping scheduler");
                    println!("{}", "Shutting down gracefully...".yellow().bold());
                    break;
                }

                () = tokio::time::sleep(Duration::from_secs(0)) => {
                    self.tick().await;

                    if self.health.consecutive_errors > 0 {
                        println!(
                            "{} {} consecutive failed cycles",
                            "warning:".red().bold(),
                            self.health.consecutive_errors
                        );
                    }

                    debug!("Waiting {interval_secs}s for next cycle");
                    tokio::time::sleep(Duration::from_secs(interval_secs)).await;
                }
            }
        }

        println!("{}", "Shutdown complete".green().bold());
        Ok(())
    }
}
