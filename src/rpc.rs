//! Chain RPC access for the indexer.
//!
//! The core never talks to a provider type directly: everything goes through
//! the [`ChainClient`] trait, which exposes exactly the four collaborator
//! operations the engine needs (past-event queries, block timestamp lookup,
//! head block number, read-only calls). [`AlloyChainClient`] is the
//! production implementation over Alloy's HTTP provider; tests substitute an
//! in-memory mock.
//!
//! There is intentionally no timeout or cancellation layer here: a slow RPC
//! call blocks its task until the transport resolves or errors, and retries
//! belong to the scheduler's fixed-interval re-invocation.
//!
//! ## Example
//!
//! ```no_run
//! use dex_event_indexer::rpc::{create_provider, AlloyChainClient, ChainClient};
//! use dex_event_indexer::error::IndexerResult;
//!
//! # async fn example() -> IndexerResult<()> {
//! let provider = create_provider("https://eth-mainnet.example/v2/API_KEY").await?;
//! let client = AlloyChainClient::new(provider);
//! let head = client.get_block_number().await?;
//! println!("Latest block: {head}");
//! # Ok(())
//! # }
//! ```

use alloy::network::TransactionBuilder;
use alloy::primitives::Address;
use alloy::providers::{Provider as AlloyProvider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, TransactionRequest};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::error::{IndexerError, IndexerResult};
use crate::events::{create_event_filter, EventDescriptor, RawEvent};

/// Type alias for the HTTP provider.
pub type Provider = RootProvider<Http<Client>>;

/// The chain collaborator interface consumed by the harvester, the multicall
/// reader, and the scheduler.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetch and decode all logs for one event on one contract within
    /// `[from_block ..= to_block]`.
    ///
    /// An inverted range (`from_block > to_block`) is a no-op returning an
    /// empty vector.
    async fn get_past_events(
        &self,
        contract: Address,
        event: &'static EventDescriptor,
        from_block: u64,
        to_block: u64,
    ) -> IndexerResult<Vec<RawEvent>>;

    /// Unix timestamp of a block.
    async fn get_block_timestamp(&self, block_number: u64) -> IndexerResult<i64>;

    /// Current head block number.
    async fn get_block_number(&self) -> IndexerResult<u64>;

    /// Execute a read-only `eth_call` against `to` with raw calldata.
    async fn call(&self, to: Address, data: Vec<u8>) -> IndexerResult<Vec<u8>>;
}

/// Create a new chain RPC provider connected via HTTP.
///
/// # Errors
///
/// Returns an error if the RPC URL cannot be parsed.
#[allow(clippy::unused_async)]
#[instrument(skip(rpc_url), fields(rpc_host = tracing::field::Empty))]
pub async fn create_provider(rpc_url: &str) -> IndexerResult<Provider> {
    info!("Initializing RPC provider");

    // Extract host for logging (without a sensitive API key path segment)
    let host = rpc_url.split("/v2/").next().unwrap_or("unknown");
    tracing::Span::current().record("rpc_host", host);
    debug!(rpc_host = host, "Creating HTTP provider");

    let url = rpc_url.parse().map_err(|e| {
        IndexerError::rpc(
            format!("Failed to parse RPC URL: '{rpc_url}'"),
            Some(Box::new(e)),
        )
    })?;

    let provider = ProviderBuilder::new().on_http(url);

    info!("RPC provider initialized successfully");

    Ok(provider)
}

/// Production [`ChainClient`] backed by an Alloy HTTP provider.
#[derive(Debug)]
pub struct AlloyChainClient {
    provider: Provider,
}

impl AlloyChainClient {
    /// Wrap a provider created with [`create_provider`].
    #[must_use]
    pub const fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    #[instrument(skip(self, event), fields(event = event.name, count = tracing::field::Empty))]
    async fn get_past_events(
        &self,
        contract: Address,
        event: &'static EventDescriptor,
        from_block: u64,
        to_block: u64,
    ) -> IndexerResult<Vec<RawEvent>> {
        if from_block > to_block {
            return Ok(Vec::new());
        }

        let filter = create_event_filter(contract, event.signature_hash, from_block, to_block);

        let logs = self.provider.get_logs(&filter).await.map_err(|e| {
            IndexerError::rpc(
                format!(
                    "Failed to fetch {} logs for blocks {from_block}..={to_block}",
                    event.name
                ),
                Some(Box::new(e)),
            )
        })?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let block_number = log.block_number.ok_or_else(|| {
                IndexerError::decoding(format!("{} log missing block number", event.name), None)
            })?;
            let transaction_index = log.transaction_index.ok_or_else(|| {
                IndexerError::decoding(
                    format!("{} log missing transaction index", event.name),
                    None,
                )
            })?;
            let log_index = log.log_index.ok_or_else(|| {
                IndexerError::decoding(format!("{} log missing log index", event.name), None)
            })?;
            let transaction_hash = log.transaction_hash.ok_or_else(|| {
                IndexerError::decoding(
                    format!("{} log missing transaction hash", event.name),
                    None,
                )
            })?;

            let fields = (event.decode)(&log)?;

            events.push(RawEvent {
                block_number,
                transaction_index,
                transaction_hash: format!("{transaction_hash:?}"),
                log_index,
                fields,
            });
        }

        tracing::Span::current().record("count", events.len());
        debug!(
            event = event.name,
            from_block,
            to_block,
            count = events.len(),
            "Fetched past events"
        );

        Ok(events)
    }

    async fn get_block_timestamp(&self, block_number: u64) -> IndexerResult<i64> {
        let block = self
            .provider
            .get_block_by_number(block_number.into(), BlockTransactionsKind::Hashes)
            .await
            .map_err(|e| {
                IndexerError::rpc(
                    format!("Failed to fetch block {block_number}"),
                    Some(Box::new(e)),
                )
            })?
            .ok_or_else(|| {
                IndexerError::state(format!("Block {block_number} not found"), None)
            })?;

        i64::try_from(block.header.timestamp).map_err(|e| {
            IndexerError::decoding(
                format!("Block {block_number} timestamp out of range"),
                Some(Box::new(e)),
            )
        })
    }

    async fn get_block_number(&self) -> IndexerResult<u64> {
        self.provider.get_block_number().await.map_err(|e| {
            IndexerError::rpc("Failed to fetch latest block number", Some(Box::new(e)))
        })
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> IndexerResult<Vec<u8>> {
        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(data);

        let bytes = self
            .provider
            .call(&tx)
            .await
            .map_err(|e| {
                IndexerError::rpc(format!("eth_call to {to} failed"), Some(Box::new(e)))
            })?;

        Ok(bytes.to_vec())
    }
}
