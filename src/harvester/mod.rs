//! Event harvester: bounded-concurrency block-range ingestion with
//! resumable cursors.
//!
//! [`Harvester::process_stream`] is the engine's entry point. For one stream
//! (a contract/event pair scoped to a deployment) it:
//!
//! 1. Reads (or lazily initializes) the stream cursor.
//! 2. Pre-clears persisted rows above the cursor unless suppressed. This
//!    guards against a crash that wrote partial results without advancing
//!    the cursor; it trusts that anything above the last committed cursor
//!    can be redone safely and performs no fork verification.
//! 3. Splits `[cursor+1 ..= end_block]` at contract-version boundaries, then
//!    walks each segment in strides of `batch_size * concurrency`.
//! 4. Fetches each stride's `batch_size`-sized sub-ranges concurrently under
//!    a semaphore, joining before anything is mapped or persisted. A
//!    sub-range failure aborts the whole call; the cursor is untouched for
//!    that stride, so the next cycle retries the same range.
//! 5. Maps raw events through the stream's rule/transform pipeline, skipping
//!    rows whose relation lookups miss.
//! 6. Persists rows in fixed-size chunks and only then advances the cursor
//!    to the stride's end block.
//!
//! Missing-schema database errors are treated as "feature not yet migrated
//! for this deployment": the stream is skipped with a warning.

pub mod mapping;
pub mod streams;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use alloy::primitives::Address;
use futures_util::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::db::models::DecodedEventRow;
use crate::db::repository::Repository;
use crate::deployment::Deployment;
use crate::error::{IndexerError, IndexerResult};
use crate::events::{sort_chronologically, EventDescriptor, RawEvent};
use crate::rpc::ChainClient;

use mapping::{map_event, Dictionaries, MapContext, MappingRule, TransformStage};

/// Rows per insert transaction when persisting a stride.
pub const SAVE_CHUNK_SIZE: usize = 1000;

/// Everything needed to process one event stream.
pub struct StreamSpec {
    /// Cursor key, unique per deployment/contract/event
    pub stream_key: String,
    /// Contract name resolved through the deployment's version table
    pub contract: String,
    /// Event to fetch and decode
    pub event: &'static EventDescriptor,
    /// Last block to process (inclusive)
    pub end_block: u64,
    /// Suppress the pre-clear of rows above the cursor
    pub keep_stale_rows: bool,
    /// Resolve and store block timestamps for this stream's rows
    pub tag_timestamps: bool,
    /// Declarative mapping rules, applied in order
    pub rules: Vec<MappingRule>,
    /// Custom transform stages, applied in order after the rules
    pub transforms: Vec<TransformStage>,
}

/// The block-range event harvester for one deployment.
pub struct Harvester {
    chain: Arc<dyn ChainClient>,
    repo: Arc<Repository>,
    deployment: Deployment,
    dictionaries: Arc<Dictionaries>,
}

impl Harvester {
    /// Creates a harvester over a chain client, a repository, and the
    /// deployment's dictionaries.
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        repo: Arc<Repository>,
        deployment: Deployment,
        dictionaries: Arc<Dictionaries>,
    ) -> Self {
        Self {
            chain,
            repo,
            deployment,
            dictionaries,
        }
    }

    /// Current head block of the deployment's chain.
    pub async fn latest_block(&self) -> IndexerResult<u64> {
        self.chain.get_block_number().await
    }

    /// Fetch raw events for one contract address and block range.
    ///
    /// An inverted range is a no-op returning an empty vector.
    pub async fn fetch_range(
        &self,
        contract: Address,
        event: &'static EventDescriptor,
        from_block: u64,
        to_block: u64,
    ) -> IndexerResult<Vec<RawEvent>> {
        self.chain
            .get_past_events(contract, event, from_block, to_block)
            .await
    }

    /// Process one stream up to its end block, returning the rows persisted
    /// by this call.
    ///
    /// # Errors
    ///
    /// RPC and mapping errors abort the call with no cursor advance for the
    /// failed stride. Missing-schema database errors skip the stream and
    /// return the rows harvested so far.
    #[instrument(skip(self, spec), fields(stream = %spec.stream_key, end_block = spec.end_block))]
    pub async fn process_stream(&self, spec: &StreamSpec) -> IndexerResult<Vec<DecodedEventRow>> {
        let cursor = self
            .repo
            .get_or_init_cursor(&spec.stream_key, self.deployment.start_block)
            .await?;

        if !spec.keep_stale_rows {
            match self
                .repo
                .delete_event_rows_above(&spec.stream_key, cursor)
                .await
            {
                Ok(0) => {}
                Ok(deleted) => {
                    warn!(
                        stream = %spec.stream_key,
                        cursor,
                        deleted,
                        "Pre-cleared rows above cursor before reprocessing"
                    );
                }
                Err(e) if e.is_missing_schema() => {
                    warn!(
                        stream = %spec.stream_key,
                        "Row store not migrated for this deployment, skipping stream"
                    );
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            }
        }

        if cursor >= spec.end_block {
            debug!(stream = %spec.stream_key, cursor, "Nothing to process");
            return Ok(Vec::new());
        }

        let segments =
            self.deployment
                .split_range_by_version(&spec.contract, cursor + 1, spec.end_block);
        if segments.is_empty() {
            return Err(IndexerError::state(
                format!(
                    "no contract versions cover blocks {}..={} for '{}'",
                    cursor + 1,
                    spec.end_block,
                    spec.contract
                ),
                None,
            ));
        }

        let stride_size = self.deployment.batch_size * self.deployment.concurrency as u64;
        let mut all_rows = Vec::new();

        for (address, segment_from, segment_to) in segments {
            let mut stride_start = segment_from;
            while stride_start <= segment_to {
                let stride_end = stride_start
                    .saturating_add(stride_size - 1)
                    .min(segment_to);

                let raw_events = self
                    .fetch_stride(address, spec.event, stride_start, stride_end)
                    .await?;

                let rows = self.map_stride(spec, &raw_events).await?;

                match self.repo.save_event_rows(&rows, SAVE_CHUNK_SIZE).await {
                    Ok(()) => {}
                    Err(e) if e.is_missing_schema() => {
                        warn!(
                            stream = %spec.stream_key,
                            "Row store not migrated for this deployment, skipping stream"
                        );
                        return Ok(all_rows);
                    }
                    Err(e) => return Err(e),
                }

                // The cursor moves only after every chunk of this stride
                // persisted; a crash before this line redoes the stride.
                self.repo.set_cursor(&spec.stream_key, stride_end).await?;

                info!(
                    stream = %spec.stream_key,
                    stride_start,
                    stride_end,
                    fetched = raw_events.len(),
                    saved = rows.len(),
                    "Stride committed"
                );

                all_rows.extend(rows);
                stride_start = stride_end + 1;
            }
        }

        Ok(all_rows)
    }

    /// Fetch one stride's sub-ranges concurrently and join the results in
    /// chronological order.
    async fn fetch_stride(
        &self,
        address: Address,
        event: &'static EventDescriptor,
        from_block: u64,
        to_block: u64,
    ) -> IndexerResult<Vec<RawEvent>> {
        let semaphore = Arc::new(Semaphore::new(self.deployment.concurrency));
        let batch_size = self.deployment.batch_size;

        let mut sub_ranges = Vec::new();
        let mut sub_start = from_block;
        while sub_start <= to_block {
            let sub_end = sub_start.saturating_add(batch_size - 1).min(to_block);
            sub_ranges.push((sub_start, sub_end));
            sub_start = sub_end + 1;
        }

        let fetches = sub_ranges.into_iter().map(|(sub_from, sub_to)| {
            let chain = Arc::clone(&self.chain);
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.map_err(|e| {
                    IndexerError::state("fetch semaphore closed", Some(Box::new(e)))
                })?;
                chain
                    .get_past_events(address, event, sub_from, sub_to)
                    .await
            }
        });

        // Sub-ranges complete in any order; nothing downstream runs until
        // every fetch in the stride has joined.
        let results = try_join_all(fetches).await?;

        let mut events: Vec<RawEvent> = results.into_iter().flatten().collect();
        sort_chronologically(&mut events);
        Ok(events)
    }

    /// Map a stride's raw events into persisted rows.
    ///
    /// Block timestamps are resolved once per stride (bounded by the same
    /// concurrency limit) and cached for every row in it.
    async fn map_stride(
        &self,
        spec: &StreamSpec,
        raw_events: &[RawEvent],
    ) -> IndexerResult<Vec<DecodedEventRow>> {
        let block_timestamps = if spec.tag_timestamps {
            self.resolve_timestamps(raw_events).await?
        } else {
            HashMap::new()
        };

        let ctx = MapContext {
            dictionaries: &self.dictionaries,
            block_timestamps: &block_timestamps,
        };

        let mut rows = Vec::with_capacity(raw_events.len());
        for raw in raw_events {
            match map_event(raw, &spec.rules, &spec.transforms, &ctx) {
                Ok(fields) => {
                    let timestamp = block_timestamps.get(&raw.block_number).copied();
                    rows.push(DecodedEventRow::new(
                        &self.deployment.blockchain_type,
                        &self.deployment.exchange_id,
                        &spec.stream_key,
                        raw,
                        timestamp,
                        &fields,
                    )?);
                }
                Err(IndexerError::MissingReference { message }) => {
                    warn!(
                        stream = %spec.stream_key,
                        block = raw.block_number,
                        %message,
                        "Skipping row with missing reference"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(rows)
    }

    /// Resolve the unique block timestamps of a stride.
    async fn resolve_timestamps(
        &self,
        raw_events: &[RawEvent],
    ) -> IndexerResult<HashMap<u64, i64>> {
        let unique_blocks: BTreeSet<u64> =
            raw_events.iter().map(|raw| raw.block_number).collect();

        let semaphore = Arc::new(Semaphore::new(self.deployment.concurrency));
        let lookups = unique_blocks.into_iter().map(|block| {
            let chain = Arc::clone(&self.chain);
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.map_err(|e| {
                    IndexerError::state("timestamp semaphore closed", Some(Box::new(e)))
                })?;
                let timestamp = chain.get_block_timestamp(block).await?;
                Ok::<(u64, i64), IndexerError>((block, timestamp))
            }
        });

        Ok(try_join_all(lookups).await?.into_iter().collect())
    }
}
