//! Multicall batch reader: many read-only contract calls in one RPC round
//! trip.
//!
//! Addresses are grouped into fixed-size chunks (provider call-size limit),
//! one call per address is encoded into a single aggregate call, and the
//! aggregate response is decoded positionally back onto the input order —
//! results always line up with the addresses passed in, whatever chunk size
//! is used internally.
//!
//! Two on-chain dialects are supported and hidden behind [`MulticallReader::read_many`]:
//!
//! - the positional-array dialect `aggregate(Call[]) -> (uint256, bytes[])`
//! - the struct-array dialect `aggregate3(Call3[]) -> Result[]`
//!
//! The dialect is selected by the deployment's chain family; callers never
//! see the difference.
//!
//! The native gas pseudo-address is special-cased in [`MulticallReader::fetch_tokens`]:
//! it has no contract to call, so its metadata comes from deployment
//! configuration.

use std::sync::Arc;

use alloy::primitives::Address;
use alloy::sol;
use alloy::sol_types::SolCall;
use tracing::debug;

use crate::deployment::{Deployment, MulticallDialect, TokenMeta, NATIVE_TOKEN_ADDRESS};
use crate::error::{IndexerError, IndexerResult};
use crate::rpc::ChainClient;

sol! {
    contract Multicall {
        struct Call {
            address target;
            bytes callData;
        }

        function aggregate(Call[] calldata calls) external returns (uint256 blockNumber, bytes[] memory returnData);
    }

    contract Multicall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
    }

    contract ERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }
}

/// Default number of addresses per aggregate call.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Batch reader over an on-chain multicall aggregator.
pub struct MulticallReader {
    chain: Arc<dyn ChainClient>,
    address: Address,
    dialect: MulticallDialect,
    gas_token: TokenMeta,
    chunk_size: usize,
}

impl MulticallReader {
    /// Creates a reader for one deployment's aggregator contract.
    #[must_use]
    pub fn new(chain: Arc<dyn ChainClient>, deployment: &Deployment) -> Self {
        Self {
            chain,
            address: deployment.multicall_address,
            dialect: deployment.multicall_dialect,
            gas_token: deployment.gas_token.clone(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Overrides the internal chunk size (mainly for tests).
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Executes `encode(address)` against every address in one aggregated
    /// round trip per chunk, returning raw return data in input order.
    ///
    /// # Errors
    ///
    /// Returns an RPC error if an aggregate call fails, and a decoding error
    /// if the response shape does not match the request (count mismatch or a
    /// failed inner call).
    pub async fn read_many<F>(
        &self,
        addresses: &[Address],
        encode: F,
    ) -> IndexerResult<Vec<Vec<u8>>>
    where
        F: Fn(Address) -> Vec<u8> + Send + Sync,
    {
        let mut results = Vec::with_capacity(addresses.len());

        for chunk in addresses.chunks(self.chunk_size.max(1)) {
            let mut chunk_results = match self.dialect {
                MulticallDialect::Aggregate => self.read_chunk_aggregate(chunk, &encode).await?,
                MulticallDialect::Aggregate3 => self.read_chunk_aggregate3(chunk, &encode).await?,
            };
            results.append(&mut chunk_results);
        }

        debug!(
            count = addresses.len(),
            chunk_size = self.chunk_size,
            "Completed multicall batch read"
        );

        Ok(results)
    }

    /// One chunk through the positional-array dialect.
    async fn read_chunk_aggregate<F>(
        &self,
        chunk: &[Address],
        encode: &F,
    ) -> IndexerResult<Vec<Vec<u8>>>
    where
        F: Fn(Address) -> Vec<u8> + Send + Sync,
    {
        let calls: Vec<Multicall::Call> = chunk
            .iter()
            .map(|address| Multicall::Call {
                target: *address,
                callData: encode(*address).into(),
            })
            .collect();

        let data = Multicall::aggregateCall { calls }.abi_encode();
        let response = self.chain.call(self.address, data).await?;

        let decoded = Multicall::aggregateCall::abi_decode_returns(&response, true)
            .map_err(|e| {
                IndexerError::decoding(
                    "Failed to decode aggregate response",
                    Some(Box::new(e)),
                )
            })?;

        if decoded.returnData.len() != chunk.len() {
            return Err(IndexerError::decoding(
                format!(
                    "aggregate returned {} results for {} calls",
                    decoded.returnData.len(),
                    chunk.len()
                ),
                None,
            ));
        }

        Ok(decoded
            .returnData
            .into_iter()
            .map(|bytes| bytes.to_vec())
            .collect())
    }

    /// One chunk through the struct-array dialect.
    async fn read_chunk_aggregate3<F>(
        &self,
        chunk: &[Address],
        encode: &F,
    ) -> IndexerResult<Vec<Vec<u8>>>
    where
        F: Fn(Address) -> Vec<u8> + Send + Sync,
    {
        let calls: Vec<Multicall3::Call3> = chunk
            .iter()
            .map(|address| Multicall3::Call3 {
                target: *address,
                allowFailure: false,
                callData: encode(*address).into(),
            })
            .collect();

        let data = Multicall3::aggregate3Call { calls }.abi_encode();
        let response = self.chain.call(self.address, data).await?;

        let decoded = Multicall3::aggregate3Call::abi_decode_returns(&response, true)
            .map_err(|e| {
                IndexerError::decoding(
                    "Failed to decode aggregate3 response",
                    Some(Box::new(e)),
                )
            })?;

        if decoded.returnData.len() != chunk.len() {
            return Err(IndexerError::decoding(
                format!(
                    "aggregate3 returned {} results for {} calls",
                    decoded.returnData.len(),
                    chunk.len()
                ),
                None,
            ));
        }

        let mut results = Vec::with_capacity(chunk.len());
        for (address, result) in chunk.iter().zip(decoded.returnData) {
            if !result.success {
                return Err(IndexerError::decoding(
                    format!("aggregate3 inner call to {address} failed"),
                    None,
                ));
            }
            results.push(result.returnData.to_vec());
        }

        Ok(results)
    }

    /// Fetches `symbol`/`decimals`/`name` metadata for every address, in
    /// input order.
    ///
    /// The native gas pseudo-address is answered from deployment
    /// configuration without touching the chain.
    ///
    /// # Errors
    ///
    /// Returns an error when an aggregate call or a metadata decode fails.
    pub async fn fetch_tokens(&self, addresses: &[Address]) -> IndexerResult<Vec<TokenMeta>> {
        let real: Vec<Address> = addresses
            .iter()
            .copied()
            .filter(|address| *address != NATIVE_TOKEN_ADDRESS)
            .collect();

        let symbols = self
            .read_many(&real, |_| ERC20::symbolCall {}.abi_encode())
            .await?;
        let decimals = self
            .read_many(&real, |_| ERC20::decimalsCall {}.abi_encode())
            .await?;
        let names = self
            .read_many(&real, |_| ERC20::nameCall {}.abi_encode())
            .await?;

        let mut fetched = std::collections::HashMap::new();
        for (((address, symbol), decimal), name) in
            real.iter().zip(&symbols).zip(&decimals).zip(&names)
        {
            let symbol = ERC20::symbolCall::abi_decode_returns(symbol, true)
                .map_err(|e| {
                    IndexerError::decoding(
                        format!("Failed to decode symbol for {address}"),
                        Some(Box::new(e)),
                    )
                })?
                ._0;
            let decimals = ERC20::decimalsCall::abi_decode_returns(decimal, true)
                .map_err(|e| {
                    IndexerError::decoding(
                        format!("Failed to decode decimals for {address}"),
                        Some(Box::new(e)),
                    )
                })?
                ._0;
            let name = ERC20::nameCall::abi_decode_returns(name, true)
                .map_err(|e| {
                    IndexerError::decoding(
                        format!("Failed to decode name for {address}"),
                        Some(Box::new(e)),
                    )
                })?
                ._0;

            fetched.insert(
                *address,
                TokenMeta {
                    address: *address,
                    symbol,
                    decimals,
                    name,
                },
            );
        }

        addresses
            .iter()
            .map(|address| {
                if *address == NATIVE_TOKEN_ADDRESS {
                    Ok(self.gas_token.clone())
                } else {
                    fetched.get(address).cloned().ok_or_else(|| {
                        IndexerError::missing_reference(format!("token {address} not fetched"))
                    })
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventDescriptor, RawEvent};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A chain client that answers aggregate calls locally.
    ///
    /// Inner calls are answered by selector: ERC20 metadata selectors get
    /// fixed values; anything else echoes the target address left-padded to
    /// 32 bytes, which makes positional ordering visible to assertions.
    struct MockAggregator {
        calls_made: AtomicUsize,
    }

    impl MockAggregator {
        fn new() -> Self {
            Self {
                calls_made: AtomicUsize::new(0),
            }
        }

        fn answer(target: Address, call_data: &[u8]) -> Vec<u8> {
            if call_data.starts_with(&ERC20::symbolCall::SELECTOR) {
                ERC20::symbolCall::abi_encode_returns(&(format!("T{}", target[19]),))
            } else if call_data.starts_with(&ERC20::decimalsCall::SELECTOR) {
                ERC20::decimalsCall::abi_encode_returns(&(18u8,))
            } else if call_data.starts_with(&ERC20::nameCall::SELECTOR) {
                ERC20::nameCall::abi_encode_returns(&("Mock Token".to_string(),))
            } else {
                let mut padded = vec![0u8; 12];
                padded.extend_from_slice(target.as_slice());
                padded
            }
        }
    }

    #[async_trait]
    impl ChainClient for MockAggregator {
        async fn get_past_events(
            &self,
            _contract: Address,
            _event: &'static EventDescriptor,
            _from_block: u64,
            _to_block: u64,
        ) -> IndexerResult<Vec<RawEvent>> {
            Err(IndexerError::rpc("not supported in mock", None))
        }

        async fn get_block_timestamp(&self, _block_number: u64) -> IndexerResult<i64> {
            Err(IndexerError::rpc("not supported in mock", None))
        }

        async fn get_block_number(&self) -> IndexerResult<u64> {
            Ok(0)
        }

        async fn call(&self, _to: Address, data: Vec<u8>) -> IndexerResult<Vec<u8>> {
            self.calls_made.fetch_add(1, Ordering::SeqCst);

            if let Ok(call) = Multicall3::aggregate3Call::abi_decode(&data, true) {
                let results: Vec<Multicall3::Result> = call
                    .calls
                    .iter()
                    .map(|c| Multicall3::Result {
                        success: true,
                        returnData: Self::answer(c.target, &c.callData).into(),
                    })
                    .collect();
                return Ok(Multicall3::aggregate3Call::abi_encode_returns(&(results,)));
            }

            if let Ok(call) = Multicall::aggregateCall::abi_decode(&data, true) {
                let results: Vec<alloy::primitives::Bytes> = call
                    .calls
                    .iter()
                    .map(|c| Self::answer(c.target, &c.callData).into())
                    .collect();
                return Ok(Multicall::aggregateCall::abi_encode_returns(&(
                    alloy::primitives::U256::ZERO,
                    results,
                )));
            }

            Err(IndexerError::decoding("unrecognized aggregate call", None))
        }
    }

    fn reader(dialect: MulticallDialect, chunk_size: usize) -> MulticallReader {
        let mut deployment =
            Deployment::new("testchain", "testdex", 0, 100, 4, HashMap::new());
        deployment.multicall_dialect = dialect;
        MulticallReader::new(Arc::new(MockAggregator::new()), &deployment)
            .with_chunk_size(chunk_size)
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[tokio::test]
    async fn test_read_many_preserves_input_order() {
        for chunk_size in [1, 2, 5, 100] {
            let reader = reader(MulticallDialect::Aggregate3, chunk_size);
            let addresses = vec![addr(0x01), addr(0x02), addr(0x03), addr(0x04), addr(0x05)];

            let results = reader
                .read_many(&addresses, |_| vec![0xde, 0xad, 0xbe, 0xef])
                .await
                .unwrap();

            assert_eq!(results.len(), addresses.len());
            for (address, result) in addresses.iter().zip(&results) {
                assert_eq!(&result[12..], address.as_slice(), "chunk size {chunk_size}");
            }
        }
    }

    #[tokio::test]
    async fn test_read_many_positional_dialect() {
        let reader = reader(MulticallDialect::Aggregate, 2);
        let addresses = vec![addr(0x0A), addr(0x0B), addr(0x0C)];

        let results = reader
            .read_many(&addresses, |_| vec![0x12, 0x34, 0x56, 0x78])
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        for (address, result) in addresses.iter().zip(&results) {
            assert_eq!(&result[12..], address.as_slice());
        }
    }

    #[tokio::test]
    async fn test_read_many_empty_input() {
        let reader = reader(MulticallDialect::Aggregate3, 10);
        let results = reader.read_many(&[], |_| Vec::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_tokens_decodes_metadata() {
        let reader = reader(MulticallDialect::Aggregate3, 10);
        let tokens = reader
            .fetch_tokens(&[addr(0x01), addr(0x02)])
            .await
            .unwrap();

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].symbol, "T1");
        assert_eq!(tokens[1].symbol, "T2");
        assert_eq!(tokens[0].decimals, 18);
        assert_eq!(tokens[0].name, "Mock Token");
    }

    #[tokio::test]
    async fn test_fetch_tokens_native_pseudo_address_uses_config() {
        let deployment = Deployment::new("testchain", "testdex", 0, 100, 4, HashMap::new());
        let chain = Arc::new(MockAggregator::new());
        let reader = MulticallReader::new(chain.clone(), &deployment);

        let tokens = reader.fetch_tokens(&[NATIVE_TOKEN_ADDRESS]).await.unwrap();

        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].symbol, deployment.gas_token.symbol);
        assert_eq!(tokens[0].decimals, deployment.gas_token.decimals);
        // No RPC round trip happened for the pseudo-address.
        assert_eq!(chain.calls_made.load(Ordering::SeqCst), 0);
    }
}
