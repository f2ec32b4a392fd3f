//! Deployment descriptors for the indexer.
//!
//! A [`Deployment`] scopes everything the indexer persists: one deployment is
//! one exchange instance on one chain family. It carries the start block,
//! fetch tuning (batch size, concurrency), the multicall dialect of the
//! target chain, gas-token metadata, and the set of contracts with their
//! time-boxed address versions.
//!
//! ## Contract versions
//!
//! A contract name can map to several on-chain addresses over time (proxy
//! redeployments). Each version is valid from the block after its
//! predecessor terminated through its own `terminates_at` block (the last
//! version has no terminator). Event queries are pre-split at these
//! boundaries so a contract instance is only queried within its valid block
//! window.

use crate::config::Config;
use alloy::primitives::{address, Address};
use std::collections::HashMap;

/// Pseudo-address used by the protocol for the chain's native gas token.
///
/// There is no real contract behind it, so metadata lookups for this address
/// are answered from [`Deployment::gas_token`] instead of an RPC call.
pub const NATIVE_TOKEN_ADDRESS: Address = address!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// Which on-chain multicall dialect the target chain family speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulticallDialect {
    /// Positional-array dialect: `aggregate(Call[]) -> (uint256, bytes[])`.
    Aggregate,
    /// Struct-array dialect: `aggregate3(Call3[]) -> Result[]`.
    Aggregate3,
}

/// Static metadata for a token, used for the gas pseudo-token and for seeded
/// dictionaries in tests.
#[derive(Debug, Clone)]
pub struct TokenMeta {
    /// Token contract address (or [`NATIVE_TOKEN_ADDRESS`])
    pub address: Address,
    /// Ticker symbol
    pub symbol: String,
    /// Decimal places
    pub decimals: u8,
    /// Full name
    pub name: String,
}

/// One time-boxed address version of a named contract.
#[derive(Debug, Clone, Copy)]
pub struct ContractVersion {
    /// On-chain address of this version
    pub address: Address,
    /// Last block at which this version is valid; `None` for the live version
    pub terminates_at: Option<u64>,
}

/// A fully-resolved deployment description.
#[derive(Debug, Clone)]
pub struct Deployment {
    /// Logical chain family key (e.g. "ethereum")
    pub blockchain_type: String,
    /// Logical exchange key (e.g. "ethereum")
    pub exchange_id: String,
    /// First block of the deployment; cursors initialize here
    pub start_block: u64,
    /// Blocks per event query sub-range
    pub batch_size: u64,
    /// Max in-flight RPC fetches per stream
    pub concurrency: usize,
    /// Multicall dialect of the chain family
    pub multicall_dialect: MulticallDialect,
    /// Multicall aggregator contract address
    pub multicall_address: Address,
    /// Metadata for the native gas pseudo-token
    pub gas_token: TokenMeta,
    /// Named contracts with their address versions, oldest first
    contracts: HashMap<String, Vec<ContractVersion>>,
}

/// Standard Multicall3 address (same on all EVM chains).
const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

impl Deployment {
    /// Build a deployment from runtime configuration.
    ///
    /// Contract addresses default to the protocol's mainnet deployment; the
    /// configuration only controls scoping keys and fetch tuning.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut contracts = HashMap::new();
        contracts.insert(
            "controller".to_string(),
            vec![ContractVersion {
                address: address!("C537e898CD774e2dCBa3B14Ea6f34C93d5eA45e1"),
                terminates_at: None,
            }],
        );
        contracts.insert(
            "voucher".to_string(),
            vec![ContractVersion {
                address: address!("3660F04B79751e31128f6378eAC70807e38f554E"),
                terminates_at: None,
            }],
        );
        contracts.insert(
            "referral_storage".to_string(),
            vec![ContractVersion {
                address: address!("e6fab3F0c7199b0d34d7FbE83394fc0e0D06e99d"),
                terminates_at: None,
            }],
        );

        Self {
            blockchain_type: config.blockchain_type().to_string(),
            exchange_id: config.exchange_id().to_string(),
            start_block: config.start_block(),
            batch_size: config.batch_size(),
            concurrency: config.concurrency(),
            multicall_dialect: MulticallDialect::Aggregate3,
            multicall_address: MULTICALL3_ADDRESS,
            gas_token: TokenMeta {
                address: NATIVE_TOKEN_ADDRESS,
                symbol: "ETH".to_string(),
                decimals: 18,
                name: "Ether".to_string(),
            },
            contracts,
        }
    }

    /// Construct a deployment from explicit parts (used by tests).
    #[must_use]
    pub fn new(
        blockchain_type: impl Into<String>,
        exchange_id: impl Into<String>,
        start_block: u64,
        batch_size: u64,
        concurrency: usize,
        contracts: HashMap<String, Vec<ContractVersion>>,
    ) -> Self {
        Self {
            blockchain_type: blockchain_type.into(),
            exchange_id: exchange_id.into(),
            start_block,
            batch_size,
            concurrency,
            multicall_dialect: MulticallDialect::Aggregate3,
            multicall_address: MULTICALL3_ADDRESS,
            gas_token: TokenMeta {
                address: NATIVE_TOKEN_ADDRESS,
                symbol: "ETH".to_string(),
                decimals: 18,
                name: "Ether".to_string(),
            },
            contracts,
        }
    }

    /// All versions of a named contract, oldest first.
    #[must_use]
    pub fn contract_versions(&self, name: &str) -> &[ContractVersion] {
        self.contracts.get(name).map_or(&[], Vec::as_slice)
    }

    /// Prefix for this deployment's stream keys, e.g. `"ethereum-ethereum"`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}-{}", self.blockchain_type, self.exchange_id)
    }

    /// Split `[from ..= to]` at this contract's version boundaries.
    ///
    /// Each returned segment names the single address version that is valid
    /// for its whole block window. Versions that terminated before `from` are
    /// skipped; the final (open-ended) version covers everything after the
    /// last terminator.
    #[must_use]
    pub fn split_range_by_version(
        &self,
        contract: &str,
        from: u64,
        to: u64,
    ) -> Vec<(Address, u64, u64)> {
        let mut segments = Vec::new();
        if from > to {
            return segments;
        }

        let mut segment_start = from;
        for version in self.contract_versions(contract) {
            match version.terminates_at {
                Some(terminator) => {
                    if terminator < segment_start {
                        continue;
                    }
                    let segment_end = terminator.min(to);
                    segments.push((version.address, segment_start, segment_end));
                    if segment_end == to {
                        return segments;
                    }
                    segment_start = segment_end + 1;
                }
                None => {
                    segments.push((version.address, segment_start, to));
                    return segments;
                }
            }
        }

        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versioned_deployment() -> Deployment {
        let mut contracts = HashMap::new();
        contracts.insert(
            "controller".to_string(),
            vec![
                ContractVersion {
                    address: address!("0000000000000000000000000000000000000001"),
                    terminates_at: Some(1_000),
                },
                ContractVersion {
                    address: address!("0000000000000000000000000000000000000002"),
                    terminates_at: Some(2_000),
                },
                ContractVersion {
                    address: address!("0000000000000000000000000000000000000003"),
                    terminates_at: None,
                },
            ],
        );
        Deployment::new("testchain", "testdex", 0, 100, 4, contracts)
    }

    #[test]
    fn test_split_range_spanning_all_versions() {
        let deployment = versioned_deployment();
        let segments = deployment.split_range_by_version("controller", 500, 2_500);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].1, 500);
        assert_eq!(segments[0].2, 1_000);
        assert_eq!(segments[1].1, 1_001);
        assert_eq!(segments[1].2, 2_000);
        assert_eq!(segments[2].1, 2_001);
        assert_eq!(segments[2].2, 2_500);
    }

    #[test]
    fn test_split_range_within_single_version() {
        let deployment = versioned_deployment();
        let segments = deployment.split_range_by_version("controller", 1_100, 1_900);

        assert_eq!(segments.len(), 1);
        assert_eq!(
            segments[0].0,
            address!("0000000000000000000000000000000000000002")
        );
    }

    #[test]
    fn test_split_range_skips_terminated_versions() {
        let deployment = versioned_deployment();
        let segments = deployment.split_range_by_version("controller", 2_100, 9_000);

        assert_eq!(segments.len(), 1);
        assert_eq!(
            segments[0].0,
            address!("0000000000000000000000000000000000000003")
        );
    }

    #[test]
    fn test_split_range_empty_when_inverted() {
        let deployment = versioned_deployment();
        assert!(deployment
            .split_range_by_version("controller", 10, 5)
            .is_empty());
    }

    #[test]
    fn test_split_range_ends_exactly_on_boundary() {
        let deployment = versioned_deployment();
        let segments = deployment.split_range_by_version("controller", 500, 1_000);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].2, 1_000);
    }

    #[test]
    fn test_unknown_contract_has_no_versions() {
        let deployment = versioned_deployment();
        assert!(deployment.contract_versions("nonexistent").is_empty());
        assert!(deployment
            .split_range_by_version("nonexistent", 0, 100)
            .is_empty());
    }
}
