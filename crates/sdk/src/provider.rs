use alloy::{
    network::ReceiptResponse,
    primitives::{Address, B256, Bytes, TxHash},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::{client::RpcClient, types::TransactionRequest},
    transports::layers::{RetryBackoffLayer, ThrottleLayer},
};
use futures::{FutureExt, future::BoxFuture};

use crate::{abi::multicall::IMulticall3, chain::ChainId, error::SyncError};

/// Single read executed by the aggregator contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubCall {
    pub target: Address,
    pub call_data: Bytes,
}

/// Outcome of a single [`SubCall`] within an aggregated call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubCallResult {
    pub success: bool,
    pub return_data: Bytes,
}

/// Result of an aggregated call: every sub-call executed at `block_number`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregate {
    pub block_number: u64,
    pub results: Vec<SubCallResult>,
}

/// Ledger-confirmed outcome of a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub block_hash: Option<B256>,
    /// `false` if the transaction was mined but reverted.
    pub status: bool,
    pub gas_used: u64,
}

/// Read (and relay) capability of a network endpoint.
///
/// All methods suspend only on network I/O. Implementations must not retry
/// logical failures: a reverted sub-call is reported in its own
/// [`SubCallResult`], a failed round-trip as
/// [`SyncError::NetworkFailure`].
pub trait ReadProvider: Send + Sync {
    /// Executes `calls` through the aggregator contract at `aggregator`, all
    /// at the same block.
    fn aggregate<'a>(
        &'a self,
        aggregator: Address,
        calls: &'a [SubCall],
    ) -> BoxFuture<'a, Result<Aggregate, SyncError>>;

    /// Latest block number known to the endpoint.
    fn block_number(&self) -> BoxFuture<'_, Result<u64, SyncError>>;

    /// Receipt of the transaction, `None` while it is not mined.
    fn transaction_receipt(&self, hash: TxHash) -> BoxFuture<'_, Result<Option<Receipt>, SyncError>>;

    /// Relays the transaction for signing and broadcasting.
    fn send_transaction(&self, tx: TransactionRequest) -> BoxFuture<'_, Result<TxHash, SyncError>>;
}

/// [`ReadProvider`] over an alloy [`Provider`].
#[derive(Clone)]
pub struct AlloyProvider {
    inner: DynProvider,
}

impl AlloyProvider {
    pub fn new<P: Provider + 'static>(provider: P) -> Self { Self { inner: provider.erased() } }

    /// Connects to an HTTP JSON-RPC endpoint with retries and optional
    /// throttling (requests per second).
    pub fn connect_http(url: &str, throttle: Option<u32>) -> Result<Self, SyncError> {
        let url = url
            .parse()
            .map_err(|e| SyncError::InvalidArgument(format!("invalid RPC url {url}: {e}")))?;
        let client = match throttle {
            Some(rps) => RpcClient::builder()
                .layer(ThrottleLayer::new(rps))
                .layer(RetryBackoffLayer::new(10, 100, 200))
                .http(url),
            None => RpcClient::builder()
                .layer(RetryBackoffLayer::new(10, 100, 200))
                .http(url),
        };
        Ok(Self::new(ProviderBuilder::new().connect_client(client)))
    }

    pub fn inner(&self) -> &DynProvider { &self.inner }

    pub async fn chain_id(&self) -> Result<ChainId, SyncError> {
        Ok(self.inner.get_chain_id().await?)
    }

    /// Accounts the node signs for.
    pub async fn accounts(&self) -> Result<Vec<Address>, SyncError> {
        Ok(self.inner.get_accounts().await?)
    }
}

impl ReadProvider for AlloyProvider {
    fn aggregate<'a>(
        &'a self,
        aggregator: Address,
        calls: &'a [SubCall],
    ) -> BoxFuture<'a, Result<Aggregate, SyncError>> {
        async move {
            let calls = calls
                .iter()
                .map(|c| IMulticall3::Call { target: c.target, callData: c.call_data.clone() })
                .collect::<Vec<_>>();
            let result = IMulticall3::new(aggregator, &self.inner)
                .tryBlockAndAggregate(false, calls)
                .call()
                .await?;
            Ok(Aggregate {
                block_number: result.blockNumber.saturating_to(),
                results: result
                    .returnData
                    .into_iter()
                    .map(|r| SubCallResult { success: r.success, return_data: r.returnData })
                    .collect(),
            })
        }
        .boxed()
    }

    fn block_number(&self) -> BoxFuture<'_, Result<u64, SyncError>> {
        async move { Ok(self.inner.get_block_number().await?) }.boxed()
    }

    fn transaction_receipt(&self, hash: TxHash) -> BoxFuture<'_, Result<Option<Receipt>, SyncError>> {
        async move {
            let receipt = self.inner.get_transaction_receipt(hash).await?;
            Ok(receipt.map(|r| Receipt {
                transaction_hash: r.transaction_hash,
                block_number: r.block_number.unwrap_or_default(),
                block_hash: r.block_hash,
                status: r.status(),
                gas_used: r.gas_used,
            }))
        }
        .boxed()
    }

    fn send_transaction(&self, tx: TransactionRequest) -> BoxFuture<'_, Result<TxHash, SyncError>> {
        async move {
            match self.inner.send_transaction(tx).await {
                Ok(pending) => Ok(*pending.tx_hash()),
                Err(err) => Err(SyncError::from_submission(err)),
            }
        }
        .boxed()
    }
}
