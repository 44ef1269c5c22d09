//! Balance and token projections composed from batched contract reads.
//!
//! Every projection tolerates partial results: a token whose call reverted or
//! is still loading is absent from the amounts while its siblings resolve.

use std::collections::BTreeMap;

use alloy::{
    primitives::{Address, B256, Bytes, U256},
    rpc::types::TransactionRequest,
};
use alloy_sol_types::SolCall;

use crate::{
    abi::{
        erc20::{IERC20, IERC20Bytes32},
        erc721::IERC721,
        multicall::IMulticall3,
    },
    chain::{ChainId, MULTICALL3},
    error::SyncError,
    multicall::{CallRequest, CallResult, Freshness, Multicall},
    transactions::{TransactionMeta, TransactionTracker},
};

const UNKNOWN_NAME: &str = "Unknown Token";
const UNKNOWN_SYMBOL: &str = "UNKNOWN";

/// Native currency of a chain or an ERC-20 token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Currency {
    Native,
    Token(Address),
}

/// Amounts keyed by account or currency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Amounts<K: Ord> {
    /// `None` while loading, unavailable or undecodable.
    pub amounts: BTreeMap<K, Option<U256>>,
    /// Keys whose call reverted or cannot be served.
    pub errors: BTreeMap<K, SyncError>,
    /// Some constituent call is still pending.
    pub loading: bool,
}

impl<K: Ord + Clone> Amounts<K> {
    pub fn get(&self, key: &K) -> Option<U256> { self.amounts.get(key).copied().flatten() }

    pub fn error(&self, key: &K) -> Option<&SyncError> { self.errors.get(key) }

    fn collect(entries: impl IntoIterator<Item = (K, CallResult)>) -> Self {
        let mut this = Self { amounts: BTreeMap::new(), errors: BTreeMap::new(), loading: false };
        for (key, result) in entries {
            this.loading |= result.is_loading();
            if let Some(err) = result.error() {
                this.errors.insert(key.clone(), err);
                this.amounts.insert(key, None);
                continue;
            }
            // `balanceOf` and `getEthBalance` share the return type
            this.amounts.insert(key, result.decode::<IERC20::balanceOfCall>());
        }
        this
    }
}

/// Immutable ERC-20 metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenMetadata {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Whether a spender may move the owner's assets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalState {
    /// Allowance not known yet.
    Unknown,
    NotApproved,
    /// An approval transaction is being mined.
    Pending,
    Approved,
}

/// Projections over a [`Multicall`] engine, with pending approvals taken from
/// a [`TransactionTracker`].
#[derive(Clone, Copy)]
pub struct Balances<'a> {
    multicall: &'a Multicall,
    tracker: &'a TransactionTracker,
}

impl<'a> Balances<'a> {
    pub fn new(multicall: &'a Multicall, tracker: &'a TransactionTracker) -> Self {
        Self { multicall, tracker }
    }

    fn aggregator(&self, chain_id: ChainId) -> Address {
        self.multicall.registry().config().endpoint(chain_id).map_or(MULTICALL3, |e| e.multicall())
    }

    /// Request reading the balance of `currency` held by `account`.
    pub fn balance_request(&self, chain_id: ChainId, account: Address, currency: Currency) -> CallRequest {
        match currency {
            Currency::Native => CallRequest::from_call(
                chain_id,
                self.aggregator(chain_id),
                &IMulticall3::getEthBalanceCall { addr: account },
            ),
            Currency::Token(token) => {
                CallRequest::from_call(chain_id, token, &IERC20::balanceOfCall { account })
            },
        }
    }

    /// Requests behind [`Self::currency_balances`], for registering
    /// listeners.
    pub fn balance_requests(
        &self,
        chain_id: ChainId,
        account: Address,
        currencies: &[Currency],
    ) -> Vec<CallRequest> {
        currencies.iter().map(|c| self.balance_request(chain_id, account, *c)).collect()
    }

    /// Balances of `account`: the native currency plus every token, read in
    /// one batch.
    pub async fn balances(
        &self,
        chain_id: ChainId,
        account: Address,
        tokens: &[Address],
    ) -> Amounts<Currency> {
        let currencies: Vec<_> = std::iter::once(Currency::Native)
            .chain(tokens.iter().copied().map(Currency::Token))
            .collect();
        self.currency_balances(chain_id, account, &currencies).await
    }

    pub async fn currency_balances(
        &self,
        chain_id: ChainId,
        account: Address,
        currencies: &[Currency],
    ) -> Amounts<Currency> {
        let requests = self.balance_requests(chain_id, account, currencies);
        let results = self.multicall.batch_read(&requests, Freshness::Latest).await;
        Amounts::collect(currencies.iter().copied().zip(results))
    }

    /// Same as [`Self::currency_balances`] from cached state only, without
    /// network I/O.
    pub fn cached_balances(
        &self,
        chain_id: ChainId,
        account: Address,
        currencies: &[Currency],
    ) -> Amounts<Currency> {
        let requests = self.balance_requests(chain_id, account, currencies);
        Amounts::collect(
            currencies.iter().copied().zip(requests.iter().map(|r| self.multicall.state(r))),
        )
    }

    /// Balances of `token` held by each of `accounts`. Duplicate accounts
    /// are read once.
    pub async fn token_balances_for_accounts(
        &self,
        chain_id: ChainId,
        token: Address,
        accounts: &[Address],
    ) -> Amounts<Address> {
        let requests: Vec<_> = accounts
            .iter()
            .map(|account| self.balance_request(chain_id, *account, Currency::Token(token)))
            .collect();
        let results = self.multicall.batch_read(&requests, Freshness::Latest).await;
        Amounts::collect(accounts.iter().copied().zip(results))
    }

    /// Native balances of `accounts`, read through the aggregator.
    pub async fn native_balances(&self, chain_id: ChainId, accounts: &[Address]) -> Amounts<Address> {
        let mut accounts = accounts.to_vec();
        accounts.sort();
        accounts.dedup();
        let requests: Vec<_> = accounts
            .iter()
            .map(|account| self.balance_request(chain_id, *account, Currency::Native))
            .collect();
        let results = self.multicall.batch_read(&requests, Freshness::Latest).await;
        Amounts::collect(accounts.into_iter().zip(results))
    }

    /// Name, symbol and decimals of `token`, read once per session.
    ///
    /// `Ok(None)` while loading. Fails if `decimals` reverted, which rules
    /// out an ERC-20 token at the address. Tokens returning `bytes32` name or
    /// symbol are supported.
    pub async fn token_metadata(
        &self,
        chain_id: ChainId,
        token: Address,
    ) -> Result<Option<TokenMetadata>, SyncError> {
        let requests = [
            CallRequest::from_call(chain_id, token, &IERC20::nameCall {}),
            CallRequest::from_call(chain_id, token, &IERC20::symbolCall {}),
            CallRequest::from_call(chain_id, token, &IERC20::decimalsCall {}),
        ];
        let results = self.multicall.batch_read(&requests, Freshness::NeverReload).await;
        let [name, symbol, decimals] = &results[..] else {
            return Ok(None);
        };

        if let Some(err) = decimals.error() {
            return Err(err);
        }
        if decimals.is_loading() {
            return Ok(None);
        }
        let decimals = decimals
            .decode::<IERC20::decimalsCall>()
            .ok_or_else(|| SyncError::Decode(format!("decimals of {token}")))?;

        Ok(Some(TokenMetadata {
            address: token,
            name: string_or_bytes32::<IERC20::nameCall, IERC20Bytes32::nameCall>(name)
                .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            symbol: string_or_bytes32::<IERC20::symbolCall, IERC20Bytes32::symbolCall>(symbol)
                .unwrap_or_else(|| UNKNOWN_SYMBOL.to_string()),
            decimals,
        }))
    }

    /// Whether `spender` may transfer `required` of the owner's `token`.
    pub async fn erc20_approval_state(
        &self,
        chain_id: ChainId,
        currency: Currency,
        owner: Address,
        spender: Address,
        required: U256,
    ) -> ApprovalState {
        let Currency::Token(token) = currency else {
            return ApprovalState::Approved;
        };
        let request = CallRequest::from_call(chain_id, token, &IERC20::allowanceCall { owner, spender });
        let result = self.multicall.read(&request, Freshness::Latest).await;
        let Some(allowance) = result.decode::<IERC20::allowanceCall>() else {
            return ApprovalState::Unknown;
        };
        if allowance >= required {
            ApprovalState::Approved
        } else if self.tracker.has_pending_approval(chain_id, token, spender) {
            ApprovalState::Pending
        } else {
            ApprovalState::NotApproved
        }
    }

    /// Whether `operator` may transfer every NFT of `owner` in `collection`.
    pub async fn nft_approval_state(
        &self,
        chain_id: ChainId,
        collection: Address,
        owner: Address,
        operator: Address,
    ) -> ApprovalState {
        let request = CallRequest::from_call(
            chain_id,
            collection,
            &IERC721::isApprovedForAllCall { owner, operator },
        );
        let result = self.multicall.read(&request, Freshness::Latest).await;
        match result.decode::<IERC721::isApprovedForAllCall>() {
            None => ApprovalState::Unknown,
            Some(true) => ApprovalState::Approved,
            Some(false) if self.tracker.has_pending_approval(chain_id, collection, operator) => {
                ApprovalState::Pending
            },
            Some(false) => ApprovalState::NotApproved,
        }
    }
}

/// Transaction allowing `spender` to move `amount` of `token`. Submitted
/// through [`TransactionTracker::submit`], the allowance reports
/// [`ApprovalState::Pending`] until it is mined.
pub fn erc20_approval(
    token: Address,
    spender: Address,
    amount: U256,
) -> (TransactionRequest, TransactionMeta) {
    let call = IERC20::approveCall { spender, amount };
    (
        TransactionRequest::default().to(token).input(Bytes::from(call.abi_encode()).into()),
        TransactionMeta::summary(format!("Approve {token} for {spender}"))
            .with_approval(token, spender),
    )
}

/// Transaction allowing `operator` to move every NFT of the sender in
/// `collection`, see [`erc20_approval`].
pub fn nft_approval(collection: Address, operator: Address) -> (TransactionRequest, TransactionMeta) {
    let call = IERC721::setApprovalForAllCall { operator, approved: true };
    (
        TransactionRequest::default().to(collection).input(Bytes::from(call.abi_encode()).into()),
        TransactionMeta::summary(format!("Approve {collection} collection for {operator}"))
            .with_approval(collection, operator),
    )
}

/// Decodes a string return value, falling back to the `bytes32` encoding.
/// `S` and `B` share the selector, so both decode the same return data.
fn string_or_bytes32<S, B>(result: &CallResult) -> Option<String>
where
    S: SolCall<Return = String>,
    B: SolCall<Return = B256>,
{
    result
        .decode::<S>()
        .filter(|s| !s.is_empty())
        .or_else(|| result.decode::<B>().and_then(parse_bytes32_string))
}

/// Reads a zero-terminated string stored in `bytes32`.
fn parse_bytes32_string(bytes: B256) -> Option<String> {
    if bytes[31] != 0 {
        return None;
    }
    let len = bytes.iter().position(|b| *b == 0).unwrap_or(32);
    String::from_utf8(bytes[..len].to_vec()).ok().filter(|s| !s.is_empty())
}
