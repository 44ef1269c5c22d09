use std::sync::Arc;

use alloy::{
    primitives::{Address, B256, Bytes, U256, address, b256},
    rpc::types::TransactionRequest,
};
use chainsync_sdk::{
    abi::erc20::IERC20,
    balances::Currency,
    chain::{BSC, BSC_TESTNET, ChainConfig, MAINNET},
    error::SyncError,
    multicall::{CallRequest, CallResult, Freshness},
    session::Session,
    testing::{MockNetwork, MockWallet},
    transactions::{DEFAULT_RECENCY, TransactionMeta, TransactionStatus},
};
use chrono::{TimeDelta, TimeZone, Utc};

const TOKEN: Address = address!("0x0000000000000000000000000000000000000701");
const BUSD: Address = address!("0x0000000000000000000000000000000000000702");
const A: Address = address!("0x000000000000000000000000000000000000000a");
const B: Address = address!("0x000000000000000000000000000000000000000b");

fn session() -> (MockNetwork, Session) {
    let network = MockNetwork::new(&[BSC, BSC_TESTNET]);
    let session =
        Session::new(ChainConfig::default().supported(&[BSC, BSC_TESTNET]), network.clone());
    (network, session)
}

/// Balances of `[A, A, B]` issue one sub-call per distinct account, and the
/// duplicates observe identical results.
#[tokio::test]
async fn test_duplicate_requests_are_fetched_once() {
    let (network, session) = session();
    let bsc = network.provider(BSC);
    bsc.set_block_number(42);
    bsc.set_return(TOKEN, &IERC20::balanceOfCall { account: A }, U256::from(7));
    bsc.set_return(TOKEN, &IERC20::balanceOfCall { account: B }, U256::from(9));

    let amounts = session.balances().token_balances_for_accounts(BSC, TOKEN, &[A, A, B]).await;

    assert_eq!(bsc.round_trips(), 1);
    assert_eq!(bsc.sub_calls().len(), 2);
    assert_eq!(amounts.get(&A), Some(U256::from(7)));
    assert_eq!(amounts.get(&B), Some(U256::from(9)));
    assert!(!amounts.loading);

    // Raw results of duplicates are identical and carry the aggregator block
    let a = CallRequest::from_call(BSC, TOKEN, &IERC20::balanceOfCall { account: A });
    let results = session.multicall().batch_read(&[a.clone(), a.clone(), a], Freshness::Any).await;
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
    assert_eq!(results[0].block_number(), Some(42));
    assert_eq!(bsc.round_trips(), 1);
}

/// A reverting balance call fails alone; its siblings resolve.
#[tokio::test]
async fn test_revert_is_isolated_to_its_slot() {
    let (network, session) = session();
    let bsc = network.provider(BSC);
    bsc.set_return(TOKEN, &IERC20::balanceOfCall { account: A }, U256::from(1));
    bsc.set_revert(BUSD, &IERC20::balanceOfCall { account: A });

    let sheet = session.balances().balances(BSC, A, &[TOKEN, BUSD]).await;

    assert_eq!(bsc.round_trips(), 1);
    assert_eq!(sheet.get(&Currency::Token(TOKEN)), Some(U256::from(1)));
    assert_eq!(sheet.get(&Currency::Token(BUSD)), None);
    assert_eq!(
        sheet.error(&Currency::Token(BUSD)),
        Some(&SyncError::CallReverted { data: Bytes::new() })
    );
    assert!(sheet.error(&Currency::Token(TOKEN)).is_none());
    assert!(sheet.error(&Currency::Native).is_none());
}

/// Chains without configured endpoints have no provider, reads of them are
/// unavailable and never panic.
#[tokio::test]
async fn test_unsupported_chain_has_no_provider() {
    let (network, session) = session();

    for chain_id in [MAINNET, 0, u64::MAX] {
        assert!(session.registry().resolve_provider(chain_id).is_none());
    }
    let request = CallRequest::from_call(MAINNET, TOKEN, &IERC20::decimalsCall {});
    let result = session.multicall().read(&request, Freshness::Any).await;
    assert_eq!(result, CallResult::Unavailable(SyncError::NoProvider { chain_id: MAINNET }));
    assert!(result.error().unwrap().is_transient());
    assert_eq!(network.builds(), 0);
}

/// `0xabc` is pending until the node reports its receipt at block 100, then
/// confirmed exactly once.
#[tokio::test]
async fn test_transaction_lifecycle() {
    let (network, session) = session();
    let hash = b256!("0x0000000000000000000000000000000000000000000000000000000000000abc");
    let tracker = session.tracker();

    let record = tracker.add(BSC, hash, A, TransactionMeta::summary("Swap"), Utc::now());
    assert!(record.receipt().is_none());

    assert_eq!(tracker.poll().await, 0);
    assert_eq!(tracker.get(BSC, hash).unwrap().status(), TransactionStatus::Pending);
    assert_eq!(tracker.pending(BSC), vec![hash]);

    network.provider(BSC).set_receipt(hash, 100, true);
    assert_eq!(tracker.poll().await, 1);
    let confirmed = tracker.get(BSC, hash).unwrap();
    assert_eq!(confirmed.status(), TransactionStatus::Confirmed);
    assert_eq!(confirmed.receipt().unwrap().block_number, 100);

    // Third poll is a no-op even if the node reports something else
    network.provider(BSC).set_receipt(hash, 101, false);
    assert_eq!(tracker.poll().await, 0);
    assert_eq!(tracker.get(BSC, hash).unwrap(), confirmed);
    assert!(tracker.pending(BSC).is_empty());
}

/// Recent transactions are sorted by descending submission time regardless
/// of insertion order.
#[tokio::test]
async fn test_recent_transactions_newest_first() {
    let (_, session) = session();
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let offsets = [3, 1, 4, 1_000, 5, 9, 7, 6];

    for (i, minutes) in offsets.iter().enumerate() {
        session.tracker().add(
            BSC,
            B256::with_last_byte(i as u8),
            A,
            Default::default(),
            t0 + TimeDelta::minutes(*minutes),
        );
    }

    let now = t0 + TimeDelta::minutes(10);
    let recent = session.tracker().recent(BSC, now, DEFAULT_RECENCY);
    // The one submitted in the future relative to `now` counts as recent too
    assert_eq!(recent.len(), offsets.len());
    assert!(recent.windows(2).all(|w| w[0].submitted_at() > w[1].submitted_at()));

    let last_five = session.tracker().recent(BSC, now, TimeDelta::minutes(5) + TimeDelta::seconds(1));
    let minutes: Vec<_> =
        last_five.iter().map(|r| (r.submitted_at() - t0).num_minutes()).collect();
    assert_eq!(minutes, vec![1_000, 9, 7, 6, 5]);
}

/// A read in flight while the wallet switches chains is discarded on
/// arrival instead of being applied. The switch takes effect as soon as the
/// wallet notifies, without any tick in between.
#[tokio::test]
async fn test_chain_switch_discards_late_results() {
    let (network, session) = session();
    let wallet = Arc::new(MockWallet::new(BSC, Some(A)));
    session.activate(wallet.clone()).await.unwrap();

    let provider = wallet.mock_provider();
    provider.set_return(TOKEN, &IERC20::balanceOfCall { account: A }, U256::from(5));
    let request = CallRequest::from_call(BSC, TOKEN, &IERC20::balanceOfCall { account: A });

    let mut hold = provider.hold();
    let read = session.multicall().batch_read(std::slice::from_ref(&request), Freshness::Any);
    let switch = async {
        hold.started().await;
        wallet.switch_chain(BSC_TESTNET);
        hold.release();
    };
    let (results, ()) = futures::join!(read, switch);

    assert_eq!(results, vec![CallResult::Loading]);
    assert_eq!(session.multicall().state(&request), CallResult::Loading);
    assert_eq!(provider.round_trips(), 1);

    // The old chain is read through its read-only connector from now on
    let result = session.multicall().read(&request, Freshness::Any).await;
    assert!(result.data().is_some());
    assert_eq!(network.provider(BSC).round_trips(), 1);
}

/// A read in flight while the user selects another account is discarded;
/// the next read refetches.
#[tokio::test]
async fn test_account_switch_discards_late_results() {
    let (network, session) = session();
    let wallet = Arc::new(MockWallet::new(BSC, Some(A)));
    session.activate(wallet.clone()).await.unwrap();

    let provider = wallet.mock_provider();
    provider.set_return(TOKEN, &IERC20::balanceOfCall { account: A }, U256::from(5));
    let request = CallRequest::from_call(BSC, TOKEN, &IERC20::balanceOfCall { account: A });

    let mut hold = provider.hold();
    let read = session.multicall().batch_read(std::slice::from_ref(&request), Freshness::Any);
    let switch = async {
        hold.started().await;
        wallet.switch_account(Some(B));
        hold.release();
    };
    let (results, ()) = futures::join!(read, switch);

    assert_eq!(results, vec![CallResult::Loading]);
    assert_eq!(session.multicall().state(&request), CallResult::Loading);
    assert_eq!(session.active_state().account, Some(B));

    // Same chain, same provider: refetched through the wallet
    let result = session.multicall().read(&request, Freshness::Any).await;
    assert_eq!(result.decode::<IERC20::balanceOfCall>(), Some(U256::from(5)));
    assert_eq!(provider.round_trips(), 2);
    assert_eq!(network.provider(BSC).round_trips(), 0);
}

/// Submission through the active wallet, then confirmation through the
/// receipt poll.
#[tokio::test]
async fn test_submit_and_confirm() {
    let (_, session) = session();
    let wallet = Arc::new(MockWallet::new(BSC, Some(A)));
    session.activate(wallet.clone()).await.unwrap();

    let tx = TransactionRequest::default().to(TOKEN);
    let record = session.tracker().submit(tx, TransactionMeta::summary("Transfer")).await.unwrap();
    assert!(record.is_pending());
    assert_eq!(session.tick().await.confirmed, 0);

    wallet.mock_provider().set_receipt(record.hash(), 3, true);
    assert_eq!(session.tick().await.confirmed, 1);
    assert_eq!(session.tracker().confirmed(BSC), vec![record.hash()]);

    wallet.mock_provider().fail_next_send(SyncError::SubmissionRejected);
    let err = session.tracker().submit(TransactionRequest::default(), Default::default()).await;
    assert_eq!(err.unwrap_err(), SyncError::SubmissionRejected);
    assert_eq!(session.tracker().len(), 1);
}
