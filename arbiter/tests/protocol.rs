//! End-to-end protocol scenarios over the in-memory network and store.
//!
//! Five committee members (threshold four) run their full event-loop
//! stacks; the chains are scripted mocks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use arbiter::codec::Decode as _;
use arbiter::context::ArbiterContext;
use arbiter::context::ArbiterEvent;
use arbiter::context::ArbiterSignal;
use arbiter::context::Context as _;
use arbiter::deposit_observer::DepositObserver;
use arbiter::duty::DutyOracle;
use arbiter::message::DistributedProposal;
use arbiter::multisig;
use arbiter::network::in_memory::WanNetwork;
use arbiter::network::MessageTransfer as _;
use arbiter::orchestrator::Orchestrator;
use arbiter::rpc::{ERR_INVALID_MAINCHAIN_TX, ERR_MAINCHAIN_TX_DUPLICATE};
use arbiter::side_chain::SideChain;
use arbiter::side_chain::SideChainManager;
use arbiter::storage::memory::SharedStore;
use arbiter::storage::model::FinishedKind;
use arbiter::storage::DbRead as _;
use arbiter::storage::DbWrite as _;
use arbiter::testing::dummy;
use arbiter::testing::MockMainChain;
use arbiter::testing::MockSideChain;
use arbiter::testing::TestHarness;
use arbiter::testing::TestSpv;
use arbiter::transaction::Amount;
use arbiter::transaction::Hash256;
use arbiter::transaction::Payload;
use arbiter::transaction::Transaction;
use arbiter::transaction::Utxo;
use arbiter::transaction_coordinator::TxCoordinatorEventLoop;
use arbiter::transaction_signer::TxSignerEventLoop;

const GENESIS: &str = "gY";

struct Node {
    context: ArbiterContext<SharedStore>,
    duty: Arc<DutyOracle<ArbiterContext<SharedStore>>>,
}

/// Wire up one committee member's full stack and spawn its loops.
fn spawn_node(
    harness: &TestHarness,
    index: usize,
    wan: &WanNetwork,
    spv: &TestSpv,
    main_rpc: &MockMainChain,
    side_rpc: &MockSideChain,
    with_signer: bool,
) -> Node {
    let context = harness.context(index);
    let duty = Arc::new(
        DutyOracle::new(
            context.clone(),
            harness.committee.clone(),
            harness.public_key(index),
        )
        .unwrap(),
    );
    let side_chains = Arc::new(SideChainManager::new(vec![SideChain::new(
        GENESIS,
        side_rpc.clone(),
    )]));
    let peer = wan.connect();

    let coordinator = TxCoordinatorEventLoop {
        context: context.clone(),
        network: peer.spawn(),
        main_rpc: main_rpc.clone(),
        side_chains: Arc::clone(&side_chains),
        signer: harness.private_key(index),
        committee: harness.committee.clone(),
        duty: Arc::clone(&duty),
        unsolved: Mutex::new(HashMap::new()),
        finished: Mutex::new(HashMap::new()),
    };
    tokio::spawn(coordinator.run());

    if with_signer {
        let signer = TxSignerEventLoop {
            context: context.clone(),
            network: peer.spawn(),
            spv: spv.clone(),
            signer: harness.private_key(index),
            committee: harness.committee.clone(),
            unsolved_proposals: Mutex::new(HashMap::new()),
        };
        tokio::spawn(signer.run());
    }

    let orchestrator = Orchestrator {
        context: context.clone(),
        main_rpc: main_rpc.clone(),
        side_chains,
        committee: harness.committee.clone(),
        duty: Arc::clone(&duty),
        miner: arbiter::auxpow::NoopMiner,
    };
    tokio::spawn(orchestrator.run());

    Node { context, duty }
}

async fn wait_for_event<F>(
    rx: &mut tokio::sync::broadcast::Receiver<ArbiterSignal>,
    mut matcher: F,
) -> ArbiterEvent
where
    F: FnMut(&ArbiterEvent) -> bool,
{
    let wait = async {
        loop {
            if let Ok(ArbiterSignal::Event(event)) = rx.recv().await {
                if matcher(&event) {
                    return event;
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for event")
}

fn bank_utxos() -> Vec<Utxo> {
    vec![Utxo {
        txid: Hash256::digest(b"bank-funding"),
        vout: 0,
        value: Amount(1_000 * 100_000_000),
    }]
}

/// Deposit success: the on-duty leader validates the recharge, the side
/// chain accepts it, and the row moves to finished-succeeded.
#[test_log::test(tokio::test)]
async fn deposit_success_moves_row_to_finished() {
    let harness = TestHarness::new(5, 46);
    let wan = WanNetwork::new();
    let spv = TestSpv::default();
    let main_rpc = MockMainChain::default();
    let side_rpc = MockSideChain::default();

    let node = spawn_node(&harness, 0, &wan, &spv, &main_rpc, &side_rpc, true);
    let mut events = node.context.get_signal_receiver();

    // Deliver the deposit through the SPV surface.
    let (tx, proof) = dummy::confirmed_deposit(b"dep", GENESIS, &spv, 100);
    spv.set_best_height(120);
    let observer = DepositObserver::new(node.context.clone(), spv.clone());
    observer.on_received(&tx, &proof, 100).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    // Height 120 puts member 0 on duty (120 % 5 == 0).
    node.duty.process_height(120).unwrap();
    wait_for_event(&mut events, |e| matches!(e, ArbiterEvent::DepositsProcessed)).await;

    let db = node.context.get_storage();
    assert!(db.pending_deposits(GENESIS).await.unwrap().is_empty());
    assert_eq!(
        db.finished_deposit_kind(&tx.hash(), GENESIS).await.unwrap(),
        Some(FinishedKind::DepositSucceeded)
    );
    assert_eq!(side_rpc.recharges(), vec![tx.hash()]);
}

/// Deposit duplicate: error code 45013 is success.
#[test_log::test(tokio::test)]
async fn duplicate_deposit_counts_as_success() {
    let harness = TestHarness::new(5, 46);
    let wan = WanNetwork::new();
    let spv = TestSpv::default();
    let main_rpc = MockMainChain::default();
    let side_rpc = MockSideChain::default();
    side_rpc.set_recharge_error(Some(ERR_MAINCHAIN_TX_DUPLICATE));

    let node = spawn_node(&harness, 0, &wan, &spv, &main_rpc, &side_rpc, true);
    let mut events = node.context.get_signal_receiver();

    let (tx, proof) = dummy::confirmed_deposit(b"dep", GENESIS, &spv, 100);
    spv.set_best_height(120);
    DepositObserver::new(node.context.clone(), spv.clone())
        .on_received(&tx, &proof, 100)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    node.duty.process_height(120).unwrap();
    wait_for_event(&mut events, |e| matches!(e, ArbiterEvent::DepositsProcessed)).await;

    let db = node.context.get_storage();
    assert_eq!(
        db.finished_deposit_kind(&tx.hash(), GENESIS).await.unwrap(),
        Some(FinishedKind::DepositSucceeded)
    );
}

/// Deposit invalid: error code 45022 is terminal failure, and the
/// leader proposes a settlement returning the funds.
#[test_log::test(tokio::test)]
async fn invalid_deposit_moves_row_to_failed() {
    let harness = TestHarness::new(5, 46);
    let wan = WanNetwork::new();
    let spv = TestSpv::default();
    let main_rpc = MockMainChain::default();
    main_rpc.set_utxos(bank_utxos());
    let side_rpc = MockSideChain::default();
    side_rpc.set_recharge_error(Some(ERR_INVALID_MAINCHAIN_TX));

    // A bare wire listener to observe the return-settlement proposal.
    let mut listener = wan.connect().spawn();

    let node = spawn_node(&harness, 0, &wan, &spv, &main_rpc, &side_rpc, true);
    let mut events = node.context.get_signal_receiver();

    let (tx, proof) = dummy::confirmed_deposit(b"dep", GENESIS, &spv, 100);
    spv.set_best_height(120);
    DepositObserver::new(node.context.clone(), spv.clone())
        .on_received(&tx, &proof, 100)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    node.duty.process_height(120).unwrap();
    wait_for_event(&mut events, |e| matches!(e, ArbiterEvent::DepositsProcessed)).await;

    let db = node.context.get_storage();
    assert_eq!(
        db.finished_deposit_kind(&tx.hash(), GENESIS).await.unwrap(),
        Some(FinishedKind::DepositFailed)
    );

    // The deposit-return proposal went out on the wire.
    let msg = tokio::time::timeout(Duration::from_secs(5), listener.receive())
        .await
        .expect("timed out waiting for return proposal")
        .unwrap();
    let envelope = DistributedProposal::decode_all(&msg.payload).unwrap();
    match envelope.payload {
        arbiter::message::ProposalPayload::WithdrawTx(return_tx) => match return_tx.payload {
            Payload::ReturnSideChainDeposit { deposit_tx_hashes, .. } => {
                assert_eq!(deposit_tx_hashes, vec![tx.hash()]);
            }
            other => panic!("unexpected payload {other:?}"),
        },
        other => panic!("unexpected proposal payload {other:?}"),
    }
}

/// Withdrawal agreement: three followers plus the leader reach the
/// threshold of four; the settlement is submitted once and all staged
/// rows are retired.
#[test_log::test(tokio::test)]
async fn withdrawal_agreement_submits_once() {
    let harness = TestHarness::new(5, 46);
    let wan = WanNetwork::new();
    let spv = TestSpv::default();
    spv.set_best_height(120);
    let main_rpc = MockMainChain::default();
    main_rpc.set_utxos(bank_utxos());
    let side_rpc = MockSideChain::default();

    let leader = spawn_node(&harness, 0, &wan, &spv, &main_rpc, &side_rpc, true);
    for index in 1..5 {
        spawn_node(&harness, index, &wan, &spv, &main_rpc, &side_rpc, true);
    }
    let mut events = leader.context.get_signal_receiver();

    // Stage three pending withdrawals on the leader.
    let rows = vec![
        dummy::pending_withdrawal(b"w1", GENESIS, 50),
        dummy::pending_withdrawal(b"w2", GENESIS, 50),
        dummy::pending_withdrawal(b"w3", GENESIS, 51),
    ];
    let db = leader.context.get_storage_mut();
    db.add_pending_withdrawals(&rows).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    leader.duty.process_height(120).unwrap();

    let event = wait_for_event(&mut events, |e| {
        matches!(e, ArbiterEvent::ProposalSubmitted { .. })
    })
    .await;
    let ArbiterEvent::ProposalSubmitted { hash } = event else { unreachable!() };

    // Exactly one settlement reached the chain, carrying a threshold of
    // valid signatures in signer-index order.
    let submitted = main_rpc.submitted();
    assert_eq!(submitted.len(), 1);
    let settlement = Transaction::decode_all(&submitted[0]).unwrap();
    assert_eq!(settlement.hash(), hash);
    multisig::verify_witness(&settlement, &harness.committee).unwrap();
    assert!(multisig::signature_count(&settlement) >= harness.committee.threshold());

    match &settlement.payload {
        Payload::WithdrawFromSideChain { side_tx_hashes, .. } => {
            assert_eq!(side_tx_hashes.len(), 3);
        }
        other => panic!("unexpected payload {other:?}"),
    }

    // All three staged rows are finished.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (pending, _) = db.withdrawal_hashes_and_heights(GENESIS).await.unwrap();
    assert!(pending.is_empty());
    for row in &rows {
        assert_eq!(
            db.finished_withdrawal_kind(&row.side_tx_hash).await.unwrap(),
            Some(FinishedKind::WithdrawSucceeded)
        );
    }
}

/// Illegal evidence gathers committee signatures through the same
/// protocol and is submitted to the side chain at threshold.
#[test_log::test(tokio::test)]
async fn illegal_evidence_reaches_threshold_and_submits() {
    let harness = TestHarness::new(5, 46);
    let wan = WanNetwork::new();
    let spv = TestSpv::default();
    spv.set_best_height(120);
    let main_rpc = MockMainChain::default();
    let side_rpc = MockSideChain::default();

    let leader = spawn_node(&harness, 0, &wan, &spv, &main_rpc, &side_rpc, true);
    for index in 1..5 {
        spawn_node(&harness, index, &wan, &spv, &main_rpc, &side_rpc, true);
    }
    let mut events = leader.context.get_signal_receiver();

    tokio::time::sleep(Duration::from_millis(100)).await;
    leader.duty.process_height(120).unwrap();

    let evidence = arbiter::message::IllegalData {
        illegal_type: 1,
        height: 200,
        illegal_signer: vec![2u8; 33],
        genesis_address: GENESIS.into(),
        evidence: b"header a".to_vec(),
        compare_evidence: b"header b".to_vec(),
        signs: Vec::new(),
    };
    let side_chain = SideChain::new(GENESIS, side_rpc.clone());
    side_chain
        .on_illegal_evidence_found(&leader.context, evidence.clone())
        .unwrap();

    wait_for_event(&mut events, |e| {
        matches!(e, ArbiterEvent::ProposalSubmitted { .. })
    })
    .await;

    let submitted = side_rpc.submitted_evidence();
    assert_eq!(submitted.len(), 1);
    let data = arbiter::message::IllegalData::decode_all(&submitted[0]).unwrap();
    assert_eq!(data.hash(), evidence.hash());
    assert!(data.signs.len() >= harness.committee.threshold());
}

/// Withdrawal below threshold: with only two responding followers the
/// submit never fires, the rows stay pending, and the next duty tick
/// rebuilds the proposal from them.
#[test_log::test(tokio::test)]
async fn below_threshold_withdrawal_is_rebuilt_next_tick() {
    let harness = TestHarness::new(5, 46);
    let wan = WanNetwork::new();
    let spv = TestSpv::default();
    spv.set_best_height(120);
    let main_rpc = MockMainChain::default();
    main_rpc.set_utxos(bank_utxos());
    let side_rpc = MockSideChain::default();

    let mut listener = wan.connect().spawn();

    let leader = spawn_node(&harness, 0, &wan, &spv, &main_rpc, &side_rpc, true);
    // Members 1 and 2 respond; members 3 and 4 run without their signer
    // loops, so at most three signatures accumulate.
    let follower = spawn_node(&harness, 1, &wan, &spv, &main_rpc, &side_rpc, true);
    spawn_node(&harness, 2, &wan, &spv, &main_rpc, &side_rpc, true);
    spawn_node(&harness, 3, &wan, &spv, &main_rpc, &side_rpc, false);
    spawn_node(&harness, 4, &wan, &spv, &main_rpc, &side_rpc, false);
    let mut follower_events = follower.context.get_signal_receiver();

    let rows = vec![
        dummy::pending_withdrawal(b"w1", GENESIS, 50),
        dummy::pending_withdrawal(b"w2", GENESIS, 50),
    ];
    let db = leader.context.get_storage_mut();
    db.add_pending_withdrawals(&rows).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    leader.duty.process_height(120).unwrap();

    // First origination goes out.
    let first = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = listener.receive().await.unwrap();
            let envelope = DistributedProposal::decode_all(&msg.payload).unwrap();
            if !envelope.is_feedback() {
                return envelope;
            }
        }
    })
    .await
    .expect("timed out waiting for the first proposal");

    // The responding followers do sign; the round still stalls below
    // threshold.
    wait_for_event(&mut follower_events, |e| {
        matches!(e, ArbiterEvent::ProposalSigned { .. })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(main_rpc.submitted().is_empty());
    let (pending, _) = db.withdrawal_hashes_and_heights(GENESIS).await.unwrap();
    assert_eq!(pending.len(), 2);

    // Duty flips away and back; the leader cancels and then rebuilds
    // from the same pending rows.
    spv.set_best_height(121);
    leader.duty.process_height(121).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    spv.set_best_height(125);
    leader.duty.process_height(125).unwrap();

    let second = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = listener.receive().await.unwrap();
            let envelope = DistributedProposal::decode_all(&msg.payload).unwrap();
            if !envelope.is_feedback() {
                return envelope;
            }
        }
    })
    .await
    .expect("timed out waiting for the rebuilt proposal");

    assert_eq!(second.payload.hash(), first.payload.hash());
    assert!(main_rpc.submitted().is_empty());
}
