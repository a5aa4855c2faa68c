// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use btp_relayer_config::{BTPRelayerConfig, DestinationConfig, SourceConfig};
use btp_relayer_types::{
    BMCLinkStatus, ErrorCode, PrivateKey, RelayResult, Sender, VerifierStatus,
};
use btp_relayer_utils::{Error, Result};

use crate::link::{Link, RelayState};
use crate::receiver::{
    BlockProof, BlockUpdate, MessageProof, ReceiveStatus, Receiver, RelayItem,
    RelayMessageItem,
};

struct TestBlockUpdate {
    height: i64,
    len: i64,
}

impl RelayMessageItem for TestBlockUpdate {
    fn len(&self) -> i64 {
        self.len
    }

    fn update_bmc_link_status(&self, bls: &mut BMCLinkStatus) -> Result<()> {
        bls.verifier.height = self.height;
        Ok(())
    }
}

impl BlockUpdate for TestBlockUpdate {
    fn proof_height(&self) -> i64 {
        self.height
    }
}

struct TestBlockProof {
    height: i64,
    len: i64,
}

impl RelayMessageItem for TestBlockProof {
    fn len(&self) -> i64 {
        self.len
    }

    fn update_bmc_link_status(&self, _bls: &mut BMCLinkStatus) -> Result<()> {
        Ok(())
    }
}

impl BlockProof for TestBlockProof {
    fn proof_height(&self) -> i64 {
        self.height
    }
}

struct TestMessageProof {
    last: i64,
    len: i64,
}

impl RelayMessageItem for TestMessageProof {
    fn len(&self) -> i64 {
        self.len
    }

    fn update_bmc_link_status(&self, bls: &mut BMCLinkStatus) -> Result<()> {
        bls.rx_seq = self.last;
        Ok(())
    }
}

impl MessageProof for TestMessageProof {
    fn last_seq(&self) -> i64 {
        self.last
    }
}

/// A scripted source chain: `plan` maps a height to the cumulative message
/// sequence visible there. Block updates advance one height per call;
/// message proofs advance `rx_seq` towards the plan, `mp_step` messages at a
/// time when set.
struct MockReceiver {
    plan: parking_lot::Mutex<BTreeMap<i64, i64>>,
    height_for_seq: parking_lot::Mutex<BTreeMap<i64, i64>>,
    mp_step: Option<i64>,
    item_len: i64,
    events_rx: parking_lot::Mutex<Option<mpsc::Receiver<Result<ReceiveStatus>>>>,
    finalized: parking_lot::Mutex<Option<mpsc::Receiver<BMCLinkStatus>>>,
}

impl MockReceiver {
    fn new(
        plan: &[(i64, i64)],
        item_len: i64,
        mp_step: Option<i64>,
    ) -> (Arc<Self>, mpsc::Sender<Result<ReceiveStatus>>) {
        let (tx, rx) = mpsc::channel(16);
        let receiver = Arc::new(Self {
            plan: parking_lot::Mutex::new(plan.iter().copied().collect()),
            height_for_seq: parking_lot::Mutex::new(BTreeMap::new()),
            mp_step,
            item_len,
            events_rx: parking_lot::Mutex::new(Some(rx)),
            finalized: parking_lot::Mutex::new(None),
        });
        (receiver, tx)
    }

    fn set_height_for_seq(&self, seq: i64, height: i64) {
        self.height_for_seq.lock().insert(seq, height);
    }

    fn seq_at(&self, height: i64) -> i64 {
        self.plan
            .lock()
            .range(..=height)
            .next_back()
            .map(|(_, seq)| *seq)
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Receiver for MockReceiver {
    async fn start(
        &self,
        _initial: BMCLinkStatus,
    ) -> Result<mpsc::Receiver<Result<ReceiveStatus>>> {
        Ok(self.events_rx.lock().take().expect("receiver started once"))
    }

    fn stop(&self) {}

    fn get_height_for_seq(&self, seq: i64) -> i64 {
        self.height_for_seq.lock().get(&seq).copied().unwrap_or(0)
    }

    async fn build_block_update(
        &self,
        bls: &BMCLinkStatus,
        _budget: i64,
    ) -> Result<Vec<Box<dyn BlockUpdate>>> {
        Ok(vec![Box::new(TestBlockUpdate {
            height: bls.verifier.height + 1,
            len: self.item_len,
        })])
    }

    async fn build_block_proof(
        &self,
        _bls: &BMCLinkStatus,
        height: i64,
    ) -> Result<Option<Box<dyn BlockProof>>> {
        Ok(Some(Box::new(TestBlockProof {
            height,
            len: self.item_len,
        })))
    }

    async fn build_message_proof(
        &self,
        bls: &BMCLinkStatus,
        _budget: i64,
    ) -> Result<Option<Box<dyn MessageProof>>> {
        let target = self.seq_at(bls.verifier.height);
        if bls.rx_seq >= target {
            return Ok(None);
        }
        let last = match self.mp_step {
            Some(step) => (bls.rx_seq + step).min(target),
            None => target,
        };
        Ok(Some(Box::new(TestMessageProof {
            last,
            len: self.item_len,
        })))
    }

    async fn build_relay_message(&self, items: &[RelayItem]) -> Result<Vec<u8>> {
        let total: i64 = items.iter().map(|item| item.len()).sum();
        Ok(vec![0xAB; total as usize])
    }

    fn finalized_status(&self, statuses: mpsc::Receiver<BMCLinkStatus>) {
        *self.finalized.lock() = Some(statuses);
    }
}

struct MockSender {
    tx_size_limit: i64,
    status: parking_lot::Mutex<BMCLinkStatus>,
    relays: parking_lot::Mutex<Vec<(i64, Vec<u8>)>>,
    queue_full: AtomicBool,
    get_status_calls: AtomicUsize,
    results_tx: mpsc::Sender<RelayResult>,
    results_rx: parking_lot::Mutex<Option<mpsc::Receiver<RelayResult>>>,
}

impl MockSender {
    fn new(tx_size_limit: i64, status: BMCLinkStatus) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(16);
        Arc::new(Self {
            tx_size_limit,
            status: parking_lot::Mutex::new(status),
            relays: parking_lot::Mutex::new(Vec::new()),
            queue_full: AtomicBool::new(false),
            get_status_calls: AtomicUsize::new(0),
            results_tx: tx,
            results_rx: parking_lot::Mutex::new(Some(rx)),
        })
    }

    fn result_sender(&self) -> mpsc::Sender<RelayResult> {
        self.results_tx.clone()
    }

    fn relayed(&self) -> Vec<i64> {
        self.relays.lock().iter().map(|(id, _)| *id).collect()
    }
}

#[async_trait::async_trait]
impl Sender for MockSender {
    async fn start(&self) -> Result<mpsc::Receiver<RelayResult>> {
        Ok(self.results_rx.lock().take().expect("sender started once"))
    }

    fn stop(&self) {}

    async fn get_status(&self) -> Result<BMCLinkStatus> {
        self.get_status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status.lock().clone())
    }

    fn tx_size_limit(&self) -> i64 {
        self.tx_size_limit
    }

    fn margin_for_limit(&self) -> i64 {
        0
    }

    async fn relay(&self, id: i64, message: &[u8]) -> Result<i64> {
        if self.queue_full.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("pending queue full".into()));
        }
        self.relays.lock().push((id, message.to_vec()));
        Ok(id)
    }
}

fn status(height: i64, rx_seq: i64) -> BMCLinkStatus {
    BMCLinkStatus {
        tx_seq: 0,
        rx_seq,
        verifier: VerifierStatus {
            height,
            extra: Vec::new(),
        },
    }
}

fn test_config() -> BTPRelayerConfig {
    BTPRelayerConfig {
        src: SourceConfig {
            address: "btp://0x2.bsc/0xd64eF8A5B4B0E03a1A6e67E5dDB5348971a7a9a4"
                .parse()
                .unwrap(),
            endpoint: "https://src.example.org".parse().unwrap(),
        },
        dst: DestinationConfig {
            address: "btp://0x1.icon/cx23a91ee3dd290486a9113a6a42429825d813de53"
                .parse()
                .unwrap(),
            endpoint: "https://dst.example.org/api/v3".parse().unwrap(),
            step_limit: 0x9502f900,
            latest_result: false,
            private_key: PrivateKey::from_hex(
                "0x0101010101010101010101010101010101010101010101010101010101010101",
            )
            .unwrap(),
        },
    }
}

struct Harness {
    link: Arc<Link<MockReceiver, MockSender>>,
    sender: Arc<MockSender>,
    events: mpsc::Sender<Result<ReceiveStatus>>,
    results: mpsc::Sender<RelayResult>,
    finalized: Arc<parking_lot::Mutex<Vec<BMCLinkStatus>>>,
    handle: tokio::task::JoinHandle<Result<()>>,
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn start_harness(
    receiver: Arc<MockReceiver>,
    events: mpsc::Sender<Result<ReceiveStatus>>,
    sender: Arc<MockSender>,
) -> Harness {
    let link = Arc::new(Link::new(&test_config(), receiver.clone(), sender.clone()));
    let results = sender.result_sender();
    let handle = tokio::spawn(Arc::clone(&link).start());
    {
        let receiver = receiver.clone();
        wait_until(move || receiver.finalized.lock().is_some()).await;
    }
    // drain the finalized-status channel the way a real receiver would
    let finalized = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mut statuses = receiver.finalized.lock().take().unwrap();
    {
        let finalized = finalized.clone();
        tokio::spawn(async move {
            while let Some(bls) = statuses.recv().await {
                finalized.lock().push(bls);
            }
        });
    }
    Harness {
        link,
        sender,
        events,
        results,
        finalized,
        handle,
    }
}

async fn rm_ids(h: &Harness) -> Vec<i64> {
    h.link.state.lock().await.rms.iter().map(|rm| rm.id).collect()
}

#[tokio::test]
async fn builds_and_sends_on_receive_status() {
    let (receiver, events) = MockReceiver::new(&[(10, 5), (12, 8)], 6, None);
    let sender = MockSender::new(1_000_000, status(10, 5));
    let h = start_harness(receiver, events, sender).await;

    h.events
        .send(Ok(ReceiveStatus { height: 12, seq: 8 }))
        .await
        .unwrap();

    let sender = h.sender.clone();
    wait_until(move || sender.relays.lock().len() == 2).await;

    {
        let state = h.link.state.lock().await;
        // one message per block update, submitted in order
        assert_eq!(state.rms.len(), 2);
        assert!(state.rms.iter().all(|rm| rm.sending));
        assert_eq!(state.rms[0].bls.verifier.height, 11);
        assert_eq!(state.rms[0].bls.rx_seq, 5);
        assert_eq!(state.rms[1].bls.verifier.height, 12);
        assert_eq!(state.rms[1].bls.rx_seq, 8);
        // the first event leaves the link pending until a result arrives
        assert_eq!(state.relay_state, RelayState::Pending);
        // rx_seq is monotone across pending messages
        assert!(state
            .rms
            .windows(2)
            .all(|w| w[0].bls.rx_seq <= w[1].bls.rx_seq));
    }

    // applying every item's status update to the pre-message status yields
    // the recorded snapshot
    {
        let state = h.link.state.lock().await;
        let mut bls = status(10, 5);
        for rm in &state.rms {
            for item in &rm.items {
                item.update_bmc_link_status(&mut bls).unwrap();
            }
            assert_eq!(&bls, &rm.bls);
        }
    }

    let last_id = rm_ids(&h).await[1];
    h.results
        .send(RelayResult {
            id: last_id,
            err: ErrorCode::Success,
            finalized: true,
        })
        .await
        .unwrap();

    let link = h.link.clone();
    wait_until(move || {
        link.state
            .try_lock()
            .map(|s| s.rms.is_empty() && s.relay_state == RelayState::Running)
            .unwrap_or(false)
    })
    .await;

    let finalized = h.finalized.clone();
    wait_until(move || !finalized.lock().is_empty()).await;
    let forwarded = h.finalized.lock().clone();
    assert_eq!(forwarded[0], status(12, 8));

    h.handle.abort();
}

#[tokio::test]
async fn success_result_is_idempotent() {
    let (receiver, events) = MockReceiver::new(&[(10, 5), (12, 8)], 6, None);
    let sender = MockSender::new(1_000_000, status(10, 5));
    let h = start_harness(receiver, events, sender).await;

    h.events
        .send(Ok(ReceiveStatus { height: 12, seq: 8 }))
        .await
        .unwrap();
    let sender = h.sender.clone();
    wait_until(move || sender.relays.lock().len() == 2).await;

    let last_id = rm_ids(&h).await[1];
    let success = RelayResult {
        id: last_id,
        err: ErrorCode::Success,
        finalized: true,
    };
    h.results.send(success).await.unwrap();
    let link = h.link.clone();
    wait_until(move || {
        link.state
            .try_lock()
            .map(|s| s.rms.is_empty())
            .unwrap_or(false)
    })
    .await;

    // replaying the same success must change nothing
    h.results.send(success).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let state = h.link.state.lock().await;
    assert!(state.rms.is_empty());
    assert!(state.rss.is_empty());
    assert_eq!(state.relay_state, RelayState::Running);
    assert!(!h.handle.is_finished());
}

#[tokio::test]
async fn not_verifiable_pauses_then_resyncs() {
    let (receiver, events) = MockReceiver::new(&[(10, 5), (12, 8)], 6, None);
    let sender = MockSender::new(1_000_000, status(10, 5));
    let h = start_harness(receiver, events, sender).await;

    h.events
        .send(Ok(ReceiveStatus { height: 12, seq: 8 }))
        .await
        .unwrap();
    let sender = h.sender.clone();
    wait_until(move || sender.relays.lock().len() == 2).await;
    let ids = rm_ids(&h).await;

    // the first message lands; the link resumes with one message in flight
    h.results
        .send(RelayResult {
            id: ids[0],
            err: ErrorCode::Success,
            finalized: true,
        })
        .await
        .unwrap();
    let link = h.link.clone();
    wait_until(move || {
        link.state
            .try_lock()
            .map(|s| s.relay_state == RelayState::Running && s.rms.len() == 1)
            .unwrap_or(false)
    })
    .await;

    // non-finalized: pause only
    h.results
        .send(RelayResult {
            id: ids[1],
            err: ErrorCode::BmvNotVerifiable,
            finalized: false,
        })
        .await
        .unwrap();
    let link = h.link.clone();
    wait_until(move || {
        link.state
            .try_lock()
            .map(|s| s.relay_state == RelayState::Pending)
            .unwrap_or(false)
    })
    .await;

    // finalized: resync against the destination's reported status
    *h.sender.status.lock() = status(12, 8);
    h.results
        .send(RelayResult {
            id: ids[1],
            err: ErrorCode::BmvNotVerifiable,
            finalized: true,
        })
        .await
        .unwrap();
    let link = h.link.clone();
    wait_until(move || {
        link.state
            .try_lock()
            .map(|s| s.relay_state == RelayState::Running && s.rms.is_empty())
            .unwrap_or(false)
    })
    .await;

    let state = h.link.state.lock().await;
    assert_eq!(state.bls, status(12, 8));
    // initial status fetch plus the resync
    assert_eq!(h.sender.get_status_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn queue_full_pauses_until_a_result_drains_it() {
    let (receiver, events) =
        MockReceiver::new(&[(10, 5), (12, 8), (14, 11)], 6, None);
    let sender = MockSender::new(1_000_000, status(10, 5));
    let h = start_harness(receiver, events, sender).await;

    h.events
        .send(Ok(ReceiveStatus { height: 12, seq: 8 }))
        .await
        .unwrap();
    let sender = h.sender.clone();
    wait_until(move || sender.relays.lock().len() == 2).await;
    let ids = rm_ids(&h).await;

    // the first message lands so the link is running again
    h.results
        .send(RelayResult {
            id: ids[0],
            err: ErrorCode::Success,
            finalized: true,
        })
        .await
        .unwrap();
    let link = h.link.clone();
    wait_until(move || {
        link.state
            .try_lock()
            .map(|s| s.relay_state == RelayState::Running && s.rms.len() == 1)
            .unwrap_or(false)
    })
    .await;

    // the sender's queue fills up; the next built message is refused
    h.sender.queue_full.store(true, Ordering::SeqCst);
    h.events
        .send(Ok(ReceiveStatus {
            height: 14,
            seq: 11,
        }))
        .await
        .unwrap();
    let link = h.link.clone();
    wait_until(move || {
        link.state
            .try_lock()
            .map(|s| {
                s.relay_state == RelayState::Pending
                    && s.rms.iter().any(|rm| !rm.sending)
            })
            .unwrap_or(false)
    })
    .await;
    assert_eq!(h.sender.relays.lock().len(), 2);

    // a success result drains the queue and resumes submission
    h.sender.queue_full.store(false, Ordering::SeqCst);
    h.results
        .send(RelayResult {
            id: ids[1],
            err: ErrorCode::Success,
            finalized: true,
        })
        .await
        .unwrap();

    let sender = h.sender.clone();
    wait_until(move || sender.relays.lock().len() == 4).await;
    let state = h.link.state.lock().await;
    assert_eq!(state.relay_state, RelayState::Running);
    assert!(state.rms.iter().all(|rm| rm.sending));
    assert_eq!(state.bls.verifier.height, 14);
    assert_eq!(state.bls.rx_seq, 11);
}

#[tokio::test]
async fn already_verified_drops_the_message() {
    let (receiver, events) = MockReceiver::new(&[(10, 5), (12, 8)], 6, None);
    let sender = MockSender::new(1_000_000, status(10, 5));
    let h = start_harness(receiver, events, sender).await;

    h.events
        .send(Ok(ReceiveStatus { height: 12, seq: 8 }))
        .await
        .unwrap();
    let sender = h.sender.clone();
    wait_until(move || sender.relays.lock().len() == 2).await;
    let ids = rm_ids(&h).await;

    h.results
        .send(RelayResult {
            id: ids[1],
            err: ErrorCode::BmvAlreadyVerified,
            finalized: true,
        })
        .await
        .unwrap();

    let link = h.link.clone();
    let gone = ids[1];
    wait_until(move || {
        link.state
            .try_lock()
            .map(|s| s.rms.iter().all(|rm| rm.id != gone))
            .unwrap_or(false)
    })
    .await;
    assert!(!h.handle.is_finished());
}

#[tokio::test]
async fn recovers_undelivered_messages_on_first_event() {
    // the verifier already sits at height 10, but three messages visible
    // there were never delivered
    let (receiver, events) = MockReceiver::new(&[(10, 8)], 6, None);
    receiver.set_height_for_seq(5, 10);
    let sender = MockSender::new(1_000_000, status(10, 5));
    let h = start_harness(receiver, events, sender).await;

    h.events
        .send(Ok(ReceiveStatus { height: 10, seq: 8 }))
        .await
        .unwrap();

    let sender = h.sender.clone();
    wait_until(move || sender.relays.lock().len() == 1).await;
    let state = h.link.state.lock().await;
    assert_eq!(state.rms.len(), 1);
    assert_eq!(state.rms[0].items.len(), 1);
    assert!(matches!(state.rms[0].items[0], RelayItem::MessageProof(_)));
}

#[tokio::test]
async fn over_limit_splits_and_witness_old_rebuilds() {
    // tiny budget: a block update plus one proof already exceeds it, so the
    // second block's proofs split across two messages
    let (receiver, events) = MockReceiver::new(&[(12, 8)], 6, Some(2));
    let sender = MockSender::new(10, status(10, 5));
    let h = start_harness(receiver, events, sender).await;

    h.events
        .send(Ok(ReceiveStatus { height: 12, seq: 8 }))
        .await
        .unwrap();

    let link = h.link.clone();
    wait_until(move || {
        link.state
            .try_lock()
            .map(|s| s.rms.len() == 3)
            .unwrap_or(false)
    })
    .await;

    {
        let state = h.link.state.lock().await;
        // the partial flush snapshots the partially advanced rx_seq
        assert_eq!(state.rms[1].bls.rx_seq, 7);
        assert_eq!(state.rms[2].bls.rx_seq, 8);
        assert!(state
            .rms
            .windows(2)
            .all(|w| w[0].bls.rx_seq <= w[1].bls.rx_seq));
        assert!(matches!(state.rms[2].items[0], RelayItem::BlockProof(_)));
        assert!(matches!(state.rms[2].items[1], RelayItem::MessageProof(_)));
    }

    // a stale-witness revert on the partial message rebuilds its proofs
    let ids = rm_ids(&h).await;
    h.results
        .send(RelayResult {
            id: ids[1],
            err: ErrorCode::BmvRevertInvalidBlockWitnessOld,
            finalized: true,
        })
        .await
        .unwrap();

    let link = h.link.clone();
    wait_until(move || {
        link.state
            .try_lock()
            .map(|s| s.rms.len() == 4)
            .unwrap_or(false)
    })
    .await;
    let state = h.link.state.lock().await;
    let rebuilt = state.rms.last().unwrap();
    assert_eq!(rebuilt.bls.rx_seq, 8);
    assert!(!rebuilt.sending);
    assert!(matches!(rebuilt.items[0], RelayItem::BlockProof(_)));
    assert!(matches!(rebuilt.items[1], RelayItem::MessageProof(_)));
}

#[tokio::test]
async fn unknown_verifier_code_is_fatal() {
    let (receiver, events) = MockReceiver::new(&[(10, 5), (12, 8)], 6, None);
    let sender = MockSender::new(1_000_000, status(10, 5));
    let h = start_harness(receiver, events, sender).await;

    h.events
        .send(Ok(ReceiveStatus { height: 12, seq: 8 }))
        .await
        .unwrap();
    let sender = h.sender.clone();
    wait_until(move || sender.relays.lock().len() == 2).await;
    let ids = rm_ids(&h).await;

    h.results
        .send(RelayResult {
            id: ids[0],
            err: ErrorCode::BmvUnknown,
            finalized: true,
        })
        .await
        .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), h.handle)
        .await
        .expect("link should abort")
        .expect("task not cancelled")
        .expect_err("link should return the unrecoverable error");
    assert!(matches!(err, Error::UnrecoverableRelayResult { .. }));
}

#[tokio::test]
async fn receiver_errors_are_fatal() {
    let (receiver, events) = MockReceiver::new(&[(10, 5)], 6, None);
    let sender = MockSender::new(1_000_000, status(10, 5));
    let h = start_harness(receiver, events, sender).await;

    h.events
        .send(Err(Error::Generic("source node went away")))
        .await
        .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), h.handle)
        .await
        .expect("link should abort")
        .expect("task not cancelled")
        .expect_err("link should surface the receiver error");
    assert!(matches!(err, Error::Generic(_)));
}
