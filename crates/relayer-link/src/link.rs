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

use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, Mutex};

use btp_relayer_config::BTPRelayerConfig;
use btp_relayer_types::{BMCLinkStatus, BtpAddress, ErrorCode, RelayResult, Sender};
use btp_relayer_utils::{probe, Error, Result};

use crate::receiver::{ReceiveStatus, Receiver, RelayItem};

/// The relay FSM state.
///
/// `Running` builds and submits; `Pending` waits for the sender to drain or
/// for the verifier to catch up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Actively building and submitting relay messages.
    Running,
    /// Paused until a sender result unblocks the link.
    Pending,
}

/// One logical relay message: a serialized group of items plus the link
/// status the destination is expected to report once it accepts the message.
pub(crate) struct RelayMessage {
    pub(crate) id: i64,
    pub(crate) bls: BMCLinkStatus,
    pub(crate) bp_height: i64,
    pub(crate) message: Vec<u8>,
    pub(crate) items: Vec<RelayItem>,
    pub(crate) sending: bool,
}

/// A receive status as tracked by the link.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReceiveStatusEntry {
    pub(crate) height: i64,
    pub(crate) seq: i64,
    #[allow(dead_code)]
    pub(crate) msg_count: i64,
}

/// Accumulates relay message items until the size budget forces a new group.
pub(crate) struct MessageBuilder {
    pub(crate) groups: Vec<Vec<RelayItem>>,
    pub(crate) size: i64,
}

impl MessageBuilder {
    fn new() -> Self {
        Self {
            groups: vec![Vec::new()],
            size: 0,
        }
    }

    fn reset(&mut self) {
        self.groups.clear();
        self.groups.push(Vec::new());
        self.size = 0;
    }

    fn push(&mut self, item: RelayItem) {
        // groups is never empty; reset() and new() both leave one group
        self.groups
            .last_mut()
            .expect("builder always has a group")
            .push(item);
    }
}

/// Everything the two consumer tasks mutate, behind one lock.
pub(crate) struct State {
    pub(crate) relay_state: RelayState,
    pub(crate) bls: BMCLinkStatus,
    pub(crate) rms: Vec<RelayMessage>,
    pub(crate) rss: Vec<ReceiveStatusEntry>,
    pub(crate) builder: MessageBuilder,
    pub(crate) limit_size: i64,
}

/// The link coordinator for one directed relay channel.
///
/// Owns the receiver event stream and the sender result stream, the pending
/// relay messages, and the local view of the destination's link status.
pub struct Link<R, S> {
    src: BtpAddress,
    dst: BtpAddress,
    latest_result: bool,
    receiver: Arc<R>,
    sender: Arc<S>,
    pub(crate) state: Mutex<State>,
    bls_tx: mpsc::Sender<BMCLinkStatus>,
    bls_rx: parking_lot::Mutex<Option<mpsc::Receiver<BMCLinkStatus>>>,
}

impl<R, S> Link<R, S>
where
    R: Receiver,
    S: Sender,
{
    /// Creates a new link over the given receiver and sender.
    pub fn new(cfg: &BTPRelayerConfig, receiver: Arc<R>, sender: Arc<S>) -> Self {
        let (bls_tx, bls_rx) = mpsc::channel(1);
        Self {
            src: cfg.src.address.clone(),
            dst: cfg.dst.address.clone(),
            latest_result: cfg.dst.latest_result,
            receiver,
            sender,
            state: Mutex::new(State {
                relay_state: RelayState::Running,
                bls: BMCLinkStatus::default(),
                rms: Vec::new(),
                rss: Vec::new(),
                builder: MessageBuilder::new(),
                limit_size: 0,
            }),
            bls_tx,
            bls_rx: parking_lot::Mutex::new(Some(bls_rx)),
        }
    }

    /// Runs the link until a fatal error occurs on either stream.
    #[tracing::instrument(skip_all, fields(chain = %self.dst.network_id()))]
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let (err_tx, mut err_rx) = mpsc::channel::<Error>(1);

        {
            let mut state = self.state.lock().await;
            state.limit_size =
                self.sender.tx_size_limit() - self.sender.margin_for_limit();
        }
        let results = self.sender.start().await?;
        Self::spawn_result_consumer(&self, results, err_tx.clone());

        let bls = self.sender.get_status().await?;
        {
            let mut state = self.state.lock().await;
            state.bls = bls.clone();
        }

        let events = self.receiver.start(bls).await?;
        Self::spawn_receiver_consumer(&self, events, err_tx);

        if let Some(statuses) = self.bls_rx.lock().take() {
            self.receiver.finalized_status(statuses);
        }

        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            src = %self.src,
            dst = %self.dst,
            started = true,
        );

        match err_rx.recv().await {
            Some(e) => Err(e),
            None => Err(Error::TaskStoppedAbnormally),
        }
    }

    /// Stops the sender and the receiver; their streams close and the
    /// consumer tasks exit.
    pub fn stop(&self) {
        self.sender.stop();
        self.receiver.stop();
    }

    fn spawn_receiver_consumer(
        link: &Arc<Self>,
        mut events: mpsc::Receiver<Result<ReceiveStatus>>,
        err_tx: mpsc::Sender<Error>,
    ) {
        let link = Arc::clone(link);
        tokio::spawn(async move {
            // undelivered recovery runs once, on the very first event
            let mut synced = false;
            while let Some(event) = events.recv().await {
                let res = match event {
                    Ok(rs) => link.on_receive_status(rs, &mut synced).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = res {
                    let _ = err_tx.send(e).await;
                    return;
                }
            }
        });
    }

    fn spawn_result_consumer(
        link: &Arc<Self>,
        mut results: mpsc::Receiver<RelayResult>,
        err_tx: mpsc::Sender<Error>,
    ) {
        let link = Arc::clone(link);
        tokio::spawn(async move {
            while let Some(rr) = results.recv().await {
                if let Err(e) = link.on_relay_result(rr).await {
                    let _ = err_tx.send(e).await;
                    return;
                }
            }
        });
    }

    async fn on_receive_status(
        &self,
        rs: ReceiveStatus,
        synced: &mut bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let msg_count = match state.rss.last() {
            None => rs.seq,
            Some(last) => last.seq - rs.seq,
        };
        tracing::debug!(
            height = rs.height,
            seq = rs.seq,
            msg_count,
            "receive status"
        );
        state.rss.push(ReceiveStatusEntry {
            height: rs.height,
            seq: rs.seq,
            msg_count,
        });

        if !*synced {
            *synced = true;
            self.recover_undelivered(&mut state).await?;
            self.handle_relay_message_locked(&mut state).await?;
            state.relay_state = RelayState::Pending;
        }

        self.handle_relay_message_locked(&mut state).await
    }

    /// Drives the link forward: submits anything built but unsent, then
    /// keeps building while the verifier lags behind the newest receive
    /// status.
    pub async fn handle_relay_message(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.handle_relay_message_locked(&mut state).await
    }

    async fn handle_relay_message_locked(&self, state: &mut State) -> Result<()> {
        if state.relay_state != RelayState::Running {
            return Ok(());
        }
        self.send_relay_messages(state).await?;
        while state.relay_state == RelayState::Running
            && state
                .rss
                .last()
                .map(|last| state.bls.verifier.height < last.height)
                .unwrap_or(false)
        {
            self.build_relay_message(state).await?;
            self.send_relay_messages(state).await?;
        }
        Ok(())
    }

    /// Re-sends whatever the destination has not seen yet after a restart:
    /// message proofs at the verifier height, or full proofs for heights the
    /// verifier already passed.
    async fn recover_undelivered(&self, state: &mut State) -> Result<()> {
        let mut bls = state.bls.clone();
        let last_seq = bls.rx_seq;
        loop {
            let h = self.receiver.get_height_for_seq(last_seq);
            if h == 0 {
                break;
            }
            if h == bls.verifier.height {
                let budget = state.limit_size - state.builder.size;
                let Some(mp) =
                    self.receiver.build_message_proof(&bls, budget).await?
                else {
                    break;
                };
                if !mp.is_empty() || bls.rx_seq < mp.last_seq() {
                    state.builder.size += mp.len();
                    state.builder.push(RelayItem::MessageProof(mp));
                }
                break;
            } else if h < bls.verifier.height {
                self.build_proof(state, &mut bls, None).await?;
            } else {
                break;
            }
        }
        if state.builder.size > 0 {
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Recovery,
                rx_seq = bls.rx_seq,
                height = bls.verifier.height,
                "recovered undelivered relay message",
            );
            self.append_relay_message(state, &bls).await?;
        }
        state.bls = bls;
        Ok(())
    }

    /// Builds the next relay message: block updates one block at a time,
    /// each followed by its proofs, each flushed as its own message.
    async fn build_relay_message(&self, state: &mut State) -> Result<()> {
        if state.builder.groups.is_empty() {
            state.builder.reset();
        }
        let mut bls = state.bls.clone();

        let bus = loop {
            let budget = state.limit_size - state.builder.size;
            let bus = self.receiver.build_block_update(&bls, budget).await?;
            if !bus.is_empty() {
                break bus;
            }
        };

        for bu in bus {
            let proof_height = bu.proof_height();
            state.builder.size += bu.len();
            bu.update_bmc_link_status(&mut bls)?;
            state.builder.push(RelayItem::BlockUpdate(bu));
            self.build_proof(state, &mut bls, Some(proof_height)).await?;
            self.append_relay_message(state, &bls).await?;
        }
        state.bls = bls;
        Ok(())
    }

    /// Proves every message visible at the current verifier height, flushing
    /// and adding block proofs whenever the hard transaction limit is hit,
    /// or when the block update cannot serve as a witness.
    async fn build_proof(
        &self,
        state: &mut State,
        bls: &mut BMCLinkStatus,
        bu_proof_height: Option<i64>,
    ) -> Result<()> {
        let Some(rs) = state
            .rss
            .iter()
            .find(|rs| rs.height == bls.verifier.height)
            .copied()
        else {
            return Ok(());
        };
        loop {
            if rs.seq <= bls.rx_seq {
                break;
            }
            if self.is_over_limit(state.builder.size) {
                self.append_relay_message(state, bls).await?;
                self.build_block_proof(state, bls).await?;
            } else if bu_proof_height.map_or(true, |h| h == -1) {
                self.build_block_proof(state, bls).await?;
            }
            self.build_message_proof(state, bls).await?;
        }
        Ok(())
    }

    async fn build_message_proof(
        &self,
        state: &mut State,
        bls: &mut BMCLinkStatus,
    ) -> Result<()> {
        let budget = state.limit_size - state.builder.size;
        if let Some(mp) = self.receiver.build_message_proof(bls, budget).await? {
            state.builder.size += mp.len();
            mp.update_bmc_link_status(bls)?;
            state.builder.push(RelayItem::MessageProof(mp));
        }
        Ok(())
    }

    async fn build_block_proof(
        &self,
        state: &mut State,
        bls: &mut BMCLinkStatus,
    ) -> Result<()> {
        let h = self.receiver.get_height_for_seq(bls.rx_seq);
        if let Some(bp) = self.receiver.build_block_proof(bls, h).await? {
            state.builder.size += bp.len();
            bp.update_bmc_link_status(bls)?;
            state.builder.push(RelayItem::BlockProof(bp));
        }
        Ok(())
    }

    /// Flushes every builder group into `rms` as a relay message snapshotting
    /// the given status, then resets the builder.
    async fn append_relay_message(
        &self,
        state: &mut State,
        bls: &BMCLinkStatus,
    ) -> Result<()> {
        let groups = std::mem::take(&mut state.builder.groups);
        for items in groups {
            let message = self.receiver.build_relay_message(&items).await?;
            let rm = RelayMessage {
                id: rand::thread_rng().gen::<u32>() as i64,
                bls: bls.clone(),
                bp_height: self.receiver.get_height_for_seq(bls.rx_seq),
                message,
                items,
                sending: false,
            };
            tracing::debug!(
                id = rm.id,
                height = rm.bls.verifier.height,
                rx_seq = rm.bls.rx_seq,
                bp_height = rm.bp_height,
                size = rm.message.len(),
                "append relay message"
            );
            state.rms.push(rm);
        }
        state.builder.reset();
        Ok(())
    }

    /// Submits every not-yet-sent message in order. Queue-full admission
    /// refusal flips the link to `Pending` without error.
    async fn send_relay_messages(&self, state: &mut State) -> Result<()> {
        let mut i = 0;
        while i < state.rms.len() {
            if state.rms[i].sending {
                i += 1;
                continue;
            }
            let rm = &state.rms[i];
            let res = self.sender.relay(rm.id, &rm.message).await;
            match res {
                Ok(id) => {
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::Relay,
                        id,
                        "relay message submitted",
                    );
                    state.rms[i].sending = true;
                    i += 1;
                }
                Err(e) if e.is_invalid_state() => {
                    state.relay_state = RelayState::Pending;
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn on_relay_result(&self, rr: RelayResult) -> Result<()> {
        let mut state = self.state.lock().await;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::RelayResult,
            id = rr.id,
            err = %rr.err,
            finalized = rr.finalized,
        );
        match rr.err {
            ErrorCode::Success => {
                if self.latest_result || rr.finalized {
                    self.success_relay_message(&mut state, rr.id).await?;
                }
            }
            ErrorCode::BmvUnknown => {
                tracing::error!(id = rr.id, "BMVUnknown revert");
                return Err(Error::UnrecoverableRelayResult {
                    id: rr.id,
                    code: rr.err.code(),
                });
            }
            ErrorCode::BmvNotVerifiable => {
                if !rr.finalized {
                    state.relay_state = RelayState::Pending;
                } else {
                    let bls = self.sender.get_status().await?;
                    state.bls = bls;
                    let bls = state.bls.clone();
                    Self::clear_relay_messages(&mut state, &bls);
                    state.relay_state = RelayState::Running;
                    self.handle_relay_message_locked(&mut state).await?;
                }
            }
            ErrorCode::BmvAlreadyVerified => {
                Self::remove_relay_message(&mut state, rr.id);
            }
            ErrorCode::BmvRevertInvalidBlockWitnessOld => {
                self.update_block_proof(&mut state, rr.id).await?;
            }
            ErrorCode::Other(_) => {
                tracing::error!(
                    id = rr.id,
                    code = rr.err.code(),
                    "relay result with unrecoverable error code"
                );
                return Err(Error::UnrecoverableRelayResult {
                    id: rr.id,
                    code: rr.err.code(),
                });
            }
        }
        Ok(())
    }

    /// A success result covers its message and everything before it: prune,
    /// resume, and promise the receiver it can discard old proof material.
    ///
    /// Ids already pruned by an earlier success are a no-op.
    async fn success_relay_message(
        &self,
        state: &mut State,
        id: i64,
    ) -> Result<()> {
        let Some(rm) = state.rms.iter().find(|rm| rm.id == id) else {
            return Ok(());
        };
        let bls = rm.bls.clone();
        Self::clear_relay_messages(state, &bls);
        Self::clear_receive_statuses(state, &bls);
        state.relay_state = RelayState::Running;
        self.handle_relay_message_locked(state).await?;
        self.bls_tx
            .send(bls)
            .await
            .map_err(|_| Error::Generic("finalized status channel closed"))?;
        Ok(())
    }

    /// Drops every message covered by `bls`. `rms` is height-ordered, so the
    /// covered entries form a prefix.
    fn clear_relay_messages(state: &mut State, bls: &BMCLinkStatus) {
        if let Some(i) = state.rms.iter().rposition(|rm| {
            rm.bls.verifier.height <= bls.verifier.height
                && rm.bls.rx_seq <= bls.rx_seq
        }) {
            state.rms.drain(..=i);
        }
    }

    fn clear_receive_statuses(state: &mut State, bls: &BMCLinkStatus) {
        if let Some(i) = state
            .rss
            .iter()
            .rposition(|rs| rs.height <= bls.verifier.height && rs.seq <= bls.rx_seq)
        {
            state.rss.drain(..=i);
        }
    }

    /// The destination already verified this message: it and everything
    /// before it are redundant.
    fn remove_relay_message(state: &mut State, id: i64) {
        if let Some(i) = state.rms.iter().position(|rm| rm.id == id) {
            let rm = &state.rms[i];
            tracing::debug!(
                height = rm.bls.verifier.height,
                rx_seq = rm.bls.rx_seq,
                "remove already verified relay message"
            );
            state.rms.drain(..=i);
        }
    }

    /// The witness in this message is too old for the verifier: rebuild the
    /// proof portion against the message's own status snapshot.
    async fn update_block_proof(&self, state: &mut State, id: i64) -> Result<()> {
        let Some(mut bls) = state
            .rms
            .iter()
            .find(|rm| rm.id == id)
            .map(|rm| rm.bls.clone())
        else {
            return Ok(());
        };
        self.build_proof(state, &mut bls, None).await?;
        self.append_relay_message(state, &bls).await?;
        Ok(())
    }

    fn is_over_limit(&self, size: i64) -> bool {
        self.sender.tx_size_limit() < size
    }
}
