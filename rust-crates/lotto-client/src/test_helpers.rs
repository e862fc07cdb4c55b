use crate::ledger::{
    Address,
    EventSource,
    LedgerEvent,
    LotteryLedger,
    PrizePaidLog,
    Wei,
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use std::{
    collections::{
        BTreeMap,
        BTreeSet,
        HashMap,
        HashSet,
    },
    future::pending,
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::sync::mpsc;

/// Contract storage as of one block.
#[derive(Debug, Clone, Default)]
pub struct FakeContractState {
    pub prize_pool: Wei,
    pub players: Vec<Address>,
    pub draw_pending: bool,
    pub last_draw_timestamp: u64,
    pub winning_positions: [u8; 7],
    pub bought: HashSet<Address>,
}

type BlockChange = Box<dyn FnOnce(&mut FakeContractState) + Send>;

#[derive(Default)]
struct FakeLedgerState {
    head: FakeContractState,
    /// Storage of blocks the chain has moved past, keyed by the last block
    /// it was current for.
    history: BTreeMap<u64, FakeContractState>,
    latest_block: u64,
    block_times: HashMap<u64, u64>,
    prize_logs: Vec<PrizePaidLog>,
    fail_reads: bool,
    fail_log_queries: bool,
    log_queries: usize,
    block_time_reads: usize,
    read_blocks: BTreeSet<u64>,
    after_block_number_read: Option<BlockChange>,
    on_log_query: Option<BlockChange>,
}

impl FakeLedgerState {
    /// Freezes the head as the current block and applies `change` to the
    /// next one.
    fn mine(&mut self, change: BlockChange) {
        self.history.insert(self.latest_block, self.head.clone());
        self.latest_block += 1;
        change(&mut self.head);
    }

    fn at(&self, block: u64) -> &FakeContractState {
        if block >= self.latest_block {
            return &self.head;
        }
        self.history
            .range(block..)
            .next()
            .map_or(&self.head, |(_, state)| state)
    }
}

/// Scriptable in-memory contract. Clones share state so a test can keep a
/// handle while the code under test owns another.
///
/// Setters change the chain head. Reads at an older block see the storage
/// that was current then.
#[derive(Clone, Default)]
pub struct FakeLedger {
    state: Arc<Mutex<FakeLedgerState>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_prize_pool(&self, amount: Wei) {
        self.state.lock().unwrap().head.prize_pool = amount;
    }

    pub fn set_players(&self, players: Vec<Address>) {
        self.state.lock().unwrap().head.players = players;
    }

    pub fn set_draw_pending(&self, pending: bool) {
        self.state.lock().unwrap().head.draw_pending = pending;
    }

    pub fn set_last_draw_timestamp(&self, timestamp: u64) {
        self.state.lock().unwrap().head.last_draw_timestamp = timestamp;
    }

    pub fn set_winning_positions(&self, positions: [u8; 7]) {
        self.state.lock().unwrap().head.winning_positions = positions;
    }

    pub fn set_bought(&self, account: Address, bought: bool) {
        let mut state = self.state.lock().unwrap();
        if bought {
            state.head.bought.insert(account);
        } else {
            state.head.bought.remove(&account);
        }
    }

    pub fn set_latest_block(&self, block: u64) {
        self.state.lock().unwrap().latest_block = block;
    }

    pub fn set_block_time(&self, block: u64, timestamp: u64) {
        self.state.lock().unwrap().block_times.insert(block, timestamp);
    }

    pub fn push_prize_log(&self, log: PrizePaidLog) {
        self.state.lock().unwrap().prize_logs.push(log);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn fail_log_queries(&self, fail: bool) {
        self.state.lock().unwrap().fail_log_queries = fail;
    }

    /// Mines a block right after the next `latest_block` answer, so reads
    /// issued later for the chain head see `change` applied.
    pub fn mine_after_next_block_number_read(
        &self,
        change: impl FnOnce(&mut FakeContractState) + Send + 'static,
    ) {
        self.state.lock().unwrap().after_block_number_read = Some(Box::new(change));
    }

    /// Mines a block carrying `change` while the next log query is in flight.
    pub fn mine_on_next_log_query(
        &self,
        change: impl FnOnce(&mut FakeContractState) + Send + 'static,
    ) {
        self.state.lock().unwrap().on_log_query = Some(Box::new(change));
    }

    pub fn head_block(&self) -> u64 {
        self.state.lock().unwrap().latest_block
    }

    pub fn log_queries(&self) -> usize {
        self.state.lock().unwrap().log_queries
    }

    pub fn block_time_reads(&self) -> usize {
        self.state.lock().unwrap().block_time_reads
    }

    /// Distinct blocks contract reads were evaluated at.
    pub fn read_blocks(&self) -> Vec<u64> {
        self.state.lock().unwrap().read_blocks.iter().copied().collect()
    }

    pub fn clear_read_blocks(&self) {
        self.state.lock().unwrap().read_blocks.clear();
    }

    fn read<T>(&self, block: u64, f: impl FnOnce(&FakeContractState) -> T) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(eyre!("fake ledger read failure"));
        }
        state.read_blocks.insert(block);
        Ok(f(state.at(block)))
    }
}

impl LotteryLedger for FakeLedger {
    async fn prize_pool(&self, block: u64) -> Result<Wei> {
        self.read(block, |s| s.prize_pool)
    }

    async fn players(&self, block: u64) -> Result<Vec<Address>> {
        self.read(block, |s| s.players.clone())
    }

    async fn draw_pending(&self, block: u64) -> Result<bool> {
        self.read(block, |s| s.draw_pending)
    }

    async fn last_draw_timestamp(&self, block: u64) -> Result<u64> {
        self.read(block, |s| s.last_draw_timestamp)
    }

    async fn last_winning_number(&self, position: usize, block: u64) -> Result<u8> {
        self.read(block, |s| s.winning_positions.get(position).copied())?
            .ok_or_else(|| eyre!("position {position} out of range"))
    }

    async fn has_player_bought(&self, account: &Address, block: u64) -> Result<bool> {
        self.read(block, |s| s.bought.contains(account))
    }

    async fn latest_block(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(eyre!("fake ledger read failure"));
        }
        let latest = state.latest_block;
        if let Some(change) = state.after_block_number_read.take() {
            state.mine(change);
        }
        Ok(latest)
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(eyre!("fake ledger read failure"));
        }
        state.block_time_reads += 1;
        state
            .block_times
            .get(&block)
            .copied()
            .ok_or_else(|| eyre!("unknown block {block}"))
    }

    async fn prize_paid_logs(
        &self,
        player: Option<&Address>,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PrizePaidLog>> {
        let mut state = self.state.lock().unwrap();
        state.log_queries += 1;
        if let Some(change) = state.on_log_query.take() {
            state.mine(change);
        }
        if state.fail_log_queries {
            return Err(eyre!("fake log query failure"));
        }
        Ok(state
            .prize_logs
            .iter()
            .filter(|log| player.is_none_or(|p| log.player == *p))
            .filter(|log| (from_block..=to_block).contains(&log.block_number))
            .cloned()
            .collect())
    }
}

pub struct FakeEventSource {
    recv: mpsc::Receiver<(LedgerEvent, u64)>,
}

impl FakeEventSource {
    pub fn new_with_sender() -> (Self, mpsc::Sender<(LedgerEvent, u64)>) {
        let (send, recv) = mpsc::channel(10);
        (Self { recv }, send)
    }
}

impl EventSource for FakeEventSource {
    async fn next_event(&mut self) -> Result<(LedgerEvent, u64)> {
        match self.recv.recv().await {
            Some(event) => Ok(event),
            // a dropped sender means "no more events", not a failure loop
            None => pending().await,
        }
    }
}
