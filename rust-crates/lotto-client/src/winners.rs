use crate::ledger::{
    Address,
    LotteryLedger,
    PrizePaidLog,
    TxHash,
    Wei,
};
use chrono::{
    DateTime,
    Utc,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::collections::HashMap;
use tracing::{
    debug,
    info,
    warn,
};

const AMOUNT_DECIMALS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinnerRecord {
    pub player: Address,
    pub amount: Wei,
    pub matched_prefix_length: u8,
    pub tx_hash: Option<TxHash>,
    pub block_number: u64,
    /// `None` when the block time could not be read.
    pub timestamp: Option<DateTime<Utc>>,
}

impl WinnerRecord {
    pub fn from_log(log: &PrizePaidLog, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            player: log.player,
            amount: log.amount,
            matched_prefix_length: log.match_count,
            tx_hash: log.tx_hash,
            block_number: log.block_number,
            timestamp,
        }
    }

    pub fn short_player(&self) -> String {
        self.player.short()
    }

    pub fn amount_display(&self) -> String {
        format!("{} ETH", self.amount.format_ether_fixed(AMOUNT_DECIMALS))
    }

    pub fn time_display(&self) -> String {
        match self.timestamp {
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            None => "unknown".to_string(),
        }
    }

    fn same_payout(&self, other: &WinnerRecord) -> bool {
        self.player == other.player
            && match (self.tx_hash, other.tx_hash) {
                (Some(a), Some(b)) => a == b,
                _ => self.block_number == other.block_number && self.amount == other.amount,
            }
    }
}

/// Many public endpoints cap `eth_getLogs` ranges; history scans are split.
pub const HISTORY_CHUNK_BLOCKS: u64 = 10_000;
/// How far back from the head a scan reaches when no start block is known.
pub const DEFAULT_HISTORY_WINDOW_BLOCKS: u64 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    NotStarted { from_block: Option<u64> },
    Scanning { next_block: u64, to_block: u64 },
    Complete,
}

/// Past payouts, newest first. Filled one log chunk at a time so a long
/// history never holds up polling, and a failed chunk is simply retried.
#[derive(Debug)]
pub struct WinnerHistory {
    records: Vec<WinnerRecord>,
    block_times: HashMap<u64, Option<DateTime<Utc>>>,
    scan: ScanState,
}

impl Default for WinnerHistory {
    fn default() -> Self {
        Self::starting_at(None)
    }
}

impl WinnerHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans from `from_block`, or the last
    /// [`DEFAULT_HISTORY_WINDOW_BLOCKS`] when `None`.
    pub fn starting_at(from_block: Option<u64>) -> Self {
        Self {
            records: Vec::new(),
            block_times: HashMap::new(),
            scan: ScanState::NotStarted { from_block },
        }
    }

    pub fn records(&self) -> &[WinnerRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.scan == ScanState::Complete
    }

    /// Fetches the next chunk of the scan. Returns `true` once the scan has
    /// reached the head it saw when it started.
    pub async fn scan_step<L: LotteryLedger>(&mut self, ledger: &L) -> Result<bool> {
        let (next_block, to_block) = match self.scan {
            ScanState::Complete => return Ok(true),
            ScanState::Scanning {
                next_block,
                to_block,
            } => (next_block, to_block),
            ScanState::NotStarted { from_block } => {
                let latest = ledger.latest_block().await?;
                let from = from_block
                    .unwrap_or_else(|| latest.saturating_sub(DEFAULT_HISTORY_WINDOW_BLOCKS));
                debug!(from, latest, "starting winner history scan");
                (from, latest)
            }
        };
        if next_block > to_block {
            self.scan = ScanState::Complete;
            return Ok(true);
        }
        let end = to_block.min(next_block.saturating_add(HISTORY_CHUNK_BLOCKS - 1));
        let logs = ledger
            .prize_paid_logs(None, next_block, end)
            .await
            .wrap_err_with(|| format!("loading payout history {next_block}..={end}"))?;
        for log in &logs {
            let timestamp = self.block_time(ledger, log.block_number).await;
            self.insert(WinnerRecord::from_log(log, timestamp));
        }
        self.scan = if end >= to_block {
            info!(count = self.records.len(), to_block, "loaded winner history");
            ScanState::Complete
        } else {
            ScanState::Scanning {
                next_block: end + 1,
                to_block,
            }
        };
        Ok(self.is_complete())
    }

    /// Replaces the list with every payout from `from_block` to the tip.
    pub async fn load<L: LotteryLedger>(&mut self, ledger: &L, from_block: u64) -> Result<()> {
        self.records.clear();
        self.scan = ScanState::NotStarted {
            from_block: Some(from_block),
        };
        while !self.scan_step(ledger).await? {}
        Ok(())
    }

    /// Adds a payout seen live. Returns `false` for one already listed.
    pub async fn record_live<L: LotteryLedger>(
        &mut self,
        ledger: &L,
        log: &PrizePaidLog,
    ) -> bool {
        let timestamp = self.block_time(ledger, log.block_number).await;
        self.insert(WinnerRecord::from_log(log, timestamp))
    }

    fn insert(&mut self, record: WinnerRecord) -> bool {
        if self.records.iter().any(|r| r.same_payout(&record)) {
            debug!(player = %record.player, "payout already in history");
            return false;
        }
        let at = self
            .records
            .iter()
            .position(|r| r.block_number < record.block_number)
            .unwrap_or(self.records.len());
        self.records.insert(at, record);
        true
    }

    async fn block_time<L: LotteryLedger>(
        &mut self,
        ledger: &L,
        block: u64,
    ) -> Option<DateTime<Utc>> {
        if let Some(cached) = self.block_times.get(&block) {
            return *cached;
        }
        let timestamp = match ledger.block_timestamp(block).await {
            Ok(secs) => i64::try_from(secs)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            Err(err) => {
                warn!(?err, block, "failed to read block time");
                None
            }
        };
        self.block_times.insert(block, timestamp);
        timestamp
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::FakeLedger;

    fn paid(player: u8, amount: u128, block_number: u64) -> PrizePaidLog {
        PrizePaidLog {
            player: Address::new([player; 20]),
            amount: Wei(amount),
            match_count: 2,
            tx_hash: Some(TxHash::new([block_number as u8; 32])),
            block_number,
        }
    }

    #[tokio::test]
    async fn load__several_payouts__newest_first_with_times() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(200);
        ledger.push_prize_log(paid(1, 10, 110));
        ledger.push_prize_log(paid(2, 20, 150));
        ledger.set_block_time(110, 1_700_000_000);
        ledger.set_block_time(150, 1_700_000_600);
        let mut history = WinnerHistory::new();

        // when
        history.load(&ledger, 100).await.unwrap();

        // then
        let blocks: Vec<u64> = history.records().iter().map(|r| r.block_number).collect();
        assert_eq!(blocks, vec![150, 110]);
        assert_eq!(
            history.records()[1].time_display(),
            "2023-11-14 22:13:20 UTC"
        );
    }

    #[tokio::test]
    async fn load__missing_block_time__renders_unknown() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(200);
        ledger.push_prize_log(paid(1, 10, 110));
        let mut history = WinnerHistory::new();

        // when
        history.load(&ledger, 0).await.unwrap();

        // then
        assert_eq!(history.records()[0].timestamp, None);
        assert_eq!(history.records()[0].time_display(), "unknown");
    }

    #[tokio::test]
    async fn load__same_block_twice__reads_block_time_once() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(200);
        ledger.push_prize_log(paid(1, 10, 120));
        ledger.push_prize_log(paid(2, 10, 120));
        ledger.set_block_time(120, 1_700_000_000);
        let mut history = WinnerHistory::new();

        // when
        history.load(&ledger, 0).await.unwrap();

        // then
        assert_eq!(history.records().len(), 2);
        assert_eq!(ledger.block_time_reads(), 1);
    }

    #[tokio::test]
    async fn load__log_query_fails__errors() {
        let ledger = FakeLedger::new();
        ledger.fail_log_queries(true);
        let mut history = WinnerHistory::new();

        assert!(history.load(&ledger, 0).await.is_err());
    }

    #[tokio::test]
    async fn record_live__new_payout__prepended() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(200);
        ledger.push_prize_log(paid(1, 10, 110));
        let mut history = WinnerHistory::new();
        history.load(&ledger, 0).await.unwrap();

        // when
        let added = history.record_live(&ledger, &paid(3, 30, 210)).await;

        // then
        assert!(added);
        assert_eq!(history.records()[0].player, Address::new([3; 20]));
        assert_eq!(history.records().len(), 2);
    }

    #[tokio::test]
    async fn record_live__already_loaded__deduplicated() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(200);
        ledger.push_prize_log(paid(1, 10, 110));
        let mut history = WinnerHistory::new();
        history.load(&ledger, 0).await.unwrap();

        // when
        let added = history.record_live(&ledger, &paid(1, 10, 110)).await;

        // then
        assert!(!added);
        assert_eq!(history.records().len(), 1);
    }

    #[test]
    fn winner_record__display_helpers__short_address_and_four_decimals() {
        let record = WinnerRecord::from_log(&paid(0xab, 50_000_000_000_000_000, 1), None);

        assert_eq!(record.short_player(), "0xabab…abab");
        assert_eq!(record.amount_display(), "0.0500 ETH");
    }

    #[tokio::test]
    async fn scan_step__chunk_fails__resumes_without_losing_earlier_chunks() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(25_000);
        ledger.push_prize_log(paid(1, 10, 5_000));
        ledger.push_prize_log(paid(2, 20, 21_000));
        let mut history = WinnerHistory::starting_at(Some(0));
        assert!(!history.scan_step(&ledger).await.unwrap());

        // when
        ledger.fail_log_queries(true);
        let failed = history.scan_step(&ledger).await;
        ledger.fail_log_queries(false);
        let second = history.scan_step(&ledger).await.unwrap();
        let third = history.scan_step(&ledger).await.unwrap();

        // then
        assert!(failed.is_err());
        assert!(!second);
        assert!(third);
        assert!(history.is_complete());
        let blocks: Vec<u64> = history.records().iter().map(|r| r.block_number).collect();
        assert_eq!(blocks, vec![21_000, 5_000]);
        assert_eq!(ledger.log_queries(), 4);
    }

    #[tokio::test]
    async fn scan_step__no_start_block__bounded_to_recent_window() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(60_000);
        ledger.push_prize_log(paid(1, 10, 5_000));
        ledger.push_prize_log(paid(2, 20, 55_000));
        let mut history = WinnerHistory::new();

        // when
        while !history.scan_step(&ledger).await.unwrap() {}

        // then
        let blocks: Vec<u64> = history.records().iter().map(|r| r.block_number).collect();
        assert_eq!(blocks, vec![55_000]);
        assert_eq!(ledger.log_queries(), 6);
    }
}
