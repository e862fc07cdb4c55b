use crate::{
    ledger::{
        Address,
        LotteryLedger,
        PrizePaidLog,
        TxHash,
        Wei,
    },
    numbers::{
        DEFAULT_WIN_THRESHOLD,
        TicketSelection,
        WinningNumbers,
        is_winning_match,
    },
    ticket_cache::{
        SessionStorage,
        TicketCache,
    },
};
use color_eyre::eyre::Result;
use tracing::{
    debug,
    info,
    warn,
};

pub const DEFAULT_PRIZE_LOOKBACK_BLOCKS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrizeSource {
    BelowThreshold,
    /// Amount taken from a `PrizePaid` log addressed to the account.
    PayoutEvent {
        tx_hash: Option<TxHash>,
        block_number: u64,
    },
    /// The match qualifies but no payout could be confirmed; amount unknown.
    Estimated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawOutcome {
    pub matched_prefix_length: u8,
    pub won: bool,
    pub prize_amount: Wei,
    pub player_numbers: TicketSelection,
    pub winning_numbers: WinningNumbers,
    pub source: PrizeSource,
}

impl DrawOutcome {
    pub fn amount_confirmed(&self) -> bool {
        matches!(self.source, PrizeSource::PayoutEvent { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PrizeResolver {
    win_threshold: u8,
    lookback_blocks: u64,
}

impl Default for PrizeResolver {
    fn default() -> Self {
        Self::new(DEFAULT_WIN_THRESHOLD, DEFAULT_PRIZE_LOOKBACK_BLOCKS)
    }
}

impl PrizeResolver {
    pub fn new(win_threshold: u8, lookback_blocks: u64) -> Self {
        Self {
            win_threshold,
            lookback_blocks,
        }
    }

    pub fn win_threshold(&self) -> u8 {
        self.win_threshold
    }

    /// Settles `ticket` against `winning` for `account` and clears it from the
    /// cache. Never fails: an unavailable payout log degrades to an estimate.
    ///
    /// Payout logs mined before `not_before_block` belong to earlier rounds
    /// and are ignored.
    pub async fn resolve<L, S>(
        &self,
        ledger: &L,
        account: &Address,
        ticket: TicketSelection,
        winning: WinningNumbers,
        not_before_block: u64,
        cache: &mut TicketCache<S>,
    ) -> DrawOutcome
    where
        L: LotteryLedger,
        S: SessionStorage,
    {
        let matched = ticket.matched_prefix(&winning);
        let outcome = if !is_winning_match(matched, self.win_threshold) {
            DrawOutcome {
                matched_prefix_length: matched,
                won: false,
                prize_amount: Wei::ZERO,
                player_numbers: ticket,
                winning_numbers: winning,
                source: PrizeSource::BelowThreshold,
            }
        } else {
            let payout = self.find_payout(ledger, account, not_before_block).await;
            let (prize_amount, source) = match payout {
                Ok(Some(paid)) => {
                    info!(
                        %account,
                        amount = %paid.amount,
                        block = paid.block_number,
                        "payout confirmed"
                    );
                    (
                        paid.amount,
                        PrizeSource::PayoutEvent {
                            tx_hash: paid.tx_hash,
                            block_number: paid.block_number,
                        },
                    )
                }
                Ok(None) => {
                    warn!(%account, matched, "no payout log found yet; estimating");
                    (Wei::ZERO, PrizeSource::Estimated)
                }
                Err(err) => {
                    warn!(?err, %account, matched, "payout lookup failed; estimating");
                    (Wei::ZERO, PrizeSource::Estimated)
                }
            };
            DrawOutcome {
                matched_prefix_length: matched,
                won: true,
                prize_amount,
                player_numbers: ticket,
                winning_numbers: winning,
                source,
            }
        };
        match cache.clear_resolved(&ticket) {
            Ok(true) => debug!(%ticket, "cleared resolved ticket"),
            Ok(false) => debug!(%ticket, "resolved ticket already replaced or cleared"),
            Err(err) => warn!(?err, "failed to clear resolved ticket"),
        }
        outcome
    }

    /// Most recent payout to `account` within the lookback window.
    async fn find_payout<L: LotteryLedger>(
        &self,
        ledger: &L,
        account: &Address,
        not_before_block: u64,
    ) -> Result<Option<PrizePaidLog>> {
        let latest = ledger.latest_block().await?;
        let from = latest
            .saturating_sub(self.lookback_blocks)
            .max(not_before_block);
        if from > latest {
            return Ok(None);
        }
        let logs = ledger.prize_paid_logs(Some(account), from, latest).await?;
        Ok(logs
            .into_iter()
            .filter(|log| log.player == *account)
            .max_by_key(|log| log.block_number))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        test_helpers::FakeLedger,
        ticket_cache::InMemorySessionStorage,
    };

    const ALICE: Address = Address::new([0xa1; 20]);
    const BOB: Address = Address::new([0xb0; 20]);

    fn cached(ticket: &TicketSelection) -> TicketCache<InMemorySessionStorage> {
        let mut cache = TicketCache::new(InMemorySessionStorage::new());
        cache.save(ticket).unwrap();
        cache
    }

    fn ticket() -> TicketSelection {
        TicketSelection::new(&[3, 7, 12, 19, 25, 31, 44]).unwrap()
    }

    fn winning(numbers: [u8; 7]) -> WinningNumbers {
        WinningNumbers::from_positions(numbers).unwrap()
    }

    fn paid(player: Address, amount: u128, block_number: u64) -> PrizePaidLog {
        PrizePaidLog {
            player,
            amount: Wei(amount),
            match_count: 3,
            tx_hash: Some(TxHash::new([block_number as u8; 32])),
            block_number,
        }
    }

    #[tokio::test]
    async fn resolve__below_threshold__loses_without_log_query() {
        // given
        let ledger = FakeLedger::new();
        let ticket = ticket();
        let mut cache = cached(&ticket);
        let resolver = PrizeResolver::default();

        // when
        let outcome = resolver
            .resolve(&ledger, &ALICE, ticket, winning([3, 9, 12, 19, 25, 31, 44]), 0, &mut cache)
            .await;

        // then
        assert_eq!(outcome.matched_prefix_length, 1);
        assert!(!outcome.won);
        assert_eq!(outcome.prize_amount, Wei::ZERO);
        assert_eq!(outcome.source, PrizeSource::BelowThreshold);
        assert_eq!(ledger.log_queries(), 0);
        assert_eq!(cache.load().unwrap(), None);
    }

    #[tokio::test]
    async fn resolve__payout_log_found__uses_logged_amount() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(1_000);
        ledger.push_prize_log(paid(ALICE, 50_000_000_000_000_000, 990));
        let ticket = ticket();
        let mut cache = cached(&ticket);
        let resolver = PrizeResolver::default();

        // when
        let outcome = resolver
            .resolve(&ledger, &ALICE, ticket, winning([3, 7, 12, 1, 2, 4, 5]), 0, &mut cache)
            .await;

        // then
        assert_eq!(outcome.matched_prefix_length, 3);
        assert!(outcome.won);
        assert_eq!(outcome.prize_amount, Wei(50_000_000_000_000_000));
        assert!(outcome.amount_confirmed());
        assert_eq!(cache.load().unwrap(), None);
    }

    #[tokio::test]
    async fn resolve__log_query_fails__falls_back_to_estimate() {
        // given
        let ledger = FakeLedger::new();
        ledger.fail_log_queries(true);
        let ticket = ticket();
        let mut cache = cached(&ticket);
        let resolver = PrizeResolver::default();

        // when
        let outcome = resolver
            .resolve(&ledger, &ALICE, ticket, winning([3, 7, 12, 19, 2, 4, 5]), 0, &mut cache)
            .await;

        // then
        assert_eq!(outcome.matched_prefix_length, 4);
        assert!(outcome.won);
        assert_eq!(outcome.prize_amount, Wei::ZERO);
        assert_eq!(outcome.source, PrizeSource::Estimated);
        assert_eq!(cache.load().unwrap(), None);
    }

    #[tokio::test]
    async fn resolve__only_other_players_paid__falls_back_to_estimate() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(1_000);
        ledger.push_prize_log(paid(BOB, 10, 999));
        let ticket = ticket();
        let mut cache = cached(&ticket);

        // when
        let outcome = PrizeResolver::default()
            .resolve(&ledger, &ALICE, ticket, winning([3, 7, 1, 2, 4, 5, 6]), 0, &mut cache)
            .await;

        // then
        assert!(outcome.won);
        assert_eq!(outcome.source, PrizeSource::Estimated);
    }

    #[tokio::test]
    async fn resolve__payout_outside_lookback__not_used() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(10_000);
        ledger.push_prize_log(paid(ALICE, 99, 100));
        let ticket = ticket();
        let mut cache = cached(&ticket);

        // when
        let outcome = PrizeResolver::new(2, 500)
            .resolve(&ledger, &ALICE, ticket, winning([3, 7, 1, 2, 4, 5, 6]), 0, &mut cache)
            .await;

        // then
        assert_eq!(outcome.prize_amount, Wei::ZERO);
        assert_eq!(outcome.source, PrizeSource::Estimated);
    }

    #[tokio::test]
    async fn resolve__several_payouts__picks_most_recent() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(1_000);
        ledger.push_prize_log(paid(ALICE, 1, 950));
        ledger.push_prize_log(paid(ALICE, 2, 999));
        ledger.push_prize_log(paid(ALICE, 3, 960));
        let ticket = ticket();
        let mut cache = cached(&ticket);

        // when
        let outcome = PrizeResolver::default()
            .resolve(&ledger, &ALICE, ticket, winning([3, 7, 1, 2, 4, 5, 6]), 0, &mut cache)
            .await;

        // then
        assert_eq!(outcome.prize_amount, Wei(2));
    }

    #[tokio::test]
    async fn resolve__custom_threshold__raises_bar() {
        // given
        let ledger = FakeLedger::new();
        let ticket = ticket();
        let mut cache = cached(&ticket);

        // when
        let outcome = PrizeResolver::new(4, 500)
            .resolve(&ledger, &ALICE, ticket, winning([3, 7, 12, 1, 2, 4, 5]), 0, &mut cache)
            .await;

        // then
        assert_eq!(outcome.matched_prefix_length, 3);
        assert!(!outcome.won);
        assert_eq!(ledger.log_queries(), 0);
    }

    #[tokio::test]
    async fn resolve__payout_from_earlier_round__not_used() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_latest_block(1_000);
        ledger.push_prize_log(paid(ALICE, 7, 900));
        let ticket = ticket();
        let mut cache = cached(&ticket);

        // when
        let outcome = PrizeResolver::default()
            .resolve(&ledger, &ALICE, ticket, winning([3, 7, 1, 2, 4, 5, 6]), 950, &mut cache)
            .await;

        // then
        assert!(outcome.won);
        assert_eq!(outcome.prize_amount, Wei::ZERO);
        assert_eq!(outcome.source, PrizeSource::Estimated);
        assert_eq!(ledger.log_queries(), 1);
    }
}
