use crate::{
    ledger::LotteryLedger,
    numbers::{
        NUMBERS_PER_DRAW,
        WinningNumbers,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use futures::future::try_join_all;
use tracing::debug;

/// Reads the seven winning-number slots at `block`. A reveal spread over
/// several blocks may still show up as a partial set.
pub async fn fetch_positions<L: LotteryLedger>(
    ledger: &L,
    block: u64,
) -> Result<[u8; NUMBERS_PER_DRAW]> {
    let reads =
        (0..NUMBERS_PER_DRAW).map(|position| ledger.last_winning_number(position, block));
    let values = try_join_all(reads)
        .await
        .wrap_err("reading winning number positions")?;
    values
        .try_into()
        .map_err(|v: Vec<u8>| eyre!("expected {NUMBERS_PER_DRAW} positions, got {}", v.len()))
}

/// `Ok(None)` until every position is non-zero. Not-ready is not an error;
/// the caller retries on its next poll.
pub async fn fetch_winning_numbers<L: LotteryLedger>(
    ledger: &L,
    block: u64,
) -> Result<Option<WinningNumbers>> {
    let positions = fetch_positions(ledger, block).await?;
    let winning = WinningNumbers::from_positions(positions);
    if winning.is_none() {
        debug!(?positions, "winning numbers not fully revealed yet");
    }
    Ok(winning)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::FakeLedger;

    #[tokio::test]
    async fn fetch_winning_numbers__partial_reveal__not_ready() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_winning_positions([5, 12, 0, 8, 3, 44, 7]);

        // when
        let winning = fetch_winning_numbers(&ledger, 0).await.unwrap();

        // then
        assert!(winning.is_none());
    }

    #[tokio::test]
    async fn fetch_winning_numbers__all_revealed__returns_positions_in_order() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_winning_positions([5, 12, 1, 8, 3, 44, 7]);

        // when
        let winning = fetch_winning_numbers(&ledger, 0).await.unwrap().unwrap();

        // then
        assert_eq!(winning.numbers(), &[5, 12, 1, 8, 3, 44, 7]);
    }

    #[tokio::test]
    async fn fetch_winning_numbers__read_failure__errors() {
        // given
        let ledger = FakeLedger::new();
        ledger.set_winning_positions([5, 12, 1, 8, 3, 44, 7]);
        ledger.fail_reads(true);

        // when
        let res = fetch_winning_numbers(&ledger, 0).await;

        // then
        assert!(res.is_err());
    }
}
