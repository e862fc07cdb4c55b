use itertools::Itertools;
use rand::Rng;
use serde::Serialize;
use std::fmt;

pub const NUMBERS_PER_DRAW: usize = 7;
pub const MIN_NUMBER: u8 = 1;
pub const MAX_NUMBER: u8 = 49;

/// Minimum sequential match that counts as a win.
pub const DEFAULT_WIN_THRESHOLD: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketError {
    WrongLength(usize),
    OutOfRange(u32),
    Duplicate(u8),
}

impl fmt::Display for TicketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketError::WrongLength(_) => {
                write!(f, "A ticket needs exactly {NUMBERS_PER_DRAW} numbers")
            }
            TicketError::OutOfRange(_) => write!(
                f,
                "All numbers must be between {MIN_NUMBER} and {MAX_NUMBER}"
            ),
            TicketError::Duplicate(_) => write!(f, "All numbers must be unique"),
        }
    }
}

impl std::error::Error for TicketError {}

/// A validated ticket: seven distinct numbers in range, kept in ascending
/// order as submitted to the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TicketSelection([u8; NUMBERS_PER_DRAW]);

impl TicketSelection {
    pub fn new(numbers: &[u32]) -> Result<Self, TicketError> {
        if numbers.len() != NUMBERS_PER_DRAW {
            return Err(TicketError::WrongLength(numbers.len()));
        }
        if let Some(&bad) = numbers
            .iter()
            .find(|&&n| n < u32::from(MIN_NUMBER) || n > u32::from(MAX_NUMBER))
        {
            return Err(TicketError::OutOfRange(bad));
        }
        let mut sorted = [0u8; NUMBERS_PER_DRAW];
        for (slot, &n) in sorted.iter_mut().zip(numbers) {
            // range checked above
            *slot = n as u8;
        }
        sorted.sort_unstable();
        if let Some((dup, _)) = sorted.iter().tuple_windows().find(|(a, b)| a == b) {
            return Err(TicketError::Duplicate(*dup));
        }
        Ok(Self(sorted))
    }

    /// Seven distinct numbers drawn uniformly from the valid range.
    pub fn quick_pick<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let range = usize::from(MAX_NUMBER - MIN_NUMBER + 1);
        let mut picked = [0u8; NUMBERS_PER_DRAW];
        for (slot, index) in picked
            .iter_mut()
            .zip(rand::seq::index::sample(rng, range, NUMBERS_PER_DRAW))
        {
            *slot = index as u8 + MIN_NUMBER;
        }
        picked.sort_unstable();
        Self(picked)
    }

    pub fn numbers(&self) -> &[u8; NUMBERS_PER_DRAW] {
        &self.0
    }

    pub fn matched_prefix(&self, winning: &WinningNumbers) -> u8 {
        matched_prefix_length(&self.0, winning.numbers())
    }
}

impl fmt::Display for TicketSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(", "))
    }
}

/// Numbers revealed by the contract for the last completed draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WinningNumbers([u8; NUMBERS_PER_DRAW]);

impl WinningNumbers {
    /// `None` while any position still holds the zero default.
    pub fn from_positions(positions: [u8; NUMBERS_PER_DRAW]) -> Option<Self> {
        is_revealed(&positions).then_some(Self(positions))
    }

    pub fn numbers(&self) -> &[u8; NUMBERS_PER_DRAW] {
        &self.0
    }
}

impl fmt::Display for WinningNumbers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(", "))
    }
}

pub fn is_revealed(positions: &[u8; NUMBERS_PER_DRAW]) -> bool {
    positions.iter().all(|&n| n > 0)
}

/// Number of leading positions on which both sequences agree. Stops at the
/// first mismatch, so later coincidences do not count.
pub fn matched_prefix_length(
    player: &[u8; NUMBERS_PER_DRAW],
    winning: &[u8; NUMBERS_PER_DRAW],
) -> u8 {
    player
        .iter()
        .zip(winning)
        .take_while(|(p, w)| p == w)
        .count() as u8
}

pub fn is_winning_match(matched: u8, win_threshold: u8) -> bool {
    matched >= win_threshold
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;
    use rand::{
        SeedableRng,
        rngs::StdRng,
    };

    #[test]
    fn matched_prefix_length__mismatch_in_third_position__counts_two() {
        // given
        let player = [1, 2, 3, 4, 5, 6, 7];
        let winning = [1, 2, 9, 4, 5, 6, 7];

        // when
        let matched = matched_prefix_length(&player, &winning);

        // then
        assert_eq!(matched, 2);
    }

    #[test]
    fn matched_prefix_length__first_position_differs__is_zero() {
        let player = [3, 7, 12, 19, 25, 31, 44];
        let winning = [4, 7, 12, 19, 25, 31, 44];

        assert_eq!(matched_prefix_length(&player, &winning), 0);
    }

    #[test]
    fn matched_prefix_length__identical__is_seven() {
        let numbers = [3, 7, 12, 19, 25, 31, 44];

        assert_eq!(matched_prefix_length(&numbers, &numbers), 7);
    }

    #[test]
    fn new__unsorted_input__is_stored_sorted() {
        // given
        let input = [44, 3, 31, 7, 25, 12, 19];

        // when
        let ticket = TicketSelection::new(&input).unwrap();

        // then
        assert_eq!(ticket.numbers(), &[3, 7, 12, 19, 25, 31, 44]);
    }

    #[test]
    fn new__number_out_of_range__rejected() {
        let err = TicketSelection::new(&[0, 2, 3, 4, 5, 6, 7]).unwrap_err();
        assert_eq!(err, TicketError::OutOfRange(0));
        assert_eq!(err.to_string(), "All numbers must be between 1 and 49");

        let err = TicketSelection::new(&[1, 2, 3, 4, 5, 6, 50]).unwrap_err();
        assert_eq!(err, TicketError::OutOfRange(50));
    }

    #[test]
    fn new__duplicate_numbers__rejected() {
        let err = TicketSelection::new(&[5, 2, 3, 4, 5, 6, 7]).unwrap_err();

        assert_eq!(err, TicketError::Duplicate(5));
        assert_eq!(err.to_string(), "All numbers must be unique");
    }

    #[test]
    fn new__wrong_length__rejected() {
        let err = TicketSelection::new(&[1, 2, 3]).unwrap_err();

        assert_eq!(err, TicketError::WrongLength(3));
    }

    #[test]
    fn from_positions__any_zero_position__not_ready() {
        assert!(WinningNumbers::from_positions([5, 12, 0, 8, 3, 44, 7]).is_none());
        assert!(!is_revealed(&[5, 12, 0, 8, 3, 44, 7]));
    }

    #[test]
    fn from_positions__all_positions_set__ready() {
        let winning = WinningNumbers::from_positions([5, 12, 1, 8, 3, 44, 7]).unwrap();

        assert_eq!(winning.numbers(), &[5, 12, 1, 8, 3, 44, 7]);
    }

    #[test]
    fn matched_prefix__later_coincidences__ignored() {
        // given
        let ticket = TicketSelection::new(&[3, 7, 12, 19, 25, 31, 44]).unwrap();
        let winning = WinningNumbers::from_positions([3, 9, 12, 19, 25, 31, 44]).unwrap();

        // when
        let matched = ticket.matched_prefix(&winning);

        // then
        assert_eq!(matched, 1);
        assert!(!is_winning_match(matched, DEFAULT_WIN_THRESHOLD));
    }

    #[test]
    fn quick_pick__always_produces_valid_ticket() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let ticket = TicketSelection::quick_pick(&mut rng);
            let as_u32: Vec<u32> = ticket.numbers().iter().map(|&n| n.into()).collect();
            assert_eq!(TicketSelection::new(&as_u32).unwrap(), ticket);
        }
    }

    proptest! {
        #[test]
        fn matched_prefix_length__equals_leading_equal_count(
            player in proptest::array::uniform7(1u8..=49),
            winning in proptest::array::uniform7(1u8..=49),
        ) {
            let expected = (0..NUMBERS_PER_DRAW)
                .find(|&i| player[i] != winning[i])
                .unwrap_or(NUMBERS_PER_DRAW) as u8;
            prop_assert_eq!(matched_prefix_length(&player, &winning), expected);
        }

        #[test]
        fn matched_prefix_length__never_exceeds_first_mismatch(
            numbers in proptest::array::uniform7(1u8..=49),
            position in 0usize..NUMBERS_PER_DRAW,
        ) {
            let mut other = numbers;
            other[position] = if numbers[position] == 49 { 1 } else { numbers[position] + 1 };
            prop_assert_eq!(matched_prefix_length(&numbers, &other), position as u8);
        }
    }
}
