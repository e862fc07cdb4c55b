//! Typed calls and events of the lottery contract.

use super::{
    Address,
    TxHash,
};
use alloy::{
    primitives,
    sol,
};

sol! {
    contract Lottery {
        function prizePool() external view returns (uint256);
        function getPlayers() external view returns (address[] memory);
        function drawPending() external view returns (bool);
        function lastDrawTimestamp() external view returns (uint256);
        function lastWinningNumbers(uint256 index) external view returns (uint8);
        function hasPlayerBought(address player) external view returns (bool);
        function buyTicket(uint8[7] numbers) external payable;

        event TicketPurchased(address indexed player, uint8[7] numbers);
        event WinningNumbersDrawn(uint8[7] numbers);
        event PrizePaid(address indexed player, uint256 amount, uint8 matchCount);
    }
}

impl From<primitives::Address> for Address {
    fn from(value: primitives::Address) -> Self {
        Self::new(value.into_array())
    }
}

impl From<Address> for primitives::Address {
    fn from(value: Address) -> Self {
        primitives::Address::new(*value.as_bytes())
    }
}

impl From<primitives::B256> for TxHash {
    fn from(value: primitives::B256) -> Self {
        Self::new(value.0)
    }
}
