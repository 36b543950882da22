// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@on1.no>

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IBackedToken {
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function burn(uint256 amount) external;
    }

    #[sol(rpc)]
    interface ISecureMintPolicy {
        function mint(address recipient, uint256 amount) external;
        function epochMintedAmount() external view returns (uint256);
        function epochCapacity() external view returns (uint256);

        error EpochCapacityExceeded(uint256 requested, uint256 remaining);
        error InsufficientBacking(uint256 supplyAfter, uint256 backing);
        error OracleStale(uint256 lastUpdate);
    }

    #[sol(rpc)]
    interface IBackingOracle {
        function getLatestBacking() external view returns (uint256);
        function lastUpdateTimestamp() external view returns (uint256);
        function stalenessThreshold() external view returns (uint256);
    }

    #[sol(rpc)]
    interface IEmergencyPause {
        function currentLevel() external view returns (uint8);
    }
}
