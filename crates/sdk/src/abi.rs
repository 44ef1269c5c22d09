//! Solidity bindings of the contracts the core reads from.

pub mod multicall {
    alloy::sol! {
        /// Multicall3 aggregator, executes a batch of calls at a single block.
        ///
        /// See <https://github.com/mds1/multicall>.
        #[sol(rpc)]
        #[derive(Debug)]
        interface IMulticall3 {
            struct Call {
                address target;
                bytes callData;
            }

            struct Result {
                bool success;
                bytes returnData;
            }

            function tryBlockAndAggregate(bool requireSuccess, Call[] calldata calls)
                external
                payable
                returns (uint256 blockNumber, bytes32 blockHash, Result[] memory returnData);

            function getEthBalance(address addr) external view returns (uint256 balance);
        }
    }
}

pub mod erc20 {
    alloy::sol! {
        #[derive(Debug)]
        interface IERC20 {
            function name() external view returns (string memory);
            function symbol() external view returns (string memory);
            function decimals() external view returns (uint8);
            function balanceOf(address account) external view returns (uint256);
            function allowance(address owner, address spender) external view returns (uint256);
            function approve(address spender, uint256 amount) external returns (bool);
        }

        /// Legacy tokens (e.g. MKR) returning `bytes32` metadata.
        #[derive(Debug)]
        interface IERC20Bytes32 {
            function name() external view returns (bytes32);
            function symbol() external view returns (bytes32);
        }
    }
}

pub mod erc721 {
    alloy::sol! {
        #[derive(Debug)]
        interface IERC721 {
            function isApprovedForAll(address owner, address operator) external view returns (bool);
            function setApprovalForAll(address operator, bool approved) external;
        }
    }
}
