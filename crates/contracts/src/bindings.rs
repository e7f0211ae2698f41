use alloy_sol_types::sol;

sol! {
    /// Withdrawal authorization checked by the pool. `data` is ABI-encoded `RelayData`.
    #[derive(Debug, PartialEq, Eq)]
    struct Withdrawal {
        address processooor;
        bytes data;
    }

    /// Fee routing for relayed withdrawals.
    #[derive(Debug, PartialEq, Eq)]
    struct RelayData {
        address recipient;
        address feeRecipient;
        uint256 relayFeeBPS;
    }

    /// Groth16 proof with the withdrawal circuit's eight public signals.
    #[derive(Debug, PartialEq, Eq)]
    struct WithdrawProof {
        uint256[2] pA;
        uint256[2][2] pB;
        uint256[2] pC;
        uint256[8] pubSignals;
    }

    #[derive(Debug, PartialEq, Eq)]
    interface IEntrypoint {
        event Deposited(address indexed depositor, address indexed pool, uint256 commitment, uint256 amount);
        event RootUpdated(uint256 root, string ipfsCID, uint256 timestamp);
        event PoolRegistered(address pool, address asset, uint256 scope);
        event PoolWindDown(address pool);

        function relay(Withdrawal withdrawal, WithdrawProof proof, uint256 scope) external;
    }

    #[derive(Debug, PartialEq, Eq)]
    interface IPrivacyPool {
        event Deposited(address indexed depositor, uint256 commitment, uint256 label, uint256 value, uint256 precommitmentHash);
        event Withdrawn(address indexed processooor, uint256 value, uint256 spentNullifier, uint256 newCommitment);
        event Ragequit(address indexed ragequitter, uint256 commitment, uint256 label, uint256 value);

        function ASSET() external view returns (address);
        function SCOPE() external view returns (uint256);
    }

    interface IERC20Metadata {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }
}
