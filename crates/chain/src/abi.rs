//! Supply-chain contract bindings
//!
//! Only the fixed ABI surface is declared; the contract itself is deployed
//! and owned elsewhere.

use alloy::sol;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    #[derive(Debug)]
    contract SupplyChain {
        struct Stage {
            string stageName;
            string location;
            uint256 timestamp;
            address actor;
            string status;
            string notes;
        }

        function addProduct(
            string productId,
            string productName,
            string farmerName,
            string farmerLocation,
            string cropType,
            uint256 harvestDate
        ) external;

        function updateStage(
            string productId,
            string stageName,
            string location,
            string status,
            string notes
        ) external;

        function getProduct(string productId)
            external
            view
            returns (
                string productName,
                string farmerName,
                string farmerLocation,
                string cropType,
                uint256 harvestDate,
                uint256 stageCount
            );

        function getProductStages(string productId) external view returns (Stage[] memory);

        function productExists(string productId) external view returns (bool);
    }
}
