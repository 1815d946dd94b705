//! Contract bindings and decoding of `Purchased` logs and catalog call results

use crate::{Item, PurchaseRecord, RawLog, Shop, SyncError, SyncResult};
use alloy_primitives::B256;
use alloy_sol_types::{sol, SolCall, SolEvent};

sol! {
    /// Items registry; `shops()` returns the address of the shops registry.
    interface IItems {
        function items(uint256 itemId) external view returns (
            uint256 shopId,
            address payToken,
            uint256 unitPrice,
            address nftContract,
            bool soulbound,
            string tokenURI,
            address action,
            bytes actionData,
            bool requiresSerial,
            bool active
        );
        function itemCount() external view returns (uint256);
        function shops() external view returns (address);
    }

    interface IShops {
        function shops(uint256 shopId) external view returns (
            address owner,
            address treasury,
            bytes32 metadataHash,
            bool paused
        );
        function shopCount() external view returns (uint256);
    }

    event Purchased(
        uint256 indexed itemId,
        uint256 indexed shopId,
        address indexed buyer,
        address recipient,
        uint256 quantity,
        address payToken,
        uint256 payAmount,
        uint256 platformFeeAmount,
        bytes32 serialHash,
        uint256 firstTokenId
    );
}

pub const PURCHASED_EVENT_SIGNATURE: &str = <Purchased as SolEvent>::SIGNATURE;

pub const ITEMS_SIGNATURE: &str = <IItems::itemsCall as SolCall>::SIGNATURE;
pub const SHOPS_SIGNATURE: &str = <IShops::shopsCall as SolCall>::SIGNATURE;
pub const ITEM_COUNT_SIGNATURE: &str = <IItems::itemCountCall as SolCall>::SIGNATURE;
pub const SHOP_COUNT_SIGNATURE: &str = <IShops::shopCountCall as SolCall>::SIGNATURE;
/// Items contract getter returning the shops registry address
pub const SHOPS_ADDRESS_SIGNATURE: &str = <IItems::shopsCall as SolCall>::SIGNATURE;

/// topic0 of `Purchased`
pub fn purchased_topic() -> B256 {
    Purchased::SIGNATURE_HASH
}

/// Turn a raw `Purchased` log into a record.
///
/// Fails on logs without inclusion metadata (pending or malformed) and on
/// any layout mismatch, so callers can skip them without aborting a batch.
pub fn decode_purchased(chain_id: u64, log: &RawLog) -> SyncResult<PurchaseRecord> {
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| SyncError::Decode("log without transactionHash".to_string()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| SyncError::Decode("log without logIndex".to_string()))?
        .to::<u64>();
    let block_number = log
        .block_number
        .ok_or_else(|| SyncError::Decode("log without blockNumber".to_string()))?
        .to::<u64>();

    let event = Purchased::decode_raw_log(log.topics.iter().copied(), &log.data, true)?;

    Ok(PurchaseRecord {
        chain_id,
        tx_hash,
        log_index,
        block_number,
        item_id: event.itemId,
        shop_id: event.shopId,
        buyer: event.buyer,
        recipient: event.recipient,
        quantity: event.quantity,
        pay_token: event.payToken,
        pay_amount: event.payAmount,
        platform_fee_amount: event.platformFeeAmount,
        serial_hash: event.serialHash,
        first_token_id: event.firstTokenId,
    })
}

/// Decode the `items(uint256)` return tuple
pub fn decode_item(data: &[u8]) -> SyncResult<Item> {
    let r = IItems::itemsCall::abi_decode_returns(data, true)?;
    Ok(Item {
        shop_id: r.shopId,
        pay_token: r.payToken,
        unit_price: r.unitPrice,
        nft_contract: r.nftContract,
        soulbound: r.soulbound,
        token_uri: r.tokenURI,
        action: r.action,
        action_data: r.actionData,
        requires_serial: r.requiresSerial,
        active: r.active,
    })
}

/// Decode the `shops(uint256)` return tuple
pub fn decode_shop(data: &[u8]) -> SyncResult<Shop> {
    let r = IShops::shopsCall::abi_decode_returns(data, true)?;
    Ok(Shop {
        owner: r.owner,
        treasury: r.treasury,
        metadata_hash: r.metadataHash,
        paused: r.paused,
    })
}
