//! Asset Provider
//!
//! The registered asset table. `external_id` is unique, `(symbol, chain_id)`
//! is unique with null chain meaning the native L1 coin.

use async_trait::async_trait;
use folio_common::asset::AssetData;
use uuid::Uuid;

use crate::core::error::StorageError;

#[async_trait]
pub trait AssetProvider {
    async fn get_asset(&self, id: Uuid) -> Result<Option<AssetData>, StorageError>;

    async fn get_asset_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<AssetData>, StorageError>;

    /// Every registered asset carrying this symbol, across chains.
    async fn list_assets_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Vec<AssetData>, StorageError>;

    async fn list_active_assets(&self) -> Result<Vec<AssetData>, StorageError>;

    /// Insert unless an asset with the same `external_id` or
    /// `(symbol, chain_id)` already exists; either way the surviving row is
    /// returned, which quietly absorbs duplicate-key races on discovery.
    async fn insert_asset_if_absent(
        &self,
        asset: &AssetData,
    ) -> Result<AssetData, StorageError>;
}
