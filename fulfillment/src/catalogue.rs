//! Read-through product catalogue and bundle expansion.

use crate::database::Store;
use anyhow::{ensure, Result};
use model::Product;
use rand::Rng;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

pub const STARTER_DECK_PRODUCT_ID: &str = "PROD-01F4NAFJCAG5JDEGMR0XQARBW2";
pub const BOOSTER_PACK_PRODUCT_ID: &str = "PROD-01F4NAF8MANXDT26MGA5E0QXNJ";

/// Withdrawn listing that must never be orderable again.
pub const DELISTED_COLLECTORS_KIT_PRODUCT_ID: &str = "PROD-01F5YTNB4BSBKPGRKHVHEM9F0F";

/// Occulta Novellia rarity tiers. Rares are only obtainable through bundles.
pub const RARE: [&str; 3] = [
    "PROD-01F4MK4ZCVTKAAZF1QZAPWMPFP",
    "PROD-01F4MK4ZNC8FMVR2ANHDW9E1N4",
    "PROD-01F4MK4ZYC6P9EGG4W0DNFQTWS",
];

pub const KINDA_RARE: [&str; 5] = [
    "PROD-01F4MK45QJS4WZ1VBZW1A1THD7",
    "PROD-01F4MK4NTCXGVA35CAD7TCHEM8",
    "PROD-01F4MK4P5SMNGKBF5B7AKN35YD",
    "PROD-01F4MK4PF52A72Y7P77TEPA2CW",
    "PROD-01F4MK4PRD20D3Z95T84ZYA0SX",
];

pub const NOT_THAT_RARE: [&str; 6] = [
    "PROD-01F4MK4XRGJV2NR9XNQY9GCPGQ",
    "PROD-01F4MK4Y26J6A66YQ1PXH8NXMC",
    "PROD-01F4MK4YAR07BTRSQFHDWNXC55",
    "PROD-01F4MK4YKAJ0REHHDY63TTTEWM",
    "PROD-01F4MK4YVW4JSV717E0XK920AZ",
    "PROD-01F4MK4Z489EBKGGFXA2HKZ1MA",
];

pub type ProductMap = Arc<HashMap<String, Product>>;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Catalogue: Send + Sync {
    async fn get_products(&self) -> Result<ProductMap>;
    fn unpack_bundle(&self, product_id: &str) -> Result<Vec<String>>;
}

/// Caches the full product list on first read for the lifetime of the
/// process; products are administratively managed and never invalidate.
pub struct CatalogueService {
    store: Arc<dyn Store>,
    products: RwLock<Option<ProductMap>>,
}

impl CatalogueService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            products: RwLock::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Catalogue for CatalogueService {
    async fn get_products(&self) -> Result<ProductMap> {
        if let Some(products) = self.products.read().await.as_ref() {
            return Ok(products.clone());
        }
        let mut guard = self.products.write().await;
        // Another task may have filled the cache while we waited.
        if let Some(products) = guard.as_ref() {
            return Ok(products.clone());
        }
        let products = self.store.query_products().await?;
        let map: ProductMap = Arc::new(
            products
                .into_iter()
                .map(|product| (product.product_id.clone(), product))
                .collect(),
        );
        *guard = Some(map.clone());
        Ok(map)
    }

    fn unpack_bundle(&self, product_id: &str) -> Result<Vec<String>> {
        unpack_bundle_with(product_id, &mut rand::thread_rng())
    }
}

fn draw_booster_card(rng: &mut impl Rng) -> &'static str {
    let p = rng.gen_range(0..100);
    let tier: &[&'static str] = if p < 1 {
        &RARE
    } else if p < 25 {
        &KINDA_RARE
    } else {
        &NOT_THAT_RARE
    };
    tier[rng.gen_range(0..tier.len())]
}

/// Converts a product id representing a bundle into the list of atomic
/// product ids it contains. Atomic products map to themselves. Callers
/// expand once per unit quantity so every unit gets an independent draw.
pub fn unpack_bundle_with(product_id: &str, rng: &mut impl Rng) -> Result<Vec<String>> {
    match product_id {
        STARTER_DECK_PRODUCT_ID => {
            let mut cards = vec![RARE[rng.gen_range(0..RARE.len())].to_string()];
            cards.extend(KINDA_RARE.iter().map(|card| card.to_string()));
            cards.extend(NOT_THAT_RARE.iter().map(|card| card.to_string()));
            ensure!(
                cards.len() == 12,
                "starter deck must have 12 cards, got {:?}",
                cards
            );
            Ok(cards)
        }
        BOOSTER_PACK_PRODUCT_ID => {
            let cards: Vec<String> = (0..3)
                .map(|_| draw_booster_card(rng).to_string())
                .collect();
            ensure!(
                cards.len() == 3,
                "booster pack must have 3 cards, got {:?}",
                cards
            );
            Ok(cards)
        }
        _ => Ok(vec![product_id.to_string()]),
    }
}
