//! Chain adapter. Shells out to `cardano-cli` (written against the 1.25
//! series) for every on-chain operation; holds no state between calls.

pub mod coin_selection;

use crate::{
    catalogue::Catalogue,
    config,
    constants::TTL_OFFSET,
    database::Store,
    metrics::Metrics,
};
use anyhow::{anyhow, bail, Context, Result};
use coin_selection::{plan_transaction, Utxos};
use model::Order;
use serde::Deserialize;
use std::{collections::BTreeMap, path::PathBuf, process::Output, sync::Arc};
use tokio::process::Command;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Chain: Send + Sync {
    /// Expands every order item into native-token quantities. Bundles are
    /// expanded once per unit so each unit gets an independent draw.
    async fn native_tokens_from_order(&self, order: &Order) -> Result<BTreeMap<String, i64>>;
    /// Builds, signs and submits the delivery transaction for a paid order.
    /// Returns the transaction id.
    async fn submit_order(&self, order: &Order) -> Result<String>;
    async fn validate_address(&self, address: &str) -> Result<()>;
    /// Sums UTXO contents per asset across the given addresses.
    async fn get_stock(&self, addresses: &[String]) -> Result<BTreeMap<String, i64>>;
    fn hot_wallet_address(&self) -> String;
}

pub struct CardanoService {
    store: Arc<dyn Store>,
    catalogue: Arc<dyn Catalogue>,
    metrics: Arc<Metrics>,
    hot_wallet_signing_key_path: String,
    hot_wallet_address: String,
    scripts_path: String,
    protocol_params_path: String,
}

fn command_output(output: &Output, what: &str) -> Result<String> {
    if !output.status.success() {
        bail!(
            "{} failed ({}): {}",
            what,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

impl CardanoService {
    pub fn new(
        config: &config::Cardano,
        store: Arc<dyn Store>,
        catalogue: Arc<dyn Catalogue>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            catalogue,
            metrics,
            hot_wallet_signing_key_path: config.hot_wallet_signing_key_path.clone(),
            hot_wallet_address: config.hot_wallet_address.clone(),
            scripts_path: config.scripts_path.clone(),
            protocol_params_path: config.protocol_params_path.clone(),
        }
    }

    async fn cardano_cli(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("cardano-cli")
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run cardano-cli {}", args.join(" ")))?;
        command_output(&output, &format!("cardano-cli {}", args[0]))
    }

    /// Materializes the unspent outputs under `address`. `filename_salt`
    /// disambiguates the temp files of concurrent invocations.
    pub async fn get_utxos(&self, address: &str, filename_salt: &str) -> Result<Utxos> {
        let utxo_json_path = format!("utxos_{}.json", filename_salt);
        self.cardano_cli(&[
            "query",
            "utxo",
            "--address",
            address,
            "--mainnet",
            "--mary-era",
            "--out-file",
            &utxo_json_path,
        ])
        .await
        .context("failed to dump UTXOs")?;

        // Normalize the node's JSON into the flat shape we parse.
        let utxo_json_nice_path = format!("utxos_{}_nice.json", filename_salt);
        let script = PathBuf::from(&self.scripts_path).join("parseUTXOs.py");
        let output = Command::new("python3")
            .arg(script)
            .arg(&utxo_json_path)
            .arg(&utxo_json_nice_path)
            .output()
            .await
            .context("failed to run parseUTXOs.py")?;
        command_output(&output, "parseUTXOs.py").context("failed to convert UTXOs JSON")?;

        let contents = tokio::fs::read_to_string(&utxo_json_nice_path)
            .await
            .with_context(|| format!("failed to read UTXO file {}", utxo_json_nice_path))?;
        serde_json::from_str(&contents).context("failed to parse UTXO JSON")
    }

    /// Current tip slot plus the configured TTL offset.
    pub async fn get_ttl(&self) -> Result<i64> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct QueryTip {
            slot_no: i64,
        }

        let out = self
            .cardano_cli(&["query", "tip", "--mainnet"])
            .await
            .context("failed to query cardano tip")?;
        let tip: QueryTip =
            serde_json::from_str(&out).context("failed to parse query tip JSON")?;
        Ok(tip.slot_no + TTL_OFFSET)
    }

    /// Builds an unsigned transaction delivering `goal_tokens` plus the
    /// dust payment. Returns the input and output counts for the fee
    /// calculation. Selection decrements the passed UTXO set in place.
    pub async fn write_raw_tx(
        &self,
        delivery_address: &str,
        goal_tokens: &BTreeMap<String, i64>,
        utxos: &mut Utxos,
        tx_raw_path: &str,
        fee_lovelace: i64,
        ttl: i64,
    ) -> Result<(usize, usize)> {
        let plan = plan_transaction(
            delivery_address,
            &self.hot_wallet_address,
            goal_tokens,
            utxos,
            fee_lovelace,
        )
        .map_err(|err| {
            self.metrics.tick_cardano_insufficient_utxos();
            anyhow!(err)
        })?;

        let mut args = vec!["transaction".to_string(), "build-raw".to_string()];
        for tx_in in &plan.tx_ins {
            args.push("--tx-in".to_string());
            args.push(tx_in.clone());
        }
        for tx_out in &plan.tx_outs {
            args.push("--tx-out".to_string());
            args.push(tx_out.clone());
        }
        args.extend([
            "--ttl".to_string(),
            ttl.to_string(),
            "--fee".to_string(),
            fee_lovelace.to_string(),
            "--out-file".to_string(),
            tx_raw_path.to_string(),
            "--mary-era".to_string(),
        ]);

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.cardano_cli(&args)
            .await
            .context("failed to write raw tx")?;
        Ok((plan.tx_ins.len(), plan.tx_outs.len()))
    }

    pub async fn get_fee(
        &self,
        tx_raw_path: &str,
        tx_in_count: usize,
        tx_out_count: usize,
    ) -> Result<i64> {
        let out = self
            .cardano_cli(&[
                "transaction",
                "calculate-min-fee",
                "--tx-body-file",
                tx_raw_path,
                "--tx-in-count",
                &tx_in_count.to_string(),
                "--tx-out-count",
                &tx_out_count.to_string(),
                "--witness-count",
                "1",
                "--mainnet",
                "--protocol-params-file",
                &self.protocol_params_path,
            ])
            .await
            .context("failed to get minimum transaction fee")?;

        // Output looks like "178393 Lovelace".
        let fields: Vec<&str> = out.split_whitespace().collect();
        if fields.len() != 2 {
            bail!("failed to parse fee string, expected 2 fields: {}", out);
        }
        fields[0]
            .parse()
            .with_context(|| format!("failed to parse fee: {}", out))
    }

    pub async fn sign_tx(&self, tx_raw_path: &str, tx_signed_out_path: &str) -> Result<()> {
        let out = self
            .cardano_cli(&[
                "transaction",
                "sign",
                "--tx-body-file",
                tx_raw_path,
                "--signing-key-file",
                &self.hot_wallet_signing_key_path,
                "--mainnet",
                "--out-file",
                tx_signed_out_path,
            ])
            .await
            .context("failed to sign transaction")?;
        if !out.is_empty() {
            bail!("failed to sign transaction, cardano-cli returned: {}", out);
        }
        Ok(())
    }

    pub async fn submit_tx(&self, tx_signed_path: &str) -> Result<()> {
        self.cardano_cli(&["transaction", "submit", "--tx-file", tx_signed_path, "--mainnet"])
            .await
            .context("failed to submit transaction")?;
        Ok(())
    }

    pub async fn get_txid(&self, tx_signed_path: &str) -> Result<String> {
        let out = self
            .cardano_cli(&["transaction", "txid", "--tx-file", tx_signed_path])
            .await
            .context("failed to get TXID")?;
        Ok(out.trim().to_string())
    }
}

#[async_trait::async_trait]
impl Chain for CardanoService {
    async fn native_tokens_from_order(&self, order: &Order) -> Result<BTreeMap<String, i64>> {
        let products = self.catalogue.get_products().await?;

        let mut token_quantities = BTreeMap::new();
        for item in &order.items {
            // Expand per unit so random bundle contents differ between units.
            for _ in 0..item.quantity {
                let unpacked = self
                    .catalogue
                    .unpack_bundle(&item.product_id)
                    .with_context(|| format!("failed to unpack product {}", item.product_id))?;
                for product_id in &unpacked {
                    let native_token_id = products
                        .get(product_id)
                        .map(|product| product.native_token_id.clone())
                        .ok_or_else(|| {
                            anyhow!("invalid product ID from unpack, {} not found", product_id)
                        })?;
                    *token_quantities.entry(native_token_id).or_insert(0) += 1;
                }
            }
        }

        Ok(token_quantities)
    }

    async fn submit_order(&self, order: &Order) -> Result<String> {
        let goal_tokens = self.store.query_order_native_tokens(&order.order_id).await?;
        let ttl = self.get_ttl().await?;

        let mut utxos = self.get_utxos(&self.hot_wallet_address, &order.order_id).await?;
        let tx_raw_path = format!("tx_{}.raw", order.order_id);
        let (tx_in_count, tx_out_count) = self
            .write_raw_tx(
                &order.customer.delivery_address,
                &goal_tokens,
                &mut utxos,
                &tx_raw_path,
                0,
                ttl,
            )
            .await?;

        let fee = self.get_fee(&tx_raw_path, tx_in_count, tx_out_count).await?;

        // The first pass consumed the in-memory UTXO quantities, so fetch a
        // fresh snapshot for the real build.
        let mut utxos = self.get_utxos(&self.hot_wallet_address, &order.order_id).await?;
        self.write_raw_tx(
            &order.customer.delivery_address,
            &goal_tokens,
            &mut utxos,
            &tx_raw_path,
            fee,
            ttl,
        )
        .await?;

        let tx_signed_path = format!("tx_{}.signed", order.order_id);
        self.sign_tx(&tx_raw_path, &tx_signed_path).await?;
        self.submit_tx(&tx_signed_path).await?;
        self.metrics.tick_cardano_submitted();

        self.get_txid(&tx_signed_path).await
    }

    async fn validate_address(&self, address: &str) -> Result<()> {
        let out = self
            .cardano_cli(&["address", "info", "--address", address])
            .await
            .context("failed to validate address")?;
        if out.contains("Invalid") {
            bail!("address is invalid: {}, output: {}", address, out);
        }
        Ok(())
    }

    async fn get_stock(&self, addresses: &[String]) -> Result<BTreeMap<String, i64>> {
        let mut tokens = BTreeMap::new();
        for address in addresses {
            let salt = self.store.generate_order_id("GETSTOCK");
            let utxos = self
                .get_utxos(address, &salt)
                .await
                .context("failed to get stock")?;
            for utxo in &utxos.utxos {
                for asset in &utxo.assets {
                    *tokens.entry(asset.currency_id.clone()).or_insert(0) += asset.quantity;
                }
            }
        }
        Ok(tokens)
    }

    fn hot_wallet_address(&self) -> String {
        self.hot_wallet_address.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalogue::{self, MockCatalogue},
        database::MockStore,
    };
    use model::{OrderCustomer, OrderItem, Product};
    use std::collections::HashMap;

    fn product(product_id: &str, native_token_id: &str) -> (String, Product) {
        (
            product_id.to_string(),
            Product {
                product_id: product_id.to_string(),
                price_unit_amount: 10.,
                price_currency_id: "ada".to_string(),
                max_order_size: 10,
                native_token_id: native_token_id.to_string(),
                ..Default::default()
            },
        )
    }

    fn service(store: MockStore, catalogue: MockCatalogue) -> CardanoService {
        CardanoService::new(
            &config::Cardano {
                hot_wallet_signing_key_path: "/keys/payment.skey".to_string(),
                hot_wallet_address: "addr1hotwallet".to_string(),
                scripts_path: "./scripts".to_string(),
                protocol_params_path: "/config/protocol.json".to_string(),
            },
            Arc::new(store),
            Arc::new(catalogue),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn sums_native_tokens_across_items_and_units() {
        let mut catalogue = MockCatalogue::new();
        let products: HashMap<String, Product> = [
            product("PROD-01F4MK45QJS4WZ1VBZW1A1THD7", "asset1draculi"),
            product("PROD-01F4MK4YVW4JSV717E0XK920AZ", "asset1voyin"),
        ]
        .into_iter()
        .collect();
        let products = Arc::new(products);
        catalogue
            .expect_get_products()
            .returning(move || Ok(products.clone()));
        catalogue
            .expect_unpack_bundle()
            .returning(|product_id| Ok(vec![product_id.to_string()]));

        let order = Order {
            items: vec![
                OrderItem {
                    product_id: "PROD-01F4MK45QJS4WZ1VBZW1A1THD7".to_string(),
                    quantity: 3,
                },
                OrderItem {
                    product_id: "PROD-01F4MK4YVW4JSV717E0XK920AZ".to_string(),
                    quantity: 2,
                },
            ],
            ..Default::default()
        };

        let service = service(MockStore::new(), catalogue);
        let tokens = service.native_tokens_from_order(&order).await.unwrap();
        assert_eq!(tokens["asset1draculi"], 3);
        assert_eq!(tokens["asset1voyin"], 2);
    }

    #[tokio::test]
    async fn expands_bundles_once_per_unit() {
        let mut catalogue = MockCatalogue::new();
        let products: HashMap<String, Product> = catalogue::RARE
            .iter()
            .chain(catalogue::KINDA_RARE.iter())
            .chain(catalogue::NOT_THAT_RARE.iter())
            .enumerate()
            .map(|(i, id)| product(id, &format!("asset1card{}", i)))
            .collect();
        let products = Arc::new(products);
        catalogue
            .expect_get_products()
            .returning(move || Ok(products.clone()));
        // Each unit of the bundle gets its own expansion call.
        catalogue
            .expect_unpack_bundle()
            .times(2)
            .returning(|_| {
                let mut cards = vec![catalogue::RARE[0].to_string()];
                cards.extend(catalogue::KINDA_RARE.iter().map(|card| card.to_string()));
                cards.extend(catalogue::NOT_THAT_RARE.iter().map(|card| card.to_string()));
                Ok(cards)
            });

        let order = Order {
            items: vec![OrderItem {
                product_id: catalogue::STARTER_DECK_PRODUCT_ID.to_string(),
                quantity: 2,
            }],
            customer: OrderCustomer {
                delivery_address: "addr1q8customer".to_string(),
            },
            ..Default::default()
        };

        let service = service(MockStore::new(), catalogue);
        let tokens = service.native_tokens_from_order(&order).await.unwrap();
        let total: i64 = tokens.values().sum();
        assert_eq!(total, 24);
    }

    #[tokio::test]
    async fn unknown_unpacked_product_is_an_error() {
        let mut catalogue = MockCatalogue::new();
        catalogue
            .expect_get_products()
            .returning(|| Ok(Arc::new(HashMap::new())));
        catalogue
            .expect_unpack_bundle()
            .returning(|product_id| Ok(vec![product_id.to_string()]));

        let order = Order {
            items: vec![OrderItem {
                product_id: "PROD-UNKNOWN".to_string(),
                quantity: 1,
            }],
            ..Default::default()
        };

        let service = service(MockStore::new(), catalogue);
        assert!(service.native_tokens_from_order(&order).await.is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn cli_validate_address() {
        let service = service(MockStore::new(), MockCatalogue::new());
        assert!(service.validate_address("ORDER-ABC").await.is_err());
        assert!(service
            .validate_address("addr1q9d34spgg2kdy47n82e7x9pdd6vql6d2engxmpj3jgjz81c7je8cqua2wepulvzgc8nkttjnl0n7d42g8nvydahkc5qs6k55qu")
            .await
            .is_ok());
    }

    #[tokio::test]
    #[ignore]
    async fn cli_get_ttl() {
        let service = service(MockStore::new(), MockCatalogue::new());
        let ttl = service.get_ttl().await.unwrap();
        assert!(ttl > TTL_OFFSET);
    }
}
