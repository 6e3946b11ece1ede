//! Product catalog and inventory backing the merchant agent.
//!
//! A simple keyed lookup by product id and SKU with keyword search — catalog
//! storage proper is outside this system, so the demo seeds a small fixed
//! assortment and keeps counts in memory.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use ap2_types::money::MoneyAmount;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: MoneyAmount,
    pub category: String,
    pub refundable: bool,
    pub keywords: Vec<String>,
}

pub struct Catalog {
    products: Vec<Product>,
    inventory: DashMap<String, u32>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        let inventory = DashMap::new();
        for product in &products {
            inventory.insert(product.id.clone(), 10);
        }
        Self { products, inventory }
    }

    /// The demo assortment.
    pub fn demo() -> Self {
        fn product(
            id: &str,
            sku: &str,
            name: &str,
            description: &str,
            price: u64,
            category: &str,
            keywords: &[&str],
        ) -> Product {
            Product {
                id: id.to_string(),
                sku: sku.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                price: MoneyAmount::jpy(price),
                category: category.to_string(),
                refundable: true,
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
            }
        }
        Self::new(vec![
            product(
                "prod_001",
                "SHOE-001",
                "Red Basketball Shoe",
                "High-top red basketball shoe, classic style",
                8000,
                "shoes",
                &["red", "basketball", "shoe", "shoes", "high-top", "sneaker"],
            ),
            product(
                "prod_002",
                "SHOE-002",
                "White Running Shoe",
                "Lightweight white running shoe",
                6500,
                "shoes",
                &["white", "running", "shoe", "shoes", "sneaker"],
            ),
            product(
                "prod_003",
                "SHIRT-001",
                "Team Jersey",
                "Breathable basketball jersey",
                4200,
                "apparel",
                &["jersey", "shirt", "basketball", "apparel"],
            ),
            product(
                "prod_004",
                "BALL-001",
                "Indoor Basketball",
                "Official size indoor basketball",
                5400,
                "equipment",
                &["basketball", "ball", "indoor", "equipment"],
            ),
            product(
                "prod_005",
                "SOCK-001",
                "Crew Socks 3-pack",
                "Cushioned crew socks, 3 pairs",
                1200,
                "apparel",
                &["socks", "crew", "apparel"],
            ),
        ])
    }

    pub fn by_id(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    pub fn by_sku(&self, sku: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.sku == sku)
    }

    /// Keyword search ranked by match count, capped at `limit`.
    pub fn search(&self, keywords: &[String], category: Option<&str>, limit: usize) -> Vec<&Product> {
        let mut scored: Vec<(usize, &Product)> = self
            .products
            .iter()
            .filter(|p| category.is_none_or(|c| p.category == c))
            .filter_map(|product| {
                let score = keywords
                    .iter()
                    .filter(|keyword| {
                        let keyword = keyword.to_lowercase();
                        product.keywords.iter().any(|k| k == &keyword)
                            || product.name.to_lowercase().contains(&keyword)
                            || product.sku.to_lowercase() == keyword
                    })
                    .count();
                (score > 0).then_some((score, product))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored.into_iter().take(limit).map(|(_, p)| p).collect()
    }

    pub fn stock(&self, product_id: &str) -> u32 {
        self.inventory.get(product_id).map(|s| *s).unwrap_or(0)
    }

    pub fn set_stock(&self, product_id: &str, count: u32) {
        self.inventory.insert(product_id.to_string(), count);
    }

    pub fn in_stock(&self, product_id: &str) -> bool {
        self.stock(product_id) > 0
    }

    pub fn inventory_snapshot(&self) -> Vec<(String, u32)> {
        let mut snapshot: Vec<(String, u32)> = self
            .inventory
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        snapshot.sort();
        snapshot
    }
}
