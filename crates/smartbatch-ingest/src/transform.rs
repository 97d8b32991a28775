//! Per-record business rule

use crate::config::TransformConfig;
use smartbatch_common::Smartphone;
use tracing::debug;

/// Pure, total function applied to every record before it is written
pub trait Transformer: Send + Sync {
    fn transform(&self, record: Smartphone) -> Smartphone;
}

/// Discounts phones released before `cutoff_year`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceAdjuster {
    cutoff_year: i32,
    factor: f64,
}

impl PriceAdjuster {
    pub fn new(cutoff_year: i32, factor: f64) -> Self {
        Self {
            cutoff_year,
            factor,
        }
    }
}

impl From<&TransformConfig> for PriceAdjuster {
    fn from(config: &TransformConfig) -> Self {
        Self::new(config.cutoff_year, config.discount_factor)
    }
}

impl Default for PriceAdjuster {
    fn default() -> Self {
        Self::from(&TransformConfig::default())
    }
}

impl Transformer for PriceAdjuster {
    fn transform(&self, mut record: Smartphone) -> Smartphone {
        if record.release_year < self.cutoff_year {
            let before = record.price;
            record.price *= self.factor;
            debug!(
                brand = %record.brand,
                model = %record.model,
                release_year = record.release_year,
                before,
                after = record.price,
                "Price adjusted"
            );
        }
        record
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn phone(release_year: i32, price: f64) -> Smartphone {
        Smartphone {
            brand: "Acme".to_string(),
            model: "X1".to_string(),
            operating_system: "OS1".to_string(),
            release_year,
            screen_size: 6.1,
            price,
        }
    }

    #[test]
    fn test_older_phone_is_discounted() {
        let out = PriceAdjuster::default().transform(phone(2022, 100.0));
        assert!((out.price - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_cutoff_year_is_not_discounted() {
        let out = PriceAdjuster::default().transform(phone(2023, 100.0));
        assert_eq!(out.price, 100.0);
    }

    #[test]
    fn test_other_fields_untouched() {
        let input = phone(2010, 50.0);
        let out = PriceAdjuster::new(2023, 0.5).transform(input.clone());
        assert_eq!(out.brand, input.brand);
        assert_eq!(out.release_year, input.release_year);
        assert_eq!(out.screen_size, input.screen_size);
        assert_eq!(out.price, 25.0);
    }

    proptest! {
        #[test]
        fn prop_price_rule(year in 1990i32..2100, price in 0.0f64..1_000_000.0) {
            let out = PriceAdjuster::default().transform(phone(year, price));

            if year < 2023 {
                prop_assert!((out.price - price * 0.9).abs() <= 1e-9 * price.max(1.0));
            } else {
                prop_assert_eq!(out.price, price);
            }
            prop_assert!(out.price >= 0.0);
        }
    }
}
