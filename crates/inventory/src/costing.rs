//! Moving average acquisition cost derived from ledger history.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult};

use crate::movement::{Direction, Movement};

fn out_of_range() -> DomainError {
    DomainError::invalid("ledger totals exceed the representable range")
}

/// Running totals over an item's ledger.
///
/// Only incoming rows contribute value; every row contributes to the net
/// balance. An incoming row without a price adds quantity at zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedAverage {
    pub total_in_quantity: i64,
    pub total_in_value: Decimal,
    pub net_balance: i64,
}

impl WeightedAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_movements<'a>(
        movements: impl IntoIterator<Item = &'a Movement>,
    ) -> DomainResult<Self> {
        let mut avg = Self::new();
        for m in movements {
            avg.record(m.direction(), m.quantity(), m.price())?;
        }
        Ok(avg)
    }

    /// Fold one ledger row in. On overflow the totals are left as they were.
    pub fn record(
        &mut self,
        direction: Direction,
        quantity: i64,
        price: Option<Decimal>,
    ) -> DomainResult<()> {
        let net_balance = self
            .net_balance
            .checked_add(direction.signed(quantity))
            .ok_or_else(out_of_range)?;

        if direction == Direction::In {
            let value = Decimal::from(quantity)
                .checked_mul(price.unwrap_or(Decimal::ZERO))
                .ok_or_else(out_of_range)?;
            let total_in_quantity = self
                .total_in_quantity
                .checked_add(quantity)
                .ok_or_else(out_of_range)?;
            let total_in_value = self
                .total_in_value
                .checked_add(value)
                .ok_or_else(out_of_range)?;
            self.total_in_quantity = total_in_quantity;
            self.total_in_value = total_in_value;
        }
        self.net_balance = net_balance;
        Ok(())
    }

    /// `total_in_value / total_in_quantity` while the net balance is positive,
    /// zero once the item is depleted (or the history nets negative).
    pub fn average_cost(&self) -> Decimal {
        if self.net_balance <= 0 || self.total_in_quantity <= 0 {
            return Decimal::ZERO;
        }
        self.total_in_value
            .checked_div(Decimal::from(self.total_in_quantity))
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn weighted_average_of_two_receipts() {
        let mut avg = WeightedAverage::new();
        avg.record(Direction::In, 10, Some(dec!(2))).unwrap();
        avg.record(Direction::In, 5, Some(dec!(4))).unwrap();

        assert_eq!(avg.total_in_quantity, 15);
        assert_eq!(avg.total_in_value, dec!(40));
        assert_eq!(avg.average_cost().round_dp(2), dec!(2.67));
    }

    #[test]
    fn full_depletion_zeroes_cost() {
        let mut avg = WeightedAverage::new();
        avg.record(Direction::In, 10, Some(dec!(2))).unwrap();
        avg.record(Direction::In, 5, Some(dec!(4))).unwrap();
        avg.record(Direction::Out, 15, None).unwrap();

        assert_eq!(avg.net_balance, 0);
        assert_eq!(avg.average_cost(), Decimal::ZERO);
    }

    #[test]
    fn partial_withdrawal_keeps_inbound_average() {
        let mut avg = WeightedAverage::new();
        avg.record(Direction::In, 4, Some(dec!(2.50))).unwrap();
        avg.record(Direction::Out, 3, None).unwrap();
        assert_eq!(avg.average_cost(), dec!(2.50));
    }

    #[test]
    fn value_overflow_is_an_error_and_keeps_totals() {
        let mut avg = WeightedAverage::new();
        let price = Decimal::from(10_000_000_000i64);
        avg.record(Direction::In, i64::MAX / 2, Some(price)).unwrap();
        let before = avg.clone();

        let err = avg.record(Direction::In, i64::MAX / 2, Some(price)).unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");
        assert_eq!(avg, before);
    }

    #[test]
    fn quantity_overflow_is_an_error() {
        let mut avg = WeightedAverage::new();
        avg.record(Direction::In, i64::MAX, None).unwrap();
        avg.record(Direction::Out, i64::MAX, None).unwrap();
        assert_eq!(avg.net_balance, 0);

        let err = avg.record(Direction::In, 1, None).unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");
        assert_eq!(avg.total_in_quantity, i64::MAX);
        assert_eq!(avg.net_balance, 0);
    }

    #[test]
    fn large_but_representable_history_averages_exactly() {
        let mut avg = WeightedAverage::new();
        avg.record(Direction::In, 1_000_000_000_000, Some(dec!(99999999.5)))
            .unwrap();
        avg.record(Direction::In, 1_000_000_000_000, Some(dec!(0.5)))
            .unwrap();
        assert_eq!(avg.total_in_quantity, 2_000_000_000_000);
        assert_eq!(avg.total_in_value, dec!(100000000000000000000));
        assert_eq!(avg.average_cost(), dec!(50000000));
    }

    #[test]
    fn empty_history_costs_nothing() {
        assert_eq!(WeightedAverage::new().average_cost(), Decimal::ZERO);
    }

    proptest! {
        /// Property: while stock remains, the average sits between the cheapest and
        /// the most expensive receipt.
        #[test]
        fn average_is_bounded_by_receipt_prices(
            receipts in prop::collection::vec((1i64..100, 0u32..10_000), 1..20)
        ) {
            let mut avg = WeightedAverage::new();
            let mut min = Decimal::MAX;
            let mut max = Decimal::ZERO;
            for (qty, cents) in &receipts {
                let price = Decimal::new(i64::from(*cents), 2);
                min = min.min(price);
                max = max.max(price);
                avg.record(Direction::In, *qty, Some(price)).unwrap();
            }

            let cost = avg.average_cost();
            prop_assert!(cost >= min);
            prop_assert!(cost <= max);
        }
    }
}
