//! Fuel economics: the deterministic cost bound derived from trip distance.

/// Documented average consumption of the reference vehicle fleet.
pub const CONSUMPTION_PER_100KM: f64 = 9.0;
/// Documented fuel price in local currency units per liter.
pub const PRICE_PER_LITER: f64 = 55.0;
/// A bid below `MIN_PROFIT_MARGIN * fuel_cost` does not pay for the trip.
pub const MIN_PROFIT_MARGIN: f64 = 1.3;

/// Per-trip fuel summary. All values are unrounded; the response assembler
/// rounds to two decimals.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FuelEconomics {
    pub distance_km: f64,
    pub fuel_liters: f64,
    pub fuel_cost: f64,
    pub min_profitable_price: f64,
    pub consumption_per_100km: f64,
    pub price_per_liter: f64,
}

impl FuelEconomics {
    /// Derives the fuel summary for a trip of the given length in meters.
    pub fn for_distance(distance_in_meters: f64) -> Self {
        let distance_km = distance_in_meters / 1000.0;
        let fuel_liters = (distance_km * CONSUMPTION_PER_100KM) / 100.0;
        let fuel_cost = fuel_liters * PRICE_PER_LITER;
        Self {
            distance_km,
            fuel_liters,
            fuel_cost,
            min_profitable_price: MIN_PROFIT_MARGIN * fuel_cost,
            consumption_per_100km: CONSUMPTION_PER_100KM,
            price_per_liter: PRICE_PER_LITER,
        }
    }

    /// Net profit of a bid with the given expected value.
    pub fn net_profit(&self, expected_value: f64) -> f64 {
        expected_value - self.fuel_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::round2;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn short_trip_cost() {
        let fuel = FuelEconomics::for_distance(1500.0);
        assert_approx_eq!(fuel.distance_km, 1.5);
        assert_approx_eq!(round2(fuel.fuel_cost), 7.43);
    }

    #[test]
    fn long_trip_cost_and_floor() {
        let fuel = FuelEconomics::for_distance(15_000.0);
        assert_approx_eq!(round2(fuel.fuel_cost), 74.25);
        assert_approx_eq!(round2(fuel.min_profitable_price), 96.53);
    }

    #[test]
    fn zero_distance_is_free() {
        let fuel = FuelEconomics::for_distance(0.0);
        assert_approx_eq!(fuel.fuel_cost, 0.0);
        assert_approx_eq!(fuel.min_profitable_price, 0.0);
        assert_approx_eq!(fuel.net_profit(120.0), 120.0);
    }

    #[test]
    fn net_profit_subtracts_fuel() {
        let fuel = FuelEconomics::for_distance(10_000.0);
        assert_approx_eq!(fuel.net_profit(200.0), 200.0 - fuel.fuel_cost);
    }
}
