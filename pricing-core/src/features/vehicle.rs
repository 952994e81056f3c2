//! Vehicle class detection from the fixed brand/model table.

/// Service class of the vehicle, used for the taxi-type one-hot features.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaxiType {
    Economy,
    Comfort,
    Business,
}

const ECONOMY_BRANDS: &[&str] = &["Daewoo", "Lifan", "FAW", "Great Wall", "Geely", "ЗАЗ", "Chery"];
const ECONOMY_MODELS: &[&str] = &[
    "Logan", "Symbol", "Sandero", "Lacetti", "Aveo", "Nexia", "Rio", "Spectra", "Granta",
    "Гранта", "Kalina", "Калина", "Priora", "Приора", "2110", "2112", "2115", "2107", "2114",
    "Самара", "S18",
];

const BUSINESS_BRANDS: &[&str] = &["Toyota", "Honda", "Mitsubishi", "Subaru"];
const BUSINESS_MODELS: &[&str] = &[
    "Camry", "Corolla", "RAV4", "Avensis", "Civic", "Accord", "Qashqai", "X-Trail", "Tiguan",
    "Passat CC", "Passat", "CX-5", "Outlander", "Kyron", "Legacy",
];

const LADA_BRANDS: &[&str] = &["LADA", "Лада", "ВАЗ (LADA)"];
const LADA_COMFORT_MODELS: &[&str] = &["Vesta", "Веста", "X-Ray", "Largus", "Ларгус", "GFK110"];

/// Classifies a vehicle by its brand and model name. Anything outside the
/// fixed economy and business tables counts as comfort, which also covers
/// the newer LADA models listed explicitly.
pub fn detect_taxi_type(carname: &str, carmodel: &str) -> TaxiType {
    let carname = carname.trim();
    let carmodel = carmodel.trim();

    if ECONOMY_BRANDS.contains(&carname) || ECONOMY_MODELS.contains(&carmodel) {
        return TaxiType::Economy;
    }
    if BUSINESS_BRANDS.contains(&carname) || BUSINESS_MODELS.contains(&carmodel) {
        return TaxiType::Business;
    }
    if LADA_BRANDS.contains(&carname) && LADA_COMFORT_MODELS.contains(&carmodel) {
        return TaxiType::Comfort;
    }
    TaxiType::Comfort
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn economy_by_brand_or_model() {
        assert_eq!(detect_taxi_type("Daewoo", "Matiz"), TaxiType::Economy);
        assert_eq!(detect_taxi_type("Renault", "Logan"), TaxiType::Economy);
        assert_eq!(detect_taxi_type("LADA", "Гранта"), TaxiType::Economy);
    }

    #[test]
    fn business_by_brand_or_model() {
        assert_eq!(detect_taxi_type("Toyota", "Camry"), TaxiType::Business);
        assert_eq!(detect_taxi_type("Volkswagen", "Passat"), TaxiType::Business);
    }

    #[test]
    fn lada_comfort_models() {
        assert_eq!(detect_taxi_type("LADA", "Vesta"), TaxiType::Comfort);
        assert_eq!(detect_taxi_type("ВАЗ (LADA)", "Ларгус"), TaxiType::Comfort);
    }

    #[test]
    fn unknown_defaults_to_comfort() {
        assert_eq!(detect_taxi_type("Hyundai", "Solaris"), TaxiType::Comfort);
        assert_eq!(detect_taxi_type("", ""), TaxiType::Comfort);
    }

    #[test]
    fn whitespace_is_trimmed() {
        assert_eq!(detect_taxi_type(" Toyota ", " Corolla "), TaxiType::Business);
    }
}
