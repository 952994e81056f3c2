//! Read-only rider and driver history tables.
//!
//! The offline cache builder aggregates historical bids per rider and per
//! driver and dumps the rows as JSON arrays. The cache loads both tables at
//! startup, computes global means as the fallback for unknown ids and never
//! fails a lookup: a missing artefact degrades to the documented defaults
//! for new participants.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Aggregates for one rider, as written by the cache builder.
#[derive(Clone, Debug, Deserialize)]
pub struct UserHistoryRow {
    pub user_id: u64,
    pub user_order_count: f64,
    pub user_acceptance_rate: f64,
    pub user_avg_bid: f64,
    pub user_avg_price_ratio: f64,
    pub user_is_new: f64,
    pub user_is_vip: f64,
    pub user_is_price_sensitive: f64,
}

/// Aggregates for one driver, as written by the cache builder.
#[derive(Clone, Debug, Deserialize)]
pub struct DriverHistoryRow {
    pub driver_id: u64,
    pub driver_bid_count: f64,
    pub driver_acceptance_rate: f64,
    pub driver_avg_bid: f64,
    pub driver_avg_bid_ratio: f64,
    pub driver_is_active: f64,
    pub driver_is_aggressive: f64,
    pub driver_is_flexible: f64,
}

/// Rider-side history features handed to the feature builder.
#[derive(Clone, Debug, PartialEq)]
pub struct UserFeatures {
    pub order_count: f64,
    pub acceptance_rate: f64,
    pub avg_price_ratio: f64,
    pub is_new: f64,
    pub is_vip: f64,
    pub is_price_sensitive: f64,
    /// `None` when no history exists at all; the builder then compares the
    /// candidate price against itself.
    pub avg_bid: Option<f64>,
}

/// Driver-side history features handed to the feature builder.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverFeatures {
    pub bid_count: f64,
    pub acceptance_rate: f64,
    pub avg_bid_ratio: f64,
    pub is_active: f64,
    pub is_aggressive: f64,
    pub is_flexible: f64,
    pub avg_bid: Option<f64>,
}

/// History features resolved for one request.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryFeatures {
    pub user: UserFeatures,
    pub driver: DriverFeatures,
}

impl Default for HistoryFeatures {
    /// Defaults for participants without any recorded history, matching the
    /// values the model was trained with for first-time ids.
    fn default() -> Self {
        Self {
            user: UserFeatures {
                order_count: 1.0,
                acceptance_rate: 0.5,
                avg_price_ratio: 1.0,
                is_new: 1.0,
                is_vip: 0.0,
                is_price_sensitive: 0.5,
                avg_bid: None,
            },
            driver: DriverFeatures {
                bid_count: 1.0,
                acceptance_rate: 0.5,
                avg_bid_ratio: 1.0,
                is_active: 0.5,
                is_aggressive: 0.0,
                is_flexible: 0.5,
                avg_bid: None,
            },
        }
    }
}

/// Both history tables plus the global means computed at load time.
pub struct HistoryCache {
    user_by_id: HashMap<u64, UserHistoryRow>,
    driver_by_id: HashMap<u64, DriverHistoryRow>,
    user_means: UserFeatures,
    driver_means: DriverFeatures,
}

impl HistoryCache {
    /// A cache with no recorded history; every lookup yields the defaults.
    pub fn empty() -> Self {
        let defaults = HistoryFeatures::default();
        Self {
            user_by_id: HashMap::new(),
            driver_by_id: HashMap::new(),
            user_means: defaults.user,
            driver_means: defaults.driver,
        }
    }

    /// Builds the cache from already-parsed rows. Means are computed over
    /// the rows; empty tables keep the defaults.
    pub fn from_rows(users: Vec<UserHistoryRow>, drivers: Vec<DriverHistoryRow>) -> Self {
        let mut cache = Self::empty();
        if !users.is_empty() {
            cache.user_means = user_means(&users);
            cache.user_by_id = users.into_iter().map(|row| (row.user_id, row)).collect();
        }
        if !drivers.is_empty() {
            cache.driver_means = driver_means(&drivers);
            cache.driver_by_id = drivers.into_iter().map(|row| (row.driver_id, row)).collect();
        }
        cache
    }

    /// Reads both tables from JSON row arrays.
    pub fn read(users: impl Read, drivers: impl Read) -> serde_json::Result<Self> {
        let users: Vec<UserHistoryRow> = serde_json::from_reader(users)?;
        let drivers: Vec<DriverHistoryRow> = serde_json::from_reader(drivers)?;
        Ok(Self::from_rows(users, drivers))
    }

    /// Loads the configured artefacts. A missing or unreadable file is not
    /// fatal: the affected table stays empty and a warning is logged once.
    pub fn load(user_path: Option<&Path>, driver_path: Option<&Path>) -> Self {
        let users = user_path.map(load_rows::<UserHistoryRow>).unwrap_or_default();
        let drivers = driver_path
            .map(load_rows::<DriverHistoryRow>)
            .unwrap_or_default();
        log::info!(
            "history cache loaded with {} riders and {} drivers",
            users.len(),
            drivers.len()
        );
        Self::from_rows(users, drivers)
    }

    /// Resolves the history features for a request. Known ids return their
    /// row, unknown ids the global means, absent ids (or an empty cache) the
    /// defaults for new participants.
    pub fn lookup(&self, user_id: Option<u64>, driver_id: Option<u64>) -> HistoryFeatures {
        let defaults = HistoryFeatures::default();
        let user = match user_id {
            Some(id) if !self.user_by_id.is_empty() => match self.user_by_id.get(&id) {
                Some(row) => UserFeatures {
                    order_count: row.user_order_count,
                    acceptance_rate: row.user_acceptance_rate,
                    avg_price_ratio: row.user_avg_price_ratio,
                    is_new: row.user_is_new,
                    is_vip: row.user_is_vip,
                    is_price_sensitive: row.user_is_price_sensitive,
                    avg_bid: Some(row.user_avg_bid),
                },
                None => self.user_means.clone(),
            },
            _ => defaults.user,
        };
        let driver = match driver_id {
            Some(id) if !self.driver_by_id.is_empty() => match self.driver_by_id.get(&id) {
                Some(row) => DriverFeatures {
                    bid_count: row.driver_bid_count,
                    acceptance_rate: row.driver_acceptance_rate,
                    avg_bid_ratio: row.driver_avg_bid_ratio,
                    is_active: row.driver_is_active,
                    is_aggressive: row.driver_is_aggressive,
                    is_flexible: row.driver_is_flexible,
                    avg_bid: Some(row.driver_avg_bid),
                },
                None => self.driver_means.clone(),
            },
            _ => defaults.driver,
        };
        HistoryFeatures { user, driver }
    }
}

fn load_rows<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    match File::open(path).map_err(anyhow::Error::from).and_then(|file| {
        serde_json::from_reader(file).map_err(anyhow::Error::from)
    }) {
        Ok(rows) => rows,
        Err(err) => {
            log::warn!(
                "history artefact {} unavailable, falling back to default means: {}",
                path.display(),
                err
            );
            Vec::new()
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn user_means(rows: &[UserHistoryRow]) -> UserFeatures {
    UserFeatures {
        order_count: mean(rows.iter().map(|r| r.user_order_count)),
        acceptance_rate: mean(rows.iter().map(|r| r.user_acceptance_rate)),
        avg_price_ratio: mean(rows.iter().map(|r| r.user_avg_price_ratio)),
        is_new: mean(rows.iter().map(|r| r.user_is_new)),
        is_vip: mean(rows.iter().map(|r| r.user_is_vip)),
        is_price_sensitive: mean(rows.iter().map(|r| r.user_is_price_sensitive)),
        avg_bid: Some(mean(rows.iter().map(|r| r.user_avg_bid))),
    }
}

fn driver_means(rows: &[DriverHistoryRow]) -> DriverFeatures {
    DriverFeatures {
        bid_count: mean(rows.iter().map(|r| r.driver_bid_count)),
        acceptance_rate: mean(rows.iter().map(|r| r.driver_acceptance_rate)),
        avg_bid_ratio: mean(rows.iter().map(|r| r.driver_avg_bid_ratio)),
        is_active: mean(rows.iter().map(|r| r.driver_is_active)),
        is_aggressive: mean(rows.iter().map(|r| r.driver_is_aggressive)),
        is_flexible: mean(rows.iter().map(|r| r.driver_is_flexible)),
        avg_bid: Some(mean(rows.iter().map(|r| r.driver_avg_bid))),
    }
}
