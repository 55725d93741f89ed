//! In-memory table of named locations and their current sample, perturbed by a
//! periodic simulation tick to stand in for a live global feed.

use std::collections::BTreeMap;

use rand::Rng;

use crate::types::{SampleSource, WeatherSample};

/// Sentinel entry that the simulation never touches.
pub const DEFAULT_ENTRY: &str = "Other";

/// Largest temperature step per tick, °C
pub const TEMPERATURE_STEP: f64 = 2.0;
/// Largest humidity step per tick, percentage points
pub const HUMIDITY_STEP: i16 = 5;
/// Largest wind speed step per tick, m/s
pub const WIND_STEP: f64 = 1.0;
/// Humidity is kept within this band by the simulation
pub const HUMIDITY_BOUNDS: (u8, u8) = (20, 95);

/// (name, °C, humidity %, wind m/s)
const WORLD_CITIES: &[(&str, f64, u8, f64)] = &[
    ("Bengaluru", 27.0, 62, 4.1),
    ("Mumbai", 31.0, 78, 5.2),
    ("Delhi", 33.5, 45, 3.4),
    ("Chennai", 32.0, 74, 4.8),
    ("Kathmandu", 21.0, 66, 2.3),
    ("Singapore", 30.5, 84, 3.0),
    ("Tokyo", 18.0, 60, 3.9),
    ("Sydney", 22.0, 58, 6.1),
    ("Dubai", 38.0, 35, 4.4),
    ("Cairo", 34.0, 30, 4.0),
    ("Nairobi", 19.5, 55, 3.6),
    ("Cape Town", 16.0, 70, 7.5),
    ("London", 12.0, 76, 5.0),
    ("Paris", 14.0, 70, 4.2),
    ("Reykjavik", 3.0, 80, 8.8),
    ("Moscow", -4.0, 82, 4.5),
    ("New York", 15.0, 64, 5.5),
    ("Mexico City", 20.0, 50, 2.8),
    ("Rio de Janeiro", 28.0, 79, 4.6),
    ("Anchorage", -8.0, 72, 3.3),
];

/// Location name → latest sample.
#[derive(Debug, Clone)]
pub struct GlobalTemperatureTable {
    entries: BTreeMap<String, WeatherSample>,
}

impl GlobalTemperatureTable {
    /// Build a table from `entries`, adding the sentinel if it is missing.
    pub fn new(entries: impl IntoIterator<Item = (String, WeatherSample)>) -> Self {
        let mut entries: BTreeMap<_, _> = entries.into_iter().collect();
        entries
            .entry(DEFAULT_ENTRY.to_string())
            .or_insert_with(|| sample(25.0, 60, 5.0));
        Self { entries }
    }

    /// The stock table of world cities.
    pub fn world() -> Self {
        Self::new(
            WORLD_CITIES
                .iter()
                .map(|&(name, t, h, w)| (name.to_string(), sample(t, h, w))),
        )
    }

    /// Apply one simulation pass to every entry except the sentinel.
    ///
    /// Entries are independent: one whose values are not finite is skipped and the
    /// rest still update. Returns the number of entries updated.
    pub fn tick<R: Rng>(&mut self, rng: &mut R) -> usize {
        let mut updated = 0;

        for (name, current) in self.entries.iter_mut() {
            if name == DEFAULT_ENTRY {
                continue;
            }
            if !current.temperature.is_finite() || !current.wind_speed.is_finite() {
                tracing::debug!("Skipping '{}' with non-finite sample", name);
                continue;
            }

            let temperature =
                current.temperature + rng.gen_range(-TEMPERATURE_STEP..=TEMPERATURE_STEP);
            let humidity = (i16::from(current.humidity)
                + rng.gen_range(-HUMIDITY_STEP..=HUMIDITY_STEP))
            .clamp(i16::from(HUMIDITY_BOUNDS.0), i16::from(HUMIDITY_BOUNDS.1));
            let wind = (current.wind_speed + rng.gen_range(-WIND_STEP..=WIND_STEP)).max(0.0);

            // clamp above keeps humidity inside u8
            *current = sample(temperature, humidity as u8, wind);
            updated += 1;
        }

        updated
    }

    pub fn get(&self, name: &str) -> Option<&WeatherSample> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every entry, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, WeatherSample)> {
        self.entries
            .iter()
            .map(|(name, s)| (name.clone(), s.clone()))
            .collect()
    }
}

impl Default for GlobalTemperatureTable {
    fn default() -> Self {
        Self::world()
    }
}

fn sample(temperature: f64, humidity: u8, wind: f64) -> WeatherSample {
    let condition = crate::types::Condition::from_temperature(temperature);
    WeatherSample::new(
        temperature,
        humidity,
        wind,
        condition.description(),
        SampleSource::Simulated,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Condition;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_world_table_has_sentinel() {
        let table = GlobalTemperatureTable::world();
        assert_eq!(table.len(), WORLD_CITIES.len() + 1);
        assert!(table.get(DEFAULT_ENTRY).is_some());
    }

    #[test]
    fn test_condition_tracks_temperature_after_many_ticks() {
        let mut table = GlobalTemperatureTable::world();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..250 {
            table.tick(&mut rng);
            for (name, s) in table.snapshot() {
                assert_eq!(
                    s.condition,
                    Condition::from_temperature(s.temperature),
                    "{} drifted out of sync",
                    name
                );
            }
        }
    }

    #[test]
    fn test_tick_bounds() {
        let mut table = GlobalTemperatureTable::world();
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..100 {
            let before = table.snapshot();
            table.tick(&mut rng);
            for (name, old) in before {
                let new = table.get(&name).unwrap();
                if name == DEFAULT_ENTRY {
                    continue;
                }
                assert!((new.temperature - old.temperature).abs() <= TEMPERATURE_STEP + 1e-9);
                assert!(new.humidity >= HUMIDITY_BOUNDS.0 && new.humidity <= HUMIDITY_BOUNDS.1);
                assert!(new.wind_speed >= 0.0);
            }
        }
    }

    #[test]
    fn test_sentinel_is_never_mutated() {
        let mut table = GlobalTemperatureTable::world();
        let before = table.get(DEFAULT_ENTRY).cloned().unwrap();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..20 {
            table.tick(&mut rng);
        }

        assert_eq!(table.get(DEFAULT_ENTRY), Some(&before));
    }

    #[test]
    fn test_broken_entry_is_skipped_others_update() {
        let mut broken = sample(20.0, 50, 3.0);
        broken.temperature = f64::NAN;
        let mut table = GlobalTemperatureTable::new([
            ("Broken".to_string(), broken),
            ("Fine".to_string(), sample(20.0, 50, 3.0)),
        ]);
        let mut rng = StdRng::seed_from_u64(5);

        assert_eq!(table.tick(&mut rng), 1);
        assert!(table.get("Broken").unwrap().temperature.is_nan());
    }

    #[test]
    fn test_wind_never_negative() {
        let mut table =
            GlobalTemperatureTable::new([("Calm".to_string(), sample(10.0, 50, 0.0))]);
        let mut rng = StdRng::seed_from_u64(9);

        for _ in 0..200 {
            table.tick(&mut rng);
            assert!(table.get("Calm").unwrap().wind_speed >= 0.0);
        }
    }
}
