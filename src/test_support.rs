use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use shardload_rs::config::ShardTarget;
use shardload_rs::model::{Listing, ShardId};
use shardload_rs::shard_map::default_borough_table;
use shardload_rs::ShardTargets;

/// Partition keys the default shard map does not know.
#[allow(dead_code)]
pub const UNKNOWN_KEYS: [&str; 2] = ["Unknown District", "Richmond upon Thames"];

#[derive(Debug, Clone)]
pub struct GeneratedListings {
    pub records: Vec<Listing>,
    #[allow(dead_code)]
    pub unroutable: usize,
}

/// Deterministic listings spread over the London boroughs.
///
/// `unroutable_probability` of the records get an unknown or missing
/// neighbourhood; `null_probability` controls how often payload fields are
/// left null.
pub fn generate_listings(
    count: u32,
    unroutable_probability: f64,
    null_probability: f64,
    seed: u64,
) -> GeneratedListings {
    let mut rng = StdRng::seed_from_u64(seed);
    let boroughs: Vec<String> = default_borough_table().into_keys().collect();
    let room_types = ["Entire home/apt", "Private room", "Shared room", "Hotel room"];
    let mut records = Vec::with_capacity(count as usize);
    let mut unroutable = 0;

    for idx in 1..=count {
        let neighbourhood = if rng.random_bool(unroutable_probability) {
            unroutable += 1;
            if rng.random_bool(0.5) {
                None
            } else {
                Some(UNKNOWN_KEYS[rng.random_range(0..UNKNOWN_KEYS.len())].to_string())
            }
        } else {
            Some(boroughs[rng.random_range(0..boroughs.len())].clone())
        };

        let mut listing = Listing::new(idx as i64, None);
        listing.neighbourhood = neighbourhood;
        let present = |rng: &mut StdRng| !rng.random_bool(null_probability);

        if present(&mut rng) {
            listing.name = Some(format!("Listing {idx}"));
        }
        if present(&mut rng) {
            listing.host_id = Some(rng.random_range(1_000..9_999_999));
        }
        if present(&mut rng) {
            listing.host_name = Some(format!("Host {}", idx % 97));
        }
        if present(&mut rng) {
            listing.latitude = Some(51.3 + rng.random_range(0.0..0.4));
            listing.longitude = Some(-0.5 + rng.random_range(0.0..0.7));
        }
        if present(&mut rng) {
            listing.room_type = Some(room_types[rng.random_range(0..room_types.len())].to_string());
        }
        if present(&mut rng) {
            listing.price = Some(rng.random_range(20..900));
        }
        listing.minimum_nights = Some(rng.random_range(1..30));
        listing.number_of_reviews = Some(rng.random_range(0..400));
        if present(&mut rng) {
            let day = rng.random_range(0..1500);
            listing.last_review = time::Date::from_calendar_date(2020, time::Month::January, 1)
                .ok()
                .and_then(|start| start.checked_add(time::Duration::days(day)));
            listing.reviews_per_month = Some(rng.random_range(0.0..8.0));
        }
        listing.calculated_host_listings_count = Some(rng.random_range(1..40));
        listing.availability_365 = Some(rng.random_range(0..366));
        listing.number_of_reviews_ltm = Some(rng.random_range(0..60));

        records.push(listing);
    }

    GeneratedListings {
        records,
        unroutable,
    }
}

/// Local targets for `shards`, suitable for the in-memory cluster.
#[allow(dead_code)]
pub fn local_targets(shards: &[&str]) -> ShardTargets {
    ShardTargets::new(shards.iter().enumerate().map(|(idx, shard)| ShardTarget {
        shard: ShardId::from(*shard),
        host: "localhost".to_string(),
        port: 5433 + idx as u16,
        dbname: format!("{shard}_db"),
        user: "postgres".to_string(),
        password: None,
    }))
}
