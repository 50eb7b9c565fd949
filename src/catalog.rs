use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::traits::CatalogProvider;
use crate::types::{DeliveryEstimate, MenuItem, Restaurant};

const NAME_PREFIXES: &[&str] = &[
    "Green", "Iron", "Golden", "Urban", "Fresh", "Blue", "Spice", "Garden",
    "Power", "Coastal", "Wild", "Sunny",
];

const NAME_SUFFIXES: &[&str] = &[
    "Bowl", "Wok", "Kitchen", "Grill", "Table", "Bistro", "Plate", "Spoon",
];

const CUISINES: &[&str] = &[
    "healthy", "mediterranean", "asian", "mexican", "italian", "american",
];

/// Tag vocabulary shared by restaurants and menu items. Health goals and
/// dietary restrictions are matched against these.
const GOAL_TAGS: &[&str] = &["low-calorie", "high-protein", "balanced", "keto-friendly"];
const DIET_TAGS: &[&str] = &["vegetarian", "vegan", "gluten-free"];

const PROTEINS: &[&str] = &[
    "Grilled Chicken", "Seared Salmon", "Tofu", "Steak", "Tempeh", "Shrimp",
];
const BASES: &[&str] = &["Rice Bowl", "Salad", "Wrap", "Noodles", "Grain Bowl", "Plate"];
const SAUCES: &[&str] = &["Teriyaki", "Chimichurri", "Lemon Herb", "Peanut", "Chipotle", "Pesto"];

/// Deterministic in-memory catalog standing in for a real delivery API.
///
/// The pool is generated once from a fixed seed so searches, menus, and
/// estimates are stable across calls and across restarts.
pub struct MockCatalog {
    restaurants: Vec<Restaurant>,
    menus: Vec<(String, Vec<MenuItem>)>,
}

impl MockCatalog {
    pub fn new() -> Self {
        let mut rng = StdRng::seed_from_u64(0x6e6f_7572_6973_6821);
        let mut restaurants = Vec::new();
        let mut menus = Vec::new();

        for i in 0..24 {
            let prefix = NAME_PREFIXES[rng.gen_range(0..NAME_PREFIXES.len())];
            let suffix = NAME_SUFFIXES[rng.gen_range(0..NAME_SUFFIXES.len())];
            let cuisine = CUISINES[i % CUISINES.len()];
            let id = format!("rest-{:03}", i);

            // Round-robin primary tags so every goal and diet is represented
            // somewhere in the pool; extra tags come from the seeded rng.
            let mut tags = vec![GOAL_TAGS[i % GOAL_TAGS.len()].to_string()];
            if rng.gen_bool(0.5) {
                tags.push(GOAL_TAGS[rng.gen_range(0..GOAL_TAGS.len())].to_string());
            }
            if i % 2 == 0 {
                tags.push(DIET_TAGS[(i / 2) % DIET_TAGS.len()].to_string());
            }
            tags.dedup();

            let minutes = rng.gen_range(20..50);
            restaurants.push(Restaurant {
                id: id.clone(),
                name: format!("{} {}", prefix, suffix),
                cuisine: cuisine.to_string(),
                rating: (rng.gen_range(35..=50) as f32) / 10.0,
                delivery_fee: (rng.gen_range(0..=599) as f64) / 100.0,
                estimated_time: format!("{}-{} min", minutes, minutes + 10),
                tags,
            });

            menus.push((id, Self::build_menu(i, &mut rng)));
        }

        Self { restaurants, menus }
    }

    fn build_menu(restaurant_index: usize, rng: &mut StdRng) -> Vec<MenuItem> {
        let count = rng.gen_range(5..=8);
        let mut items = Vec::with_capacity(count);
        for j in 0..count {
            let protein = PROTEINS[rng.gen_range(0..PROTEINS.len())];
            let base = BASES[rng.gen_range(0..BASES.len())];
            let sauce = SAUCES[rng.gen_range(0..SAUCES.len())];
            let calories = rng.gen_range(350..900);
            let protein_g = rng.gen_range(15..55);

            let mut tags = Vec::new();
            if calories < 550 {
                tags.push("low-calorie".to_string());
            }
            if protein_g >= 35 {
                tags.push("high-protein".to_string());
            }
            if matches!(protein, "Tofu" | "Tempeh") {
                tags.push("vegetarian".to_string());
                tags.push("vegan".to_string());
            }
            if rng.gen_bool(0.3) {
                tags.push("gluten-free".to_string());
            }

            items.push(MenuItem {
                id: format!("item-{:03}-{}", restaurant_index, j),
                name: format!("{} {} with {}", protein, base, sauce),
                price: (rng.gen_range(850..=1750) as f64) / 100.0,
                description: format!(
                    "{} over a {} finished with {} sauce.",
                    protein,
                    base.to_lowercase(),
                    sauce.to_lowercase()
                ),
                calories,
                protein_g,
                carbs_g: rng.gen_range(20..90),
                fat_g: rng.gen_range(8..40),
                tags,
            });
        }
        items
    }
}

impl Default for MockCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a free-text health goal onto catalog tags.
fn goal_tag(health_goal: &str) -> Option<&'static str> {
    let goal = health_goal.to_lowercase();
    if goal.contains("lose") || goal.contains("weight") || goal.contains("cut") {
        Some("low-calorie")
    } else if goal.contains("muscle") || goal.contains("bulk") || goal.contains("protein") {
        Some("high-protein")
    } else if goal.contains("keto") {
        Some("keto-friendly")
    } else {
        None
    }
}

#[async_trait]
impl CatalogProvider for MockCatalog {
    /// Filter by cuisine, health goal, and dietary restrictions in turn. If
    /// the filters eliminate everything, fall back to the ten top-rated
    /// restaurants rather than returning nothing — users with strict
    /// combinations still get a starting point.
    async fn search(
        &self,
        _location: Option<&str>,
        cuisine: Option<&str>,
        health_goal: Option<&str>,
        dietary: &[String],
    ) -> Vec<Restaurant> {
        let mut results: Vec<&Restaurant> = self.restaurants.iter().collect();

        if let Some(cuisine) = cuisine {
            let wanted = cuisine.to_lowercase();
            results.retain(|r| r.cuisine.contains(&wanted));
        }
        if let Some(tag) = health_goal.and_then(goal_tag) {
            results.retain(|r| r.tags.iter().any(|t| t == tag));
        }
        for restriction in dietary {
            let restriction = restriction.to_lowercase();
            if DIET_TAGS.contains(&restriction.as_str()) {
                results.retain(|r| r.tags.iter().any(|t| *t == restriction));
            }
        }

        if results.is_empty() {
            debug!("Catalog filters matched nothing, relaxing to top-rated");
            let mut all: Vec<&Restaurant> = self.restaurants.iter().collect();
            all.sort_by(|a, b| b.rating.partial_cmp(&a.rating).unwrap_or(std::cmp::Ordering::Equal));
            return all.into_iter().take(10).cloned().collect();
        }

        results.sort_by(|a, b| b.rating.partial_cmp(&a.rating).unwrap_or(std::cmp::Ordering::Equal));
        results.into_iter().cloned().collect()
    }

    async fn menu(&self, restaurant_id: &str) -> Vec<MenuItem> {
        self.menus
            .iter()
            .find(|(id, _)| id == restaurant_id)
            .map(|(_, items)| items.clone())
            .unwrap_or_default()
    }

    async fn delivery_estimate(&self, restaurant_id: &str) -> DeliveryEstimate {
        match self.restaurants.iter().find(|r| r.id == restaurant_id) {
            Some(r) => DeliveryEstimate {
                window: r.estimated_time.clone(),
                fee: r.delivery_fee,
            },
            None => DeliveryEstimate {
                window: "30-45 min".to_string(),
                fee: 3.99,
            },
        }
    }
}
