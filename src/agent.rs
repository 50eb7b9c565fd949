use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cart::CartLedger;
use crate::classify::analyze_goal;
use crate::context::ContextBuilder;
use crate::session::{SessionSignal, SessionTracker};
use crate::store::UserLocks;
use crate::traits::{CatalogProvider, TextCompletion, UserStore};
use crate::types::{CartItem, HealthGoal, ReminderEvent, UserRecord};

const HELP_TEXT: &str = "**GG Nourish commands**\n\
`!start` — what I do\n\
`!healthgoal <text>` — set your health goal\n\
`!dietary <tokens>` — add allergies or diets (comma separated)\n\
`!address <text>` — set your delivery address\n\
`!stats` — today's gaming time and session history\n\
`!food` — restaurant picks for your goal\n\
`!order` — browse restaurants, `!order <id>` for a menu, `!order <id> <n>` to add\n\
`!cart` — view cart, `!cart set <n> <qty>`, `!cart clear`\n\
`!checkout [payment] | [notes]` — place the order\n\
`!recipe <craving>` — a healthy recipe for what you're craving\n\
`!fitnessplan` — a weekly plan that fits a gaming schedule\n\
`!workout` — a 5-minute desk break\n\
`!addfavorite <restaurant|recipe> <name>` / `!favorites`\n\
Or just talk to me — tell me when you start and stop gaming.";

const START_TEXT: &str = "Hey! I'm GG Nourish — your health companion between matches. \
I track your gaming time and nudge you to take breaks, find food that fits your goals, \
and put together recipes and workouts that work around your sessions.\n\n\
Start with `!healthgoal <what you want>` and `!help` for everything else.";

const WORKOUT_FALLBACK: &str = "**5-minute desk reset**\n\
1. 20 shoulder rolls, both directions\n\
2. 15 chair squats\n\
3. 30s wrist and forearm stretches per side\n\
4. 20 desk push-ups\n\
5. 60s look out the window, focus far away (your eyes need it)";

const RECIPE_FALLBACK: &str = "Quick one while my kitchen brain is offline: \
grilled chicken (or chickpeas), microwave rice, frozen stir-fry veggies, soy sauce. \
Ten minutes, one pan, solid macros.";

const FITNESS_FALLBACK: &str = "Can't build a custom plan right now. The reliable default: \
3x/week strength (push/pull/legs), a walk on off days, and stand up every hour you game.";

/// Top-level message handler: profile commands, ordering flow, and free-text
/// conversation with session detection.
pub struct NourishAgent {
    store: Arc<dyn UserStore>,
    locks: Arc<UserLocks>,
    llm: Arc<dyn TextCompletion>,
    catalog: Arc<dyn CatalogProvider>,
    tracker: SessionTracker,
    ledger: CartLedger,
    context: ContextBuilder,
    events: broadcast::Sender<ReminderEvent>,
}

impl NourishAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn UserStore>,
        locks: Arc<UserLocks>,
        llm: Arc<dyn TextCompletion>,
        catalog: Arc<dyn CatalogProvider>,
        tracker: SessionTracker,
        ledger: CartLedger,
        context: ContextBuilder,
        events: broadcast::Sender<ReminderEvent>,
    ) -> Self {
        Self {
            store,
            locks,
            llm,
            catalog,
            tracker,
            ledger,
            context,
            events,
        }
    }

    /// Handle one inbound message and produce the reply text.
    pub async fn handle_message(&self, user_id: &str, channel_ref: &str, text: &str) -> String {
        let text = text.trim();
        self.touch(user_id, text).await;

        let reply = if let Some(command) = text.strip_prefix('!') {
            self.dispatch(user_id, channel_ref, command).await
        } else {
            self.converse(user_id, channel_ref, text).await
        };

        self.record_reply(user_id, &reply).await;
        reply
    }

    /// Mark the user active and log the inbound turn.
    async fn touch(&self, user_id: &str, text: &str) {
        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;
        rec.activity.last_activity = Some(Utc::now());
        self.context.push_turn(&mut rec, "user", text);
        self.store.put(user_id, rec).await;
    }

    async fn record_reply(&self, user_id: &str, reply: &str) {
        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;
        self.context.push_turn(&mut rec, "assistant", reply);
        self.store.put(user_id, rec).await;
    }

    async fn dispatch(&self, user_id: &str, channel_ref: &str, command: &str) -> String {
        let mut parts = command.splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or("").to_lowercase();
        let rest = parts.next().unwrap_or("").trim();

        match verb.as_str() {
            "help" => HELP_TEXT.to_string(),
            "start" => START_TEXT.to_string(),
            "healthgoal" => self.set_health_goal(user_id, rest).await,
            "stats" => self.stats(user_id).await,
            "food" => self.food(user_id).await,
            "recipe" => self.recipe(user_id, rest).await,
            "fitnessplan" => self.fitness_plan(user_id).await,
            "workout" => self.workout(user_id).await,
            "order" => self.order(user_id, rest).await,
            "address" => self.set_address(user_id, rest).await,
            "dietary" => self.set_dietary(user_id, rest).await,
            "addfavorite" => self.add_favorite(user_id, rest).await,
            "favorites" => self.favorites(user_id).await,
            "cart" => self.cart(user_id, rest).await,
            "checkout" => self.checkout(user_id, rest).await,
            "test" if rest.eq_ignore_ascii_case("activity") => {
                self.test_activity(user_id, channel_ref).await
            }
            _ => format!("Unknown command `!{}`. Try `!help`.", verb),
        }
    }

    async fn converse(&self, user_id: &str, channel_ref: &str, text: &str) -> String {
        // Session signals win over chit-chat: a confident start/end gets an
        // acknowledgment, not an LLM reply.
        match self.tracker.classify_and_apply(user_id, channel_ref, text).await {
            Some(SessionSignal::Started { game }) => {
                return match game {
                    Some(game) => format!(
                        "GLHF with {}! I'll keep an eye on the clock and remind you to take breaks.",
                        game
                    ),
                    None => "Session started — GLHF! I'll remind you to take breaks.".to_string(),
                };
            }
            Some(SessionSignal::Ended { .. }) => {
                let rec = self.store.get(user_id).await;
                let minutes = rec
                    .session_history
                    .last()
                    .map(|s| s.duration_minutes)
                    .unwrap_or(0);
                return format!(
                    "GG! That session was {} minutes. Stretch, hydrate, and check `!food` if you're hungry.",
                    minutes
                );
            }
            None => {}
        }

        let rec = self.store.get(user_id).await;
        let system = self.context.system_prompt(&rec);
        // The inbound turn is already in the window; don't send it twice.
        let window = self.context.recent_window(&rec);
        let history = &window[..window.len().saturating_sub(1)];
        match self.llm.complete(&system, history, text).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(user_id = %user_id, "Chat completion failed: {}", e);
                "I'm having trouble thinking right now — try again in a minute. \
                 `!help` still works."
                    .to_string()
            }
        }
    }

    async fn set_health_goal(&self, user_id: &str, goal_text: &str) -> String {
        if goal_text.is_empty() {
            return "Tell me the goal, e.g. `!healthgoal lose 5kg without losing ranked time`."
                .to_string();
        }

        // Structure the goal if the model cooperates; keep the raw text otherwise.
        let goal = match analyze_goal(self.llm.as_ref(), goal_text).await {
            Ok(analysis) => HealthGoal {
                primary: analysis.primary_goal,
                summary: analysis.summary,
                dietary_needs: analysis.dietary_needs,
                created_at: Utc::now(),
            },
            Err(e) => {
                warn!(user_id = %user_id, "Goal analysis failed, storing raw text: {}", e);
                HealthGoal {
                    primary: goal_text.to_string(),
                    summary: String::new(),
                    dietary_needs: Vec::new(),
                    created_at: Utc::now(),
                }
            }
        };

        let summary = if goal.summary.is_empty() {
            goal.primary.clone()
        } else {
            goal.summary.clone()
        };

        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;
        rec.health_goal = Some(goal);
        self.store.put(user_id, rec).await;
        info!(user_id = %user_id, "Health goal updated");
        format!(
            "Goal locked in: {}\nI'll factor it into food picks, recipes, and plans.",
            summary
        )
    }

    async fn stats(&self, user_id: &str) -> String {
        let rec = self.store.get(user_id).await;
        let minutes = rec.activity.minutes_today(Utc::now().date_naive());
        let mut out = format!("**Your stats**\nGaming today: {} minutes", minutes);
        match &rec.session {
            Some(session) => {
                let elapsed = (Utc::now() - session.started_at).num_minutes();
                out.push_str(&format!("\nActive session: {} minutes in", elapsed));
            }
            None => out.push_str("\nNo active session"),
        }
        out.push_str(&format!(
            "\nPast sessions: {} | Orders placed: {}",
            rec.session_history.len(),
            rec.order_history.len()
        ));
        out
    }

    async fn food(&self, user_id: &str) -> String {
        let rec = self.store.get(user_id).await;
        let goal = rec.health_goal.as_ref().map(|g| g.primary.clone());
        let restrictions = rec.dietary.restrictions();
        let results = self
            .catalog
            .search(None, None, goal.as_deref(), &restrictions)
            .await;
        if results.is_empty() {
            return "No restaurants available right now — try again later.".to_string();
        }

        let mut out = String::from("**Picks for you** (use `!order <id>` for a menu)\n");
        for r in results.iter().take(5) {
            out.push_str(&format!(
                "`{}` {} — {} | ★{:.1} | ${:.2} fee | {}\n",
                r.id, r.name, r.cuisine, r.rating, r.delivery_fee, r.estimated_time
            ));
        }
        out
    }

    async fn recipe(&self, user_id: &str, craving: &str) -> String {
        let craving = if craving.is_empty() { "something tasty" } else { craving };
        let rec = self.store.get(user_id).await;
        let system = self.generator_prompt(
            &rec,
            "Write one healthy recipe matching the craving. Ingredients with amounts, \
             numbered steps, rough macros. Keep it under 200 words.",
        );
        match self.llm.complete(&system, &[], craving).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(user_id = %user_id, "Recipe generation failed: {}", e);
                RECIPE_FALLBACK.to_string()
            }
        }
    }

    async fn fitness_plan(&self, user_id: &str) -> String {
        let rec = self.store.get(user_id).await;
        let system = self.generator_prompt(
            &rec,
            "Write a one-week fitness plan that fits around long gaming sessions. \
             Short daily entries, minimal equipment.",
        );
        match self.llm.complete(&system, &[], "weekly plan please").await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(user_id = %user_id, "Fitness plan generation failed: {}", e);
                FITNESS_FALLBACK.to_string()
            }
        }
    }

    async fn workout(&self, user_id: &str) -> String {
        let rec = self.store.get(user_id).await;
        let system = self.generator_prompt(
            &rec,
            "Write a 5-minute no-equipment break workout for someone at a desk. \
             Numbered, with durations or rep counts.",
        );
        match self.llm.complete(&system, &[], "quick break workout").await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(user_id = %user_id, "Workout generation failed: {}", e);
                WORKOUT_FALLBACK.to_string()
            }
        }
    }

    /// Shared system prompt for the content generators: task plus whatever
    /// goal/restriction facts we hold for the user.
    fn generator_prompt(&self, rec: &UserRecord, task: &str) -> String {
        let mut system = format!("You are GG Nourish, a health companion for gamers. {}", task);
        if let Some(goal) = &rec.health_goal {
            system.push_str(&format!(" The user's health goal: {}.", goal.primary));
        }
        let restrictions = rec.dietary.restrictions();
        if !restrictions.is_empty() {
            system.push_str(&format!(
                " Hard dietary restrictions, never violate them: {}.",
                restrictions.join(", ")
            ));
        }
        system
    }

    /// `!order` lists restaurants; `!order <id>` shows a menu; `!order <id> <n>`
    /// adds menu item n (1-based) to the cart.
    async fn order(&self, user_id: &str, rest: &str) -> String {
        let mut args = rest.split_whitespace();
        let Some(restaurant_id) = args.next() else {
            return self.food(user_id).await;
        };

        let menu = self.catalog.menu(restaurant_id).await;
        if menu.is_empty() {
            return format!("I don't know restaurant `{}`. Try `!food` for the list.", restaurant_id);
        }

        let restaurant_name = self
            .catalog
            .search(None, None, None, &[])
            .await
            .into_iter()
            .find(|r| r.id == restaurant_id)
            .map(|r| r.name)
            .unwrap_or_else(|| restaurant_id.to_string());

        match args.next().and_then(|n| n.parse::<usize>().ok()) {
            None => {
                let mut out = format!(
                    "**{}** — add with `!order {} <number>`\n",
                    restaurant_name, restaurant_id
                );
                for (i, item) in menu.iter().enumerate() {
                    out.push_str(&format!(
                        "{}. {} — ${:.2} | {} kcal, {}g protein\n",
                        i + 1,
                        item.name,
                        item.price,
                        item.calories,
                        item.protein_g
                    ));
                }
                out
            }
            Some(0) => "Menu items are numbered from 1.".to_string(),
            Some(n) if n > menu.len() => {
                format!("That menu only has {} items.", menu.len())
            }
            Some(n) => {
                let item = &menu[n - 1];
                let cart = self
                    .ledger
                    .add_item(
                        user_id,
                        CartItem {
                            restaurant: restaurant_name,
                            item_name: item.name.clone(),
                            unit_price: item.price,
                            quantity: 1,
                        },
                    )
                    .await;
                format!(
                    "Added **{}**. Cart has {} line(s) — `!cart` to review, `!checkout` when ready.",
                    item.name,
                    cart.len()
                )
            }
        }
    }

    async fn set_address(&self, user_id: &str, address: &str) -> String {
        if address.is_empty() {
            return "Usage: `!address 12 Main St, Springfield`".to_string();
        }
        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;
        rec.address = Some(address.to_string());
        self.store.put(user_id, rec).await;
        format!("Delivery address set to: {}", address)
    }

    /// Comma-separated tokens; anything that looks like a diet label goes to
    /// `diets`, everything else is treated as an allergy. Always a union —
    /// existing entries stay.
    async fn set_dietary(&self, user_id: &str, tokens: &str) -> String {
        if tokens.is_empty() {
            let rec = self.store.get(user_id).await;
            let restrictions = rec.dietary.restrictions();
            return if restrictions.is_empty() {
                "No dietary restrictions on file. Add some: `!dietary peanuts, vegetarian`".to_string()
            } else {
                format!("On file: {}", restrictions.join(", "))
            };
        }

        const DIET_LABELS: &[&str] = &[
            "vegetarian", "vegan", "pescatarian", "keto", "paleo", "halal", "kosher",
            "gluten-free", "dairy-free",
        ];
        let mut allergies = Vec::new();
        let mut diets = Vec::new();
        for token in tokens.split(',') {
            let token = token.trim().to_lowercase();
            if token.is_empty() {
                continue;
            }
            if DIET_LABELS.contains(&token.as_str()) {
                diets.push(token);
            } else {
                allergies.push(token);
            }
        }

        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;
        rec.dietary.merge(&allergies, &diets);
        let all = rec.dietary.restrictions();
        self.store.put(user_id, rec).await;
        format!("Got it. On file now: {}", all.join(", "))
    }

    async fn add_favorite(&self, user_id: &str, rest: &str) -> String {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let kind = parts.next().unwrap_or("").to_lowercase();
        let name = parts.next().unwrap_or("").trim().to_string();
        if name.is_empty() {
            return "Usage: `!addfavorite restaurant Green Bowl` or `!addfavorite recipe Protein Ramen`"
                .to_string();
        }

        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;
        match kind.as_str() {
            "restaurant" => {
                rec.favorites.restaurants.insert(name.clone());
            }
            "recipe" => {
                rec.favorites.recipes.insert(name.clone());
            }
            _ => return "First argument must be `restaurant` or `recipe`.".to_string(),
        }
        self.store.put(user_id, rec).await;
        format!("Saved **{}** to your {} favorites.", name, kind)
    }

    async fn favorites(&self, user_id: &str) -> String {
        let rec = self.store.get(user_id).await;
        if rec.favorites.restaurants.is_empty() && rec.favorites.recipes.is_empty() {
            return "No favorites yet. `!addfavorite restaurant <name>` to start.".to_string();
        }
        let mut out = String::from("**Favorites**\n");
        if !rec.favorites.restaurants.is_empty() {
            let list: Vec<&str> = rec.favorites.restaurants.iter().map(String::as_str).collect();
            out.push_str(&format!("Restaurants: {}\n", list.join(", ")));
        }
        if !rec.favorites.recipes.is_empty() {
            let list: Vec<&str> = rec.favorites.recipes.iter().map(String::as_str).collect();
            out.push_str(&format!("Recipes: {}\n", list.join(", ")));
        }
        out
    }

    /// `!cart` shows it; `!cart set <n> <qty>` updates line n (1-based, qty 0
    /// removes); `!cart clear` empties it.
    async fn cart(&self, user_id: &str, rest: &str) -> String {
        let mut args = rest.split_whitespace();
        match args.next() {
            None | Some("") => self.render_cart(user_id).await,
            Some("clear") => {
                self.ledger.clear(user_id).await;
                "Cart cleared.".to_string()
            }
            Some("set") => {
                let (Some(index), Some(qty)) = (
                    args.next().and_then(|n| n.parse::<usize>().ok()),
                    args.next().and_then(|q| q.parse::<u32>().ok()),
                ) else {
                    return "Usage: `!cart set <line> <quantity>` (quantity 0 removes)".to_string();
                };
                if index == 0 {
                    return "Cart lines are numbered from 1.".to_string();
                }
                match self.ledger.update_quantity(user_id, index - 1, qty).await {
                    Ok(_) => self.render_cart(user_id).await,
                    Err(e) => e.user_message(),
                }
            }
            Some(_) => "Cart subcommands: `!cart`, `!cart set <line> <qty>`, `!cart clear`".to_string(),
        }
    }

    async fn render_cart(&self, user_id: &str) -> String {
        let (cart, totals) = self.ledger.view(user_id).await;
        if cart.is_empty() {
            return "Your cart is empty. `!food` to browse.".to_string();
        }
        let mut out = format!("**Cart — {}**\n", cart[0].restaurant);
        for (i, line) in cart.iter().enumerate() {
            out.push_str(&format!(
                "{}. {} x{} — ${:.2}\n",
                i + 1,
                line.item_name,
                line.quantity,
                line.line_total()
            ));
        }
        out.push_str(&format!(
            "Subtotal ${:.2} + delivery ${:.2} + tax ${:.2} = **${:.2}**",
            totals.subtotal, totals.delivery_fee, totals.tax, totals.grand_total
        ));
        out
    }

    /// `!checkout [payment]` or `!checkout [payment] | <notes for the kitchen>`.
    async fn checkout(&self, user_id: &str, rest: &str) -> String {
        let (payment, instructions) = match rest.split_once('|') {
            Some((payment, notes)) => (payment.trim(), notes.trim()),
            None => (rest, ""),
        };
        let payment = if payment.is_empty() { "card on file" } else { payment };
        match self.ledger.checkout(user_id, payment, instructions).await {
            Ok(order) => {
                let eta = (order.estimated_delivery - order.placed_at).num_minutes();
                format!(
                    "✅ Order placed at **{}**!\nOrder `{}` — ${:.2} via {}\nETA about {} minutes. \
                     Fuel up and hydrate.",
                    order.restaurant, order.order_id, order.grand_total, order.payment_method, eta
                )
            }
            Err(e) => e.user_message(),
        }
    }

    /// Emit a simulated break reminder through the normal event path, so the
    /// whole delivery chain can be exercised from chat.
    async fn test_activity(&self, user_id: &str, channel_ref: &str) -> String {
        let event = ReminderEvent {
            user_id: user_id.to_string(),
            channel_ref: channel_ref.to_string(),
            message: "⚠️ **HEALTH ALERT** ⚠️ (test)\n\nThis is what a break reminder looks like. \
                      Stand up, roll your shoulders, drink some water."
                .to_string(),
        };
        if self.events.send(event).is_err() {
            return "Reminder pipeline has no listener right now.".to_string();
        }
        "Sent a simulated break reminder.".to_string()
    }
}
