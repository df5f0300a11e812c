//! Simulated participants for offline sessions.
//!
//! Each bot wanders toward a random target, publishes its cursor every tick,
//! and occasionally drops a stamp. Bots write through the same [`Composer`]
//! and store surface as a person, so views cannot tell them apart.

#[cfg(test)]
#[path = "bots_test.rs"]
mod bots_test;

use std::sync::Arc;
use std::time::Duration;

use canvas::camera::Point;
use canvas::compose::{ComposeError, Composer};
use canvas::doc::Cursor;
use canvas::store::{Namespace, StoreAdapter};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const BOT_COLORS: [&str; 5] = ["#f87171", "#60a5fa", "#4ade80", "#fbbf24", "#a78bfa"];
pub const BOT_EMOJIS: [&str; 4] = ["❤️", "🔥", "👀", "🚀"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotConfig {
    pub count: usize,
    pub tick: Duration,
    /// World units moved per tick.
    pub speed: f64,
    /// Initial positions fall within `±spawn_range` on each axis.
    pub spawn_range: f64,
    /// Targets fall within `±wander_range` on each axis.
    pub wander_range: f64,
    pub retarget_within: f64,
    /// Chance per tick that one bot drops a stamp.
    pub stamp_chance: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            count: BOT_COLORS.len(),
            tick: Duration::from_millis(50),
            speed: 5.0,
            spawn_range: 500.0,
            wander_range: 1000.0,
            retarget_within: 10.0,
            stamp_chance: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bot {
    pub id: String,
    pub color: &'static str,
    pub at: Point,
    pub target: Point,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub cursors: usize,
    pub stamps: usize,
}

pub struct BotSwarm {
    config: BotConfig,
    bots: Vec<Bot>,
    composer: Composer,
    rng: StdRng,
}

impl BotSwarm {
    #[must_use]
    pub fn new(config: BotConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let bots = (0..config.count)
            .map(|i| Bot {
                id: format!("bot-{}", i + 1),
                color: BOT_COLORS[i % BOT_COLORS.len()],
                at: random_point(&mut rng, config.spawn_range),
                target: random_point(&mut rng, config.wander_range),
            })
            .collect();
        Self { config, bots, composer: Composer::new(), rng }
    }

    #[must_use]
    pub fn bots(&self) -> &[Bot] {
        &self.bots
    }

    /// Advance every bot one tick and write the results to `store`.
    pub fn step(&mut self, store: &dyn StoreAdapter, now_ms: i64) -> StepReport {
        let mut report = StepReport::default();
        let (speed, within, range) = (self.config.speed, self.config.retarget_within, self.config.wander_range);

        for bot in &mut self.bots {
            let (dx, dy) = (bot.target.x - bot.at.x, bot.target.y - bot.at.y);
            let dist = dx.hypot(dy);
            if dist < within.max(f64::EPSILON) {
                bot.target = random_point(&mut self.rng, range);
            } else {
                let step = speed.min(dist);
                bot.at.x += dx / dist * step;
                bot.at.y += dy / dist * step;
            }

            let cursor = Cursor { id: bot.id.clone(), x: bot.at.x, y: bot.at.y, color: bot.color.to_owned(), last_update: now_ms };
            match serde_json::to_value(&cursor) {
                Ok(record) => match store.set_latest(Namespace::Cursors, &bot.id, record) {
                    Ok(()) => report.cursors += 1,
                    Err(e) => debug!(bot = %bot.id, error = %e, "bot cursor publish failed"),
                },
                Err(e) => debug!(bot = %bot.id, error = %e, "bot cursor encode failed"),
            }
        }

        if !self.bots.is_empty() && self.rng.random_bool(self.config.stamp_chance.clamp(0.0, 1.0)) {
            let pick = self.rng.random_range(0..self.bots.len());
            let emoji = BOT_EMOJIS.choose(&mut self.rng).copied().unwrap_or(BOT_EMOJIS[0]);
            let bot = &self.bots[pick];
            match self.composer.stamp_at(store, &mut self.rng, &bot.id, emoji, bot.at, now_ms) {
                Ok(_) => report.stamps += 1,
                Err(ComposeError::TooSoon { .. }) => {}
                Err(e) => debug!(bot = %bot.id, error = %e, "bot stamp failed"),
            }
        }
        report
    }
}

fn random_point(rng: &mut impl Rng, range: f64) -> Point {
    Point::new(rng.random_range(-range..=range), rng.random_range(-range..=range))
}

/// Run `swarm` against `store` on its own task until the handle is aborted.
#[must_use]
pub fn spawn_bots(mut swarm: BotSwarm, store: Arc<dyn StoreAdapter>) -> JoinHandle<()> {
    info!(count = swarm.bots.len(), tick = ?swarm.config.tick, "bots started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(swarm.config.tick);
        loop {
            ticker.tick().await;
            let report = swarm.step(store.as_ref(), frames::now_ms());
            if report.stamps > 0 {
                debug!(stamps = report.stamps, "bots dropped a stamp");
            }
        }
    })
}
