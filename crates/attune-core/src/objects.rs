//! Moving objects of the tracking task.
//!
//! The field owns its RNG so a seeded session replays identically.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Serialize;

pub type ObjectId = u32;

/// Keeps spawned objects away from the walls.
const SPAWN_MARGIN: f32 = 20.0;
/// Speeds are never sampled below this fraction of the mean.
const MIN_SPEED_FRACTION: f64 = 0.2;
/// Relative mean-speed changes below this leave velocities untouched.
const SPEED_SCALE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedObject {
    pub id: ObjectId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub is_target: bool,
    /// Targets look like distractors while identification runs
    pub identity_hidden: bool,
    stored_velocity: Option<Vec2>,
}

impl TrackedObject {
    pub fn is_frozen(&self) -> bool {
        self.stored_velocity.is_some()
    }

    /// Velocity held while frozen.
    pub fn stored_velocity(&self) -> Option<Vec2> {
        self.stored_velocity
    }

    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }

    /// Store and zero the velocity. A second freeze keeps the first stored value.
    fn freeze(&mut self) {
        if self.stored_velocity.is_none() {
            self.stored_velocity = Some(self.velocity);
            self.velocity = Vec2::ZERO;
        }
    }

    fn restore(&mut self) {
        if let Some(v) = self.stored_velocity.take() {
            self.velocity = v;
        }
    }
}

#[derive(Debug)]
pub struct ObjectField {
    objects: Vec<TrackedObject>,
    width: f32,
    height: f32,
    rng: StdRng,
    speed_mean: f64,
}

impl ObjectField {
    pub fn new(width: f32, height: f32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            objects: Vec::new(),
            width: width.max(1.0),
            height: height.max(1.0),
            rng,
            speed_mean: 0.0,
        }
    }

    pub fn objects(&self) -> &[TrackedObject] {
        &self.objects
    }

    pub fn get(&self, id: ObjectId) -> Option<&TrackedObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn target_ids(&self) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|o| o.is_target)
            .map(|o| o.id)
            .collect()
    }

    pub fn target_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_target).count()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    fn sample_speed(&mut self, mean: f64, sd: f64) -> f32 {
        let mean = if mean.is_finite() { mean.max(0.0) } else { 0.0 };
        let sd = if sd.is_finite() { sd.max(0.0) } else { 0.0 };
        let sampled = match Normal::new(mean, sd) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => mean,
        };
        sampled.max(mean * MIN_SPEED_FRACTION) as f32
    }

    fn random_heading(&mut self) -> Vec2 {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        Vec2::new(angle.cos(), angle.sin())
    }

    /// Replace all objects. The first `target_count` of a shuffled order become targets.
    pub fn spawn(&mut self, total: u32, target_count: u32, speed_mean: f64, speed_sd: f64) {
        self.objects.clear();
        self.speed_mean = if speed_mean.is_finite() { speed_mean.max(0.0) } else { 0.0 };
        let margin_x = SPAWN_MARGIN.min(self.width / 2.0);
        let margin_y = SPAWN_MARGIN.min(self.height / 2.0);
        for id in 0..total {
            let x = self.rng.gen_range(margin_x..=self.width - margin_x);
            let y = self.rng.gen_range(margin_y..=self.height - margin_y);
            let heading = self.random_heading();
            let speed = self.sample_speed(speed_mean, speed_sd);
            self.objects.push(TrackedObject {
                id,
                position: Vec2::new(x, y),
                velocity: Vec2::new(heading.x * speed, heading.y * speed),
                is_target: false,
                identity_hidden: false,
                stored_velocity: None,
            });
        }
        self.rebalance_targets(target_count);
        log::debug!(
            "Spawned {} objects ({} targets)",
            self.objects.len(),
            self.target_count()
        );
    }

    /// Adjust the number of targets, promoting or demoting random objects.
    pub fn rebalance_targets(&mut self, target_count: u32) {
        let wanted = (target_count as usize).min(self.objects.len());
        let mut current = self.target_count();
        if current == wanted {
            return;
        }
        let mut order: Vec<usize> = (0..self.objects.len()).collect();
        order.shuffle(&mut self.rng);
        for idx in order {
            if current == wanted {
                break;
            }
            let obj = &mut self.objects[idx];
            if current < wanted && !obj.is_target {
                obj.is_target = true;
                current += 1;
            } else if current > wanted && obj.is_target {
                obj.is_target = false;
                current -= 1;
            }
        }
    }

    /// Mean speed the current velocities were drawn around.
    pub fn speed_mean(&self) -> f64 {
        self.speed_mean
    }

    /// Rescale every velocity, frozen ones included, from the current mean to `speed_mean`.
    /// Headings and the relative spread between objects are kept. Returns whether anything changed.
    pub fn scale_speed(&mut self, speed_mean: f64) -> bool {
        if !speed_mean.is_finite() || speed_mean <= 0.0 || self.speed_mean <= 0.0 {
            return false;
        }
        let ratio = speed_mean / self.speed_mean;
        if (ratio - 1.0).abs() < SPEED_SCALE_EPSILON {
            return false;
        }
        self.speed_mean = speed_mean;
        let k = ratio as f32;
        for obj in &mut self.objects {
            let v = obj.stored_velocity.as_mut().unwrap_or(&mut obj.velocity);
            v.x *= k;
            v.y *= k;
        }
        true
    }

    /// Integrate positions, bouncing off the arena walls.
    pub fn step(&mut self, dt: f64) {
        if !dt.is_finite() || dt <= 0.0 {
            return;
        }
        let dt = dt as f32;
        let (w, h) = (self.width, self.height);
        for obj in &mut self.objects {
            obj.position.x += obj.velocity.x * dt;
            obj.position.y += obj.velocity.y * dt;
            if obj.position.x < 0.0 {
                obj.position.x = -obj.position.x;
                obj.velocity.x = obj.velocity.x.abs();
            } else if obj.position.x > w {
                obj.position.x = 2.0 * w - obj.position.x;
                obj.velocity.x = -obj.velocity.x.abs();
            }
            if obj.position.y < 0.0 {
                obj.position.y = -obj.position.y;
                obj.velocity.y = obj.velocity.y.abs();
            } else if obj.position.y > h {
                obj.position.y = 2.0 * h - obj.position.y;
                obj.velocity.y = -obj.velocity.y.abs();
            }
            obj.position.x = obj.position.x.clamp(0.0, w);
            obj.position.y = obj.position.y.clamp(0.0, h);
        }
    }

    pub fn freeze_all(&mut self) {
        self.objects.iter_mut().for_each(TrackedObject::freeze);
    }

    pub fn restore_all(&mut self) {
        self.objects.iter_mut().for_each(TrackedObject::restore);
    }

    pub fn hide_identities(&mut self) {
        for obj in &mut self.objects {
            obj.identity_hidden = true;
        }
    }

    pub fn reveal_identities(&mut self) {
        for obj in &mut self.objects {
            obj.identity_hidden = false;
        }
    }

    /// Swap one random target with one random distractor.
    /// Returns `(promoted, demoted)`, or `None` when either set is empty.
    pub fn swap_random_target(&mut self) -> Option<(ObjectId, ObjectId)> {
        let targets: Vec<usize> = (0..self.objects.len())
            .filter(|&i| self.objects[i].is_target)
            .collect();
        let distractors: Vec<usize> = (0..self.objects.len())
            .filter(|&i| !self.objects[i].is_target)
            .collect();
        let demote = *targets.choose(&mut self.rng)?;
        let promote = *distractors.choose(&mut self.rng)?;
        self.objects[demote].is_target = false;
        self.objects[promote].is_target = true;
        Some((self.objects[promote].id, self.objects[demote].id))
    }
}
