//! Toy one-dimensional duel
//!
//! Each slot holds two fighters facing each other on a line between two
//! walls. A fighter is a vertical stack of parts that can be pushed left
//! or right. Parts are pulled toward their fighter's centre, facing parts
//! at overlapping heights collide, and a hit lifts the struck fighter off
//! the ground. This is enough to produce contacts, distances and heights
//! for the match logic; it is not a physics engine.

use super::{ArenaEnvironment, BodyRef, Contact, Side};

const START_OFFSET: f32 = 2.0;
const WALL: f32 = 6.0;
const CONTACT_RADIUS: f32 = 0.3;
const PART_SPACING: f32 = 0.5;
const PART_MASS: f32 = 10.0;
const SPRING: f32 = 8.0;
const DAMPING: f32 = 0.98;
const GRAVITY: f32 = 9.8;
const LIFT: f32 = 0.2;

const LEFT_WALL: u64 = 0;
const RIGHT_WALL: u64 = 1;

#[derive(Debug, Clone, PartialEq)]
struct Part {
    x: f32,
    vx: f32,
    /// Position before the last integration step
    prev_x: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct Fighter {
    parts: Vec<Part>,
    /// Height of the lowest part off the ground
    y: f32,
    vy: f32,
}

impl Fighter {
    fn new(x: f32, parts: usize) -> Self {
        Self { parts: vec![Part { x, vx: 0.0, prev_x: x }; parts], y: 0.0, vy: 0.0 }
    }

    fn center(&self) -> f32 {
        self.parts.iter().map(|p| p.x).sum::<f32>() / self.parts.len() as f32
    }

    fn part_height(&self, part: usize) -> f32 {
        self.y + part as f32 * PART_SPACING
    }

    fn velocity(&self, part: usize) -> [f32; 3] {
        [self.parts[part].vx, self.vy, 0.0]
    }
}

fn starting_fighters(parts: usize) -> [Fighter; 2] {
    [Fighter::new(-START_OFFSET, parts), Fighter::new(START_OFFSET, parts)]
}

/// Multi-slot toy simulation
///
/// # Example
///
/// ```rust
/// use colosseum_rl::env::{duel::DuelEnvironment, ArenaEnvironment, Side};
///
/// let mut env = DuelEnvironment::new(2, 3);
/// assert_eq!(env.action_dim(), 3);
/// assert_eq!(env.encode_observation(0, Side::A).len(), env.observation_dim());
///
/// env.apply_action(0, Side::A, 0, [25.0, 0.0, 0.0]);
/// env.step(16.0);
/// assert!(env.agent_distance(0).unwrap() < 4.0);
/// ```
#[derive(Debug, Clone)]
pub struct DuelEnvironment {
    slots: Vec<[Fighter; 2]>,
    parts: usize,
    contacts: Vec<(usize, Contact)>,
}

impl DuelEnvironment {
    /// Create `slots` duels of fighters with `parts` parts each
    pub fn new(slots: usize, parts: usize) -> Self {
        let parts = parts.max(1);
        Self {
            slots: (0..slots).map(|_| starting_fighters(parts)).collect(),
            parts,
            contacts: Vec::new(),
        }
    }

    /// Number of slots
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Advance every slot by `dt_ms` milliseconds, collecting contacts
    pub fn step(&mut self, dt_ms: f64) {
        let dt = (dt_ms / 1000.0) as f32;
        for slot in 0..self.slots.len() {
            self.integrate(slot, dt);
            self.collide_fighters(slot);
            self.collide_walls(slot);
        }
    }

    /// Contacts collected since the last call
    pub fn drain_contacts(&mut self) -> Vec<(usize, Contact)> {
        std::mem::take(&mut self.contacts)
    }

    fn integrate(&mut self, slot: usize, dt: f32) {
        for fighter in &mut self.slots[slot] {
            let center = fighter.center();
            for part in &mut fighter.parts {
                part.vx += SPRING * (center - part.x) * dt;
                part.vx *= DAMPING;
                part.prev_x = part.x;
                part.x += part.vx * dt;
            }
            fighter.vy -= GRAVITY * dt;
            fighter.y += fighter.vy * dt;
            if fighter.y <= 0.0 {
                fighter.y = 0.0;
                fighter.vy = 0.0;
            }
        }
    }

    fn collide_fighters(&mut self, slot: usize) {
        let parts = self.parts;
        for i in 0..parts {
            for j in 0..parts {
                let [a, b] = &self.slots[slot];
                let (pa, pb) = (&a.parts[i], &b.parts[j]);
                // Swept test so fast parts cannot tunnel through each other
                let crossed = (pa.prev_x - pb.prev_x).signum() != (pa.x - pb.x).signum();
                let overlap_x = crossed || (pa.x - pb.x).abs() < CONTACT_RADIUS;
                let overlap_y = (a.part_height(i) - b.part_height(j)).abs() < PART_SPACING;
                if !(overlap_x && overlap_y) {
                    continue;
                }
                let a_left = pa.prev_x <= pb.prev_x;

                let va = a.velocity(i);
                let vb = b.velocity(j);
                let body_a = BodyRef::Fighter { side: Side::A, part: i };
                let body_b = BodyRef::Fighter { side: Side::B, part: j };
                self.contacts.push((
                    slot,
                    Contact { body: body_a, target: body_b, body_velocity: va, target_velocity: vb },
                ));
                self.contacts.push((
                    slot,
                    Contact { body: body_b, target: body_a, body_velocity: vb, target_velocity: va },
                ));

                // Equal-mass exchange along the line, then separate
                let [a, b] = &mut self.slots[slot];
                let impact = (va[0] - vb[0]).abs();
                std::mem::swap(&mut a.parts[i].vx, &mut b.parts[j].vx);
                let mid = (a.parts[i].x + b.parts[j].x) / 2.0;
                let offset = if a_left { CONTACT_RADIUS / 2.0 } else { -CONTACT_RADIUS / 2.0 };
                a.parts[i].x = mid - offset;
                b.parts[j].x = mid + offset;
                a.parts[i].prev_x = a.parts[i].x;
                b.parts[j].prev_x = b.parts[j].x;

                // The slower body is the one being hit
                if va[0].abs() > vb[0].abs() {
                    b.vy += impact * LIFT;
                } else {
                    a.vy += impact * LIFT;
                }
            }
        }
    }

    fn collide_walls(&mut self, slot: usize) {
        for side in Side::BOTH {
            let fighter = &mut self.slots[slot][side.index()];
            for (index, part) in fighter.parts.iter_mut().enumerate() {
                let wall = if part.x < -WALL {
                    part.x = -WALL;
                    LEFT_WALL
                } else if part.x > WALL {
                    part.x = WALL;
                    RIGHT_WALL
                } else {
                    continue;
                };
                self.contacts.push((
                    slot,
                    Contact {
                        body: BodyRef::Fighter { side, part: index },
                        target: BodyRef::Scenery(wall),
                        body_velocity: [part.vx, fighter.vy, 0.0],
                        target_velocity: [0.0; 3],
                    },
                ));
                part.vx = -part.vx * 0.5;
            }
        }
    }
}

impl ArenaEnvironment for DuelEnvironment {
    fn observation_dim(&self) -> usize {
        4 * self.parts + 2
    }

    fn action_dim(&self) -> usize {
        self.parts
    }

    fn encode_observation(&self, slot: usize, side: Side) -> Vec<f32> {
        let own = &self.slots[slot][side.index()];
        let opponent = &self.slots[slot][side.other().index()];
        // Mirror so both sides see the opponent in the same direction
        let mirror = if side == Side::A { 1.0 } else { -1.0 };
        let origin = own.center();

        let mut observation = Vec::with_capacity(self.observation_dim());
        for fighter in [own, opponent] {
            for part in &fighter.parts {
                observation.push(mirror * (part.x - origin));
                observation.push(mirror * part.vx);
            }
        }
        observation.push(own.y);
        observation.push(opponent.y);
        observation
    }

    fn apply_action(&mut self, slot: usize, side: Side, part: usize, force: [f32; 3]) {
        let mirror = if side == Side::A { 1.0 } else { -1.0 };
        if let Some(p) = self.slots[slot][side.index()].parts.get_mut(part) {
            p.vx += mirror * force[0] / PART_MASS;
        }
    }

    fn agent_distance(&self, slot: usize) -> Option<f32> {
        let [a, b] = self.slots.get(slot)?;
        Some((a.center() - b.center()).abs())
    }

    fn agent_height(&self, slot: usize, side: Side) -> Option<f32> {
        self.slots.get(slot).map(|fighters| fighters[side.index()].y)
    }

    fn reset_slot(&mut self, slot: usize) {
        if let Some(fighters) = self.slots.get_mut(slot) {
            *fighters = starting_fighters(self.parts);
        }
    }
}
