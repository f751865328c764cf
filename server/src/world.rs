//! Shared world model.
//!
//! Every in-game handler on every session task reads and mutates the same
//! [`World`]. It is built from the registry and spatial index only, so there
//! is no world-wide lock: actors and placed objects live in registries,
//! terrain, occupancy and object placement live in per-region spatial tables.

use crate::error::StoreError;
use crate::registry::{Handle, Registry};
use crate::spatial::SpatialIndex;
use crate::store::{WorldObject, WorldStore};
use log::{info, warn};
use shared::{Point, RegionId, SessionId};
use std::sync::Arc;

pub type ActorId = Handle;
pub type ObjectId = Handle;

/// Where new actors are placed before searching outward for a free tile.
pub const SPAWN_POINT: Point = Point::new(4, 4);
const SPAWN_SEARCH_RADIUS: i32 = 8;

/// Occupies a tile while a spawning actor is being stored; never an actor id.
const CLAIMED_TILE: ActorId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Player,
    Npc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    /// Session that controls this actor
    pub session_id: SessionId,
    pub name: String,
    pub kind: ActorKind,
    pub region: RegionId,
    pub position: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved(Point),
    /// The target tile is a wall or occupied; carries the unchanged position
    Blocked(Point),
    Missing,
}

/// Result of importing one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionReport {
    pub region: RegionId,
    /// Number of blocked tiles on success
    pub result: Result<usize, StoreError>,
}

pub struct World {
    store: Arc<dyn WorldStore>,
    spawn_region: RegionId,
    actors: Registry<Actor>,
    objects: Registry<WorldObject>,
    terrain: SpatialIndex<()>,
    occupancy: SpatialIndex<ActorId>,
    placements: SpatialIndex<ObjectId>,
}

impl World {
    pub fn new(store: Arc<dyn WorldStore>, spawn_region: RegionId) -> Self {
        Self {
            store,
            spawn_region,
            actors: Registry::new(),
            objects: Registry::new(),
            terrain: SpatialIndex::new(),
            occupancy: SpatialIndex::new(),
            placements: SpatialIndex::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn WorldStore> {
        &self.store
    }

    pub fn actors(&self) -> &Registry<Actor> {
        &self.actors
    }

    pub fn objects(&self) -> &Registry<WorldObject> {
        &self.objects
    }

    pub fn terrain(&self) -> &SpatialIndex<()> {
        &self.terrain
    }

    pub fn spawn_region(&self) -> RegionId {
        self.spawn_region
    }

    /// Loads a region from the store and swaps it in.
    ///
    /// Importing the same region again replaces its terrain and objects in
    /// one step each; a failed import leaves the previous contents in place.
    pub fn import_region(&self, region: RegionId) -> Result<usize, StoreError> {
        let data = self.store.load_region(region)?;
        let blocked = data.blocked.len();

        let mut previous = Vec::new();
        self.placements.for_each(region, |_, id| previous.push(*id));

        let placed: Vec<(Point, ObjectId)> = data
            .objects
            .into_iter()
            .map(|(point, object)| (point, self.objects.add(object)))
            .collect();

        self.terrain
            .replace_region(region, data.blocked.into_iter().map(|point| (point, ())));
        self.placements.replace_region(region, placed);

        for id in previous {
            self.objects.remove(id);
        }

        Ok(blocked)
    }

    /// Imports several regions, logging and reporting each one.
    pub fn import_regions(&self, regions: &[RegionId]) -> Vec<RegionReport> {
        regions
            .iter()
            .map(|&region| {
                let result = self.import_region(region);
                match &result {
                    Ok(blocked) => info!("Imported region {} ({} blocked tiles)", region, blocked),
                    Err(e) => warn!("Failed to import region {}: {}", region, e),
                }
                RegionReport { region, result }
            })
            .collect()
    }

    pub fn is_walkable(&self, region: RegionId, point: Point) -> bool {
        self.terrain.has_region(region)
            && !self.terrain.contains(region, point)
            && !self.occupancy.contains(region, point)
    }

    /// Places a new actor on the free tile nearest [`SPAWN_POINT`] in the
    /// spawn region. `None` if the region is not loaded or full.
    pub fn spawn_actor(
        &self,
        session_id: SessionId,
        name: &str,
        kind: ActorKind,
    ) -> Option<(ActorId, Actor)> {
        let region = self.spawn_region;
        if !self.terrain.has_region(region) {
            return None;
        }

        for radius in 0..=SPAWN_SEARCH_RADIUS {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dx.abs().max(dy.abs()) != radius {
                        continue;
                    }
                    let point = Point::new(SPAWN_POINT.x + dx, SPAWN_POINT.y + dy);
                    if self.terrain.contains(region, point) {
                        continue;
                    }
                    if !self.occupancy.insert_if_vacant(region, point, CLAIMED_TILE) {
                        continue;
                    }

                    let actor = Actor {
                        session_id,
                        name: name.to_string(),
                        kind,
                        region,
                        position: point,
                    };
                    let id = self.actors.add(actor.clone());
                    self.occupancy.add(region, point, id);
                    info!("Spawned {} as actor {} at ({}, {})", name, id, point.x, point.y);
                    return Some((id, actor));
                }
            }
        }

        warn!("No free spawn tile in region {} for {}", region, name);
        None
    }

    /// Moves an actor one tile, if the target is free.
    pub fn move_actor(&self, id: ActorId, dx: i32, dy: i32) -> MoveOutcome {
        let Some(actor) = self.actors.get(id) else {
            return MoveOutcome::Missing;
        };

        let target = actor.position.step(dx, dy);
        if target == actor.position
            || self.terrain.contains(actor.region, target)
            || !self.occupancy.insert_if_vacant(actor.region, target, id)
        {
            return MoveOutcome::Blocked(actor.position);
        }

        if !self.actors.modify(id, |a| a.position = target) {
            // Despawned while we were claiming the tile
            self.occupancy.remove_if_eq(actor.region, target, &id);
            return MoveOutcome::Missing;
        }
        self.occupancy.remove_if_eq(actor.region, actor.position, &id);
        MoveOutcome::Moved(target)
    }

    pub fn despawn_actor(&self, id: ActorId) -> Option<Actor> {
        let actor = self.actors.take(id)?;
        self.occupancy.remove_if_eq(actor.region, actor.position, &id);
        info!("Despawned actor {} ({})", id, actor.name);
        Some(actor)
    }

    /// What someone looking at `point` sees.
    pub fn describe(&self, region: RegionId, point: Point) -> String {
        if let Some(object) = self
            .placements
            .get(region, point)
            .and_then(|id| self.objects.get(id))
        {
            return object.description;
        }
        if let Some(actor) = self
            .occupancy
            .get(region, point)
            .and_then(|id| self.actors.get(id))
        {
            return format!("You see {}.", actor.name);
        }
        if self.terrain.contains(region, point) {
            return "A solid wall.".to_string();
        }
        "Nothing here.".to_string()
    }

    /// All actors, ordered by id.
    pub fn roster(&self) -> Vec<(ActorId, Actor)> {
        let mut actors = self.actors.snapshot();
        actors.sort_unstable_by_key(|(id, _)| *id);
        actors
    }

    /// Sessions whose actors are in `region`.
    pub fn sessions_in_region(&self, region: RegionId) -> Vec<SessionId> {
        let mut sessions = Vec::new();
        self.actors.for_each(|_, actor| {
            if actor.region == region {
                sessions.push(actor.session_id);
            }
        });
        sessions
    }

    /// Answers `who` and `reload <region>` itself and hands anything else to
    /// the store.
    pub fn admin_query(&self, query: &str) -> Result<String, StoreError> {
        let mut words = query.split_whitespace();
        match (words.next(), words.next()) {
            (Some("who"), None) => Ok(self
                .roster()
                .into_iter()
                .map(|(id, actor)| {
                    format!(
                        "{} {} ({:?}) session {} @ {}:{},{}",
                        id,
                        actor.name,
                        actor.kind,
                        actor.session_id,
                        actor.region,
                        actor.position.x,
                        actor.position.y
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")),
            (Some("reload"), Some(region)) => {
                let region: RegionId = region
                    .parse()
                    .map_err(|_| StoreError::BadQuery(format!("not a region id: {}", region)))?;
                let blocked = self.import_region(region)?;
                Ok(format!("region {} reloaded ({} blocked tiles)", region, blocked))
            }
            _ => self.store.admin_query(query),
        }
    }
}
