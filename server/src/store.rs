//! Persistence collaborator.
//!
//! The core only needs three synchronous capabilities from storage: load the
//! contents of a region, check credentials, and run an opaque administrative
//! query. [`MemoryStore`] is the in-process implementation used by the binary
//! and the tests.

use crate::error::StoreError;
use shared::{Point, RegionId, Role};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

pub const MAX_NAME_LEN: usize = 24;

/// Something placed in the world that can be looked at.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldObject {
    pub name: String,
    pub description: String,
}

/// Everything a region import produces.
#[derive(Debug, Clone, Default)]
pub struct RegionData {
    /// Tiles nothing can stand on
    pub blocked: Vec<Point>,
    pub objects: Vec<(Point, WorldObject)>,
}

pub trait WorldStore: Send + Sync {
    /// Loads one region. Safe to call again for the same region.
    fn load_region(&self, region: RegionId) -> Result<RegionData, StoreError>;

    /// Returns the account's role when the credentials are accepted.
    fn authenticate(&self, name: &str, password: &str) -> Option<Role>;

    /// Runs an administrative query and returns its printable output.
    fn admin_query(&self, query: &str) -> Result<String, StoreError>;
}

#[derive(Debug, Clone)]
struct Account {
    password: String,
    role: Role,
}

#[derive(Debug, Clone, Copy)]
struct RoomLayout {
    width: i32,
    height: i32,
}

impl RoomLayout {
    /// A walled rectangle with a pillar in the middle and a signpost near
    /// the top-left corner.
    fn build(&self, region: RegionId) -> RegionData {
        let mut blocked = Vec::new();
        for x in 0..self.width {
            blocked.push(Point::new(x, 0));
            blocked.push(Point::new(x, self.height - 1));
        }
        for y in 1..self.height - 1 {
            blocked.push(Point::new(0, y));
            blocked.push(Point::new(self.width - 1, y));
        }
        blocked.push(Point::new(self.width / 2, self.height / 2));

        let objects = vec![(
            Point::new(2, 2),
            WorldObject {
                name: "signpost".to_string(),
                description: format!("A signpost reads: \"Region {}\".", region),
            },
        )];

        RegionData { blocked, objects }
    }
}

/// In-memory accounts and generated rooms.
///
/// Unknown names are registered as players on first login. The account
/// `admin` / `admin` is seeded as an administrator.
pub struct MemoryStore {
    accounts: Mutex<HashMap<String, Account>>,
    rooms: BTreeMap<RegionId, RoomLayout>,
    reachable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(
            "admin".to_string(),
            Account {
                password: "admin".to_string(),
                role: Role::Admin,
            },
        );

        let rooms = (0..4)
            .map(|region| (region, RoomLayout { width: 24, height: 16 }))
            .collect();

        Self {
            accounts: Mutex::new(accounts),
            rooms,
            reachable: AtomicBool::new(true),
        }
    }

    /// Adds or resizes a room. Rooms smaller than 3x3 are clamped.
    pub fn with_room(mut self, region: RegionId, width: i32, height: i32) -> Self {
        self.rooms.insert(
            region,
            RoomLayout {
                width: width.max(3),
                height: height.max(3),
            },
        );
        self
    }

    pub fn with_account(self, name: &str, password: &str, role: Role) -> Self {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                name.to_string(),
                Account {
                    password: password.to_string(),
                    role,
                },
            );
        self
    }

    /// Simulates losing the backing store.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.reachable.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unreachable("memory store offline".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldStore for MemoryStore {
    fn load_region(&self, region: RegionId) -> Result<RegionData, StoreError> {
        self.check_reachable()?;
        self.rooms
            .get(&region)
            .map(|layout| layout.build(region))
            .ok_or(StoreError::RegionUnavailable(region))
    }

    fn authenticate(&self, name: &str, password: &str) -> Option<Role> {
        if self.check_reachable().is_err() {
            return None;
        }
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return None;
        }

        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        match accounts.get(name) {
            Some(account) if account.password == password => Some(account.role),
            Some(_) => None,
            None => {
                accounts.insert(
                    name.to_string(),
                    Account {
                        password: password.to_string(),
                        role: Role::Player,
                    },
                );
                Some(Role::Player)
            }
        }
    }

    fn admin_query(&self, query: &str) -> Result<String, StoreError> {
        self.check_reachable()?;
        let mut words = query.split_whitespace();

        match (words.next(), words.next()) {
            (Some("accounts"), None) => {
                let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
                let mut names: Vec<&str> = accounts.keys().map(String::as_str).collect();
                names.sort_unstable();
                Ok(names.join(", "))
            }
            (Some("regions"), None) => Ok(self
                .rooms
                .iter()
                .map(|(id, layout)| format!("{} ({}x{})", id, layout.width, layout.height))
                .collect::<Vec<_>>()
                .join(", ")),
            (Some("tiles"), Some(region)) => {
                let region: RegionId = region
                    .parse()
                    .map_err(|_| StoreError::BadQuery(format!("not a region id: {}", region)))?;
                let data = self.load_region(region)?;
                Ok(format!("{} blocked, {} objects", data.blocked.len(), data.objects.len()))
            }
            _ => Err(StoreError::BadQuery(query.to_string())),
        }
    }
}
