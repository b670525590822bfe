// Per-location caches for the menu and the allergen legend
// Built once at startup and shared with the read API.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::assemble::MenuAssembler;
use crate::cache::{CacheStatsReport, MissPolicy, TtlCache};
use crate::clock::Clock;
use crate::menu::{Allergen, Menu};
use crate::source::SourceError;

// Supported canteens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Th,
    Mh,
}

impl Location {
    pub const ALL: [Location; 2] = [Location::Th, Location::Mh];

    pub fn mensa_id(self) -> u8 {
        match self {
            Location::Th => 8,
            Location::Mh => 9,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Location::Th => "th",
            Location::Mh => "mh",
        }
    }

    /// `mh` selects MH; anything else, including no value, selects TH.
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some(value) if value.eq_ignore_ascii_case("mh") => Location::Mh,
            _ => Location::Th,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Menu,
    Allergens,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Menu => f.write_str("menu"),
            ResourceKind::Allergens => f.write_str("allergens"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Loading {kind} for {location} failed: {source}")]
    LoadFailed {
        location: Location,
        kind: ResourceKind,
        #[source]
        source: SourceError,
    },

    #[error("{failed} of {total} cache refreshes failed")]
    RefreshFailed { failed: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub menu_ttl: Duration,
    pub allergens_ttl: Duration,
    pub miss_policy: MissPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            menu_ttl: Duration::from_secs(10 * 60),
            allergens_ttl: Duration::from_secs(24 * 60 * 60),
            miss_policy: MissPolicy::Independent,
        }
    }
}

pub type MenuCache = TtlCache<Menu, SourceError>;
pub type AllergenCache = TtlCache<Vec<Allergen>, SourceError>;

struct LocationCaches {
    menu: MenuCache,
    allergens: AllergenCache,
}

impl LocationCaches {
    fn new(
        location: Location,
        assembler: &Arc<MenuAssembler>,
        settings: &StoreSettings,
        clock: &Arc<dyn Clock>,
    ) -> Self {
        let menu_assembler = Arc::clone(assembler);
        let menu = TtlCache::with_clock(
            format!("{location}/menu"),
            settings.menu_ttl,
            Box::new(move || {
                let assembler = Arc::clone(&menu_assembler);
                async move { assembler.menu(location).await }.boxed()
            }),
            Arc::clone(clock),
        )
        .with_policy(settings.miss_policy);

        let allergen_assembler = Arc::clone(assembler);
        let allergens = TtlCache::with_clock(
            format!("{location}/allergens"),
            settings.allergens_ttl,
            Box::new(move || {
                let assembler = Arc::clone(&allergen_assembler);
                async move { assembler.allergens(location).await }.boxed()
            }),
            Arc::clone(clock),
        )
        .with_policy(settings.miss_policy);

        Self { menu, allergens }
    }
}

pub struct LocationStore {
    th: LocationCaches,
    mh: LocationCaches,
}

impl LocationStore {
    pub fn new(
        assembler: Arc<MenuAssembler>,
        settings: &StoreSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            th: LocationCaches::new(Location::Th, &assembler, settings, &clock),
            mh: LocationCaches::new(Location::Mh, &assembler, settings, &clock),
        }
    }

    fn caches(&self, location: Location) -> &LocationCaches {
        match location {
            Location::Th => &self.th,
            Location::Mh => &self.mh,
        }
    }

    pub async fn menu(&self, location: Location) -> Result<Arc<Menu>, StoreError> {
        self.caches(location)
            .menu
            .read()
            .await
            .map_err(|source| StoreError::LoadFailed {
                location,
                kind: ResourceKind::Menu,
                source,
            })
    }

    pub async fn allergens(&self, location: Location) -> Result<Arc<Vec<Allergen>>, StoreError> {
        self.caches(location)
            .allergens
            .read()
            .await
            .map_err(|source| StoreError::LoadFailed {
                location,
                kind: ResourceKind::Allergens,
                source,
            })
    }

    pub fn last_update(&self, location: Location, kind: ResourceKind) -> Option<DateTime<Utc>> {
        let caches = self.caches(location);
        match kind {
            ResourceKind::Menu => caches.menu.last_updated_at(),
            ResourceKind::Allergens => caches.allergens.last_updated_at(),
        }
    }

    pub fn stats(&self, location: Location, kind: ResourceKind) -> CacheStatsReport {
        let caches = self.caches(location);
        match kind {
            ResourceKind::Menu => caches.menu.stats(),
            ResourceKind::Allergens => caches.allergens.stats(),
        }
    }

    /// Refreshes every cache of every location concurrently. All refreshes run
    /// to completion; a failure is reported only after the others are done.
    pub async fn refresh_all(&self) -> Result<(), StoreError> {
        let mut refreshes: Vec<BoxFuture<'_, Result<(), StoreError>>> = Vec::new();
        for location in Location::ALL {
            let caches = self.caches(location);
            refreshes.push(
                async move {
                    caches
                        .menu
                        .refresh()
                        .await
                        .map(|_| ())
                        .map_err(|source| StoreError::LoadFailed {
                            location,
                            kind: ResourceKind::Menu,
                            source,
                        })
                }
                .boxed(),
            );
            refreshes.push(
                async move {
                    caches
                        .allergens
                        .refresh()
                        .await
                        .map(|_| ())
                        .map_err(|source| StoreError::LoadFailed {
                            location,
                            kind: ResourceKind::Allergens,
                            source,
                        })
                }
                .boxed(),
            );
        }

        let total = refreshes.len();
        let results = join_all(refreshes).await;
        let mut failed = 0;
        for result in results {
            if let Err(e) = result {
                warn!("{}", e);
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(StoreError::RefreshFailed { failed, total });
        }
        info!("Refreshed {} caches", total);
        Ok(())
    }
}
