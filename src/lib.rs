// Canteen menu service for the two Lübeck locations

pub mod api;
pub mod assemble;
pub mod cache;
pub mod clock;
pub mod config;
pub mod extract;
pub mod logging;
pub mod menu;
pub mod source;
pub mod store;

// Re-export key types for convenience
pub use assemble::MenuAssembler;
pub use cache::{CacheStatsReport, MissPolicy, TtlCache};
pub use clock::{Clock, SystemClock};
pub use config::{Config, ConfigError};
pub use extract::{ExtractionError, MenuDocument, MenuExtractor};
pub use menu::{Allergen, Day, DayExtract, Diet, HasError, Meal, Menu, PriceByGroup, Week};
pub use source::{DocumentSource, HttpDocumentSource, SourceConfig, SourceError};
pub use store::{Location, LocationStore, ResourceKind, StoreError, StoreSettings};
