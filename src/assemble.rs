// Builds the two-week menu for a location from its menu pages

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate};
use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::extract::{MenuDocument, MenuExtractor};
use crate::menu::{Allergen, Day, Menu, Week};
use crate::source::{DocumentSource, SourceError};
use crate::store::Location;

/// Monday to Sunday of the week `week` is relative to `today`.
pub fn week_dates(today: NaiveDate, week: Week) -> [NaiveDate; 7] {
    let days_since_monday = today.weekday().num_days_from_monday() as i64;
    let monday =
        today - Duration::days(days_since_monday) + Duration::days(7 * week.offset() as i64);
    std::array::from_fn(|index| monday + Duration::days(index as i64))
}

pub struct MenuAssembler {
    source: Arc<dyn DocumentSource>,
    extractor: Arc<MenuExtractor>,
    clock: Arc<dyn Clock>,
    base_url: String,
}

impl MenuAssembler {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        extractor: Arc<MenuExtractor>,
        clock: Arc<dyn Clock>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            source,
            extractor,
            clock,
            base_url: base_url.into(),
        }
    }

    pub fn page_url(&self, location: Location, week: Week) -> String {
        format!(
            "{}?ort=3&mensa={}&nw={}#mensaplan",
            self.base_url,
            location.mensa_id(),
            week.offset()
        )
    }

    /// Fourteen days: the current week then the next, each Monday to Sunday.
    pub async fn menu(&self, location: Location) -> Result<Menu, SourceError> {
        let today = self.clock.today();
        let weeks = try_join_all(
            Week::ALL
                .into_iter()
                .map(|week| self.week(location, week, today)),
        )
        .await?;

        Ok(weeks.into_iter().flatten().collect())
    }

    pub async fn allergens(&self, location: Location) -> Result<Vec<Allergen>, SourceError> {
        let markup = self
            .source
            .fetch_document(&self.page_url(location, Week::Current))
            .await?;
        let document = MenuDocument::parse(&markup);
        Ok(self.extractor.allergens(&document))
    }

    async fn week(
        &self,
        location: Location,
        week: Week,
        today: NaiveDate,
    ) -> Result<Vec<Day>, SourceError> {
        let markup = self
            .source
            .fetch_document(&self.page_url(location, week))
            .await?;
        Ok(self.build_week(&markup, week, today))
    }

    // Synchronous on purpose: the parsed document must not live across an await
    fn build_week(&self, markup: &str, week: Week, today: NaiveDate) -> Vec<Day> {
        let document = MenuDocument::parse(markup);
        let legend = self.extractor.allergens(&document);
        debug!("Legend for {:?} week has {} entries", week, legend.len());

        week_dates(today, week)
            .into_iter()
            .map(
                |date| match self.extractor.day(&document, date, &legend) {
                    Ok(extract) => extract.into_day(date, week),
                    Err(e) => {
                        warn!("Extracting {} failed, marking day as errored: {}", date, e);
                        Day::unavailable(date, week)
                    }
                },
            )
            .collect()
    }
}
