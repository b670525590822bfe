// Weekly menu model shared by the extractor, the assembler and the read API

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// Legend entry, e.g. `a1` -> `Gluten`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allergen {
    pub code: String,
    pub name: String,
}

// Price per customer group, all zero when the raw price text has no group split
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceByGroup {
    pub students: f64,
    pub employees: f64,
    pub guests: f64,
}

// Dietary flags. Only constructible in ways that keep `vegan => vegetarian`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Diet {
    vegetarian: bool,
    vegan: bool,
}

impl Diet {
    pub const VEGAN_CODE: &'static str = "vn";
    pub const VEGETARIAN_CODE: &'static str = "ve";

    pub fn new(vegetarian: bool, vegan: bool) -> Self {
        Self {
            vegetarian: vegetarian || vegan,
            vegan,
        }
    }

    /// Reads a space- or comma-separated list of diet codes such as `"ve, fi"`.
    pub fn from_codes(codes: &str) -> Self {
        let mut vegetarian = false;
        let mut vegan = false;
        for token in codes
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
        {
            vegan |= token == Self::VEGAN_CODE;
            vegetarian |= token == Self::VEGETARIAN_CODE;
        }
        Self::new(vegetarian, vegan)
    }

    pub fn vegetarian(&self) -> bool {
        self.vegetarian
    }

    pub fn vegan(&self) -> bool {
        self.vegan
    }
}

// A field that could not be located in the markup is `None`, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meal {
    pub name: Option<String>,
    pub price: Option<String>,
    pub price_by_group: PriceByGroup,
    pub vegetarian: bool,
    pub vegan: bool,
    pub location: Option<String>,
    pub allergens: Vec<Allergen>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Week {
    Current,
    Next,
}

impl Week {
    pub const ALL: [Week; 2] = [Week::Current, Week::Next];

    pub fn offset(self) -> u32 {
        match self {
            Week::Current => 0,
            Week::Next => 1,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "current" => Some(Week::Current),
            "next" => Some(Week::Next),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HasError {
    HasError,
    NoError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Day {
    pub date: NaiveDate,
    pub week: Week,
    pub open: bool,
    pub has_error: HasError,
    pub meals: Vec<Meal>,
}

impl Day {
    /// Open-but-unknown day: the page had no usable container for the date.
    pub fn unavailable(date: NaiveDate, week: Week) -> Self {
        Self {
            date,
            week,
            open: true,
            has_error: HasError::HasError,
            meals: Vec::new(),
        }
    }
}

// Current week followed by next week, Monday to Sunday each
pub type Menu = Vec<Day>;

/// Outcome of extracting one date from a menu page.
#[derive(Debug, Clone, PartialEq)]
pub enum DayExtract {
    // No container for the date on the page
    Missing,
    // Container carries the closure marker
    Closed,
    Open(Vec<Meal>),
}

impl DayExtract {
    pub fn into_day(self, date: NaiveDate, week: Week) -> Day {
        match self {
            DayExtract::Missing => Day::unavailable(date, week),
            DayExtract::Closed => Day {
                date,
                week,
                open: false,
                has_error: HasError::NoError,
                meals: Vec::new(),
            },
            DayExtract::Open(meals) => Day {
                date,
                week,
                open: true,
                has_error: HasError::NoError,
                meals,
            },
        }
    }
}
